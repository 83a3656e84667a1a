// MIT License
//
// Copyright (c) 2019-2021 Tobias Pfeiffer
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

use {
	crate::{
		cursor::CursorFactory,
		session::ClientSession,
		wire::{Compressor, Transport}
	},
	std::{str::FromStr, sync::Arc, time::Duration},
	serde::Serialize
};

pub const DEFAULT_MONGO_PORT:               u16      = 27017;
pub const DEFAULT_LOCAL_THRESHOLD:          Duration = Duration::from_millis(15);
pub const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_HEARTBEAT_FREQUENCY:      Duration = Duration::from_millis(30_000);
pub const DEFAULT_MIN_HEARTBEAT_INTERVAL:   Duration = Duration::from_millis(500);

/// The document representation used at the codec seam. The binary serializer
/// lives behind [`crate::wire::Transport`]; within the topology core commands
/// and replies are plain JSON maps.
pub type Document = serde_json::Map<String, serde_json::Value>;

pub(crate) fn to_document(value: serde_json::Value) -> Document {
	match value {
		serde_json::Value::Object(map) => map,
		_ => Document::new()
	}
}

/// Splits a `db.collection` namespace at the first dot.
pub(crate) fn split_namespace(ns: &str) -> (&str, &str) {
	match ns.find('.') {
		Some(i) => (&ns[..i], &ns[i + 1..]),
		None    => (ns, "")
	}
}

/// A `host:port` pair, displayed in the canonical `host:port` form.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ServerAddress {
	pub host: String,
	pub port: u16
}

impl ServerAddress {
	pub fn new(host: impl Into<String>, port: u16) -> Self {
		Self { host: host.into(), port }
	}
}

impl std::fmt::Display for ServerAddress {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{}:{}", self.host, self.port)
	}
}

impl FromStr for ServerAddress {
	type Err = Error;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		Ok(match s.find(':') {
			Some(i) => Self {
				host: s[..i].to_string(),
				port: s[i + 1..].parse().map_err(|_| Error::Configuration(
					format!("failed to parse server address `{}`", s)))?
			},
			None => Self { host: s.to_string(), port: DEFAULT_MONGO_PORT }
		})
	}
}

impl From<(&str, u16)> for ServerAddress {
	fn from((host, port): (&str, u16)) -> Self {
		Self::new(host, port)
	}
}

/// Parses a comma-delimited `host[:port]` seedlist.
pub fn parse_seedlist(s: &str) -> Result<Vec<ServerAddress>> {
	s.split(',')
		.filter(|s| !s.is_empty())
		.map(str::parse)
		.collect()
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ServerSelectionConfig {
	pub local_threshold:          Duration,
	pub server_selection_timeout: Duration,
	pub heartbeat_frequency:      Duration,
	pub min_heartbeat_interval:   Duration
}

impl Default for ServerSelectionConfig {
	fn default() -> Self {
		Self {
			local_threshold:          DEFAULT_LOCAL_THRESHOLD,
			server_selection_timeout: DEFAULT_SERVER_SELECTION_TIMEOUT,
			heartbeat_frequency:      DEFAULT_HEARTBEAT_FREQUENCY,
			min_heartbeat_interval:   DEFAULT_MIN_HEARTBEAT_INTERVAL
		}
	}
}

#[derive(Clone, Default)]
pub struct TopologyOptions {
	/// Legacy single-host form; consulted only when the seedlist is empty.
	pub host:                    Option<String>,
	pub port:                    Option<u16>,
	pub replica_set:             Option<String>,
	pub appname:                 Option<String>,
	pub compressors:             Option<Vec<Compressor>>,
	pub server_selection_config: ServerSelectionConfig,
	pub transport:               Option<Arc<dyn Transport>>,
	pub cursor_factory:          Option<CursorFactory>
}

impl std::fmt::Debug for TopologyOptions {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		f.debug_struct("TopologyOptions")
			.field("host", &self.host)
			.field("port", &self.port)
			.field("replica_set", &self.replica_set)
			.field("appname", &self.appname)
			.field("compressors", &self.compressors)
			.field("server_selection_config", &self.server_selection_config)
			.finish()
	}
}

/// Per-operation options for `command` and the typed write paths.
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
	pub read_preference:          Option<ReadPreference>,
	pub retry_writes:             bool,
	pub session:                  Option<ClientSession>,
	pub server_selection_timeout: Option<Duration>
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReadPreference {
	pub mode:                  ReadPreferenceMode,
	pub max_staleness_seconds: isize,
	pub tag_sets:              Vec<std::collections::HashMap<String, String>>
}

impl Default for ReadPreference {
	fn default() -> Self {
		Self {
			mode:                  ReadPreferenceMode::Primary,
			max_staleness_seconds: -1,
			tag_sets:              vec![]
		}
	}
}

impl ReadPreference {
	pub fn primary() -> Self {
		Self::default()
	}

	pub fn primary_preferred() -> Self {
		Self { mode: ReadPreferenceMode::PrimaryPreferred, ..Self::default() }
	}

	pub fn secondary() -> Self {
		Self { mode: ReadPreferenceMode::Secondary, ..Self::default() }
	}
}

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub enum ReadPreferenceMode {
	Primary,
	PrimaryPreferred,
	Secondary,
	SecondaryPreferred,
	Nearest
}

impl FromStr for ReadPreferenceMode {
	type Err = ();

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		Ok(match s {
			"primary"            => Self::Primary,
			"primaryPreferred"   => Self::PrimaryPreferred,
			"secondary"          => Self::Secondary,
			"secondaryPreferred" => Self::SecondaryPreferred,
			"nearest"            => Self::Nearest,
			_ => return Err(())
		})
	}
}

/// Handshake metadata gathered from the host environment at topology
/// construction and handed to the transport.
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
	pub driver:   DriverInfo,
	pub os:       OsInfo,
	pub platform: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub application: Option<ApplicationInfo>
}

#[derive(Debug, Clone, Serialize)]
pub struct DriverInfo {
	pub name:    &'static str,
	pub version: &'static str
}

#[derive(Debug, Clone, Serialize)]
pub struct OsInfo {
	pub r#type:       &'static str,
	pub name:         &'static str,
	pub architecture: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub version:      Option<String>
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplicationInfo {
	pub name: String
}

impl ClientInfo {
	pub fn gather(appname: Option<&str>) -> Self {
		Self {
			driver: DriverInfo {
				name:    crate::DRIVER_NAME,
				version: env!("CARGO_PKG_VERSION")
			},
			os: OsInfo {
				r#type:       std::env::consts::FAMILY,
				name:         std::env::consts::OS,
				architecture: std::env::consts::ARCH,
				version:      None
			},
			platform:    "rust".to_string(),
			application: appname.map(|name| ApplicationInfo { name: name.to_string() })
		}
	}
}

pub type SdamResult<T> = std::result::Result<T, Error>;
pub(crate) type Result<T> = SdamResult<T>;

#[derive(Debug)]
pub enum Error {
	Configuration(String),
	Sync,
	Io(std::io::Error),
	/// Wire-level decoding failure. Triggers a pool-clearing server reset.
	Parse(String),
	Timeout(TimeoutCause, String),
	Compatibility(String),
	Operation(ErrorCode, String),
	Closed
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TimeoutCause {
	Deadline,
	WaitingToConnect,
	Monitoring
}

impl Error {
	/// The shared retryability classifier: transient network failures and the
	/// server-state codes that permit a single silent retry.
	pub fn is_retryable(&self) -> bool {
		match self {
			Self::Io(_) => true,
			Self::Operation(code, _) => matches!(code,
				ErrorCode::HostUnreachable
				| ErrorCode::HostNotFound
				| ErrorCode::NetworkTimeout
				| ErrorCode::ShutdownInProgress
				| ErrorCode::PrimarySteppedDown
				| ErrorCode::SocketException
				| ErrorCode::NotWritablePrimary
				| ErrorCode::InterruptedAtShutdown
				| ErrorCode::InterruptedDueToReplStateChange
				| ErrorCode::NotPrimaryNoSecondaryOk
				| ErrorCode::NotPrimaryOrSecondary),
			_ => false
		}
	}

	pub(crate) fn is_parse_layer(&self) -> bool {
		matches!(self, Self::Parse(_))
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Self::Timeout(_, msg) => f.write_str(msg),
			_ => <Self as std::fmt::Debug>::fmt(self, f)
		}
	}
}

impl From<std::io::Error> for Error {
	fn from(e: std::io::Error) -> Self {
		Self::Io(e)
	}
}

impl<T> From<std::sync::PoisonError<T>> for Error {
	fn from(_: std::sync::PoisonError<T>) -> Self {
		Self::Sync
	}
}

impl From<serde_json::Error> for Error {
	fn from(e: serde_json::Error) -> Self {
		Self::Parse(e.to_string())
	}
}

impl From<(ErrorCode, String)> for Error {
	fn from((code, msg): (ErrorCode, String)) -> Self {
		Self::Operation(code, msg)
	}
}

/// The subset of server error codes the dispatch layer classifies.
#[repr(u16)]
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum ErrorCode {
	Ok                              = 0,
	InternalError                   = 1,
	BadValue                        = 2,
	HostUnreachable                 = 6,
	HostNotFound                    = 7,
	Unauthorized                    = 13,
	MaxTimeMSExpired                = 50,
	WriteConcernFailed              = 64,
	NetworkTimeout                  = 89,
	ShutdownInProgress              = 91,
	PrimarySteppedDown              = 189,
	NoSuchSession                   = 206,
	SocketException                 = 9001,
	NotWritablePrimary              = 10107,
	DuplicateKey                    = 11000,
	InterruptedAtShutdown           = 11600,
	InterruptedDueToReplStateChange = 11602,
	NotPrimaryNoSecondaryOk         = 13435,
	NotPrimaryOrSecondary           = 13436,
	Unknown                         = 0xFFFF
}

impl Default for ErrorCode {
	fn default() -> Self {
		ErrorCode::Ok
	}
}

impl From<i32> for ErrorCode {
	fn from(v: i32) -> Self {
		match v {
			0     => Self::Ok,
			1     => Self::InternalError,
			2     => Self::BadValue,
			6     => Self::HostUnreachable,
			7     => Self::HostNotFound,
			13    => Self::Unauthorized,
			50    => Self::MaxTimeMSExpired,
			64    => Self::WriteConcernFailed,
			89    => Self::NetworkTimeout,
			91    => Self::ShutdownInProgress,
			189   => Self::PrimarySteppedDown,
			206   => Self::NoSuchSession,
			9001  => Self::SocketException,
			10107 => Self::NotWritablePrimary,
			11000 => Self::DuplicateKey,
			11600 => Self::InterruptedAtShutdown,
			11602 => Self::InterruptedDueToReplStateChange,
			13435 => Self::NotPrimaryNoSecondaryOk,
			13436 => Self::NotPrimaryOrSecondary,
			_     => Self::Unknown
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_seedlist_with_default_ports() {
		let seeds = parse_seedlist("a:1,b,c:3").unwrap();
		assert_eq!(seeds, vec![
			ServerAddress::new("a", 1),
			ServerAddress::new("b", DEFAULT_MONGO_PORT),
			ServerAddress::new("c", 3)
		]);
	}

	#[test]
	fn parse_seedlist_rejects_bad_port() {
		assert!(parse_seedlist("a:notaport").is_err());
	}

	#[test]
	fn address_display_is_canonical() {
		assert_eq!(ServerAddress::new("h", 27017).to_string(), "h:27017");
		assert_eq!("h".parse::<ServerAddress>().unwrap(), ServerAddress::new("h", 27017));
	}

	#[test]
	fn retryable_classifier() {
		assert!(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "reset")).is_retryable());
		assert!(Error::Operation(ErrorCode::PrimarySteppedDown, String::new()).is_retryable());
		assert!(Error::Operation(ErrorCode::NotWritablePrimary, String::new()).is_retryable());
		assert!(!Error::Operation(ErrorCode::DuplicateKey, String::new()).is_retryable());
		assert!(!Error::Parse("bad reply".to_string()).is_retryable());
	}

	#[test]
	fn namespace_split() {
		assert_eq!(split_namespace("db.coll.sub"), ("db", "coll.sub"));
		assert_eq!(split_namespace("admin"), ("admin", ""));
	}
}
