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
	crate::common::{ClientInfo, Document, ReadPreference, Result, ServerAddress},
	std::collections::HashMap,
	serde::{Serialize, Deserialize}
};

pub const MIN_WIRE_VERSION: i32 = 6;
pub const MAX_WIRE_VERSION: i32 = 8;
pub const RETRYABLE_WRITES_MIN_WIRE_VERSION: i32 = 6;

/// The transport seam. Everything below the topology core (connection
/// pooling, the binary codec, TLS, compression) lives behind this trait.
/// The monitor thread of every server handle probes through [`Transport::handshake`];
/// dispatch forwards commands through [`Transport::command`].
pub trait Transport: Send + Sync {
	/// Performs an `isMaster` handshake against `address` and returns the raw
	/// reply document.
	fn handshake(&self, address: &ServerAddress, client: &ClientInfo) -> Result<Document>;

	/// Runs a command against the `$cmd` collection of `db` on `address`.
	fn command(
		&self,
		address: &ServerAddress,
		db:      &str,
		command: &Document,
		ctx:     &WireContext
	) -> Result<Document>;

	/// Drops pooled connections for `address`. Invoked when a parse-layer
	/// error invalidates everything read from that server.
	fn clear_pool(&self, _address: &ServerAddress) {}
}

/// Per-operation context handed through to the wire layer. When
/// `will_retry_write` is set the wire layer includes `txnNumber` and `lsid`
/// in the command it assembles.
#[derive(Debug, Clone, Default)]
pub struct WireContext {
	pub read_preference:  Option<ReadPreference>,
	pub session_id:       Option<uuid::Uuid>,
	pub txn_number:       Option<i64>,
	pub will_retry_write: bool,
	pub operation_id:     usize
}

/// see https://github.com/mongodb/specifications/blob/master/source/server-discovery-and-monitoring/server-discovery-and-monitoring.rst#parsing-an-ismaster-response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IsMasterReply {
	pub ok:                              f64,
	pub ismaster:                        bool,
	pub min_wire_version:                i32,
	pub max_wire_version:                i32,
	pub logical_session_timeout_minutes: Option<i64>,
	pub compression:                     Option<Vec<Compressor>>,
	// sharded instances
	pub msg:                             Option<String>,
	// replica sets
	pub set_name:                        Option<String>,
	pub set_version:                     Option<i32>,
	pub election_id:                     Option<String>,
	pub secondary:                       Option<bool>,
	pub arbiter_only:                    Option<bool>,
	pub hidden:                          Option<bool>,
	pub hosts:                           Option<Vec<String>>,
	pub passives:                        Option<Vec<String>>,
	pub arbiters:                        Option<Vec<String>>,
	pub primary:                         Option<String>,
	pub me:                              Option<String>,
	pub tags:                            Option<HashMap<String, String>>,
	pub isreplicaset:                    Option<bool>
}

/// Reply envelope shared by every command.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenericReply {
	pub ok:     f64,
	pub code:   Option<i32>,
	pub errmsg: Option<String>
}

impl Default for GenericReply {
	fn default() -> Self {
		Self { ok: 1f64, code: None, errmsg: None }
	}
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compressor {
	Noop,
	Snappy,
	Zlib,
	Zstd
}

impl std::str::FromStr for Compressor {
	type Err = ();

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		Ok(match s {
			"noop"   => Self::Noop,
			"snappy" => Self::Snappy,
			"zlib"   => Self::Zlib,
			"zstd"   => Self::Zstd,
			_        => return Err(())
		})
	}
}

#[cfg(test)]
pub(crate) mod testing {
	use {
		super::*,
		crate::common::{to_document, Error, ErrorCode},
		std::{
			collections::VecDeque,
			sync::Mutex,
			time::{Duration, Instant}
		},
		serde_json::json
	};

	/// What a scripted endpoint does when poked.
	#[derive(Debug, Clone)]
	pub enum Scripted {
		Reply(Document),
		IoError,
		Garbage
	}

	impl Scripted {
		fn produce(&self) -> Result<Document> {
			match self {
				Self::Reply(doc) => Ok(doc.clone()),
				Self::IoError    => Err(Error::Io(std::io::Error::new(
					std::io::ErrorKind::ConnectionRefused, "connection refused"))),
				Self::Garbage    => Ok(to_document(json!({ "ismaster": "not-a-bool" })))
			}
		}
	}

	#[derive(Debug)]
	struct HeartbeatScript {
		delay:  Duration,
		action: Scripted
	}

	#[derive(Debug, Clone)]
	pub struct CommandLog {
		pub address:          ServerAddress,
		pub db:               String,
		pub name:             String,
		pub command:          Document,
		pub txn_number:       Option<i64>,
		pub will_retry_write: bool
	}

	/// An in-memory transport driven by per-address heartbeat scripts and a
	/// queue of canned command results. The default command result is
	/// `{ok: 1}`.
	#[derive(Debug, Default)]
	pub struct MockTransport {
		heartbeats:  Mutex<HashMap<ServerAddress, HeartbeatScript>>,
		commands:    Mutex<VecDeque<Scripted>>,
		pub log:     Mutex<Vec<CommandLog>>,
		pub cleared: Mutex<Vec<ServerAddress>>
	}

	impl MockTransport {
		pub fn set_heartbeat(&self, address: &ServerAddress, action: Scripted) {
			self.set_heartbeat_delayed(address, action, Duration::from_millis(0));
		}

		pub fn set_heartbeat_delayed(&self, address: &ServerAddress, action: Scripted, delay: Duration) {
			self.heartbeats.lock().unwrap()
				.insert(address.clone(), HeartbeatScript { delay, action });
		}

		pub fn push_command_result(&self, action: Scripted) {
			self.commands.lock().unwrap().push_back(action);
		}

		pub fn command_log(&self) -> Vec<CommandLog> {
			self.log.lock().unwrap().clone()
		}

		pub fn commands_named(&self, name: &str) -> Vec<CommandLog> {
			self.command_log().into_iter().filter(|l| l.name == name).collect()
		}
	}

	impl Transport for MockTransport {
		fn handshake(&self, address: &ServerAddress, _client: &ClientInfo) -> Result<Document> {
			let (delay, result) = {
				let scripts = self.heartbeats.lock().unwrap();
				match scripts.get(address) {
					Some(script) => (script.delay, script.action.produce()),
					None => (Duration::from_millis(0), Scripted::IoError.produce())
				}
			};
			if delay > Duration::from_millis(0) {
				std::thread::sleep(delay);
			}
			result
		}

		fn command(
			&self,
			address: &ServerAddress,
			db:      &str,
			command: &Document,
			ctx:     &WireContext
		) -> Result<Document> {
			self.log.lock().unwrap().push(CommandLog {
				address:          address.clone(),
				db:               db.to_string(),
				name:             command.keys().next().cloned().unwrap_or_default(),
				command:          command.clone(),
				txn_number:       ctx.txn_number,
				will_retry_write: ctx.will_retry_write
			});
			match self.commands.lock().unwrap().pop_front() {
				Some(action) => action.produce(),
				None => Ok(to_document(json!({ "ok": 1 })))
			}
		}

		fn clear_pool(&self, address: &ServerAddress) {
			self.cleared.lock().unwrap().push(address.clone());
		}
	}

	pub fn standalone_reply() -> Scripted {
		Scripted::Reply(to_document(json!({
			"ok": 1, "ismaster": true,
			"minWireVersion": 6, "maxWireVersion": 8,
			"logicalSessionTimeoutMinutes": 30
		})))
	}

	pub fn mongos_reply() -> Scripted {
		Scripted::Reply(to_document(json!({
			"ok": 1, "ismaster": true, "msg": "isdbgrid",
			"minWireVersion": 6, "maxWireVersion": 8,
			"logicalSessionTimeoutMinutes": 30
		})))
	}

	pub fn rs_primary_reply(set_name: &str, hosts: &[&ServerAddress], me: &ServerAddress) -> Scripted {
		Scripted::Reply(to_document(json!({
			"ok": 1, "ismaster": true,
			"setName": set_name, "setVersion": 1, "electionId": "000000000000000000000001",
			"hosts": hosts.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
			"me": me.to_string(), "primary": me.to_string(),
			"minWireVersion": 6, "maxWireVersion": 8,
			"logicalSessionTimeoutMinutes": 30
		})))
	}

	pub fn rs_secondary_reply(
		set_name: &str,
		hosts:    &[&ServerAddress],
		me:       &ServerAddress,
		primary:  &ServerAddress
	) -> Scripted {
		Scripted::Reply(to_document(json!({
			"ok": 1, "ismaster": false, "secondary": true,
			"setName": set_name,
			"hosts": hosts.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
			"me": me.to_string(), "primary": primary.to_string(),
			"minWireVersion": 6, "maxWireVersion": 8,
			"logicalSessionTimeoutMinutes": 30
		})))
	}

	pub fn operation_error(code: ErrorCode, msg: &str) -> Scripted {
		Scripted::Reply(to_document(json!({
			"ok": 0, "code": code as i32 as i64, "errmsg": msg
		})))
	}

	/// Polls `predicate` until it holds or `timeout` elapses.
	pub fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
		let deadline = Instant::now() + timeout;
		loop {
			if predicate() { return true; }
			if Instant::now() >= deadline { return false; }
			std::thread::sleep(Duration::from_millis(2));
		}
	}
}
