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
		common::{Document, Error, Result, ServerAddress},
		wire::{IsMasterReply, MIN_WIRE_VERSION, MAX_WIRE_VERSION, RETRYABLE_WRITES_MIN_WIRE_VERSION}
	},
	std::{
		collections::{HashMap, HashSet},
		sync::Arc,
		time::Duration
	}
};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ServerType {
	Unknown,
	Standalone,
	Mongos,
	RSPrimary,
	RSSecondary,
	RSArbiter,
	RSOther,
	RSGhost
}

impl Default for ServerType {
	fn default() -> Self {
		Self::Unknown
	}
}

impl ServerType {
	pub fn is_known(self) -> bool {
		self != Self::Unknown
	}

	pub fn is_data_bearing(self) -> bool {
		matches!(self, Self::Standalone | Self::Mongos | Self::RSPrimary | Self::RSSecondary)
	}

	pub fn is_writable(self) -> bool {
		matches!(self, Self::Standalone | Self::Mongos | Self::RSPrimary)
	}
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TopologyType {
	Unknown,
	Single,
	Sharded,
	ReplicaSetNoPrimary,
	ReplicaSetWithPrimary
}

impl Default for TopologyType {
	fn default() -> Self {
		Self::Unknown
	}
}

/// see https://github.com/mongodb/specifications/blob/master/source/server-discovery-and-monitoring/server-discovery-and-monitoring.rst#serverdescription
#[derive(Debug, Clone, PartialEq)]
pub struct ServerDescription {
	pub address:                         ServerAddress,
	pub r#type:                          ServerType,
	pub round_trip_time:                 Option<Duration>,
	/// The last `isMaster` reply received from this server, verbatim.
	pub is_master:                       Option<Document>,
	pub set_name:                        Option<String>,
	pub set_version:                     Option<i32>,
	pub election_id:                     Option<String>,
	pub hosts:                           Vec<ServerAddress>,
	pub passives:                        Vec<ServerAddress>,
	pub arbiters:                        Vec<ServerAddress>,
	pub tags:                            HashMap<String, String>,
	pub me:                              Option<ServerAddress>,
	pub primary:                         Option<ServerAddress>,
	pub logical_session_timeout_minutes: Option<i64>,
	pub min_wire_version:                i32,
	pub max_wire_version:                i32,
	pub error:                           Option<String>
}

impl ServerDescription {
	pub fn new(address: ServerAddress) -> Self {
		Self {
			address,
			r#type:                          ServerType::Unknown,
			round_trip_time:                 None,
			is_master:                       None,
			set_name:                        None,
			set_version:                     None,
			election_id:                     None,
			hosts:                           Vec::new(),
			passives:                        Vec::new(),
			arbiters:                        Vec::new(),
			tags:                            HashMap::new(),
			me:                              None,
			primary:                         None,
			logical_session_timeout_minutes: None,
			min_wire_version:                0,
			max_wire_version:                0,
			error:                           None
		}
	}

	/// Builds a description from a raw `isMaster` reply. A reply that cannot
	/// be decoded is a parse-layer error.
	pub fn from_reply(address: ServerAddress, reply: Document, round_trip_time: Duration) -> Result<Self> {
		let parsed: IsMasterReply = serde_json::from_value(serde_json::Value::Object(reply.clone()))?;

		let r#type = match &parsed {
			IsMasterReply { msg: Some(msg), .. } if msg == "isdbgrid"          => ServerType::Mongos,
			IsMasterReply { set_name: Some(_), ismaster: true, .. }            => ServerType::RSPrimary,
			IsMasterReply { set_name: Some(_), hidden: Some(true), .. }        => ServerType::RSOther,
			IsMasterReply { set_name: Some(_), secondary: Some(true), .. }     => ServerType::RSSecondary,
			IsMasterReply { set_name: Some(_), arbiter_only: Some(true), .. }  => ServerType::RSArbiter,
			IsMasterReply { set_name: Some(_), .. }                            => ServerType::RSOther,
			IsMasterReply { isreplicaset: Some(true), .. }                     => ServerType::RSGhost,
			_                                                                  => ServerType::Standalone
		};

		fn parse_address(s: &str) -> Result<ServerAddress> {
			s.parse().map_err(|_| Error::Parse(
				format!("invalid address `{}` in isMaster reply", s)))
		}

		fn parse_addresses(list: Option<Vec<String>>) -> Result<Vec<ServerAddress>> {
			list.unwrap_or_default().iter().map(|s| parse_address(s)).collect()
		}

		Ok(Self {
			address,
			r#type,
			round_trip_time:                 Some(round_trip_time),
			set_name:                        parsed.set_name,
			set_version:                     parsed.set_version,
			election_id:                     parsed.election_id,
			hosts:                           parse_addresses(parsed.hosts)?,
			passives:                        parse_addresses(parsed.passives)?,
			arbiters:                        parse_addresses(parsed.arbiters)?,
			tags:                            parsed.tags.unwrap_or_default(),
			me:                              parsed.me.as_deref().map(parse_address).transpose()?,
			primary:                         parsed.primary.as_deref().map(parse_address).transpose()?,
			logical_session_timeout_minutes: parsed.logical_session_timeout_minutes,
			min_wire_version:                parsed.min_wire_version,
			max_wire_version:                parsed.max_wire_version,
			error:                           None,
			is_master:                       Some(reply)
		})
	}

	/// A fresh `Unknown` description carrying the error that caused the reset.
	pub fn from_error(address: ServerAddress, error: &Error) -> Self {
		Self {
			error: Some(error.to_string()),
			..Self::new(address)
		}
	}

	pub(crate) fn wire_version_error(&self) -> Option<String> {
		if !self.r#type.is_known() {
			None
		} else if self.min_wire_version > MAX_WIRE_VERSION {
			Some(format!(
				"server at {} requires wire version {}, but this driver only supports up to {}",
				self.address, self.min_wire_version, MAX_WIRE_VERSION))
		} else if self.max_wire_version < MIN_WIRE_VERSION {
			Some(format!(
				"server at {} reports maximum wire version {}, but this driver requires at least {}",
				self.address, self.max_wire_version, MIN_WIRE_VERSION))
		} else {
			None
		}
	}
}

/// see https://github.com/mongodb/specifications/blob/master/source/server-discovery-and-monitoring/server-discovery-and-monitoring.rst#topologydescription
#[derive(Debug, Clone, PartialEq)]
pub struct TopologyDescription {
	pub r#type:                          TopologyType,
	pub set_name:                        Option<String>,
	pub max_set_version:                 Option<i32>,
	pub max_election_id:                 Option<String>,
	pub servers:                         HashMap<ServerAddress, Arc<ServerDescription>>,
	pub compatible:                      bool,
	pub compatibility_error:             Option<String>,
	pub logical_session_timeout_minutes: Option<i64>,
	pub local_threshold:                 Duration
}

impl TopologyDescription {
	/// The description every topology starts from: `Unknown` with no servers.
	pub fn new_unknown(local_threshold: Duration) -> Self {
		Self {
			r#type:                          TopologyType::Unknown,
			set_name:                        None,
			max_set_version:                 None,
			max_election_id:                 None,
			servers:                         HashMap::new(),
			compatible:                      true,
			compatibility_error:             None,
			logical_session_timeout_minutes: None,
			local_threshold
		}
	}

	/// The seeded description: every seed present as `Unknown`, the initial
	/// topology type derived from the seed count and the replica set option.
	pub fn seeded(seeds: &[ServerAddress], replica_set: Option<&str>, local_threshold: Duration) -> Self {
		let r#type = if replica_set.is_some() {
			TopologyType::ReplicaSetNoPrimary
		} else if seeds.len() == 1 {
			TopologyType::Single
		} else {
			TopologyType::Unknown
		};
		Self {
			r#type,
			set_name: replica_set.map(str::to_string),
			servers:  seeds.iter()
				.map(|address| (address.clone(), Arc::new(ServerDescription::new(address.clone()))))
				.collect(),
			..Self::new_unknown(local_threshold)
		}
	}

	pub fn has_server(&self, address: &ServerAddress) -> bool {
		self.servers.contains_key(address)
	}

	/// Snapshot of the per-server descriptions, in no particular order.
	pub fn server_descriptions(&self) -> Vec<Arc<ServerDescription>> {
		self.servers.values().cloned().collect()
	}

	pub fn supports_sessions(&self) -> bool {
		self.logical_session_timeout_minutes.is_some()
	}

	/// Retryable writes need session support plus a replica set member or
	/// mongos speaking a recent enough wire version; a standalone never
	/// qualifies.
	pub fn supports_retryable_writes(&self) -> bool {
		self.logical_session_timeout_minutes.is_some()
			&& self.servers.values().any(|s| matches!(s.r#type,
					ServerType::Mongos | ServerType::RSPrimary | ServerType::RSSecondary)
				&& s.max_wire_version >= RETRYABLE_WRITES_MIN_WIRE_VERSION)
	}

	/// Applies the SDAM transition rules for the current topology type,
	/// producing the successor description. Pure: no I/O, no live handles.
	/// An address that is not a member of the current description leaves it
	/// unchanged.
	pub fn update(&self, sd: ServerDescription) -> Self {
		if !self.servers.contains_key(&sd.address) {
			return self.clone();
		}

		let sd = Arc::new(sd);
		let mut next = self.clone();
		next.servers.insert(sd.address.clone(), sd.clone());

		match (self.r#type, sd.r#type) {
			// no-op
			(TopologyType::Single, _)
			| (TopologyType::Unknown, ServerType::Unknown)
			| (TopologyType::Unknown, ServerType::RSGhost)
			| (TopologyType::Sharded, ServerType::Unknown)
			| (TopologyType::Sharded, ServerType::Mongos)
			| (TopologyType::ReplicaSetNoPrimary, ServerType::Unknown)
			| (TopologyType::ReplicaSetNoPrimary, ServerType::RSGhost) => (),

			(TopologyType::Unknown, ServerType::Standalone) => {
				// a standalone amid other seeds cannot be part of the deployment
				if next.servers.len() > 1 {
					next.servers.remove(&sd.address);
				} else {
					next.r#type = TopologyType::Single;
				}
			}
			(TopologyType::Unknown, ServerType::Mongos) => next.r#type = TopologyType::Sharded,

			// remove
			(TopologyType::Sharded, _)
			| (TopologyType::ReplicaSetNoPrimary, ServerType::Standalone)
			| (TopologyType::ReplicaSetNoPrimary, ServerType::Mongos) => {
				next.servers.remove(&sd.address);
			}
			(TopologyType::ReplicaSetWithPrimary, ServerType::Standalone)
			| (TopologyType::ReplicaSetWithPrimary, ServerType::Mongos) => {
				next.servers.remove(&sd.address);
				next.check_if_has_primary();
			}

			// updateRSFromPrimary
			(TopologyType::Unknown, ServerType::RSPrimary)
			| (TopologyType::ReplicaSetNoPrimary, ServerType::RSPrimary)
			| (TopologyType::ReplicaSetWithPrimary, ServerType::RSPrimary) =>
				next.update_rs_from_primary(&sd),

			// updateRSWithoutPrimary
			(TopologyType::Unknown, ServerType::RSSecondary)
			| (TopologyType::Unknown, ServerType::RSArbiter)
			| (TopologyType::Unknown, ServerType::RSOther)
			| (TopologyType::ReplicaSetNoPrimary, ServerType::RSSecondary)
			| (TopologyType::ReplicaSetNoPrimary, ServerType::RSArbiter)
			| (TopologyType::ReplicaSetNoPrimary, ServerType::RSOther) =>
				next.update_rs_without_primary(&sd),

			// updateRSWithPrimaryFromMember
			(TopologyType::ReplicaSetWithPrimary, ServerType::RSSecondary)
			| (TopologyType::ReplicaSetWithPrimary, ServerType::RSArbiter)
			| (TopologyType::ReplicaSetWithPrimary, ServerType::RSOther) =>
				next.update_rs_with_primary_from_member(&sd),

			(TopologyType::ReplicaSetWithPrimary, ServerType::Unknown)
			| (TopologyType::ReplicaSetWithPrimary, ServerType::RSGhost) =>
				next.check_if_has_primary()
		}

		next.finalize();
		next
	}

	fn update_rs_from_primary(&mut self, sd: &Arc<ServerDescription>) {
		if self.set_name.is_none() {
			self.set_name = sd.set_name.clone();
		} else if self.set_name != sd.set_name {
			self.servers.remove(&sd.address);
			self.check_if_has_primary();
			return;
		}

		if let (Some(set_version), Some(election_id)) = (sd.set_version, sd.election_id.as_ref()) {
			if let (Some(max_set_version), Some(max_election_id)) =
				(self.max_set_version, self.max_election_id.as_ref()) {
				// the higher (setVersion, electionId) tuple wins; the stale
				// primary is demoted to Unknown
				if max_set_version > set_version
					|| (max_set_version == set_version && max_election_id.as_str() > election_id.as_str()) {
					self.servers.insert(sd.address.clone(),
						Arc::new(ServerDescription::new(sd.address.clone())));
					self.check_if_has_primary();
					return;
				}
			}
			self.max_election_id = Some(election_id.clone());
		}

		if let Some(set_version) = sd.set_version {
			if self.max_set_version.map_or(true, |max| set_version > max) {
				self.max_set_version = Some(set_version);
			}
		}

		// demote any previous primary
		let stale: Vec<ServerAddress> = self.servers.iter()
			.filter(|(address, desc)| **address != sd.address && desc.r#type == ServerType::RSPrimary)
			.map(|(address, _)| address.clone())
			.collect();
		for address in stale {
			self.servers.insert(address.clone(), Arc::new(ServerDescription::new(address)));
		}

		// sync the membership with the primary's view
		let peers: HashSet<&ServerAddress> = sd.hosts.iter()
			.chain(&sd.passives)
			.chain(&sd.arbiters)
			.collect();
		self.servers.retain(|address, _| peers.contains(address));
		for peer in peers {
			if !self.servers.contains_key(peer) {
				self.servers.insert(peer.clone(), Arc::new(ServerDescription::new(peer.clone())));
			}
		}

		self.check_if_has_primary();
	}

	fn update_rs_without_primary(&mut self, sd: &Arc<ServerDescription>) {
		self.r#type = TopologyType::ReplicaSetNoPrimary;

		if self.set_name.is_none() {
			self.set_name = sd.set_name.clone();
		} else if self.set_name != sd.set_name {
			self.servers.remove(&sd.address);
			return;
		}

		for peer in sd.hosts.iter().chain(&sd.passives).chain(&sd.arbiters) {
			if !self.servers.contains_key(peer) {
				self.servers.insert(peer.clone(), Arc::new(ServerDescription::new(peer.clone())));
			}
		}

		if let Some(me) = &sd.me {
			if *me != sd.address {
				self.servers.remove(&sd.address);
			}
		}
	}

	fn update_rs_with_primary_from_member(&mut self, sd: &Arc<ServerDescription>) {
		if self.set_name != sd.set_name
			|| sd.me.as_ref().map_or(false, |me| *me != sd.address) {
			self.servers.remove(&sd.address);
		}
		self.check_if_has_primary();
	}

	fn check_if_has_primary(&mut self) {
		self.r#type = if self.servers.values().any(|s| s.r#type == ServerType::RSPrimary) {
			TopologyType::ReplicaSetWithPrimary
		} else {
			TopologyType::ReplicaSetNoPrimary
		};
	}

	/// Re-derives the description-wide fields from the per-server set.
	fn finalize(&mut self) {
		let mut timeout: Option<i64> = None;
		let mut absent = false;
		let mut data_bearing = 0usize;
		for desc in self.servers.values().filter(|s| s.r#type.is_data_bearing()) {
			data_bearing += 1;
			match desc.logical_session_timeout_minutes {
				None          => { absent = true; break }
				Some(minutes) => timeout = Some(timeout.map_or(minutes, |t| t.min(minutes)))
			}
		}
		self.logical_session_timeout_minutes =
			if absent || data_bearing == 0 { None } else { timeout };

		self.compatibility_error = self.servers.values().find_map(|s| s.wire_version_error());
		self.compatible = self.compatibility_error.is_none();
	}
}

#[cfg(test)]
mod tests {
	use {
		super::*,
		crate::common::{to_document, DEFAULT_LOCAL_THRESHOLD},
		serde_json::json
	};

	fn addr(s: &str) -> ServerAddress {
		s.parse().unwrap()
	}

	fn primary(address: &str, set_version: i32, election_id: &str, hosts: &[&str]) -> ServerDescription {
		ServerDescription::from_reply(addr(address), to_document(json!({
			"ok": 1, "ismaster": true, "setName": "rs",
			"setVersion": set_version, "electionId": election_id,
			"hosts": hosts, "me": address,
			"minWireVersion": 6, "maxWireVersion": 8,
			"logicalSessionTimeoutMinutes": 30
		})), Duration::from_millis(1)).unwrap()
	}

	fn secondary(address: &str, hosts: &[&str]) -> ServerDescription {
		ServerDescription::from_reply(addr(address), to_document(json!({
			"ok": 1, "ismaster": false, "secondary": true, "setName": "rs",
			"hosts": hosts, "me": address,
			"minWireVersion": 6, "maxWireVersion": 8,
			"logicalSessionTimeoutMinutes": 30
		})), Duration::from_millis(1)).unwrap()
	}

	fn rs_seeded(seeds: &[&str]) -> TopologyDescription {
		let seeds: Vec<ServerAddress> = seeds.iter().map(|s| addr(s)).collect();
		TopologyDescription::seeded(&seeds, Some("rs"), DEFAULT_LOCAL_THRESHOLD)
	}

	#[test]
	fn reply_type_derivation() {
		let mongos = ServerDescription::from_reply(addr("s:1"), to_document(json!({
			"ok": 1, "ismaster": true, "msg": "isdbgrid",
			"minWireVersion": 6, "maxWireVersion": 8
		})), Duration::from_millis(1)).unwrap();
		assert_eq!(mongos.r#type, ServerType::Mongos);

		let ghost = ServerDescription::from_reply(addr("g:1"), to_document(json!({
			"ok": 1, "isreplicaset": true,
			"minWireVersion": 6, "maxWireVersion": 8
		})), Duration::from_millis(1)).unwrap();
		assert_eq!(ghost.r#type, ServerType::RSGhost);

		let arbiter = ServerDescription::from_reply(addr("a:1"), to_document(json!({
			"ok": 1, "ismaster": false, "arbiterOnly": true, "setName": "rs",
			"minWireVersion": 6, "maxWireVersion": 8
		})), Duration::from_millis(1)).unwrap();
		assert_eq!(arbiter.r#type, ServerType::RSArbiter);

		assert_eq!(primary("p:1", 1, "00", &["p:1"]).r#type, ServerType::RSPrimary);
		assert_eq!(secondary("s:1", &["s:1"]).r#type, ServerType::RSSecondary);
	}

	#[test]
	fn seeded_types() {
		let single = TopologyDescription::seeded(&[addr("h:27017")], None, DEFAULT_LOCAL_THRESHOLD);
		assert_eq!(single.r#type, TopologyType::Single);

		let multi = TopologyDescription::seeded(&[addr("a:1"), addr("b:2")], None, DEFAULT_LOCAL_THRESHOLD);
		assert_eq!(multi.r#type, TopologyType::Unknown);

		assert_eq!(rs_seeded(&["a:1"]).r#type, TopologyType::ReplicaSetNoPrimary);
	}

	#[test]
	fn update_ignores_unknown_address() {
		let desc = rs_seeded(&["a:1"]);
		let next = desc.update(secondary("stranger:1", &["stranger:1"]));
		assert_eq!(next, desc);
	}

	#[test]
	fn update_is_idempotent_for_equal_input() {
		let desc = rs_seeded(&["a:1", "b:2"]);
		let sd = secondary("a:1", &["a:1", "b:2"]);
		let once = desc.update(sd.clone());
		let twice = once.update(sd);
		assert_eq!(once, twice);
	}

	#[test]
	fn update_is_pure() {
		let desc = rs_seeded(&["a:1", "b:2"]);
		let before = desc.clone();
		let _ = desc.update(primary("a:1", 1, "01", &["a:1", "b:2"]));
		assert_eq!(desc, before);
	}

	#[test]
	fn election_and_discovery() {
		let desc = rs_seeded(&["a:1"]);
		assert_eq!(desc.r#type, TopologyType::ReplicaSetNoPrimary);

		// the primary reports a peer that was never seeded
		let desc = desc.update(primary("a:1", 1, "01", &["a:1", "b:2"]));
		assert_eq!(desc.r#type, TopologyType::ReplicaSetWithPrimary);
		assert!(desc.has_server(&addr("b:2")));
		assert_eq!(desc.servers[&addr("b:2")].r#type, ServerType::Unknown);

		let desc = desc.update(secondary("b:2", &["a:1", "b:2"]));
		assert_eq!(desc.r#type, TopologyType::ReplicaSetWithPrimary);
		assert_eq!(desc.servers[&addr("b:2")].r#type, ServerType::RSSecondary);
	}

	#[test]
	fn stale_primary_is_demoted() {
		let desc = rs_seeded(&["a:1", "b:2"]);
		let desc = desc.update(primary("a:1", 2, "05", &["a:1", "b:2"]));
		assert_eq!(desc.servers[&addr("a:1")].r#type, ServerType::RSPrimary);

		// an older (setVersion, electionId) claim loses and is reset
		let desc = desc.update(primary("b:2", 1, "09", &["a:1", "b:2"]));
		assert_eq!(desc.servers[&addr("b:2")].r#type, ServerType::Unknown);
		assert_eq!(desc.servers[&addr("a:1")].r#type, ServerType::RSPrimary);
		assert_eq!(desc.r#type, TopologyType::ReplicaSetWithPrimary);
	}

	#[test]
	fn newer_primary_demotes_previous() {
		let desc = rs_seeded(&["a:1", "b:2"]);
		let desc = desc.update(primary("a:1", 1, "01", &["a:1", "b:2"]));
		let desc = desc.update(primary("b:2", 2, "02", &["a:1", "b:2"]));
		assert_eq!(desc.servers[&addr("b:2")].r#type, ServerType::RSPrimary);
		assert_eq!(desc.servers[&addr("a:1")].r#type, ServerType::Unknown);
		assert_eq!(desc.r#type, TopologyType::ReplicaSetWithPrimary);
	}

	#[test]
	fn primary_membership_view_wins() {
		let desc = rs_seeded(&["a:1", "b:2", "c:3"]);
		// the primary only knows about itself and b
		let desc = desc.update(primary("a:1", 1, "01", &["a:1", "b:2"]));
		assert!(!desc.has_server(&addr("c:3")));
		assert!(desc.has_server(&addr("a:1")));
		assert!(desc.has_server(&addr("b:2")));
	}

	#[test]
	fn set_name_mismatch_removes_member() {
		let desc = rs_seeded(&["a:1", "b:2"]);
		let other = ServerDescription::from_reply(addr("b:2"), to_document(json!({
			"ok": 1, "ismaster": false, "secondary": true, "setName": "other",
			"hosts": ["b:2"], "me": "b:2",
			"minWireVersion": 6, "maxWireVersion": 8
		})), Duration::from_millis(1)).unwrap();
		let desc = desc.update(other);
		assert!(!desc.has_server(&addr("b:2")));
		assert_eq!(desc.r#type, TopologyType::ReplicaSetNoPrimary);
	}

	#[test]
	fn me_mismatch_removes_member() {
		let desc = rs_seeded(&["alias:1", "b:2"]);
		let sd = ServerDescription::from_reply(addr("alias:1"), to_document(json!({
			"ok": 1, "ismaster": false, "secondary": true, "setName": "rs",
			"hosts": ["real:1", "b:2"], "me": "real:1",
			"minWireVersion": 6, "maxWireVersion": 8
		})), Duration::from_millis(1)).unwrap();
		let desc = desc.update(sd);
		assert!(!desc.has_server(&addr("alias:1")));
		assert!(desc.has_server(&addr("real:1")));
	}

	#[test]
	fn standalone_removed_from_multi_seed_unknown() {
		let seeds = [addr("a:1"), addr("b:2")];
		let desc = TopologyDescription::seeded(&seeds, None, DEFAULT_LOCAL_THRESHOLD);
		let standalone = ServerDescription::from_reply(addr("a:1"), to_document(json!({
			"ok": 1, "ismaster": true,
			"minWireVersion": 6, "maxWireVersion": 8
		})), Duration::from_millis(1)).unwrap();
		let desc = desc.update(standalone);
		assert!(!desc.has_server(&addr("a:1")));
		assert_eq!(desc.r#type, TopologyType::Unknown);
	}

	#[test]
	fn mongos_flips_unknown_to_sharded() {
		let seeds = [addr("a:1"), addr("b:2")];
		let desc = TopologyDescription::seeded(&seeds, None, DEFAULT_LOCAL_THRESHOLD);
		let mongos = ServerDescription::from_reply(addr("a:1"), to_document(json!({
			"ok": 1, "ismaster": true, "msg": "isdbgrid",
			"minWireVersion": 6, "maxWireVersion": 8
		})), Duration::from_millis(1)).unwrap();
		let desc = desc.update(mongos);
		assert_eq!(desc.r#type, TopologyType::Sharded);

		// a replica set member has no place in a sharded topology
		let desc = desc.update(secondary("b:2", &["b:2"]));
		assert!(!desc.has_server(&addr("b:2")));
	}

	#[test]
	fn session_timeout_is_minimum_over_data_bearing() {
		let desc = rs_seeded(&["a:1", "b:2"]);
		let mut p = primary("a:1", 1, "01", &["a:1", "b:2"]);
		p.logical_session_timeout_minutes = Some(30);
		let mut s = secondary("b:2", &["a:1", "b:2"]);
		s.logical_session_timeout_minutes = Some(20);
		let desc = desc.update(p).update(s);
		assert_eq!(desc.logical_session_timeout_minutes, Some(20));

		// one data-bearing server without the field makes it absent
		let mut s = secondary("b:2", &["a:1", "b:2"]);
		s.logical_session_timeout_minutes = None;
		let desc = desc.update(s);
		assert_eq!(desc.logical_session_timeout_minutes, None);
		assert!(!desc.supports_sessions());
	}

	#[test]
	fn arbiters_do_not_count_for_session_timeout() {
		let desc = rs_seeded(&["a:1", "b:2"]);
		let p = primary("a:1", 1, "01", &["a:1", "b:2"]);
		let arbiter = ServerDescription::from_reply(addr("b:2"), to_document(json!({
			"ok": 1, "ismaster": false, "arbiterOnly": true, "setName": "rs",
			"hosts": ["a:1", "b:2"], "me": "b:2",
			"minWireVersion": 6, "maxWireVersion": 8
		})), Duration::from_millis(1)).unwrap();
		let desc = desc.update(p).update(arbiter);
		assert_eq!(desc.logical_session_timeout_minutes, Some(30));
	}

	#[test]
	fn wire_version_incompatibility_is_flagged() {
		let desc = TopologyDescription::seeded(&[addr("a:1")], None, DEFAULT_LOCAL_THRESHOLD);
		let ancient = ServerDescription::from_reply(addr("a:1"), to_document(json!({
			"ok": 1, "ismaster": true,
			"minWireVersion": 0, "maxWireVersion": 2
		})), Duration::from_millis(1)).unwrap();
		let desc = desc.update(ancient);
		assert!(!desc.compatible);
		assert!(desc.compatibility_error.as_deref().unwrap().contains("wire version"));
	}

	#[test]
	fn retryable_write_capability() {
		let desc = rs_seeded(&["a:1"]);
		assert!(!desc.supports_retryable_writes());
		let desc = desc.update(primary("a:1", 1, "01", &["a:1"]));
		assert!(desc.supports_retryable_writes());

		// a standalone does not qualify even with session support
		let single = TopologyDescription::seeded(&[addr("s:1")], None, DEFAULT_LOCAL_THRESHOLD);
		let standalone = ServerDescription::from_reply(addr("s:1"), to_document(json!({
			"ok": 1, "ismaster": true,
			"minWireVersion": 6, "maxWireVersion": 8,
			"logicalSessionTimeoutMinutes": 30
		})), Duration::from_millis(1)).unwrap();
		let single = single.update(standalone);
		assert!(single.supports_sessions());
		assert!(!single.supports_retryable_writes());
	}
}
