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
		apm::{Event, EventListener},
		common::{
			parse_seedlist, to_document, ClientInfo, CommandOptions, Document, Error,
			ReadPreference, Result, ServerAddress, TimeoutCause, TopologyOptions,
			DEFAULT_MONGO_PORT
		},
		cursor::{Cursor, CursorOptions},
		description::{ServerDescription, ServerType, TopologyDescription, TopologyType},
		selection::{self, Selector},
		server::Server,
		session::{ClientSession, ServerSession, ServerSessionPool, SessionOptions},
		wire::{Transport, WireContext}
	},
	std::{
		collections::HashMap,
		sync::{
			atomic::{AtomicBool, AtomicUsize, Ordering},
			Arc, Condvar, Mutex, RwLock
		},
		time::{Duration, Instant}
	},
	uuid::Uuid
};

/// Topology identifiers are unique within the process.
static NEXT_TOPOLOGY_ID: AtomicUsize = AtomicUsize::new(1);

/// Commands eligible for the retryable-write rule when found at the top
/// level of a command document.
const RETRYABLE_WRITE_COMMANDS: [&str; 4] = ["findAndModify", "insert", "update", "delete"];

/// The topology actor. Owns the authoritative [`TopologyDescription`], the
/// live [`Server`] handles, and the session bookkeeping; every state change
/// funnels through its mutex so observers never see a half-applied update.
///
/// see https://github.com/mongodb/specifications/blob/master/source/server-discovery-and-monitoring/server-discovery-and-monitoring.rst
#[derive(Clone)]
pub struct Topology(pub(crate) Arc<TopologyInner>);

pub struct TopologyInner {
	pub id:          usize,
	pub options:     TopologyOptions,
	pub client_info: ClientInfo,
	pub(crate) transport: Arc<dyn Transport>,
	state:           Mutex<TopologyState>,
	changed:         Condvar,
	request_id:      AtomicUsize,
	operation_id:    AtomicUsize,
	listeners_set:   AtomicBool,
	listeners:       RwLock<Vec<EventListener>>,
	session_pool:    ServerSessionPool
}

struct TopologyState {
	description:   Arc<TopologyDescription>,
	servers:       HashMap<ServerAddress, Server>,
	sessions:      HashMap<Uuid, ClientSession>,
	connected:     bool,
	closed:        bool,
	opened:        bool,
	first_connect: bool,
	/// Bumped on every published description so waiting selectors can tell a
	/// description change from an unrelated wakeup.
	epoch:         u64
}

impl std::ops::Deref for Topology {
	type Target = TopologyInner;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl std::fmt::Debug for Topology {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		f.debug_struct("Topology")
			.field("id", &self.id)
			.field("options", &self.options)
			.finish()
	}
}

#[derive(Debug, Clone, Default)]
pub struct SelectServerOptions {
	pub server_selection_timeout: Option<Duration>
}

impl Topology {
	/// Creates a topology from a seedlist. The legacy single-host form in
	/// `options.host`/`options.port` is honored when the seedlist is empty.
	pub fn new(seeds: &[ServerAddress], options: TopologyOptions) -> Result<Self> {
		let mut seeds = seeds.to_vec();
		if seeds.is_empty() {
			if let Some(host) = options.host.clone() {
				seeds.push(ServerAddress::new(host, options.port.unwrap_or(DEFAULT_MONGO_PORT)));
			}
		}
		if seeds.is_empty() {
			return Err(Error::Configuration("a topology requires at least one seed address".to_string()));
		}
		let transport = options.transport.clone()
			.ok_or_else(|| Error::Configuration("a transport implementation is required".to_string()))?;

		let description = TopologyDescription::seeded(
			&seeds,
			options.replica_set.as_deref(),
			options.server_selection_config.local_threshold);

		Ok(Self(Arc::new(TopologyInner {
			id:          NEXT_TOPOLOGY_ID.fetch_add(1, Ordering::SeqCst),
			client_info: ClientInfo::gather(options.appname.as_deref()),
			transport,
			state: Mutex::new(TopologyState {
				description:   Arc::new(description),
				servers:       HashMap::new(),
				sessions:      HashMap::new(),
				connected:     false,
				closed:        false,
				opened:        false,
				first_connect: false,
				epoch:         0
			}),
			changed:       Condvar::new(),
			request_id:    AtomicUsize::new(1),
			operation_id:  AtomicUsize::new(1),
			listeners_set: AtomicBool::new(false),
			listeners:     RwLock::new(Vec::new()),
			session_pool:  ServerSessionPool::default(),
			options
		})))
	}

	/// Creates a topology from a comma-delimited `host[:port]` seedlist.
	pub fn from_seedlist(seedlist: &str, options: TopologyOptions) -> Result<Self> {
		Self::new(&parse_seedlist(seedlist)?, options)
	}

	pub fn add_event_listener(&self, listener: impl Fn(&Event) + Send + Sync + 'static) -> Result<()> {
		self.listeners_set.store(true, Ordering::SeqCst);
		self.listeners.write()?.push(Box::new(listener));
		Ok(())
	}

	pub fn dispatch_event(&self, event: Event) {
		if !self.listeners_set.load(Ordering::SeqCst) {
			return;
		}
		if let Ok(listeners) = self.listeners.read() {
			for listener in listeners.iter() {
				listener(&event)
			}
		}
	}

	/// The currently published description.
	pub fn description(&self) -> Arc<TopologyDescription> {
		match self.state.lock() {
			Ok(state)     => state.description.clone(),
			Err(poisoned) => poisoned.into_inner().description.clone()
		}
	}

	pub fn is_connected(&self) -> bool {
		self.state.lock().map(|s| s.connected).unwrap_or(false)
	}

	pub fn is_destroyed(&self) -> bool {
		self.state.lock().map(|s| s.closed).unwrap_or(false)
	}

	/// Opens the topology and blocks until the first server reports connect.
	/// Concurrent calls coalesce onto the same first-connect notification.
	pub fn connect(&self) -> Result<()> {
		self.connect_begin()?;
		let mut state = self.state.lock()?;
		while !state.first_connect && !state.closed {
			state = self.changed.wait(state)?;
		}
		if state.first_connect { Ok(()) } else { Err(Error::Closed) }
	}

	/// The non-blocking half of `connect`: emits `topologyOpening` and the
	/// initial description change, starts a handle per seed, marks the
	/// topology connected.
	pub(crate) fn connect_begin(&self) -> Result<()> {
		let mut state = self.state.lock()?;
		if state.closed {
			return Err(Error::Closed);
		}
		if state.opened {
			return Ok(());
		}
		state.opened = true;
		state.connected = true;

		self.dispatch_event(Event::TopologyOpening { topology_id: self.id });
		self.dispatch_event(Event::TopologyDescriptionChanged {
			topology_id: self.id,
			previous:    Arc::new(TopologyDescription::new_unknown(
				self.options.server_selection_config.local_threshold)),
			new:         state.description.clone()
		});
		self.update_servers_locked(&mut state, None);
		Ok(())
	}

	/// Closes the topology: drains active sessions, ends the pooled ones,
	/// destroys every server handle, finally emits `topologyClosed`.
	/// Idempotent beyond the first call.
	pub fn close(&self) -> Result<()> {
		let sessions: Vec<ClientSession> = {
			let state = self.state.lock()?;
			if state.closed {
				return Ok(());
			}
			state.sessions.values().cloned().collect()
		};
		for session in &sessions {
			session.end_session();
		}

		let pooled = self.session_pool.drain();
		if !pooled.is_empty() {
			// failures ending server-side sessions are ignored per protocol
			self.end_session_ids(&pooled).unwrap_or_default();
		}

		let mut state = self.state.lock()?;
		if state.closed {
			return Ok(());
		}
		state.closed = true;
		state.connected = false;
		for (address, server) in state.servers.drain() {
			server.destroy();
			self.dispatch_event(Event::ServerClosed { topology_id: self.id, address: &address });
		}
		self.dispatch_event(Event::TopologyClosed { topology_id: self.id });
		self.changed.notify_all();
		tracing::debug!(topology_id = self.id, "topology closed");
		Ok(())
	}

	#[deprecated(note = "use `close` instead")]
	pub fn destroy(&self) -> Result<()> {
		self.close()
	}

	/// Selects one server uniformly at random among those the selector
	/// admits. See `select_servers` for the full algorithm.
	pub fn select_server(&self, selector: Selector, options: SelectServerOptions) -> Result<Server> {
		let servers = self.select_servers(selector, options)?;
		selection::random_element(&servers)
			.ok_or_else(|| Error::Configuration("selection produced no server".to_string()))
	}

	/// The deadline-bounded selection loop. Waits for description changes
	/// driven by monitoring, racing the `serverSelectionTimeoutMS` deadline
	/// measured from entry; only a forced reconnect refreshes the deadline.
	pub fn select_servers(&self, selector: Selector, options: SelectServerOptions) -> Result<Vec<Server>> {
		let timeout = options.server_selection_timeout
			.unwrap_or(self.options.server_selection_config.server_selection_timeout);
		let min_heartbeat_interval = self.options.server_selection_config.min_heartbeat_interval;
		let mut start = Instant::now();

		let mut state = self.state.lock()?;
		loop {
			if state.closed {
				return Err(Error::Closed);
			}
			if start.elapsed() >= timeout {
				return Err(Error::Timeout(TimeoutCause::Deadline, format!(
					"Server selection timed out after {} ms", timeout.as_millis())));
			}

			if !state.connected {
				drop(state);
				self.connect_begin()?;
				state = self.state.lock()?;
				while !state.first_connect && !state.closed {
					let elapsed = start.elapsed();
					if elapsed >= timeout {
						return Err(Error::Timeout(TimeoutCause::WaitingToConnect,
							"Server selection timed out waiting to connect".to_string()));
					}
					let (guard, _) = self.changed.wait_timeout(state, timeout - elapsed)?;
					state = guard;
				}
				if state.closed {
					return Err(Error::Closed);
				}
				// reconnecting restarts the selection clock
				start = Instant::now();
				continue;
			}

			if !state.description.compatible {
				return Err(Error::Compatibility(
					state.description.compatibility_error.clone().unwrap_or_default()));
			}

			let candidates = state.description.server_descriptions();
			let selected = selector.select(&state.description, &candidates)?;
			if !selected.is_empty() {
				let servers: Vec<Server> = selected.iter()
					.filter_map(|sd| state.servers.get(&sd.address).cloned())
					.collect();
				if !servers.is_empty() {
					return Ok(servers);
				}
			}

			// nothing eligible: have every monitor check now, then wait for
			// the next description change
			for server in state.servers.values() {
				server.monitor();
			}
			let now = Instant::now();
			let overall = start + timeout;
			let (deadline, cause, message) = if overall <= now + min_heartbeat_interval {
				(overall, TimeoutCause::Deadline, format!(
					"Server selection timed out after {} ms", timeout.as_millis()))
			} else {
				(now + min_heartbeat_interval, TimeoutCause::Monitoring,
					"Server selection timed out due to monitoring".to_string())
			};
			let epoch = state.epoch;
			loop {
				let now = Instant::now();
				if now >= deadline {
					return Err(Error::Timeout(cause, message));
				}
				let (guard, _) = self.changed.wait_timeout(state, deadline - now)?;
				state = guard;
				if state.epoch != epoch || state.closed {
					break;
				}
			}
		}
	}

	/// Ingests a fresh description from a server handle. Ignored when the
	/// address is no longer part of the topology. Emission order per update
	/// is `serverDescriptionChanged`, reconciliation events, then
	/// `topologyDescriptionChanged`.
	pub fn server_update_handler(&self, sd: ServerDescription) {
		let mut state = match self.state.lock() {
			Ok(state) => state,
			Err(_)    => return
		};
		if state.closed || !state.description.has_server(&sd.address) {
			return;
		}
		let previous = state.description.clone();
		let previous_server = match previous.servers.get(&sd.address) {
			Some(server) => server.clone(),
			None         => return
		};
		let address = sd.address.clone();
		let latest = Arc::new(sd.clone());

		let next = Arc::new(previous.update(sd));
		state.description = next.clone();
		state.epoch += 1;

		self.dispatch_event(Event::ServerDescriptionChanged {
			topology_id: self.id,
			address:     &address,
			previous:    previous_server,
			new:         next.servers.get(&address).cloned()
		});

		self.update_servers_locked(&mut state, Some(latest));

		self.dispatch_event(Event::TopologyDescriptionChanged {
			topology_id: self.id,
			previous,
			new:         next
		});
		self.changed.notify_all();
	}

	/// Reconciles the live handle set with the published description: cache
	/// the latest description on its handle, open handles for new addresses,
	/// destroy handles for departed ones.
	fn update_servers_locked(&self, state: &mut TopologyState, latest: Option<Arc<ServerDescription>>) {
		if let Some(latest) = latest {
			if let Some(server) = state.servers.get(&latest.address) {
				server.set_description(latest.clone());
			}
		}

		let missing: Vec<ServerAddress> = state.description.servers.keys()
			.filter(|address| !state.servers.contains_key(*address))
			.cloned()
			.collect();
		for address in missing {
			self.dispatch_event(Event::ServerOpening { topology_id: self.id, address: &address });
			let server = Server::new(
				address.clone(),
				Arc::downgrade(&self.0),
				self.transport.clone(),
				&self.options.server_selection_config);
			if let Err(err) = server.start() {
				tracing::warn!(address = %address, error = %err, "failed to start server monitor");
			}
			state.servers.insert(address, server);
		}

		let departed: Vec<ServerAddress> = state.servers.keys()
			.filter(|address| !state.description.servers.contains_key(*address))
			.cloned()
			.collect();
		for address in departed {
			if let Some(server) = state.servers.remove(&address) {
				server.destroy();
			}
			self.dispatch_event(Event::ServerClosed { topology_id: self.id, address: &address });
		}
	}

	/// Runs when a server reports its first successful heartbeat. In a
	/// replica set with a primary only the primary's connect surfaces as the
	/// topology-level `connect`; everywhere else every server's first connect
	/// does (a known over-emission kept for compatibility).
	pub(crate) fn on_server_first_connect(&self, server: &Server) {
		server.monitor();
		let mut state = match self.state.lock() {
			Ok(state) => state,
			Err(_)    => return
		};
		if state.closed {
			return;
		}
		if state.description.r#type == TopologyType::ReplicaSetWithPrimary
			&& server.description().r#type != ServerType::RSPrimary {
			return;
		}
		state.first_connect = true;
		self.dispatch_event(Event::Connect { topology_id: self.id, address: &server.address });
		self.changed.notify_all();
	}

	/// Runs a command against a server matching the read preference
	/// (defaulting to primary), applying the retryable-write rule when the
	/// command carries a retryable write operation.
	pub fn command(&self, ns: &str, cmd: Document, options: &CommandOptions) -> Result<Document> {
		let read_preference = options.read_preference.clone().unwrap_or_else(ReadPreference::primary);
		let retryable_op = cmd.keys().any(|k| RETRYABLE_WRITE_COMMANDS.contains(&k.as_str()));
		let selector = Selector::from(read_preference.clone());
		self.execute(selector, Some(read_preference), options, retryable_op,
			move |server, ctx| server.command(ns, &cmd, ctx))
	}

	pub fn insert(&self, ns: &str, documents: &[Document], options: &CommandOptions) -> Result<Document> {
		self.execute(Selector::writable(), None, options, true,
			move |server, ctx| server.insert(ns, documents, ctx))
	}

	pub fn update(&self, ns: &str, updates: &[Document], options: &CommandOptions) -> Result<Document> {
		self.execute(Selector::writable(), None, options, true,
			move |server, ctx| server.update(ns, updates, ctx))
	}

	pub fn remove(&self, ns: &str, deletes: &[Document], options: &CommandOptions) -> Result<Document> {
		self.execute(Selector::writable(), None, options, true,
			move |server, ctx| server.remove(ns, deletes, ctx))
	}

	/// Selection, the single-retry rule, and the transaction-number contract
	/// shared by `command` and the typed write paths. The transaction number
	/// is assigned before the first attempt and reused verbatim by the retry.
	fn execute<F>(
		&self,
		selector:        Selector,
		read_preference: Option<ReadPreference>,
		options:         &CommandOptions,
		retryable_op:    bool,
		attempt:         F
	) -> Result<Document>
	where F: Fn(&Server, &WireContext) -> Result<Document> {
		let mut ctx = WireContext {
			read_preference,
			session_id:       options.session.as_ref().map(ClientSession::id),
			txn_number:       None,
			will_retry_write: false,
			operation_id:     self.operation_id.fetch_add(1, Ordering::SeqCst)
		};

		if retryable_op && options.retry_writes {
			if let Some(session) = options.session.as_ref() {
				if !session.has_ended() && !session.in_transaction() && self.supports_retryable_writes() {
					ctx.txn_number = Some(session.increment_txn_number());
					ctx.will_retry_write = true;
				}
			}
		}

		let select_options = SelectServerOptions {
			server_selection_timeout: options.server_selection_timeout
		};
		let mut retrying = false;
		loop {
			let server = self.select_server(selector.clone(), select_options.clone())?;
			match attempt(&server, &ctx) {
				Ok(reply) => return Ok(reply),
				Err(err) if ctx.will_retry_write && !retrying && err.is_retryable() => {
					tracing::debug!(error = %err, "retrying write after transient failure");
					retrying = true;
				}
				Err(err) => return Err(err)
			}
		}
	}

	fn supports_retryable_writes(&self) -> bool {
		self.state.lock().map(|s| s.description.supports_retryable_writes()).unwrap_or(false)
	}

	/// Constructs a cursor for `cmd` without running it. Iteration happens in
	/// the cursor itself, through this topology's command dispatch.
	pub fn cursor(&self, ns: &str, cmd: Document, options: CursorOptions) -> Cursor {
		match self.options.cursor_factory.clone() {
			Some(factory) => factory(self, ns, cmd, options),
			None          => Cursor::new(self.clone(), ns.to_string(), cmd, options)
		}
	}

	/// Creates a session and tracks it until its terminal `ended`
	/// notification.
	pub fn start_session(&self, options: SessionOptions) -> Result<ClientSession> {
		let mut state = self.state.lock()?;
		if state.closed {
			return Err(Error::Closed);
		}
		let timeout = state.description.logical_session_timeout_minutes;
		let session = ClientSession::new(
			self.session_pool.acquire(timeout),
			Arc::downgrade(&self.0),
			options);
		state.sessions.insert(session.id(), session.clone());
		Ok(session)
	}

	/// Best-effort `endSessions` for the given sessions; failures are
	/// swallowed per protocol.
	pub fn end_sessions(&self, sessions: &[ClientSession]) {
		let ids: Vec<Uuid> = sessions.iter().map(ClientSession::id).collect();
		self.end_session_ids(&ids).unwrap_or_default();
	}

	fn end_session_ids(&self, ids: &[Uuid]) -> Result<Document> {
		if ids.is_empty() {
			return Ok(Document::new());
		}
		let command = to_document(serde_json::json!({
			"endSessions": ids.iter()
				.map(|id| serde_json::json!({ "id": id.to_string() }))
				.collect::<Vec<_>>()
		}));
		self.command("admin.$cmd", command, &CommandOptions {
			read_preference: Some(ReadPreference::primary_preferred()),
			..CommandOptions::default()
		})
	}

	pub fn has_session_support(&self) -> bool {
		self.state.lock().map(|s| s.description.supports_sessions()).unwrap_or(false)
	}

	/// The `isMaster` reply of the first known server, for feature detection.
	/// Empty when nothing is known yet.
	pub fn last_is_master(&self) -> Document {
		self.state.lock().ok()
			.and_then(|state| state.description.servers.values()
				.find(|sd| sd.r#type.is_known())
				.and_then(|sd| sd.is_master.clone()))
			.unwrap_or_default()
	}

	pub(crate) fn next_request_id(&self) -> usize {
		self.request_id.fetch_add(1, Ordering::SeqCst)
	}

	/// The session's terminal `ended` notification.
	pub(crate) fn forget_session(&self, id: Uuid) {
		if let Ok(mut state) = self.state.lock() {
			state.sessions.remove(&id);
		}
	}

	pub(crate) fn release_server_session(&self, session: ServerSession) {
		let timeout = self.state.lock().ok()
			.and_then(|s| s.description.logical_session_timeout_minutes);
		self.session_pool.release(session, timeout);
	}
}
