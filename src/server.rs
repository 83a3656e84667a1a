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
		apm::{Command, Event},
		common::{split_namespace, to_document, Document, Error, Result, ServerAddress, ServerSelectionConfig},
		description::ServerDescription,
		topology::{Topology, TopologyInner},
		wire::{GenericReply, Transport, WireContext}
	},
	std::{
		sync::{
			atomic::{AtomicBool, Ordering},
			Arc, Condvar, Mutex, RwLock, Weak
		},
		time::{Duration, Instant}
	},
	serde_json::json
};

/// A handle to one monitored server. The monitor thread probes the server
/// with `isMaster` on `heartbeat_frequency` and feeds every outcome upward
/// through the owning topology's `server_update_handler`; the handle never
/// owns its topology, only a weak back-reference.
#[derive(Debug, Clone)]
pub struct Server(Arc<ServerInner>);

pub struct ServerInner {
	pub address: ServerAddress,
	description: RwLock<Arc<ServerDescription>>,
	topology:    Weak<TopologyInner>,
	transport:   Arc<dyn Transport>,
	monitor:     Monitor,
	connected:   AtomicBool
}

#[derive(Debug)]
struct Monitor {
	heartbeat_frequency:    Duration,
	min_heartbeat_interval: Duration,
	dummy_lock:             Mutex<()>,
	condvar:                Condvar,
	check_requested:        AtomicBool,
	shutdown:               AtomicBool
}

impl std::ops::Deref for Server {
	type Target = ServerInner;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl std::fmt::Debug for ServerInner {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		f.debug_struct("ServerInner")
			.field("address", &self.address)
			.field("description", &self.description)
			.field("monitor", &self.monitor)
			.field("connected", &self.connected)
			.finish()
	}
}

impl Server {
	pub(crate) fn new(
		address:   ServerAddress,
		topology:  Weak<TopologyInner>,
		transport: Arc<dyn Transport>,
		config:    &ServerSelectionConfig
	) -> Self {
		Self(Arc::new(ServerInner {
			description: RwLock::new(Arc::new(ServerDescription::new(address.clone()))),
			address,
			topology,
			transport,
			monitor: Monitor {
				heartbeat_frequency:    config.heartbeat_frequency,
				min_heartbeat_interval: config.min_heartbeat_interval,
				dummy_lock:             Mutex::new(()),
				condvar:                Condvar::new(),
				check_requested:        AtomicBool::new(false),
				shutdown:               AtomicBool::new(false)
			},
			connected: AtomicBool::new(false)
		}))
	}

	/// Spawns the monitor thread.
	pub(crate) fn start(&self) -> Result<()> {
		let cloned = self.clone();
		std::thread::Builder::new()
			.name("server-monitor".to_string())
			.spawn(move || cloned.run())?;
		Ok(())
	}

	/// The last description this handle delivered, as cached by the topology.
	pub fn description(&self) -> Arc<ServerDescription> {
		match self.description.read() {
			Ok(guard) => guard.clone(),
			Err(poisoned) => poisoned.into_inner().clone()
		}
	}

	pub(crate) fn set_description(&self, description: Arc<ServerDescription>) {
		if let Ok(mut slot) = self.description.write() {
			*slot = description;
		}
	}

	/// Requests an immediate monitor cycle. The monitor still honors the
	/// minimum interval between consecutive heartbeats. Notification happens
	/// under the monitor's lock so a request landing between the wait-loop's
	/// flag check and its wait cannot be lost.
	pub fn monitor(&self) {
		self.monitor.check_requested.store(true, Ordering::Release);
		let _guard = self.monitor.dummy_lock.lock();
		self.monitor.condvar.notify_all();
	}

	/// Stops the monitor. The thread exits at its next wakeup.
	pub(crate) fn destroy(&self) {
		self.monitor.shutdown.store(true, Ordering::Release);
		let _guard = self.monitor.dummy_lock.lock();
		self.monitor.condvar.notify_all();
	}

	/// Resets this server to `Unknown`. A parse-layer error additionally
	/// clears the server's connection pool.
	pub(crate) fn handle_error(&self, topology: &Topology, error: &Error) {
		topology.dispatch_event(Event::Error {
			topology_id: topology.id,
			address:     Some(&self.address),
			failure:     error
		});
		if error.is_parse_layer() {
			self.transport.clear_pool(&self.address);
		}
		topology.server_update_handler(ServerDescription::from_error(self.address.clone(), error));
	}

	pub fn command(&self, ns: &str, command: &Document, ctx: &WireContext) -> Result<Document> {
		let topology = match self.topology.upgrade() {
			Some(inner) => Topology(inner),
			None        => return Err(Error::Closed)
		};
		let (database_name, _) = split_namespace(ns);
		let command_name = command.keys().next()
			.map_or(Command::Unknown, |k| Command::from(k.as_str()));
		let request_id = topology.next_request_id();

		topology.dispatch_event(Event::CommandStarted {
			topology_id:  topology.id,
			address:      &self.address,
			database_name,
			command_name,
			command,
			request_id,
			operation_id: ctx.operation_id
		});

		let started = Instant::now();
		match self.execute(database_name, command, ctx) {
			Ok(reply) => {
				topology.dispatch_event(Event::CommandSucceeded {
					topology_id:  topology.id,
					address:      &self.address,
					duration:     started.elapsed(),
					command_name,
					reply:        &reply,
					request_id,
					operation_id: ctx.operation_id
				});
				Ok(reply)
			}
			Err(err) => {
				topology.dispatch_event(Event::CommandFailed {
					topology_id:  topology.id,
					address:      &self.address,
					duration:     started.elapsed(),
					command_name,
					failure:      &err,
					request_id,
					operation_id: ctx.operation_id
				});
				if matches!(err, Error::Io(_) | Error::Parse(_) | Error::Operation(_, _)) {
					self.handle_error(&topology, &err);
				}
				Err(err)
			}
		}
	}

	pub fn insert(&self, ns: &str, documents: &[Document], ctx: &WireContext) -> Result<Document> {
		let (_, collection) = split_namespace(ns);
		let command = to_document(json!({ "insert": collection, "documents": documents }));
		self.command(ns, &command, ctx)
	}

	pub fn update(&self, ns: &str, updates: &[Document], ctx: &WireContext) -> Result<Document> {
		let (_, collection) = split_namespace(ns);
		let command = to_document(json!({ "update": collection, "updates": updates }));
		self.command(ns, &command, ctx)
	}

	pub fn remove(&self, ns: &str, deletes: &[Document], ctx: &WireContext) -> Result<Document> {
		let (_, collection) = split_namespace(ns);
		let command = to_document(json!({ "delete": collection, "deletes": deletes }));
		self.command(ns, &command, ctx)
	}

	#[allow(clippy::float_cmp)]
	fn execute(&self, db: &str, command: &Document, ctx: &WireContext) -> Result<Document> {
		let reply = self.transport.command(&self.address, db, command, ctx)?;
		let generic: GenericReply = serde_json::from_value(serde_json::Value::Object(reply.clone()))?;
		if generic.ok == 1f64 {
			Ok(reply)
		} else {
			Err(Error::Operation(
				generic.code.map_or(crate::common::ErrorCode::Unknown, Into::into),
				generic.errmsg.unwrap_or_default()))
		}
	}

	/// Runs the monitor, restarting it if a lock gets poisoned underneath.
	fn run(self) {
		while let Err(err) = self.run_inner() {
			if self.monitor.shutdown.load(Ordering::Acquire) {
				break;
			}
			tracing::warn!(
				address = %self.address,
				error = %err,
				"server monitor died, restarting after heartbeat interval"
			);
			match self.monitor.dummy_lock.lock() {
				Ok(guard) => drop(self.monitor.condvar.wait_timeout(
					guard, self.monitor.heartbeat_frequency)),
				Err(_) => break
			}
		}
	}

	fn run_inner(&self) -> Result<()> {
		loop {
			if self.monitor.shutdown.load(Ordering::Acquire) {
				return Ok(());
			}
			let topology = match self.topology.upgrade() {
				// the topology is gone, the monitor dies with it
				None        => return Ok(()),
				Some(inner) => Topology(inner)
			};
			self.monitor.check_requested.store(false, Ordering::Release);
			let started = Instant::now();
			// the lock is not held here: a check may block in the transport
			// and must not stall immediate-check requests
			self.check(&topology);
			drop(topology);

			let mut guard = self.monitor.dummy_lock.lock()?;
			loop {
				if self.monitor.shutdown.load(Ordering::Acquire) {
					return Ok(());
				}
				let elapsed = started.elapsed();
				if self.monitor.check_requested.load(Ordering::Acquire) {
					if elapsed >= self.monitor.min_heartbeat_interval {
						break;
					}
					let (g, _) = self.monitor.condvar.wait_timeout(
						guard, self.monitor.min_heartbeat_interval - elapsed)?;
					guard = g;
				} else {
					if elapsed >= self.monitor.heartbeat_frequency {
						break;
					}
					let (g, _) = self.monitor.condvar.wait_timeout(
						guard, self.monitor.heartbeat_frequency - elapsed)?;
					guard = g;
				}
			}
		}
	}

	/// One heartbeat: probe, publish the outcome, fire the first-connect
	/// handler once.
	fn check(&self, topology: &Topology) {
		let started = Instant::now();
		topology.dispatch_event(Event::ServerHeartbeatStarted {
			topology_id: topology.id,
			address:     &self.address
		});
		match self.transport.handshake(&self.address, &topology.client_info) {
			Ok(reply) => {
				let round_trip_time = started.elapsed();
				topology.dispatch_event(Event::ServerHeartbeatSucceeded {
					topology_id: topology.id,
					address:     &self.address,
					duration:    round_trip_time,
					reply:       &reply
				});
				match ServerDescription::from_reply(self.address.clone(), reply, round_trip_time) {
					Ok(description) => {
						topology.server_update_handler(description);
						if !self.connected.swap(true, Ordering::SeqCst) {
							topology.on_server_first_connect(self);
						}
					}
					Err(err) => self.handle_error(topology, &err)
				}
			}
			Err(err) => {
				topology.dispatch_event(Event::ServerHeartbeatFailed {
					topology_id: topology.id,
					address:     &self.address,
					duration:    started.elapsed(),
					failure:     &err
				});
				self.handle_error(topology, &err);
			}
		}
	}
}
