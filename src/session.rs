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
	crate::topology::{Topology, TopologyInner},
	std::{
		collections::VecDeque,
		sync::{
			atomic::{AtomicBool, AtomicI64, Ordering},
			Mutex, Weak
		},
		time::{Duration, Instant}
	},
	uuid::Uuid
};

/// A logical session handle. Sessions compare equal by their lsid; the handle
/// stays valid after `end_session`, it merely reports itself as ended.
#[derive(Debug, Clone)]
pub struct ClientSession(std::sync::Arc<ClientSessionInner>);

#[derive(Debug)]
pub struct ClientSessionInner {
	id:             Uuid,
	topology:       Weak<TopologyInner>,
	txn_number:     AtomicI64,
	in_transaction: AtomicBool,
	ended:          AtomicBool,
	server_session: Mutex<Option<ServerSession>>,
	pub options:    SessionOptions
}

impl std::ops::Deref for ClientSession {
	type Target = ClientSessionInner;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl PartialEq for ClientSession {
	fn eq(&self, other: &Self) -> bool {
		self.0.id == other.0.id
	}
}

impl Eq for ClientSession {}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
	pub causal_consistency: Option<bool>
}

impl ClientSession {
	pub(crate) fn new(
		server_session: ServerSession,
		topology:       Weak<TopologyInner>,
		options:        SessionOptions
	) -> Self {
		Self(std::sync::Arc::new(ClientSessionInner {
			id:             server_session.id,
			topology,
			txn_number:     AtomicI64::new(0),
			in_transaction: AtomicBool::new(false),
			ended:          AtomicBool::new(false),
			server_session: Mutex::new(Some(server_session)),
			options
		}))
	}

	pub fn id(&self) -> Uuid {
		self.0.id
	}

	pub fn txn_number(&self) -> i64 {
		self.0.txn_number.load(Ordering::SeqCst)
	}

	/// Advances the transaction number and returns the new value. Retryable
	/// writes call this exactly once, before the first attempt.
	pub fn increment_txn_number(&self) -> i64 {
		self.0.txn_number.fetch_add(1, Ordering::SeqCst) + 1
	}

	pub fn in_transaction(&self) -> bool {
		self.0.in_transaction.load(Ordering::SeqCst)
	}

	/// Flags the session as being inside a transaction. The transaction
	/// machinery lives above the topology core; dispatch only consults this
	/// flag to suppress the retryable-write rule.
	pub fn start_transaction(&self) {
		self.0.in_transaction.store(true, Ordering::SeqCst);
	}

	pub fn end_transaction(&self) {
		self.0.in_transaction.store(false, Ordering::SeqCst);
	}

	pub fn has_ended(&self) -> bool {
		self.0.ended.load(Ordering::SeqCst)
	}

	/// Ends the session: returns the pooled identity and delivers the
	/// terminal `ended` notification to the owning topology. Idempotent.
	pub fn end_session(&self) {
		if self.0.ended.swap(true, Ordering::SeqCst) {
			return;
		}
		let server_session = match self.0.server_session.lock() {
			Ok(mut slot) => slot.take(),
			Err(_)       => None
		};
		if let Some(inner) = self.0.topology.upgrade() {
			let topology = Topology(inner);
			if let Some(server_session) = server_session {
				topology.release_server_session(server_session);
			}
			topology.forget_session(self.0.id);
		}
	}
}

/// A pooled server-side session identity.
#[derive(Debug, Clone)]
pub struct ServerSession {
	pub id:       Uuid,
	pub last_use: Instant
}

impl ServerSession {
	fn new() -> Self {
		Self { id: Uuid::new_v4(), last_use: Instant::now() }
	}

	/// A session is discarded when it is within one minute of the server's
	/// logical session timeout.
	fn is_stale(&self, timeout_minutes: Option<i64>) -> bool {
		match timeout_minutes {
			Some(minutes) if minutes > 0 => {
				let timeout = Duration::from_secs(minutes as u64 * 60);
				self.last_use.elapsed() + Duration::from_secs(60) >= timeout
			}
			_ => false
		}
	}
}

/// The shared pool of server session identities. Allocation policy is
/// deliberately simple: most recently used first, stale entries dropped on
/// the way through.
#[derive(Debug, Default)]
pub(crate) struct ServerSessionPool {
	sessions: Mutex<VecDeque<ServerSession>>
}

impl ServerSessionPool {
	pub fn acquire(&self, timeout_minutes: Option<i64>) -> ServerSession {
		if let Ok(mut pool) = self.sessions.lock() {
			while let Some(session) = pool.pop_front() {
				if !session.is_stale(timeout_minutes) {
					return session;
				}
			}
		}
		ServerSession::new()
	}

	pub fn release(&self, mut session: ServerSession, timeout_minutes: Option<i64>) {
		if session.is_stale(timeout_minutes) {
			return;
		}
		session.last_use = Instant::now();
		if let Ok(mut pool) = self.sessions.lock() {
			pool.push_front(session);
		}
	}

	/// Empties the pool, returning the ids so the caller can end them
	/// server-side.
	pub fn drain(&self) -> Vec<Uuid> {
		match self.sessions.lock() {
			Ok(mut pool) => pool.drain(..).map(|s| s.id).collect(),
			Err(_)       => Vec::new()
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pool_reuses_most_recent() {
		let pool = ServerSessionPool::default();
		let first = pool.acquire(Some(30));
		let second = pool.acquire(Some(30));
		assert_ne!(first.id, second.id);

		pool.release(first.clone(), Some(30));
		pool.release(second.clone(), Some(30));
		assert_eq!(pool.acquire(Some(30)).id, second.id);
		assert_eq!(pool.acquire(Some(30)).id, first.id);
	}

	#[test]
	fn pool_drops_stale_sessions() {
		let pool = ServerSessionPool::default();
		let session = pool.acquire(Some(30));
		// a one-minute timeout leaves no margin, the session is stale on release
		pool.release(session, Some(1));
		assert!(pool.drain().is_empty());
	}

	#[test]
	fn pool_drain_returns_ids() {
		let pool = ServerSessionPool::default();
		let session = pool.acquire(Some(30));
		let id = session.id;
		pool.release(session, Some(30));
		assert_eq!(pool.drain(), vec![id]);
		assert!(pool.drain().is_empty());
	}

	#[test]
	fn session_equality_and_txn_numbers() {
		let session = ClientSession::new(ServerSession::new(), Weak::new(), SessionOptions::default());
		assert_eq!(session, session.clone());
		assert_eq!(session.txn_number(), 0);
		assert_eq!(session.increment_txn_number(), 1);
		assert_eq!(session.txn_number(), 1);
	}

	#[test]
	fn end_session_is_idempotent() {
		let session = ClientSession::new(ServerSession::new(), Weak::new(), SessionOptions::default());
		assert!(!session.has_ended());
		session.end_session();
		session.end_session();
		assert!(session.has_ended());
	}

	#[test]
	fn transaction_flag() {
		let session = ClientSession::new(ServerSession::new(), Weak::new(), SessionOptions::default());
		assert!(!session.in_transaction());
		session.start_transaction();
		assert!(session.in_transaction());
		session.end_transaction();
		assert!(!session.in_transaction());
	}
}
