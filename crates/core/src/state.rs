//! Client-side session state.
//!
//! [`SessionState`] is a cheap, cloneable handle. The [`SessionManager`] is
//! the only writer of identity and status; the application layer advances the
//! sequence counters as commands and events complete.
//!
//! [`SessionManager`]: crate::SessionManager

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::warn;
use uuid::Uuid;

/// Lifecycle status of a registered session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
	/// Registered and heartbeats are succeeding.
	Open,
	/// Heartbeats are failing; the session may still be alive on the cluster.
	Unstable,
	/// The cluster no longer knows the session.
	Expired,
	/// Unregistered by the client.
	Closed,
}

impl SessionStatus {
	/// `Expired` and `Closed` accept no further transitions.
	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Expired | Self::Closed)
	}

	/// Whether `self -> next` is a legal lifecycle step.
	pub fn can_transition_to(self, next: SessionStatus) -> bool {
		match (self, next) {
			(Self::Open, Self::Unstable) | (Self::Unstable, Self::Open) => true,
			(Self::Open | Self::Unstable, Self::Expired | Self::Closed) => true,
			_ => false,
		}
	}
}

impl fmt::Display for SessionStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Self::Open => "open",
			Self::Unstable => "unstable",
			Self::Expired => "expired",
			Self::Closed => "closed",
		};
		f.write_str(name)
	}
}

#[derive(Debug, Default)]
struct Inner {
	session_id: Option<u64>,
	status: Option<SessionStatus>,
	command_request: u64,
	command_response: u64,
	response_index: u64,
	event_index: u64,
	complete_index: u64,
}

/// Identity, status and sequence counters of one client session.
///
/// Only the session manager moves the status:
///
/// ```compile_fail
/// let state = skiff::SessionState::new("client-1");
/// state.set_status(skiff::SessionStatus::Closed);
/// ```
#[derive(Clone)]
pub struct SessionState {
	client_id: Arc<str>,
	inner: Arc<Mutex<Inner>>,
	status_tx: Arc<watch::Sender<Option<SessionStatus>>>,
}

impl fmt::Debug for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let inner = self.inner.lock();
		f.debug_struct("SessionState")
			.field("client_id", &self.client_id)
			.field("session_id", &inner.session_id)
			.field("status", &inner.status)
			.finish_non_exhaustive()
	}
}

impl Default for SessionState {
	fn default() -> Self {
		Self::new(Uuid::new_v4().to_string())
	}
}

impl SessionState {
	pub fn new(client_id: impl Into<String>) -> Self {
		let (status_tx, _) = watch::channel(None);
		Self {
			client_id: Arc::from(client_id.into()),
			inner: Arc::new(Mutex::new(Inner::default())),
			status_tx: Arc::new(status_tx),
		}
	}

	pub fn client_id(&self) -> &str {
		&self.client_id
	}

	/// Identifier assigned by the cluster, once registered.
	pub fn session_id(&self) -> Option<u64> {
		self.inner.lock().session_id
	}

	/// Records the cluster-assigned identifier.
	///
	/// The identifier is fixed once set; a different value is rejected and
	/// `false` returned.
	pub(crate) fn set_session_id(&self, session_id: u64) -> bool {
		let mut inner = self.inner.lock();
		match inner.session_id {
			None => {
				inner.session_id = Some(session_id);
				true
			}
			Some(current) if current == session_id => true,
			Some(current) => {
				warn!(target = "skiff.session", current, rejected = session_id, "session id already assigned");
				false
			}
		}
	}

	/// Current status; `None` before the first registration.
	pub fn status(&self) -> Option<SessionStatus> {
		self.inner.lock().status
	}

	/// Moves to `next` if the lifecycle allows it.
	///
	/// Returns `true` when the status changed. Illegal steps are logged and
	/// leave the status untouched.
	pub(crate) fn set_status(&self, next: SessionStatus) -> bool {
		let mut inner = self.inner.lock();
		let allowed = match inner.status {
			None => matches!(next, SessionStatus::Open | SessionStatus::Closed),
			Some(current) if current == next => return false,
			Some(current) => current.can_transition_to(next),
		};
		if !allowed {
			warn!(target = "skiff.session", from = ?inner.status, to = %next, "illegal status transition");
			return false;
		}
		inner.status = Some(next);
		drop(inner);
		self.status_tx.send_replace(Some(next));
		true
	}

	/// Subscribes to status changes.
	pub fn watch(&self) -> watch::Receiver<Option<SessionStatus>> {
		self.status_tx.subscribe()
	}

	/// Highest command sequence number allocated so far.
	pub fn command_request(&self) -> u64 {
		self.inner.lock().command_request
	}

	/// Allocates the next command sequence number.
	pub fn next_command_request(&self) -> u64 {
		let mut inner = self.inner.lock();
		inner.command_request += 1;
		inner.command_request
	}

	/// Highest command sequence number acknowledged by the cluster.
	pub fn command_response(&self) -> u64 {
		self.inner.lock().command_response
	}

	pub fn set_command_response(&self, sequence: u64) {
		let mut inner = self.inner.lock();
		inner.command_response = inner.command_response.max(sequence);
	}

	pub fn response_index(&self) -> u64 {
		self.inner.lock().response_index
	}

	pub fn set_response_index(&self, index: u64) {
		let mut inner = self.inner.lock();
		inner.response_index = inner.response_index.max(index);
	}

	pub fn event_index(&self) -> u64 {
		self.inner.lock().event_index
	}

	pub fn set_event_index(&self, index: u64) {
		let mut inner = self.inner.lock();
		inner.event_index = inner.event_index.max(index);
	}

	/// Highest event index the client has completely processed.
	pub fn complete_index(&self) -> u64 {
		self.inner.lock().complete_index
	}

	pub fn set_complete_index(&self, index: u64) {
		let mut inner = self.inner.lock();
		inner.complete_index = inner.complete_index.max(index);
	}
}
