//! Serialized execution for one session.
//!
//! Request completions and timer fires never touch session state directly.
//! They run on helper tasks and post an event back to the manager's queue,
//! where events are handled one at a time.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// A pending timer. Dropping it cancels the timer.
#[derive(Debug)]
pub(crate) struct Scheduled {
	id: u64,
	handle: AbortHandle,
}

impl Scheduled {
	pub(crate) fn id(&self) -> u64 {
		self.id
	}
}

impl Drop for Scheduled {
	fn drop(&mut self) {
		self.handle.abort();
	}
}

/// Takes the timer out of `slot` if it is the one that fired.
///
/// Returns `false` for a stale fire (cancelled or replaced timer).
pub(crate) fn take_fired(slot: &mut Option<Scheduled>, id: u64) -> bool {
	if slot.as_ref().is_some_and(|scheduled| scheduled.id() == id) {
		slot.take();
		true
	} else {
		false
	}
}

pub(crate) struct SessionContext<E> {
	events_tx: mpsc::UnboundedSender<E>,
	next_timer: u64,
}

impl<E: Send + 'static> SessionContext<E> {
	pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<E>) {
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		(Self { events_tx, next_timer: 0 }, events_rx)
	}

	/// Runs `future` off the queue and posts its output as an event.
	pub(crate) fn spawn<F>(&self, future: F)
	where
		F: Future<Output = E> + Send + 'static,
	{
		let events_tx = self.events_tx.clone();
		tokio::spawn(async move {
			let _ = events_tx.send(future.await);
		});
	}

	/// Posts `event(id)` after `after` unless the returned handle is dropped first.
	pub(crate) fn schedule<F>(&mut self, after: Duration, event: F) -> Scheduled
	where
		F: FnOnce(u64) -> E + Send + 'static,
	{
		self.next_timer += 1;
		let id = self.next_timer;
		let events_tx = self.events_tx.clone();
		let task = tokio::spawn(async move {
			tokio::time::sleep(after).await;
			let _ = events_tx.send(event(id));
		});
		Scheduled {
			id,
			handle: task.abort_handle(),
		}
	}
}
