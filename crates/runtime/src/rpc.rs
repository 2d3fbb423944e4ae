//! Request/response correlation on top of a [`Transport`].
//!
//! # Message Flow
//!
//! 1. Caller invokes [`Connection::send`] with a request
//! 2. The connection assigns a sequential id and parks a oneshot sender
//! 3. The [`RequestFrame`] is serialized and written via the transport
//! 4. The caller awaits the oneshot receiver
//! 5. [`RpcConnection::run`] reads a [`ResponseFrame`] from the transport
//! 6. The response is matched by id and handed to the parked sender
//!
//! When the transport ends, every pending request fails with
//! [`Error::ConnectionClosed`] and later sends fail immediately. A caller
//! that stops waiting (e.g. on a timeout) releases its parked sender.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use serde_json::Value as JsonValue;
use skiff_protocol::{Request, RequestFrame, Response, ResponseFrame};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::connection::Connection;
use crate::transport::{Transport, TransportParts, TransportReceiver};
use crate::{Error, Result};

type Callbacks = HashMap<u32, oneshot::Sender<Result<Response>>>;

/// Removes the parked sender for `id` when the request future goes away.
struct Pending<'a> {
	callbacks: &'a parking_lot::Mutex<Callbacks>,
	id: u32,
}

impl Drop for Pending<'_> {
	fn drop(&mut self) {
		self.callbacks.lock().remove(&self.id);
	}
}

/// A single correlated connection to one cluster member.
///
/// Cheap to share behind `Arc`; any number of requests may be in flight.
pub struct RpcConnection {
	/// Sequential request ID counter
	last_id: AtomicU32,
	/// Pending request callbacks keyed by request ID
	callbacks: Arc<parking_lot::Mutex<Callbacks>>,
	sender: Mutex<Box<dyn Transport>>,
	receiver: Mutex<Option<Box<dyn TransportReceiver>>>,
	message_rx: Mutex<Option<mpsc::UnboundedReceiver<JsonValue>>>,
	closed: AtomicBool,
}

impl RpcConnection {
	pub fn new(parts: TransportParts) -> Self {
		Self {
			last_id: AtomicU32::new(0),
			callbacks: Arc::new(parking_lot::Mutex::new(HashMap::new())),
			sender: Mutex::new(parts.sender),
			receiver: Mutex::new(Some(parts.receiver)),
			message_rx: Mutex::new(Some(parts.message_rx)),
			closed: AtomicBool::new(false),
		}
	}

	/// Returns `true` once the read loop has ended.
	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Runs the read loop until the transport closes.
	///
	/// Spawn this on a background task. Calling it a second time returns
	/// immediately.
	pub async fn run(&self) {
		let Some(receiver) = self.receiver.lock().await.take() else {
			warn!(target = "skiff.rpc", "run() called more than once");
			return;
		};
		let Some(mut message_rx) = self.message_rx.lock().await.take() else {
			return;
		};

		let transport_handle = tokio::spawn(async move {
			if let Err(err) = receiver.run().await {
				error!(target = "skiff.rpc", error = %err, "transport read failed");
			}
		});

		while let Some(message) = message_rx.recv().await {
			match serde_json::from_value::<ResponseFrame>(message.clone()) {
				Ok(frame) => {
					if let Err(err) = self.dispatch(frame).await {
						warn!(target = "skiff.rpc", error = %err, "dropping response");
					}
				}
				Err(err) => {
					error!(target = "skiff.rpc", error = %err, %message, "failed to parse response frame");
				}
			}
		}

		debug!(target = "skiff.rpc", "message loop ended (transport closed)");
		let _ = transport_handle.await;
		self.shutdown().await;
	}

	/// Completes the pending request matching `frame.id`.
	async fn dispatch(&self, frame: ResponseFrame) -> Result<()> {
		let callback = self
			.callbacks
			.lock()
			.remove(&frame.id)
			.ok_or_else(|| Error::Protocol(format!("cannot find request to respond: id={}", frame.id)))?;

		let _ = callback.send(Ok(frame.body));
		Ok(())
	}

	async fn shutdown(&self) {
		self.closed.store(true, Ordering::SeqCst);
		let pending: Vec<_> = self.callbacks.lock().drain().collect();
		for (_, callback) in pending {
			let _ = callback.send(Err(Error::ConnectionClosed));
		}
	}

	async fn send_request(&self, request: Request) -> Result<Response> {
		if self.is_closed() {
			return Err(Error::ConnectionClosed);
		}

		let id = self.last_id.fetch_add(1, Ordering::SeqCst);
		let (tx, rx) = oneshot::channel();
		self.callbacks.lock().insert(id, tx);
		let _pending = Pending {
			callbacks: &self.callbacks,
			id,
		};

		debug!(target = "skiff.rpc", id, method = request.method(), "sending request");
		let frame = serde_json::to_value(RequestFrame { id, body: request })?;
		self.sender.lock().await.send(frame).await?;

		rx.await.map_err(|_| Error::ChannelClosed).and_then(|result| result)
	}
}

impl Connection for RpcConnection {
	fn send(&self, request: Request) -> Pin<Box<dyn Future<Output = Result<Response>> + Send + '_>> {
		Box::pin(self.send_request(request))
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use skiff_protocol::{KeepAliveResponse, UnregisterRequest, UnregisterResponse};

	use super::*;
	use crate::fake_transport::FakeTransportBuilder;

	fn create_test_connection() -> RpcConnection {
		let (parts, _controller) = FakeTransportBuilder::new().build();
		RpcConnection::new(parts)
	}

	#[test]
	fn request_ids_increment() {
		let connection = create_test_connection();
		assert_eq!(connection.last_id.fetch_add(1, Ordering::SeqCst), 0);
		assert_eq!(connection.last_id.fetch_add(1, Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn dispatch_completes_matching_request() {
		let connection = create_test_connection();
		let (tx, rx) = oneshot::channel();
		connection.callbacks.lock().insert(5, tx);

		connection
			.dispatch(ResponseFrame {
				id: 5,
				body: UnregisterResponse::ok().into(),
			})
			.await
			.unwrap();

		let response = rx.await.unwrap().unwrap();
		assert_eq!(response, Response::Unregister(UnregisterResponse::ok()));
	}

	#[tokio::test]
	async fn dispatch_rejects_unknown_id() {
		let connection = create_test_connection();
		let result = connection
			.dispatch(ResponseFrame {
				id: 999,
				body: KeepAliveResponse::ok(None, Vec::new()).into(),
			})
			.await;
		match result.unwrap_err() {
			Error::Protocol(msg) => assert!(msg.contains("cannot find request")),
			other => panic!("expected protocol error, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn send_after_shutdown_fails_fast() {
		let connection = create_test_connection();
		connection.shutdown().await;
		let err = connection.send(UnregisterRequest { session: 1 }.into()).await.unwrap_err();
		assert!(matches!(err, Error::ConnectionClosed));
	}

	#[tokio::test(start_paused = true)]
	async fn abandoned_requests_release_callbacks() {
		let (parts, controller) = FakeTransportBuilder::new().build();
		let connection = RpcConnection::new(parts);

		for _ in 0..100 {
			let result = tokio::time::timeout(Duration::from_millis(10), connection.send(UnregisterRequest { session: 1 }.into())).await;
			assert!(result.is_err());
		}

		assert_eq!(controller.take_sent().await.len(), 100);
		assert!(connection.callbacks.lock().is_empty());
	}

	#[tokio::test]
	async fn failed_send_releases_callback() {
		let (parts, _controller) = FakeTransportBuilder::new().failing_sends().build();
		let connection = RpcConnection::new(parts);

		connection.send(UnregisterRequest { session: 1 }.into()).await.unwrap_err();
		assert!(connection.callbacks.lock().is_empty());
	}
}
