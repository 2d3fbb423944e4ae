//! Fake transport for unit testing request correlation without a cluster.
//!
//! # Example
//!
//! ```ignore
//! let (parts, controller) = FakeTransportBuilder::new().build();
//! let connection = Arc::new(RpcConnection::new(parts));
//!
//! tokio::spawn({
//!     let conn = Arc::clone(&connection);
//!     async move { conn.run().await }
//! });
//!
//! let fut = connection.send(UnregisterRequest { session: 7 }.into());
//! controller.inject_response(0, UnregisterResponse::ok());
//! let response = fut.await?;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use skiff_protocol::{RequestFrame, Response, ResponseFrame};
use tokio::sync::{Mutex, mpsc};

use crate::transport::{Transport, TransportParts, TransportReceiver};
use crate::{Error, Result};

/// Builder for creating fake transport instances.
#[derive(Debug, Default)]
pub struct FakeTransportBuilder {
	fail_sends: bool,
}

impl FakeTransportBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes every send fail with a transport error.
	pub fn failing_sends(mut self) -> Self {
		self.fail_sends = true;
		self
	}

	/// Build the fake transport and return both parts and a controller.
	///
	/// Returns [`TransportParts`] for creating an [`RpcConnection`] and a
	/// [`FakeTransportController`] for injecting responses and inspecting sent frames.
	///
	/// [`RpcConnection`]: crate::RpcConnection
	pub fn build(self) -> (TransportParts, FakeTransportController) {
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		let sent = Arc::new(Mutex::new(Vec::new()));

		let sender = FakeTransportSender {
			sent: Arc::clone(&sent),
			fail_sends: self.fail_sends,
		};

		let receiver = FakeTransportReceiver { inbound_rx, message_tx };

		let controller = FakeTransportController {
			inbound_tx: Some(inbound_tx),
			sent,
		};

		let parts = TransportParts {
			sender: Box::new(sender),
			receiver: Box::new(receiver),
			message_rx,
		};

		(parts, controller)
	}
}

/// Controller for injecting responses and inspecting sent frames.
pub struct FakeTransportController {
	inbound_tx: Option<mpsc::UnboundedSender<JsonValue>>,
	sent: Arc<Mutex<Vec<JsonValue>>>,
}

impl FakeTransportController {
	/// Inject a raw JSON message as if the peer had sent it.
	pub fn inject(&self, message: JsonValue) {
		if let Some(tx) = &self.inbound_tx {
			let _ = tx.send(message);
		}
	}

	/// Inject a response for request `id`.
	pub fn inject_response(&self, id: u32, response: impl Into<Response>) {
		let frame = ResponseFrame { id, body: response.into() };
		if let Ok(value) = serde_json::to_value(frame) {
			self.inject(value);
		}
	}

	/// Simulates the peer closing the connection.
	pub fn disconnect(&mut self) {
		self.inbound_tx = None;
	}

	/// Take all sent frames, clearing the buffer.
	pub async fn take_sent(&self) -> Vec<RequestFrame> {
		std::mem::take(&mut *self.sent.lock().await)
			.into_iter()
			.filter_map(|value| serde_json::from_value(value).ok())
			.collect()
	}
}

struct FakeTransportSender {
	sent: Arc<Mutex<Vec<JsonValue>>>,
	fail_sends: bool,
}

impl Transport for FakeTransportSender {
	fn send(&mut self, message: JsonValue) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		let sent = Arc::clone(&self.sent);
		let fail = self.fail_sends;
		Box::pin(async move {
			if fail {
				return Err(Error::Transport("fake transport refused send".into()));
			}
			sent.lock().await.push(message);
			Ok(())
		})
	}
}

struct FakeTransportReceiver {
	inbound_rx: mpsc::UnboundedReceiver<JsonValue>,
	message_tx: mpsc::UnboundedSender<JsonValue>,
}

impl TransportReceiver for FakeTransportReceiver {
	fn run(mut self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
		Box::pin(async move {
			while let Some(message) = self.inbound_rx.recv().await {
				if self.message_tx.send(message).is_err() {
					break;
				}
			}
			Ok(())
		})
	}
}
