//! Transport abstraction beneath [`RpcConnection`](crate::RpcConnection).
//!
//! A transport is split into a sending half and a receiving half so that the
//! read loop can run on its own task while requests are written concurrently.
//! Messages are JSON values; framing into [`RequestFrame`]/[`ResponseFrame`]
//! happens in the connection layer.
//!
//! [`RequestFrame`]: skiff_protocol::RequestFrame
//! [`ResponseFrame`]: skiff_protocol::ResponseFrame

use std::future::Future;
use std::pin::Pin;

use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use crate::Result;

/// Sending half of a transport.
pub trait Transport: Send {
	/// Writes one message to the peer.
	fn send(&mut self, message: JsonValue) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Receiving half of a transport.
///
/// `run` forwards every inbound message to the channel handed out in
/// [`TransportParts::message_rx`] and returns when the peer goes away.
pub trait TransportReceiver: Send {
	fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>;
}

/// A transport split into the pieces an [`RpcConnection`](crate::RpcConnection) consumes.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	/// Inbound messages produced by `receiver`.
	pub message_rx: mpsc::UnboundedReceiver<JsonValue>,
}
