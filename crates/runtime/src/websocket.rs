//! WebSocket transport: one JSON message per text frame.

use std::future::Future;
use std::pin::Pin;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value as JsonValue;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::Result;
use crate::transport::{Transport, TransportParts, TransportReceiver};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client side of a WebSocket connection to a cluster member.
pub struct WebSocketTransport {
	sink: SplitSink<WsStream, Message>,
	stream: SplitStream<WsStream>,
	message_tx: mpsc::UnboundedSender<JsonValue>,
}

impl WebSocketTransport {
	/// Connects to `url` (e.g. `ws://10.0.0.1:5000`).
	///
	/// Returns the transport and the receiver on which inbound messages are
	/// delivered once the receiving half is running.
	pub async fn connect(url: &str) -> Result<(Self, mpsc::UnboundedReceiver<JsonValue>)> {
		let (ws, _) = tokio_tungstenite::connect_async(url).await?;
		debug!(target = "skiff.transport", %url, "websocket connected");
		let (sink, stream) = ws.split();
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		Ok((Self { sink, stream, message_tx }, message_rx))
	}

	/// Splits the transport into the parts consumed by [`RpcConnection`](crate::RpcConnection).
	pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<JsonValue>) -> TransportParts {
		TransportParts {
			sender: Box::new(WebSocketSender { sink: self.sink }),
			receiver: Box::new(WebSocketReceiver {
				stream: self.stream,
				message_tx: self.message_tx,
			}),
			message_rx,
		}
	}
}

struct WebSocketSender {
	sink: SplitSink<WsStream, Message>,
}

impl Transport for WebSocketSender {
	fn send(&mut self, message: JsonValue) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move {
			let text = serde_json::to_string(&message)?;
			self.sink.send(Message::Text(text)).await?;
			Ok(())
		})
	}
}

struct WebSocketReceiver {
	stream: SplitStream<WsStream>,
	message_tx: mpsc::UnboundedSender<JsonValue>,
}

impl TransportReceiver for WebSocketReceiver {
	fn run(mut self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
		Box::pin(async move {
			while let Some(frame) = self.stream.next().await {
				let parsed = match frame? {
					Message::Text(text) => serde_json::from_str::<JsonValue>(&text),
					Message::Binary(bytes) => serde_json::from_slice::<JsonValue>(&bytes),
					Message::Close(_) => break,
					_ => continue,
				};

				match parsed {
					Ok(value) => {
						if self.message_tx.send(value).is_err() {
							break;
						}
					}
					Err(err) => warn!(target = "skiff.transport", error = %err, "dropping unparseable frame"),
				}
			}
			debug!(target = "skiff.transport", "websocket stream ended");
			Ok(())
		})
	}
}
