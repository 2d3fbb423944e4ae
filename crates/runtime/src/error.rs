//! Error types for the connection layer.

use thiserror::Error;

/// Errors produced while sending requests to cluster members.
#[derive(Debug, Error)]
pub enum Error {
	/// The underlying transport failed to deliver or receive a message.
	#[error("transport error: {0}")]
	Transport(String),

	/// The connection was closed before (or while) the request was in flight.
	#[error("connection closed")]
	ConnectionClosed,

	/// The response channel was dropped before a response arrived.
	#[error("response channel closed")]
	ChannelClosed,

	/// No response arrived within the request timeout.
	#[error("timed out: {0}")]
	Timeout(String),

	/// The peer sent something that violates the session protocol.
	#[error("protocol error: {0}")]
	Protocol(String),

	/// Every candidate address in the selector refused a connection.
	#[error("no servers available")]
	NoServersAvailable,

	#[error("serialization error: {0}")]
	Serde(#[from] serde_json::Error),

	#[error("websocket error: {0}")]
	WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
	/// Returns `true` for request timeouts.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Self::Timeout(_))
	}

	/// Returns `true` when the link to the member is unusable and should be
	/// re-established before the next request.
	pub fn is_connection_error(&self) -> bool {
		matches!(
			self,
			Self::Transport(_) | Self::ConnectionClosed | Self::ChannelClosed | Self::WebSocket(_) | Self::NoServersAvailable
		)
	}
}

/// Result alias for connection-layer operations.
pub type Result<T> = std::result::Result<T, Error>;
