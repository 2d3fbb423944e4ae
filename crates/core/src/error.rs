//! Error types for the session lifecycle.

use thiserror::Error;

/// Errors surfaced by [`SessionManager`](crate::SessionManager) completions
/// and configuration loading.
#[derive(Debug, Error)]
pub enum Error {
	#[error(transparent)]
	Connection(#[from] skiff_runtime::Error),

	/// The connection strategy gave up on registering the session.
	#[error("{0}")]
	RegistrationFailed(String),

	#[error("session expired")]
	SessionExpired,

	#[error("session closed")]
	SessionClosed,

	/// The manager task is gone (runtime shut down).
	#[error("session manager stopped")]
	ManagerStopped,

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Default failure reported when a strategy stops retrying without a cause.
	pub fn registration_failed() -> Self {
		Self::RegistrationFailed("failed to register session".to_string())
	}

	/// Returns `true` when the session reached a terminal state.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::SessionExpired | Self::SessionClosed)
	}
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_registration_failure_message() {
		assert_eq!(Error::registration_failed().to_string(), "failed to register session");
	}

	#[test]
	fn connection_errors_are_transparent() {
		let err = Error::from(skiff_runtime::Error::ConnectionClosed);
		assert_eq!(err.to_string(), "connection closed");
		assert!(!err.is_terminal());
		assert!(Error::SessionExpired.is_terminal());
	}
}
