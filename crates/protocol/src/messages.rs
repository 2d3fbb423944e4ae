//! Session RPC requests and responses.
//!
//! Every response carries a [`ResponseStatus`]; `ERROR` responses also carry
//! an [`ErrorType`] describing why the server rejected the request.

use serde::{Deserialize, Serialize};

use crate::Address;

/// Outcome reported by a server for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
	Ok,
	Error,
}

/// Reason attached to an `ERROR` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
	/// The receiving member does not know of a leader.
	NoLeader,
	QueryFailure,
	CommandFailure,
	ApplicationError,
	/// The receiving member cannot serve the request in its current role.
	IllegalMemberState,
	/// The session is not (or no longer) registered with the cluster.
	UnknownSession,
	Internal,
}

/// Common accessors for responses that carry a status and optional error.
pub trait StatusResponse {
	fn status(&self) -> ResponseStatus;

	fn error(&self) -> Option<ErrorType>;

	fn is_ok(&self) -> bool {
		self.status() == ResponseStatus::Ok
	}
}

/// Registers a new session for `client`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
	/// Client identity, stable across reconnects.
	pub client: String,
}

/// Result of a [`RegisterRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
	pub status: ResponseStatus,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorType>,
	/// Session identifier assigned by the cluster.
	#[serde(default)]
	pub session: u64,
	/// Session timeout in milliseconds.
	#[serde(default)]
	pub timeout: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub leader: Option<Address>,
	#[serde(default)]
	pub members: Vec<Address>,
}

impl RegisterResponse {
	/// Builds a successful response.
	pub fn ok(session: u64, timeout: u64, leader: Option<Address>, members: Vec<Address>) -> Self {
		Self {
			status: ResponseStatus::Ok,
			error: None,
			session,
			timeout,
			leader,
			members,
		}
	}

	/// Builds a rejection.
	pub fn error(error: ErrorType) -> Self {
		Self {
			status: ResponseStatus::Error,
			error: Some(error),
			session: 0,
			timeout: 0,
			leader: None,
			members: Vec::new(),
		}
	}
}

/// Renews session liveness and reports client progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAliveRequest {
	pub session: u64,
	/// Highest command sequence number the client has received a response for.
	pub command_sequence: u64,
	/// Highest event index the client has completely processed.
	pub event_index: u64,
}

/// Result of a [`KeepAliveRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAliveResponse {
	pub status: ResponseStatus,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorType>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub leader: Option<Address>,
	#[serde(default)]
	pub members: Vec<Address>,
}

impl KeepAliveResponse {
	pub fn ok(leader: Option<Address>, members: Vec<Address>) -> Self {
		Self {
			status: ResponseStatus::Ok,
			error: None,
			leader,
			members,
		}
	}

	pub fn error(error: ErrorType) -> Self {
		Self {
			status: ResponseStatus::Error,
			error: Some(error),
			leader: None,
			members: Vec::new(),
		}
	}
}

/// Explicitly ends a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterRequest {
	pub session: u64,
}

/// Result of an [`UnregisterRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterResponse {
	pub status: ResponseStatus,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorType>,
}

impl UnregisterResponse {
	pub fn ok() -> Self {
		Self {
			status: ResponseStatus::Ok,
			error: None,
		}
	}

	pub fn error(error: ErrorType) -> Self {
		Self {
			status: ResponseStatus::Error,
			error: Some(error),
		}
	}
}

macro_rules! impl_status_response {
	($($ty:ty),* $(,)?) => {
		$(
			impl StatusResponse for $ty {
				fn status(&self) -> ResponseStatus {
					self.status
				}

				fn error(&self) -> Option<ErrorType> {
					self.error
				}
			}
		)*
	};
}

impl_status_response!(RegisterResponse, KeepAliveResponse, UnregisterResponse);

/// Any session request, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
	Register(RegisterRequest),
	KeepAlive(KeepAliveRequest),
	Unregister(UnregisterRequest),
}

impl Request {
	/// Short method name used in logs.
	pub fn method(&self) -> &'static str {
		match self {
			Self::Register(_) => "register",
			Self::KeepAlive(_) => "keep_alive",
			Self::Unregister(_) => "unregister",
		}
	}
}

/// Any session response, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
	Register(RegisterResponse),
	KeepAlive(KeepAliveResponse),
	Unregister(UnregisterResponse),
}

impl Response {
	pub fn method(&self) -> &'static str {
		match self {
			Self::Register(_) => "register",
			Self::KeepAlive(_) => "keep_alive",
			Self::Unregister(_) => "unregister",
		}
	}
}

impl From<RegisterRequest> for Request {
	fn from(request: RegisterRequest) -> Self {
		Self::Register(request)
	}
}

impl From<KeepAliveRequest> for Request {
	fn from(request: KeepAliveRequest) -> Self {
		Self::KeepAlive(request)
	}
}

impl From<UnregisterRequest> for Request {
	fn from(request: UnregisterRequest) -> Self {
		Self::Unregister(request)
	}
}

impl From<RegisterResponse> for Response {
	fn from(response: RegisterResponse) -> Self {
		Self::Register(response)
	}
}

impl From<KeepAliveResponse> for Response {
	fn from(response: KeepAliveResponse) -> Self {
		Self::KeepAlive(response)
	}
}

impl From<UnregisterResponse> for Response {
	fn from(response: UnregisterResponse) -> Self {
		Self::Unregister(response)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn request_is_tagged_by_type() {
		let request = Request::from(KeepAliveRequest {
			session: 9,
			command_sequence: 4,
			event_index: 12,
		});
		let value = serde_json::to_value(&request).unwrap();
		assert_eq!(
			value,
			json!({"type": "keep_alive", "session": 9, "command_sequence": 4, "event_index": 12})
		);
	}

	#[test]
	fn error_response_parses_without_optional_fields() {
		let response: Response = serde_json::from_value(json!({
			"type": "keep_alive",
			"status": "ERROR",
			"error": "UNKNOWN_SESSION"
		}))
		.unwrap();

		let Response::KeepAlive(keep_alive) = response else {
			panic!("expected keep-alive response");
		};
		assert!(!keep_alive.is_ok());
		assert_eq!(keep_alive.error(), Some(ErrorType::UnknownSession));
		assert!(keep_alive.leader.is_none());
		assert!(keep_alive.members.is_empty());
	}

	#[test]
	fn register_response_carries_membership() {
		let response: RegisterResponse = serde_json::from_value(json!({
			"status": "OK",
			"session": 42,
			"timeout": 10000,
			"leader": "a:5000",
			"members": ["a:5000", "b:5000", "c:5000"]
		}))
		.unwrap();

		assert!(response.is_ok());
		assert_eq!(response.session, 42);
		assert_eq!(response.leader, Some(Address::new("a", 5000)));
		assert_eq!(response.members.len(), 3);
	}

	#[test]
	fn ok_responses_omit_error() {
		let value = serde_json::to_value(UnregisterResponse::ok()).unwrap();
		assert_eq!(value, json!({"status": "OK"}));
	}
}
