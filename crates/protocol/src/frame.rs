//! Framing for requests and responses on a connection.
//!
//! Each request is assigned a connection-unique `id`; the server echoes it
//! back so responses can be correlated with pending requests.

use serde::{Deserialize, Serialize};

use crate::{Request, Response};

/// Request frame sent to a cluster member.
///
/// ```json
/// {
///   "id": 42,
///   "body": { "type": "unregister", "session": 7 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
	/// Unique request ID for correlating responses
	pub id: u32,
	pub body: Request,
}

/// Response frame received from a cluster member.
///
/// ```json
/// {
///   "id": 42,
///   "body": { "type": "unregister", "status": "OK" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFrame {
	/// Request ID this response correlates to
	pub id: u32,
	pub body: Response,
}
