//! The request/response primitive consumed by the session core.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use skiff_protocol::{
	KeepAliveRequest, KeepAliveResponse, RegisterRequest, RegisterResponse, Request, Response, UnregisterRequest, UnregisterResponse,
};

use crate::{Error, Result};

/// Sends a request to the cluster and yields its response.
///
/// The returned future fails on transport-level problems (disconnect,
/// unusable peer). Server-side rejections are *responses* with an `ERROR`
/// status, not errors.
pub trait Connection: Send + Sync + 'static {
	fn send(&self, request: Request) -> Pin<Box<dyn Future<Output = Result<Response>> + Send + '_>>;
}

impl<C: Connection + ?Sized> Connection for Arc<C> {
	fn send(&self, request: Request) -> Pin<Box<dyn Future<Output = Result<Response>> + Send + '_>> {
		(**self).send(request)
	}
}

/// A typed request with a known response type.
pub trait RpcCall: Into<Request> + Send + 'static {
	type Response: Send + 'static;

	/// Extracts the typed response, rejecting a response for another method.
	fn expect_response(response: Response) -> Result<Self::Response>;
}

fn unexpected(expected: &str, response: &Response) -> Error {
	Error::Protocol(format!("expected {expected} response, got {}", response.method()))
}

impl RpcCall for RegisterRequest {
	type Response = RegisterResponse;

	fn expect_response(response: Response) -> Result<Self::Response> {
		match response {
			Response::Register(response) => Ok(response),
			other => Err(unexpected("register", &other)),
		}
	}
}

impl RpcCall for KeepAliveRequest {
	type Response = KeepAliveResponse;

	fn expect_response(response: Response) -> Result<Self::Response> {
		match response {
			Response::KeepAlive(response) => Ok(response),
			other => Err(unexpected("keep_alive", &other)),
		}
	}
}

impl RpcCall for UnregisterRequest {
	type Response = UnregisterResponse;

	fn expect_response(response: Response) -> Result<Self::Response> {
		match response {
			Response::Unregister(response) => Ok(response),
			other => Err(unexpected("unregister", &other)),
		}
	}
}

/// Sends a typed request over `connection` and returns the typed response.
pub async fn call<C, R>(connection: &C, request: R) -> Result<R::Response>
where
	C: Connection + ?Sized,
	R: RpcCall,
{
	let response = connection.send(request.into()).await?;
	R::expect_response(response)
}
