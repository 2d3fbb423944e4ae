//! Scripted cluster for session manager tests.
//!
//! Every request the manager sends shows up as an [`Exchange`]; the test
//! decides how (and whether) to answer it.

#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use skiff::protocol::{Address, KeepAliveRequest, RegisterResponse, Request, Response, UnregisterRequest};
use skiff::{AddressSelector, Connection, ConnectionStrategy, SessionConfig, SessionManager};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn addr(name: &str) -> Address {
	Address::new(name, 5000)
}

pub fn members() -> Vec<Address> {
	vec![addr("a"), addr("b"), addr("c")]
}

pub fn register_ok(session: u64, timeout_ms: u64, leader: Option<Address>) -> RegisterResponse {
	RegisterResponse::ok(session, timeout_ms, leader, members())
}

/// One request waiting for the test's answer.
pub struct Exchange {
	pub request: Request,
	/// Paused-clock time the request was sent.
	pub at: Instant,
	reply: oneshot::Sender<skiff_runtime::Result<Response>>,
}

impl Exchange {
	pub fn reply(self, response: impl Into<Response>) {
		let _ = self.reply.send(Ok(response.into()));
	}

	pub fn fail(self, error: skiff_runtime::Error) {
		let _ = self.reply.send(Err(error));
	}

	pub fn method(&self) -> &'static str {
		self.request.method()
	}

	pub fn keep_alive(&self) -> &KeepAliveRequest {
		match &self.request {
			Request::KeepAlive(request) => request,
			other => panic!("expected keep_alive, got {other:?}"),
		}
	}

	pub fn unregister(&self) -> &UnregisterRequest {
		match &self.request {
			Request::Unregister(request) => request,
			other => panic!("expected unregister, got {other:?}"),
		}
	}
}

#[derive(Clone)]
pub struct MockConnection {
	exchanges: mpsc::UnboundedSender<Exchange>,
}

impl Connection for MockConnection {
	fn send(&self, request: Request) -> Pin<Box<dyn Future<Output = skiff_runtime::Result<Response>> + Send + '_>> {
		let exchanges = self.exchanges.clone();
		Box::pin(async move {
			let (reply, rx) = oneshot::channel();
			let at = Instant::now();
			exchanges
				.send(Exchange { request, at, reply })
				.map_err(|_| skiff_runtime::Error::ConnectionClosed)?;
			rx.await.unwrap_or(Err(skiff_runtime::Error::ConnectionClosed))
		})
	}
}

/// Test side of the [`MockConnection`].
pub struct Cluster {
	exchanges: mpsc::UnboundedReceiver<Exchange>,
}

impl Cluster {
	/// Waits for the next request; paused time advances while waiting.
	pub async fn next(&mut self) -> Exchange {
		tokio::time::timeout(Duration::from_secs(3600), self.exchanges.recv())
			.await
			.expect("no request within an hour")
			.expect("manager dropped its connection")
	}

	pub async fn expect(&mut self, method: &str) -> Exchange {
		let exchange = self.next().await;
		assert_eq!(exchange.method(), method, "unexpected request {:?}", exchange.request);
		exchange
	}

	/// Request sent so far but not yet taken, if any.
	pub fn try_next(&mut self) -> Option<Exchange> {
		self.exchanges.try_recv().ok()
	}

	/// Lets the manager run for `duration` and asserts it sent nothing.
	pub async fn assert_quiet_for(&mut self, duration: Duration) {
		tokio::time::sleep(duration).await;
		if let Some(exchange) = self.try_next() {
			panic!("unexpected request {:?}", exchange.request);
		}
	}
}

pub fn mock_connection() -> (MockConnection, Cluster) {
	let (exchanges, rx) = mpsc::unbounded_channel();
	(MockConnection { exchanges }, Cluster { exchanges: rx })
}

pub struct Harness {
	pub manager: SessionManager,
	pub selector: Arc<AddressSelector>,
	pub cluster: Cluster,
}

pub fn harness(config: SessionConfig) -> Harness {
	let (connection, cluster) = mock_connection();
	let selector = Arc::new(AddressSelector::new(members()));
	let manager = SessionManager::new(connection, Arc::clone(&selector), config);
	Harness { manager, selector, cluster }
}

pub fn harness_with_strategy(strategy: impl ConnectionStrategy) -> Harness {
	let (connection, cluster) = mock_connection();
	let selector = Arc::new(AddressSelector::new(members()));
	let manager = SessionManager::builder(connection, Arc::clone(&selector))
		.with_config(SessionConfig::default().with_client_id("client-1"))
		.with_strategy(strategy)
		.spawn();
	Harness { manager, selector, cluster }
}

impl Harness {
	/// Opens the session with the given register response.
	pub async fn open_with(&mut self, response: RegisterResponse) {
		let open = self.manager.open();
		self.cluster.expect("register").await.reply(response);
		open.await.expect("open should succeed");
	}
}

/// Wraps a strategy and records the attempt numbers it was asked about.
#[derive(Debug, Clone)]
pub struct Recording<S> {
	pub inner: S,
	pub attempts: Arc<parking_lot::Mutex<Vec<u32>>>,
}

impl<S> Recording<S> {
	pub fn new(inner: S) -> Self {
		Self {
			inner,
			attempts: Arc::default(),
		}
	}

	pub fn attempts(&self) -> Vec<u32> {
		self.attempts.lock().clone()
	}
}

impl<S: ConnectionStrategy> ConnectionStrategy for Recording<S> {
	fn attempt_failed(&self, attempt: &skiff::RegisterAttempt) -> skiff::RetryDecision {
		self.attempts.lock().push(attempt.number);
		self.inner.attempt_failed(attempt)
	}
}

/// Asserts `later - earlier` equals `expected` to the timer's millisecond resolution.
#[track_caller]
pub fn assert_gap(earlier: Instant, later: Instant, expected: Duration) {
	let gap = later.duration_since(earlier);
	assert!(
		gap >= expected && gap < expected + Duration::from_millis(2),
		"expected a gap of {expected:?}, got {gap:?}"
	);
}
