//! Routing requests to cluster members.
//!
//! [`ClusterConnection`] keeps at most one live link to a member chosen by
//! the shared [`AddressSelector`]. When the selector is reset to a different
//! preferred member (e.g. a new leader, or the leader hint was cleared) the
//! next request re-establishes the link following the new ordering. A link
//! that fails at the transport level, times out or is abandoned mid-request
//! is dropped, and the member it pointed at is tried last on the next dial.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use skiff_protocol::{Address, Request, Response};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::rpc::RpcConnection;
use crate::selector::AddressSelector;
use crate::websocket::WebSocketTransport;
use crate::{Error, Result};

/// Opens a connection to a single member.
pub trait Connector: Send + Sync + 'static {
	fn connect<'a>(&'a self, address: &'a Address) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Connection>>> + Send + 'a>>;
}

/// Connects to members over `ws://host:port`.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
	path: String,
}

impl WebSocketConnector {
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends `path` to every member URL (e.g. `/session`).
	pub fn with_path(mut self, path: impl Into<String>) -> Self {
		self.path = path.into();
		self
	}

	fn url(&self, address: &Address) -> String {
		format!("ws://{}{}", address, self.path)
	}
}

impl Connector for WebSocketConnector {
	fn connect<'a>(&'a self, address: &'a Address) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Connection>>> + Send + 'a>> {
		Box::pin(async move {
			let url = self.url(address);
			let (transport, message_rx) = WebSocketTransport::connect(&url).await?;
			let connection = Arc::new(RpcConnection::new(transport.into_transport_parts(message_rx)));
			let runner = Arc::clone(&connection);
			tokio::spawn(async move { runner.run().await });
			Ok(connection as Arc<dyn Connection>)
		})
	}
}

struct Link {
	address: Address,
	generation: u64,
	connection: Arc<dyn Connection>,
}

/// Marks `address` as failed when dropped unsettled, so a request cancelled
/// by its caller counts against the member it was waiting on.
struct Attempt<'a> {
	failed: &'a parking_lot::Mutex<Option<Address>>,
	address: Address,
	settled: bool,
}

impl Attempt<'_> {
	fn settle(&mut self) {
		self.settled = true;
		let mut failed = self.failed.lock();
		if failed.as_ref() == Some(&self.address) {
			*failed = None;
		}
	}
}

impl Drop for Attempt<'_> {
	fn drop(&mut self) {
		if !self.settled {
			*self.failed.lock() = Some(self.address.clone());
		}
	}
}

/// A [`Connection`] that follows the selector across the cluster.
pub struct ClusterConnection<C> {
	connector: C,
	selector: Arc<AddressSelector>,
	request_timeout: Option<Duration>,
	link: Mutex<Option<Link>>,
	/// Member whose last request did not complete.
	failed: parking_lot::Mutex<Option<Address>>,
}

impl<C: Connector> ClusterConnection<C> {
	pub fn new(connector: C, selector: Arc<AddressSelector>) -> Self {
		Self {
			connector,
			selector,
			request_timeout: None,
			link: Mutex::new(None),
			failed: parking_lot::Mutex::new(None),
		}
	}

	/// Fails a request with [`Error::Timeout`] when the linked member does
	/// not answer within `timeout`.
	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = Some(timeout);
		self
	}

	pub fn selector(&self) -> &Arc<AddressSelector> {
		&self.selector
	}

	/// Address of the member currently linked, if any.
	pub async fn current_address(&self) -> Option<Address> {
		self.link.lock().await.as_ref().map(|link| link.address.clone())
	}

	async fn connection(&self) -> Result<(Address, Arc<dyn Connection>)> {
		let mut link = self.link.lock().await;
		let generation = self.selector.generation();
		let failed = self.failed.lock().clone();

		if let Some(current) = link.as_mut() {
			let healthy = failed.as_ref() != Some(&current.address);
			if healthy && (current.generation == generation || self.selector.preferred().as_ref() == Some(&current.address)) {
				current.generation = generation;
				return Ok((current.address.clone(), Arc::clone(&current.connection)));
			}
			debug!(target = "skiff.cluster", address = %current.address, healthy, "dropping link");
		}
		*link = None;

		for address in self.candidates(failed.as_ref()) {
			match self.connector.connect(&address).await {
				Ok(connection) => {
					info!(target = "skiff.cluster", %address, "connected to member");
					*link = Some(Link {
						address: address.clone(),
						generation,
						connection: Arc::clone(&connection),
					});
					return Ok((address, connection));
				}
				Err(err) => warn!(target = "skiff.cluster", %address, error = %err, "member unreachable"),
			}
		}

		self.selector.rewind();
		Err(Error::NoServersAvailable)
	}

	/// Iterates the selector from the start, moving `failed` to the back.
	fn candidates(&self, failed: Option<&Address>) -> Vec<Address> {
		self.selector.rewind();
		let mut candidates: Vec<Address> = std::iter::from_fn(|| self.selector.next()).collect();
		if let Some(index) = failed.and_then(|failed| candidates.iter().position(|address| address == failed)) {
			let address = candidates.remove(index);
			candidates.push(address);
		}
		candidates
	}

	async fn drop_link(&self, address: &Address) {
		let mut link = self.link.lock().await;
		if link.as_ref().is_some_and(|current| &current.address == address) {
			*link = None;
		}
	}

	async fn route(&self, request: Request) -> Result<Response> {
		let (address, connection) = self.connection().await?;
		let mut attempt = Attempt {
			failed: &self.failed,
			address: address.clone(),
			settled: false,
		};
		let result = match self.request_timeout {
			Some(limit) => match tokio::time::timeout(limit, connection.send(request)).await {
				Ok(result) => result,
				Err(_) => Err(Error::Timeout(format!("{address} did not answer within {}ms", limit.as_millis()))),
			},
			None => connection.send(request).await,
		};
		match result {
			Err(err) if err.is_connection_error() || err.is_timeout() => {
				warn!(target = "skiff.cluster", %address, error = %err, "link failed");
				self.drop_link(&address).await;
				Err(err)
			}
			other => {
				attempt.settle();
				other
			}
		}
	}
}

impl<C: Connector> Connection for ClusterConnection<C> {
	fn send(&self, request: Request) -> Pin<Box<dyn Future<Output = Result<Response>> + Send + '_>> {
		Box::pin(self.route(request))
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use parking_lot::Mutex as SyncMutex;
	use skiff_protocol::{UnregisterRequest, UnregisterResponse};

	use super::*;

	/// Connector whose members answer every request with `Ok`, except the
	/// ones listed as down, which refuse connections, and the hung ones,
	/// which accept connections but never answer.
	#[derive(Default)]
	struct StubConnector {
		down: SyncMutex<HashSet<Address>>,
		hung: SyncMutex<HashSet<Address>>,
		connects: SyncMutex<Vec<Address>>,
	}

	#[derive(Clone, Copy)]
	enum StubMember {
		Healthy,
		Broken,
		Hung,
	}

	impl Connection for StubMember {
		fn send(&self, _request: Request) -> Pin<Box<dyn Future<Output = Result<Response>> + Send + '_>> {
			let member = *self;
			Box::pin(async move {
				match member {
					StubMember::Healthy => Ok(UnregisterResponse::ok().into()),
					StubMember::Broken => Err(Error::ConnectionClosed),
					StubMember::Hung => std::future::pending().await,
				}
			})
		}
	}

	impl Connector for Arc<StubConnector> {
		fn connect<'a>(&'a self, address: &'a Address) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Connection>>> + Send + 'a>> {
			Box::pin(async move {
				self.connects.lock().push(address.clone());
				if self.down.lock().contains(address) {
					return Err(Error::Transport(format!("{address} refused")));
				}
				let member = if self.hung.lock().contains(address) { StubMember::Hung } else { StubMember::Healthy };
				Ok(Arc::new(member) as Arc<dyn Connection>)
			})
		}
	}

	fn addr(name: &str) -> Address {
		Address::new(name, 5000)
	}

	fn request() -> Request {
		UnregisterRequest { session: 1 }.into()
	}

	#[tokio::test]
	async fn connects_to_leader_first() {
		let selector = Arc::new(AddressSelector::new(vec![addr("a"), addr("b")]));
		selector.reset(Some(addr("b")), vec![addr("a"), addr("b")]);
		let connector = Arc::new(StubConnector::default());
		let cluster = ClusterConnection::new(Arc::clone(&connector), Arc::clone(&selector));

		cluster.send(request()).await.unwrap();
		assert_eq!(cluster.current_address().await, Some(addr("b")));
	}

	#[tokio::test]
	async fn skips_unreachable_members() {
		let selector = Arc::new(AddressSelector::new(vec![addr("a"), addr("b"), addr("c")]));
		let connector = Arc::new(StubConnector::default());
		connector.down.lock().extend([addr("a"), addr("b")]);
		let cluster = ClusterConnection::new(Arc::clone(&connector), selector);

		cluster.send(request()).await.unwrap();
		assert_eq!(cluster.current_address().await, Some(addr("c")));
		assert_eq!(*connector.connects.lock(), vec![addr("a"), addr("b"), addr("c")]);
	}

	#[tokio::test]
	async fn reports_no_servers_when_all_refuse() {
		let selector = Arc::new(AddressSelector::new(vec![addr("a")]));
		let connector = Arc::new(StubConnector::default());
		connector.down.lock().insert(addr("a"));
		let cluster = ClusterConnection::new(connector, selector);

		let err = cluster.send(request()).await.unwrap_err();
		assert!(matches!(err, Error::NoServersAvailable));
	}

	#[tokio::test]
	async fn reuses_link_until_routing_changes() {
		let selector = Arc::new(AddressSelector::new(vec![addr("a"), addr("b")]));
		let connector = Arc::new(StubConnector::default());
		let cluster = ClusterConnection::new(Arc::clone(&connector), Arc::clone(&selector));

		cluster.send(request()).await.unwrap();
		cluster.send(request()).await.unwrap();
		assert_eq!(connector.connects.lock().len(), 1);

		// Same preferred member after reset keeps the link.
		selector.reset(Some(addr("a")), vec![addr("a"), addr("b")]);
		cluster.send(request()).await.unwrap();
		assert_eq!(connector.connects.lock().len(), 1);

		selector.reset(Some(addr("b")), vec![addr("a"), addr("b")]);
		cluster.send(request()).await.unwrap();
		assert_eq!(cluster.current_address().await, Some(addr("b")));
		assert_eq!(connector.connects.lock().len(), 2);
	}

	#[tokio::test]
	async fn failed_link_is_dropped() {
		struct FlakyConnector;

		impl Connector for FlakyConnector {
			fn connect<'a>(&'a self, _address: &'a Address) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Connection>>> + Send + 'a>> {
				Box::pin(async move { Ok(Arc::new(StubMember::Broken) as Arc<dyn Connection>) })
			}
		}

		let selector = Arc::new(AddressSelector::new(vec![addr("a")]));
		let cluster = ClusterConnection::new(FlakyConnector, selector);

		let err = cluster.send(request()).await.unwrap_err();
		assert!(err.is_connection_error());
		assert_eq!(cluster.current_address().await, None);
	}

	fn cluster_with_hung_leader() -> (Arc<AddressSelector>, Arc<StubConnector>) {
		let members = vec![addr("a"), addr("b"), addr("c")];
		let selector = Arc::new(AddressSelector::new(members.clone()));
		selector.reset(Some(addr("a")), members);
		let connector = Arc::new(StubConnector::default());
		connector.hung.lock().insert(addr("a"));
		(selector, connector)
	}

	#[tokio::test(start_paused = true)]
	async fn abandoned_request_moves_past_hung_member() {
		let (selector, connector) = cluster_with_hung_leader();
		let cluster = ClusterConnection::new(Arc::clone(&connector), Arc::clone(&selector));

		let abandoned = tokio::time::timeout(Duration::from_millis(500), cluster.send(request())).await;
		assert!(abandoned.is_err());
		assert_eq!(cluster.current_address().await, Some(addr("a")));

		// After the leader hint is gone `a` is still first in member order.
		selector.clear_leader();
		cluster.send(request()).await.unwrap();
		assert_eq!(cluster.current_address().await, Some(addr("b")));
		assert_eq!(*connector.connects.lock(), vec![addr("a"), addr("b")]);

		// `b` keeps the link while it answers.
		cluster.send(request()).await.unwrap();
		assert_eq!(connector.connects.lock().len(), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn request_timeout_drops_link() {
		let (selector, connector) = cluster_with_hung_leader();
		let cluster = ClusterConnection::new(Arc::clone(&connector), Arc::clone(&selector)).with_request_timeout(Duration::from_millis(500));

		let err = cluster.send(request()).await.unwrap_err();
		assert!(err.is_timeout());
		assert_eq!(cluster.current_address().await, None);

		selector.clear_leader();
		for _ in 0..3 {
			cluster.send(request()).await.unwrap();
			assert_eq!(cluster.current_address().await, Some(addr("b")));
		}
		assert_eq!(*connector.connects.lock(), vec![addr("a"), addr("b")]);
	}

	#[tokio::test(start_paused = true)]
	async fn failed_member_is_still_tried_last() {
		let selector = Arc::new(AddressSelector::new(vec![addr("a"), addr("b")]));
		let connector = Arc::new(StubConnector::default());
		connector.hung.lock().insert(addr("a"));
		let cluster = ClusterConnection::new(Arc::clone(&connector), Arc::clone(&selector)).with_request_timeout(Duration::from_millis(100));

		cluster.send(request()).await.unwrap_err();
		connector.down.lock().insert(addr("b"));
		connector.hung.lock().clear();

		cluster.send(request()).await.unwrap();
		assert_eq!(cluster.current_address().await, Some(addr("a")));
		assert_eq!(*connector.connects.lock(), vec![addr("a"), addr("b"), addr("a")]);
	}
}
