//! Cluster membership and leader tracking.
//!
//! The [`AddressSelector`] holds the client's current belief about the
//! cluster: the (possibly stale) leader and the member list. Sessions update
//! it from register and keep-alive responses; [`ClusterConnection`] iterates
//! it to pick the member a request is sent to.
//!
//! [`ClusterConnection`]: crate::ClusterConnection

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use skiff_protocol::Address;

/// Order in which members are tried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
	/// Leader first (when known), then every other member.
	#[default]
	Any,
	/// Only the leader when known, otherwise every member.
	Leader,
	/// Every member except the leader, or all members if that leaves none.
	Followers,
}

impl SelectionStrategy {
	/// Orders `servers` into the candidate list for this strategy.
	pub fn select(&self, leader: Option<&Address>, servers: &[Address]) -> Vec<Address> {
		match (self, leader) {
			(_, None) => servers.to_vec(),
			(Self::Any, Some(leader)) => std::iter::once(leader.clone())
				.chain(servers.iter().filter(|s| *s != leader).cloned())
				.collect(),
			(Self::Leader, Some(leader)) => vec![leader.clone()],
			(Self::Followers, Some(leader)) => {
				let followers: Vec<_> = servers.iter().filter(|s| *s != leader).cloned().collect();
				if followers.is_empty() { servers.to_vec() } else { followers }
			}
		}
	}
}

/// Position of the selector's iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorState {
	/// Freshly reset, nothing handed out yet.
	Reset,
	Iterate,
	/// Every candidate has been handed out.
	Complete,
}

#[derive(Debug)]
struct Inner {
	leader: Option<Address>,
	servers: Vec<Address>,
	selections: Vec<Address>,
	position: usize,
	generation: u64,
}

impl Inner {
	fn reselect(&mut self, strategy: SelectionStrategy) {
		self.selections = strategy.select(self.leader.as_ref(), &self.servers);
		self.position = 0;
		self.generation += 1;
	}
}

/// Shared, internally synchronized view of the cluster.
///
/// Invariant: `leader`, when set, is always one of `servers`.
#[derive(Debug)]
pub struct AddressSelector {
	strategy: SelectionStrategy,
	inner: Mutex<Inner>,
}

impl AddressSelector {
	/// Creates a selector over `servers` with no known leader.
	pub fn new(servers: impl IntoIterator<Item = Address>) -> Self {
		Self::with_strategy(SelectionStrategy::default(), servers)
	}

	pub fn with_strategy(strategy: SelectionStrategy, servers: impl IntoIterator<Item = Address>) -> Self {
		let servers = dedup(servers);
		let mut inner = Inner {
			leader: None,
			servers,
			selections: Vec::new(),
			position: 0,
			generation: 0,
		};
		inner.reselect(strategy);
		Self {
			strategy,
			inner: Mutex::new(inner),
		}
	}

	pub fn strategy(&self) -> SelectionStrategy {
		self.strategy
	}

	/// Current leader, if one is known.
	pub fn leader(&self) -> Option<Address> {
		self.inner.lock().leader.clone()
	}

	/// Current members.
	pub fn servers(&self) -> Vec<Address> {
		self.inner.lock().servers.clone()
	}

	/// Replaces the leader and membership in one step and restarts iteration.
	///
	/// A leader missing from `servers` is added to them. An empty `servers`
	/// keeps the current membership.
	pub fn reset(&self, leader: Option<Address>, servers: impl IntoIterator<Item = Address>) {
		let mut servers = dedup(servers);
		let mut inner = self.inner.lock();
		if servers.is_empty() {
			servers = inner.servers.clone();
		}
		if let Some(leader) = &leader {
			if !servers.contains(leader) {
				servers.insert(0, leader.clone());
			}
		}
		inner.leader = leader;
		inner.servers = servers;
		inner.reselect(self.strategy);
	}

	/// Forgets the leader, keeping every member.
	pub fn clear_leader(&self) {
		let mut inner = self.inner.lock();
		inner.leader = None;
		inner.reselect(self.strategy);
	}

	/// Hands out the next candidate, or `None` once all have been tried.
	pub fn next(&self) -> Option<Address> {
		let mut inner = self.inner.lock();
		let address = inner.selections.get(inner.position).cloned();
		if address.is_some() {
			inner.position += 1;
		}
		address
	}

	/// Restarts iteration without changing membership.
	pub fn rewind(&self) {
		self.inner.lock().position = 0;
	}

	/// First candidate of the current ordering.
	pub fn preferred(&self) -> Option<Address> {
		self.inner.lock().selections.first().cloned()
	}

	pub fn state(&self) -> SelectorState {
		let inner = self.inner.lock();
		if inner.position == 0 {
			SelectorState::Reset
		} else if inner.position < inner.selections.len() {
			SelectorState::Iterate
		} else {
			SelectorState::Complete
		}
	}

	/// Counter bumped on every reset; lets connections notice routing changes.
	pub fn generation(&self) -> u64 {
		self.inner.lock().generation
	}
}

fn dedup(servers: impl IntoIterator<Item = Address>) -> Vec<Address> {
	let mut unique = Vec::new();
	for server in servers {
		if !unique.contains(&server) {
			unique.push(server);
		}
	}
	unique
}
