//! Connection layer for skiff clients.
//!
//! This crate provides everything between the session manager and the wire:
//! - [`Connection`]: the request/response primitive the session core consumes
//! - [`RpcConnection`]: id correlation on top of a [`Transport`]
//! - [`WebSocketTransport`] and the in-memory [`fake_transport`] for tests
//! - [`AddressSelector`]: believed leader and membership of the cluster
//! - [`ClusterConnection`]: routes requests to members chosen by the selector

pub mod cluster;
pub mod connection;
pub mod error;
pub mod fake_transport;
pub mod rpc;
pub mod selector;
pub mod transport;
pub mod websocket;

pub use cluster::{ClusterConnection, Connector, WebSocketConnector};
pub use connection::{Connection, RpcCall, call};
pub use error::{Error, Result};
pub use rpc::RpcConnection;
pub use selector::{AddressSelector, SelectionStrategy, SelectorState};
pub use transport::{Transport, TransportParts, TransportReceiver};
pub use websocket::WebSocketTransport;
