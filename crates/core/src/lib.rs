//! Client session lifecycle for Raft-style clusters.
//!
//! A session is a client's time-bounded registration with the cluster's
//! replicated state machine. [`SessionManager`] registers it, keeps it alive
//! with heartbeats that follow the cluster leader, and unregisters it on
//! close. Every state change for one session happens on a single task, so
//! responses, timers and caller requests never interleave.
//!
//! ```ignore
//! let selector = Arc::new(config.selector());
//! let connection = ClusterConnection::new(WebSocketConnector::new(), Arc::clone(&selector));
//! let manager = SessionManager::new(connection, selector, config);
//!
//! manager.open().await?;
//! // ... submit commands on the session ...
//! manager.close().await?;
//! ```

pub mod config;
mod context;
pub mod error;
pub mod manager;
pub mod state;
pub mod strategy;

pub use config::SessionConfig;
pub use error::{Error, Result};
pub use manager::{Completion, SessionManager, SessionManagerBuilder};
pub use skiff_protocol as protocol;
pub use skiff_runtime::{AddressSelector, ClusterConnection, Connection, SelectionStrategy, WebSocketConnector};
pub use state::{SessionState, SessionStatus};
pub use strategy::{AttemptFailure, ConnectionStrategy, RegisterAttempt, RetryDecision, StrategyConfig};
