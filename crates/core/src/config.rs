//! Session manager configuration.
//!
//! Configuration is plain JSON so it can live next to the rest of a client's
//! settings:
//!
//! ```json
//! {
//!   "clientId": "inventory-service",
//!   "requestTimeoutMs": 2000,
//!   "strategy": { "kind": "exponentialBackoff" },
//!   "selection": "leader",
//!   "members": ["10.0.0.1:5000", "10.0.0.2:5000"]
//! }
//! ```
//!
//! Every field is optional.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use skiff_protocol::Address;
use skiff_runtime::{AddressSelector, SelectionStrategy};

use crate::state::SessionState;
use crate::strategy::StrategyConfig;
use crate::{Error, Result};

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

fn default_request_timeout_ms() -> u64 {
	DEFAULT_REQUEST_TIMEOUT_MS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
	/// Client identity; a random UUID when unset.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_id: Option<String>,
	/// Upper bound for every register, keep-alive and unregister request.
	#[serde(default = "default_request_timeout_ms")]
	pub request_timeout_ms: u64,
	#[serde(default)]
	pub strategy: StrategyConfig,
	#[serde(default)]
	pub selection: SelectionStrategy,
	/// Initial cluster members.
	#[serde(default)]
	pub members: Vec<Address>,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			client_id: None,
			request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
			strategy: StrategyConfig::default(),
			selection: SelectionStrategy::default(),
			members: Vec::new(),
		}
	}
}

impl SessionConfig {
	pub fn from_json_str(json: &str) -> Result<Self> {
		let config: Self = serde_json::from_str(json)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads and validates a JSON configuration file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let content = fs::read_to_string(path)?;
		Self::from_json_str(&content)
	}

	pub fn validate(&self) -> Result<()> {
		if self.request_timeout_ms == 0 {
			return Err(Error::Config("requestTimeoutMs must be greater than zero".into()));
		}
		if self.client_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
			return Err(Error::Config("clientId must not be blank".into()));
		}
		if let StrategyConfig::FixedAttempts { max_attempts: 0, .. } = self.strategy {
			return Err(Error::Config("strategy.maxAttempts must be at least 1".into()));
		}
		Ok(())
	}

	pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
		self.client_id = Some(client_id.into());
		self
	}

	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
		self
	}

	pub fn with_strategy(mut self, strategy: StrategyConfig) -> Self {
		self.strategy = strategy;
		self
	}

	pub fn with_selection(mut self, selection: SelectionStrategy) -> Self {
		self.selection = selection;
		self
	}

	pub fn with_members(mut self, members: impl IntoIterator<Item = Address>) -> Self {
		self.members = members.into_iter().collect();
		self
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_millis(self.request_timeout_ms)
	}

	/// Selector over the configured members, ordered by `selection`.
	pub fn selector(&self) -> AddressSelector {
		AddressSelector::with_strategy(self.selection, self.members.clone())
	}

	/// Fresh session state carrying the configured client identity.
	pub fn session_state(&self) -> SessionState {
		match &self.client_id {
			Some(client_id) => SessionState::new(client_id.clone()),
			None => SessionState::default(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_object_uses_defaults() {
		let config = SessionConfig::from_json_str("{}").unwrap();
		assert_eq!(config, SessionConfig::default());
		assert_eq!(config.request_timeout(), Duration::from_secs(5));
	}

	#[test]
	fn parses_every_field() {
		let config = SessionConfig::from_json_str(
			r#"{
				"clientId": "inventory",
				"requestTimeoutMs": 750,
				"strategy": {"kind": "fixedAttempts", "maxAttempts": 3, "delayMs": 100},
				"selection": "followers",
				"members": ["a:5000", "b:5001"]
			}"#,
		)
		.unwrap();

		assert_eq!(config.client_id.as_deref(), Some("inventory"));
		assert_eq!(config.request_timeout(), Duration::from_millis(750));
		assert_eq!(config.strategy, StrategyConfig::FixedAttempts { max_attempts: 3, delay_ms: 100 });
		assert_eq!(config.selection, SelectionStrategy::Followers);
		assert_eq!(config.members, vec![Address::new("a", 5000), Address::new("b", 5001)]);
		assert_eq!(config.session_state().client_id(), "inventory");
		assert_eq!(config.selector().strategy(), SelectionStrategy::Followers);
		assert_eq!(config.selector().servers(), config.members);
	}

	#[test]
	fn rejects_invalid_values() {
		assert!(matches!(SessionConfig::from_json_str(r#"{"requestTimeoutMs": 0}"#), Err(Error::Config(_))));
		assert!(matches!(SessionConfig::from_json_str(r#"{"clientId": "  "}"#), Err(Error::Config(_))));
		assert!(matches!(
			SessionConfig::from_json_str(r#"{"strategy": {"kind": "fixedAttempts", "maxAttempts": 0}}"#),
			Err(Error::Config(_))
		));
		assert!(matches!(SessionConfig::from_json_str(r#"{"members": ["nope"]}"#), Err(Error::Json(_))));
	}

	#[test]
	fn builders_override_fields() {
		let config = SessionConfig::default()
			.with_client_id("svc")
			.with_request_timeout(Duration::from_millis(1500))
			.with_strategy(StrategyConfig::ExponentialBackoff)
			.with_selection(SelectionStrategy::Leader)
			.with_members([Address::new("a", 1)]);

		assert_eq!(config.request_timeout_ms, 1500);
		assert_eq!(config.strategy, StrategyConfig::ExponentialBackoff);
		assert_eq!(config.selection, SelectionStrategy::Leader);
		assert_eq!(config.members.len(), 1);
	}
}
