//! Cluster member addresses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Network address of a cluster member.
///
/// Serialized as a `host:port` string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
	host: String,
	port: u16,
}

impl Address {
	/// Creates an address from a host name (or IP literal) and port.
	pub fn new(host: impl Into<String>, port: u16) -> Self {
		Self { host: host.into(), port }
	}

	/// Returns the host portion.
	pub fn host(&self) -> &str {
		&self.host
	}

	/// Returns the port.
	pub fn port(&self) -> u16 {
		self.port
	}
}

impl fmt::Display for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.host.contains(':') {
			write!(f, "[{}]:{}", self.host, self.port)
		} else {
			write!(f, "{}:{}", self.host, self.port)
		}
	}
}

/// Error returned when an address string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressParseError(String);

impl fmt::Display for AddressParseError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "invalid address '{}': expected host:port", self.0)
	}
}

impl std::error::Error for AddressParseError {}

impl FromStr for Address {
	type Err = AddressParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let invalid = || AddressParseError(s.to_string());
		let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
		let host = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host);
		if host.is_empty() {
			return Err(invalid());
		}
		let port = port.parse::<u16>().map_err(|_| invalid())?;
		Ok(Self::new(host, port))
	}
}

impl TryFrom<String> for Address {
	type Error = AddressParseError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		value.parse()
	}
}

impl From<Address> for String {
	fn from(address: Address) -> Self {
		address.to_string()
	}
}
