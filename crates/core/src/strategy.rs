//! Registration retry policies.
//!
//! The manager hands every failed registration attempt to a
//! [`ConnectionStrategy`], which decides whether to try again and when.
//! Keep-alive and unregister failures never reach the strategy.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use skiff_protocol::ErrorType;

use crate::Error;

/// Why a registration attempt failed.
#[derive(Debug)]
pub enum AttemptFailure {
	/// The cluster answered with an `ERROR` status.
	Rejected(Option<ErrorType>),
	/// The request never produced a response.
	Connection(skiff_runtime::Error),
}

impl fmt::Display for AttemptFailure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Rejected(Some(error)) => write!(f, "rejected: {error:?}"),
			Self::Rejected(None) => f.write_str("rejected"),
			Self::Connection(err) => write!(f, "{err}"),
		}
	}
}

/// A failed registration attempt. Attempts are numbered from 1.
#[derive(Debug)]
pub struct RegisterAttempt {
	pub number: u32,
	pub failure: AttemptFailure,
}

/// What the manager does after a failed attempt.
#[derive(Debug)]
pub enum RetryDecision {
	/// Start the next attempt immediately.
	Now,
	/// Start the next attempt after the delay.
	After(Duration),
	/// Give up. `None` fails the open with the default registration error.
	Fail(Option<Error>),
}

/// Decides how registration reacts to failures.
pub trait ConnectionStrategy: Send + Sync + fmt::Debug + 'static {
	fn attempt_failed(&self, attempt: &RegisterAttempt) -> RetryDecision;
}

/// Gives up on the first failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct Once;

impl ConnectionStrategy for Once {
	fn attempt_failed(&self, _attempt: &RegisterAttempt) -> RetryDecision {
		RetryDecision::Fail(None)
	}
}

const MAX_BACKOFF_SECS: u64 = 5;

/// Retries forever, waiting `min(2^n, 5)` seconds after attempt `n`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExponentialBackoff;

impl ConnectionStrategy for ExponentialBackoff {
	fn attempt_failed(&self, attempt: &RegisterAttempt) -> RetryDecision {
		let secs = 1u64.checked_shl(attempt.number).unwrap_or(u64::MAX).min(MAX_BACKOFF_SECS);
		RetryDecision::After(Duration::from_secs(secs))
	}
}

const FIBONACCI_SECS: [u64; 5] = [1, 1, 2, 3, 5];

/// Retries forever following 1, 1, 2, 3, 5, 5, ... seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct FibonacciBackoff;

impl ConnectionStrategy for FibonacciBackoff {
	fn attempt_failed(&self, attempt: &RegisterAttempt) -> RetryDecision {
		let index = (attempt.number.saturating_sub(1) as usize).min(FIBONACCI_SECS.len() - 1);
		RetryDecision::After(Duration::from_secs(FIBONACCI_SECS[index]))
	}
}

/// Retries until `max_attempts` attempts have failed.
#[derive(Debug, Clone, Copy)]
pub struct FixedAttempts {
	pub max_attempts: u32,
	/// Zero retries immediately.
	pub delay: Duration,
}

impl ConnectionStrategy for FixedAttempts {
	fn attempt_failed(&self, attempt: &RegisterAttempt) -> RetryDecision {
		if attempt.number >= self.max_attempts {
			RetryDecision::Fail(None)
		} else if self.delay.is_zero() {
			RetryDecision::Now
		} else {
			RetryDecision::After(self.delay)
		}
	}
}

/// Serializable selection of a built-in strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StrategyConfig {
	#[default]
	Once,
	ExponentialBackoff,
	FibonacciBackoff,
	FixedAttempts {
		max_attempts: u32,
		#[serde(default)]
		delay_ms: u64,
	},
}

impl StrategyConfig {
	pub fn build(&self) -> Arc<dyn ConnectionStrategy> {
		match *self {
			Self::Once => Arc::new(Once),
			Self::ExponentialBackoff => Arc::new(ExponentialBackoff),
			Self::FibonacciBackoff => Arc::new(FibonacciBackoff),
			Self::FixedAttempts { max_attempts, delay_ms } => Arc::new(FixedAttempts {
				max_attempts,
				delay: Duration::from_millis(delay_ms),
			}),
		}
	}
}
