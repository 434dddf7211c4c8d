//! Bounded exponential reconnect backoff with full jitter.
//!
//! A bounded random delay, capped and recomputed per attempt, spacing out
//! reconnects rather than outbound
//! sends.

use std::time::Duration;

use rand::{thread_rng, Rng};

/// Base delay for the first reconnect attempt.
pub const BASE: Duration = Duration::from_millis(250);
/// Upper bound any single backoff delay is clamped to.
pub const CAP: Duration = Duration::from_secs(30);

/// Computes the full-jitter backoff delay for the given zero-based attempt
/// number: a uniformly random duration in `[0, min(CAP, BASE * 2^attempt)]`.
#[must_use]
pub fn delay(attempt: u32) -> Duration {
	let exp = BASE.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
	let bound = exp.min(CAP);
	thread_rng().gen_range(Duration::ZERO..=bound)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn delay_is_bounded_by_cap() {
		for attempt in 0..20 {
			assert!(delay(attempt) <= CAP);
		}
	}

	#[test]
	fn delay_grows_with_attempt_bound() {
		assert!(delay(0) <= BASE);
		assert!(delay(1) <= BASE * 2);
	}
}
