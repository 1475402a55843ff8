// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Exponential retry backoff.

use std::time::Duration;

/// Upper bound on any single backoff.
pub const MAX_RETRY_DELAY_MS: u64 = 300_000;

/// Backoff before retry number `attempt` (zero-based):
/// `min(base * 2^attempt, 300_000)` milliseconds.
pub fn retry_delay_ms(attempt: u32, base_delay_ms: u64) -> u64 {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    base_delay_ms.saturating_mul(factor).min(MAX_RETRY_DELAY_MS)
}

/// [`retry_delay_ms`] as a [`Duration`].
pub fn retry_delay(attempt: u32, base_delay_ms: u64) -> Duration {
    Duration::from_millis(retry_delay_ms(attempt, base_delay_ms))
}

/// Whether a run that has already retried `retry_count` times may go again.
pub fn may_retry(retry_count: u32, max_retries: u32) -> bool {
    retry_count < max_retries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_attempt_uses_base() {
        assert_eq!(retry_delay_ms(0, 30_000), 30_000);
    }

    #[test]
    fn test_doubles() {
        assert_eq!(retry_delay_ms(1, 30_000), 60_000);
        assert_eq!(retry_delay_ms(2, 30_000), 120_000);
    }

    #[test]
    fn test_capped() {
        assert_eq!(retry_delay_ms(10, 30_000), 300_000);
        assert_eq!(retry_delay_ms(63, 30_000), 300_000);
        assert_eq!(retry_delay_ms(200, 1), 300_000);
    }

    #[test]
    fn test_duration() {
        assert_eq!(retry_delay(1, 500), Duration::from_millis(1000));
    }

    #[test]
    fn test_zero_max_retries_disables() {
        assert!(!may_retry(0, 0));
        assert!(may_retry(0, 1));
        assert!(!may_retry(1, 1));
    }
}
