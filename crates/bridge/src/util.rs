// SPDX-License-Identifier: Apache-2.0

//! Small shared helpers used across subsystems.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current epoch time in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Constant-time byte comparison, used by every auth path that compares a
/// caller-supplied secret against a configured one.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Apply exponential backoff with jitter: `base * 2^attempt`, capped, then
/// widened by up to `jitter_pct` percent in either direction.
pub fn backoff_with_jitter(
    base: std::time::Duration,
    cap: std::time::Duration,
    attempt: u32,
    jitter_pct: f64,
) -> std::time::Duration {
    let exp = base.as_millis().saturating_mul(1u128 << attempt.min(20));
    let capped = exp.min(cap.as_millis());
    let jitter_span = (capped as f64 * jitter_pct) as i128;
    let jitter = if jitter_span > 0 {
        rand::random::<i128>().rem_euclid(jitter_span * 2 + 1) - jitter_span
    } else {
        0
    };
    let millis = (capped as i128 + jitter).max(0) as u64;
    std::time::Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_rejects_different_lengths() {
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[test]
    fn constant_time_eq_accepts_equal_slices() {
        assert!(constant_time_eq(b"secret", b"secret"));
    }

    #[test]
    fn backoff_with_jitter_stays_within_cap_plus_jitter() {
        let base = std::time::Duration::from_secs(1);
        let cap = std::time::Duration::from_secs(60);
        for attempt in 0..10 {
            let d = backoff_with_jitter(base, cap, attempt, 0.2);
            assert!(d.as_millis() <= cap.as_millis() + (cap.as_millis() * 2 / 10));
        }
    }
}
