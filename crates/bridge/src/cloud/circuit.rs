// SPDX-License-Identifier: Apache-2.0

//! Circuit breaker guarding the batch sender against a cloud outage (spec
//! §4.5): N consecutive network/5xx failures opens the circuit for a
//! tier-dependent cooldown; a single probe attempt closes it again on success.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::util::epoch_millis;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    Probing,
}

pub struct CircuitBreaker {
    threshold: u32,
    failures: AtomicU32,
    state: Mutex<CircuitState>,
    opened_at: Mutex<Option<u64>>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            failures: AtomicU32::new(0),
            state: Mutex::new(CircuitState::Closed),
            opened_at: Mutex::new(None),
        }
    }

    pub fn state(&self) -> CircuitState {
        #[allow(clippy::unwrap_used)]
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Whether the sender should attempt a request right now. Transitions
    /// `Open` -> `Probing` once `cooldown` has elapsed since it opened.
    pub fn allow(&self, cooldown: Duration) -> bool {
        #[allow(clippy::unwrap_used)]
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        match *state {
            CircuitState::Closed => true,
            CircuitState::Probing => false,
            CircuitState::Open => {
                #[allow(clippy::unwrap_used)]
                let opened_at = self.opened_at.lock().unwrap_or_else(|p| p.into_inner());
                let elapsed = opened_at.map(|at| epoch_millis().saturating_sub(at)).unwrap_or(0);
                if elapsed >= cooldown.as_millis() as u64 {
                    *state = CircuitState::Probing;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn on_success(&self) {
        self.failures.store(0, Ordering::Relaxed);
        #[allow(clippy::unwrap_used)]
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        *state = CircuitState::Closed;
        #[allow(clippy::unwrap_used)]
        let mut opened_at = self.opened_at.lock().unwrap_or_else(|p| p.into_inner());
        *opened_at = None;
    }

    /// Returns `true` if this call caused the circuit to (re)open.
    pub fn on_failure(&self) -> bool {
        #[allow(clippy::unwrap_used)]
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if *state == CircuitState::Probing {
            *state = CircuitState::Open;
            #[allow(clippy::unwrap_used)]
            let mut opened_at = self.opened_at.lock().unwrap_or_else(|p| p.into_inner());
            *opened_at = Some(epoch_millis());
            self.failures.store(self.threshold, Ordering::Relaxed);
            return true;
        }

        let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.threshold && *state == CircuitState::Closed {
            *state = CircuitState::Open;
            #[allow(clippy::unwrap_used)]
            let mut opened_at = self.opened_at.lock().unwrap_or_else(|p| p.into_inner());
            *opened_at = Some(epoch_millis());
            return true;
        }
        false
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_closed_below_threshold() {
        let breaker = CircuitBreaker::new(5);
        for _ in 0..4 {
            breaker.on_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow(Duration::from_secs(30)));
    }

    #[test]
    fn opens_at_threshold_and_blocks_until_cooldown() {
        let breaker = CircuitBreaker::new(3);
        for _ in 0..3 {
            breaker.on_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow(Duration::from_secs(30)));
    }

    #[test]
    fn cooldown_elapsed_allows_one_probe() {
        let breaker = CircuitBreaker::new(1);
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.allow(Duration::from_millis(0)));
        assert_eq!(breaker.state(), CircuitState::Probing);
        assert!(!breaker.allow(Duration::from_millis(0)));
    }

    #[test]
    fn successful_probe_closes_circuit() {
        let breaker = CircuitBreaker::new(1);
        breaker.on_failure();
        breaker.allow(Duration::from_millis(0));
        breaker.on_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow(Duration::from_secs(30)));
    }

    #[test]
    fn failed_probe_reopens_circuit() {
        let breaker = CircuitBreaker::new(1);
        breaker.on_failure();
        breaker.allow(Duration::from_millis(0));
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
