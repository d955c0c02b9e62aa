//! Circuit breaker (C4): three independent circuits (`place`, `cancel`,
//! `reconnect`), sharing one configuration shape but distinct counters and
//! distinct half-open rules. `place`/`cancel` never self-heal into
//! half-open; only `reconnect` does, gated by [`CircuitBreakers::allow_reconnect`].
//!
//! One mutex covers all three circuits (§5): call volume through the
//! breaker is low (per order/cancel/reconnect attempt), so a single lock
//! keeps the state machine simple without becoming a bottleneck.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::CircuitOpenError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Place,
    Cancel,
    Reconnect,
}

impl Action {
    fn as_str(self) -> &'static str {
        match self {
            Action::Place => "place",
            Action::Cancel => "cancel",
            Action::Reconnect => "reconnect",
        }
    }

    fn allows_half_open(self) -> bool {
        matches!(self, Action::Reconnect)
    }

    fn emits_near_trip(self) -> bool {
        matches!(self, Action::Place | Action::Cancel)
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub max_failures: u32,
    pub reconnect_cooldown: Duration,
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reconnect_cooldown: Duration::from_secs(30),
            half_open_success_threshold: 1,
        }
    }
}

struct Circuit {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    last_error: String,
    half_open_successes: u32,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            last_error: String::new(),
            half_open_successes: 0,
        }
    }
}

struct Inner {
    place: Circuit,
    cancel: Circuit,
    reconnect: Circuit,
}

impl Inner {
    fn get_mut(&mut self, action: Action) -> &mut Circuit {
        match action {
            Action::Place => &mut self.place,
            Action::Cancel => &mut self.cancel,
            Action::Reconnect => &mut self.reconnect,
        }
    }
}

/// Three independent circuits sharing one mutex and one configuration.
pub struct CircuitBreakers {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

fn circuit_open_error(action: Action, circuit: &Circuit) -> CircuitOpenError {
    CircuitOpenError {
        action: action.as_str(),
        failures: circuit.consecutive_failures,
        last_error: circuit.last_error.clone(),
    }
}

impl CircuitBreakers {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner { place: Circuit::new(), cancel: Circuit::new(), reconnect: Circuit::new() }),
        }
    }

    pub fn state(&self, action: Action) -> CircuitState {
        self.inner.lock().get_mut(action).state
    }

    /// Records a failed call. Returns `Err(CircuitOpen)` if the circuit is
    /// (now, or already) open: the caller treats that as a hard stop for
    /// this attempt rather than a retryable transport error.
    pub fn record_failure(&self, action: Action, error: impl std::fmt::Display) -> Result<(), CircuitOpenError> {
        let mut guard = self.inner.lock();
        let circuit = guard.get_mut(action);
        circuit.last_error = error.to_string();

        match circuit.state {
            CircuitState::Open => Err(circuit_open_error(action, circuit)),
            CircuitState::Closed => {
                circuit.consecutive_failures += 1;

                if action.emits_near_trip() && circuit.consecutive_failures == self.config.max_failures - 1 {
                    warn!(
                        event = "near_trip",
                        action = action.as_str(),
                        failures = circuit.consecutive_failures,
                        threshold = self.config.max_failures,
                    );
                }

                if circuit.consecutive_failures >= self.config.max_failures {
                    circuit.state = CircuitState::Open;
                    circuit.opened_at = Some(Instant::now());
                    warn!(
                        event = "circuit_breaker_trip",
                        action = action.as_str(),
                        failures = circuit.consecutive_failures,
                        last_error = %circuit.last_error,
                    );
                    return Err(circuit_open_error(action, circuit));
                }
                Ok(())
            }
            CircuitState::HalfOpen => {
                circuit.consecutive_failures += 1;
                circuit.state = CircuitState::Open;
                circuit.opened_at = Some(Instant::now());
                circuit.last_error = format!("half_open_probe_failed: {}", circuit.last_error);
                warn!(
                    event = "circuit_breaker_trip",
                    action = action.as_str(),
                    phase = "half_open_probe_failed",
                    last_error = %circuit.last_error,
                );
                Err(circuit_open_error(action, circuit))
            }
        }
    }

    /// Records a successful call. Closed circuits reset their counter;
    /// half-open circuits close once `half_open_success_threshold` is met.
    pub fn record_success(&self, action: Action) {
        let mut guard = self.inner.lock();
        let circuit = guard.get_mut(action);
        match circuit.state {
            CircuitState::Closed => {
                circuit.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                circuit.half_open_successes += 1;
                if circuit.half_open_successes >= self.config.half_open_success_threshold {
                    info!(event = "circuit_breaker_recovered", action = action.as_str());
                    circuit.state = CircuitState::Closed;
                    circuit.consecutive_failures = 0;
                    circuit.half_open_successes = 0;
                    circuit.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Reconnect-only gate: consulted before every reconnect attempt.
    /// Transitions `open -> half_open` once the cooldown has elapsed and
    /// permits exactly the call that observes that transition.
    pub fn allow_reconnect(&self) -> Result<(), CircuitOpenError> {
        let mut guard = self.inner.lock();
        let circuit = &mut guard.reconnect;
        match circuit.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = circuit.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed < self.config.reconnect_cooldown {
                    return Err(circuit_open_error(Action::Reconnect, circuit));
                }
                circuit.state = CircuitState::HalfOpen;
                circuit.consecutive_failures = 0;
                circuit.half_open_successes = 0;
                info!(event = "circuit_breaker_half_open", action = "reconnect");
                Ok(())
            }
        }
    }

    pub fn cooldown_remaining(&self, action: Action) -> Duration {
        let guard = self.inner.lock();
        let circuit = match action {
            Action::Place => &guard.place,
            Action::Cancel => &guard.cancel,
            Action::Reconnect => &guard.reconnect,
        };
        match (circuit.state, circuit.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                self.config.reconnect_cooldown.saturating_sub(opened_at.elapsed())
            }
            _ => Duration::ZERO,
        }
    }

    /// Forces a circuit back to closed. Used for `place`/`cancel`, which
    /// never self-heal, when a higher-level reset is triggered (process
    /// restart is the normal path; this exists for tests and for an
    /// operator-triggered reset).
    pub fn reset(&self, action: Action) {
        let mut guard = self.inner.lock();
        *guard.get_mut(action) = Circuit::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_failures: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            max_failures,
            reconnect_cooldown: Duration::from_millis(50),
            half_open_success_threshold: 1,
        }
    }

    #[test]
    fn place_trips_after_max_failures_and_never_self_heals() {
        let cb = CircuitBreakers::new(config(3));
        assert!(cb.record_failure(Action::Place, "e1").is_ok());
        assert!(cb.record_failure(Action::Place, "e2").is_ok());
        assert!(cb.record_failure(Action::Place, "e3").is_err());
        assert_eq!(cb.state(Action::Place), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(80));
        // place has no cooldown-based self-heal; still open.
        assert!(cb.record_failure(Action::Place, "e4").is_err());
        assert_eq!(cb.state(Action::Place), CircuitState::Open);
    }

    #[test]
    fn success_resets_closed_failure_count() {
        let cb = CircuitBreakers::new(config(3));
        cb.record_failure(Action::Cancel, "e1").unwrap();
        cb.record_failure(Action::Cancel, "e2").unwrap();
        cb.record_success(Action::Cancel);
        assert!(cb.record_failure(Action::Cancel, "e3").is_ok());
        assert_eq!(cb.state(Action::Cancel), CircuitState::Closed);
    }

    #[test]
    fn reconnect_recovers_through_half_open() {
        let cb = CircuitBreakers::new(config(2));
        assert!(cb.record_failure(Action::Reconnect, "e1").is_ok());
        assert!(cb.record_failure(Action::Reconnect, "e2").is_err());
        assert_eq!(cb.state(Action::Reconnect), CircuitState::Open);

        assert!(cb.allow_reconnect().is_err());
        std::thread::sleep(Duration::from_millis(80));
        assert!(cb.allow_reconnect().is_ok());
        assert_eq!(cb.state(Action::Reconnect), CircuitState::HalfOpen);

        cb.record_success(Action::Reconnect);
        assert_eq!(cb.state(Action::Reconnect), CircuitState::Closed);
        assert_eq!(cb.cooldown_remaining(Action::Reconnect), Duration::ZERO);
    }

    #[test]
    fn reconnect_half_open_failure_reopens() {
        let cb = CircuitBreakers::new(config(1));
        cb.record_failure(Action::Reconnect, "e1").unwrap_err();
        std::thread::sleep(Duration::from_millis(80));
        cb.allow_reconnect().unwrap();
        assert_eq!(cb.state(Action::Reconnect), CircuitState::HalfOpen);

        assert!(cb.record_failure(Action::Reconnect, "probe failed").is_err());
        assert_eq!(cb.state(Action::Reconnect), CircuitState::Open);
    }

    #[test]
    fn near_trip_threshold_only_applies_to_place_and_cancel() {
        // Exercised via tracing output in practice; here we just assert the
        // circuit doesn't trip early for place at failures == max - 1.
        let cb = CircuitBreakers::new(config(3));
        assert!(cb.record_failure(Action::Place, "e1").is_ok());
        assert!(cb.record_failure(Action::Place, "e2").is_ok());
        assert_eq!(cb.state(Action::Place), CircuitState::Closed);
    }

    #[test]
    fn manual_reset_reopens_place_for_business() {
        let cb = CircuitBreakers::new(config(1));
        cb.record_failure(Action::Place, "e1").unwrap_err();
        assert_eq!(cb.state(Action::Place), CircuitState::Open);
        cb.reset(Action::Place);
        assert_eq!(cb.state(Action::Place), CircuitState::Closed);
    }
}
