use std::time::Duration;

use gridbot_core::circuit_breaker::{Action, CircuitBreakerConfig, CircuitBreakers, CircuitState};

#[test]
fn reconnect_recovers_after_cooldown() {
    let cb = CircuitBreakers::new(CircuitBreakerConfig {
        max_failures: 2,
        reconnect_cooldown: Duration::from_millis(120),
        half_open_success_threshold: 1,
    });

    cb.record_failure(Action::Reconnect, "dial timeout").unwrap();
    assert!(cb.record_failure(Action::Reconnect, "dial timeout").is_err());
    assert_eq!(cb.state(Action::Reconnect), CircuitState::Open);

    std::thread::sleep(Duration::from_millis(150));
    cb.allow_reconnect().expect("cooldown elapsed, reconnect should be permitted");
    assert_eq!(cb.state(Action::Reconnect), CircuitState::HalfOpen);

    cb.record_success(Action::Reconnect);
    assert_eq!(cb.state(Action::Reconnect), CircuitState::Closed);
    assert_eq!(cb.cooldown_remaining(Action::Reconnect), Duration::ZERO);
}
