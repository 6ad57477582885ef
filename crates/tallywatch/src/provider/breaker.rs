//! Circuit breaker around the OCR provider.
//!
//! Closed until `failure_threshold` consecutive transient failures, then open
//! for `cooldown`. After the cooldown exactly one trial call is let through
//! (half-open); its outcome closes or re-opens the circuit.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::ProviderError;
use crate::clock::SharedClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
enum Inner {
    Closed { failures: u32 },
    Open { until: DateTime<Utc> },
    HalfOpen { trial_in_flight: bool },
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    clock: SharedClock,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration, clock: SharedClock) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            clock,
            inner: Mutex::new(Inner::Closed { failures: 0 }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            log::warn!("Circuit breaker lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn state(&self) -> BreakerState {
        match *self.lock() {
            Inner::Closed { .. } => BreakerState::Closed,
            Inner::Open { .. } => BreakerState::Open,
            Inner::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    /// Asks permission for one provider call. Fails fast while open.
    pub fn acquire(&self) -> Result<(), ProviderError> {
        let now = self.clock.now();
        let mut inner = self.lock();
        match *inner {
            Inner::Closed { .. } => Ok(()),
            Inner::Open { until } if now < until => Err(ProviderError::CircuitOpen {
                retry_in: (until - now).to_std().unwrap_or_default(),
            }),
            Inner::Open { .. } => {
                log::info!("Circuit breaker half-open, allowing trial call");
                *inner = Inner::HalfOpen {
                    trial_in_flight: true,
                };
                Ok(())
            }
            Inner::HalfOpen {
                trial_in_flight: true,
            } => Err(ProviderError::CircuitOpen {
                retry_in: Duration::ZERO,
            }),
            Inner::HalfOpen {
                trial_in_flight: false,
            } => {
                *inner = Inner::HalfOpen {
                    trial_in_flight: true,
                };
                Ok(())
            }
        }
    }

    /// Records the outcome of a call made after `acquire`. Non-transient
    /// errors mean the provider answered, so they count as healthy.
    pub fn record<T>(&self, result: &Result<T, ProviderError>) {
        match result {
            Err(e) if e.is_transient() => self.record_failure(),
            _ => self.record_success(),
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if !matches!(*inner, Inner::Closed { failures: 0 }) {
            if matches!(*inner, Inner::HalfOpen { .. }) {
                log::info!("Circuit breaker closed after successful trial");
            }
            *inner = Inner::Closed { failures: 0 };
        }
    }

    pub fn record_failure(&self) {
        let now = self.clock.now();
        let reopen_until = now + chrono::Duration::from_std(self.cooldown).unwrap_or_default();
        let mut inner = self.lock();
        match *inner {
            Inner::Closed { failures } => {
                let failures = failures + 1;
                if failures >= self.failure_threshold {
                    log::warn!(
                        "Circuit breaker opened after {} consecutive failures",
                        failures
                    );
                    *inner = Inner::Open {
                        until: reopen_until,
                    };
                } else {
                    *inner = Inner::Closed { failures };
                }
            }
            Inner::HalfOpen { .. } => {
                log::warn!("Circuit breaker trial failed, re-opening");
                *inner = Inner::Open {
                    until: reopen_until,
                };
            }
            // A call admitted before the circuit opened finished late.
            Inner::Open { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn breaker(clock: &Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::new(3, Duration::from_secs(30), clock.clone())
    }

    fn transient() -> Result<(), ProviderError> {
        Err(ProviderError::Connection("reset".into()))
    }

    #[test]
    fn test_opens_after_threshold() {
        let clock = Arc::new(ManualClock::default());
        let cb = breaker(&clock);
        for _ in 0..3 {
            cb.acquire().unwrap();
            cb.record(&transient());
        }
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(matches!(
            cb.acquire(),
            Err(ProviderError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let clock = Arc::new(ManualClock::default());
        let cb = breaker(&clock);
        cb.record(&transient());
        cb.record(&transient());
        cb.record(&Ok(()));
        cb.record(&transient());
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_non_transient_errors_do_not_trip() {
        let clock = Arc::new(ManualClock::default());
        let cb = breaker(&clock);
        for _ in 0..5 {
            cb.record::<()>(&Err(ProviderError::MalformedInput("bad".into())));
        }
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_allows_single_trial() {
        let clock = Arc::new(ManualClock::default());
        let cb = breaker(&clock);
        for _ in 0..3 {
            cb.record(&transient());
        }
        clock.advance(chrono::Duration::seconds(31));

        cb.acquire().unwrap();
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        assert!(cb.acquire().is_err());

        cb.record(&Ok(()));
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.acquire().is_ok());
    }

    #[test]
    fn test_failed_trial_reopens() {
        let clock = Arc::new(ManualClock::default());
        let cb = breaker(&clock);
        for _ in 0..3 {
            cb.record(&transient());
        }
        clock.advance(chrono::Duration::seconds(31));
        cb.acquire().unwrap();
        cb.record(&transient());
        assert_eq!(cb.state(), BreakerState::Open);

        match cb.acquire() {
            Err(ProviderError::CircuitOpen { retry_in }) => {
                assert!(retry_in > Duration::from_secs(25));
            }
            other => panic!("expected open circuit, got {other:?}"),
        }
    }
}
