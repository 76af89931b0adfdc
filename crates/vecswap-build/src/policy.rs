//! Retry and circuit-breaker policies for calls to external services.
//!
//! Both are plain values composed around a call, not wrappers baked into
//! the callee.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, warn};

use vecswap_core::{CircuitConfig, RetryConfig, epoch_secs};

use crate::error::{BuildError, BuildResult};

/// Bounded retries with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before retry number `retry` (1-based): doubles each time, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut op: F) -> BuildResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BuildResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    warn!(%label, attempts = attempt, error = %e, "retries exhausted");
                    return Err(BuildError::Exhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.backoff(attempt);
                    debug!(%label, attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected until the recovery timeout elapses.
    Open,
    /// One trial call is allowed; its outcome closes or reopens the circuit.
    HalfOpen,
}

struct CircuitInner {
    consecutive_failures: u32,
    opened_at: Option<u64>,
}

/// Stops calling a failing service for a recovery period.
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout_secs: u64,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout_secs: u64) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout_secs,
            inner: Mutex::new(CircuitInner {
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    pub fn from_config(config: &CircuitConfig) -> Self {
        Self::new(config.failure_threshold, config.recovery_timeout_secs)
    }

    pub fn state_at(&self, now: u64) -> CircuitState {
        let inner = self.inner.lock().expect("circuit lock");
        self.state_of(&inner, now)
    }

    pub fn state(&self) -> CircuitState {
        self.state_at(epoch_secs())
    }

    /// Reject the call if the circuit is open.
    pub fn check_at(&self, now: u64) -> BuildResult<()> {
        let inner = self.inner.lock().expect("circuit lock");
        match (self.state_of(&inner, now), inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => Err(BuildError::CircuitOpen {
                retry_after_secs: (opened_at + self.recovery_timeout_secs).saturating_sub(now),
            }),
            _ => Ok(()),
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("circuit lock");
        if inner.opened_at.is_some() {
            debug!("circuit closed");
        }
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    pub fn record_failure_at(&self, now: u64) {
        let mut inner = self.inner.lock().expect("circuit lock");
        inner.consecutive_failures += 1;
        let trial_failed = self.state_of(&inner, now) == CircuitState::HalfOpen;
        if trial_failed || inner.consecutive_failures >= self.failure_threshold {
            if inner.opened_at.is_none() || trial_failed {
                warn!(
                    failures = inner.consecutive_failures,
                    recovery_secs = self.recovery_timeout_secs,
                    "circuit opened"
                );
            }
            inner.opened_at = Some(now);
        }
    }

    /// Run `op` through the breaker.
    pub async fn call<T, Fut>(&self, op: Fut) -> BuildResult<T>
    where
        Fut: Future<Output = BuildResult<T>>,
    {
        self.check_at(epoch_secs())?;
        let result = op.await;
        match &result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure_at(epoch_secs()),
        }
        result
    }

    fn state_of(&self, inner: &CircuitInner, now: u64) -> CircuitState {
        match inner.opened_at {
            None => CircuitState::Closed,
            Some(at) if now.saturating_sub(at) >= self.recovery_timeout_secs => CircuitState::HalfOpen,
            Some(_) => CircuitState::Open,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    fn transient() -> BuildError {
        BuildError::Connect {
            address: "127.0.0.1:1".into(),
            reason: "refused".into(),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_millis(1000),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(4), Duration::from_millis(1000));
        assert_eq!(policy.backoff(40), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .execute("submit", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err(transient()) } else { Ok(n) } }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: BuildResult<()> = fast_policy(3)
            .execute("submit", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;
        assert!(matches!(result, Err(BuildError::Exhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: BuildResult<()> = fast_policy(5)
            .execute("submit", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(BuildError::Status {
                        uri: "http://jobs".into(),
                        status: 400,
                        body: "bad request".into(),
                    })
                }
            })
            .await;
        assert!(matches!(result, Err(BuildError::Status { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn circuit_opens_at_threshold() {
        let breaker = CircuitBreaker::new(3, 30);
        breaker.record_failure_at(100);
        breaker.record_failure_at(101);
        assert_eq!(breaker.state_at(101), CircuitState::Closed);
        breaker.record_failure_at(102);
        assert_eq!(breaker.state_at(102), CircuitState::Open);
        assert!(matches!(
            breaker.check_at(110),
            Err(BuildError::CircuitOpen { retry_after_secs: 22 })
        ));
    }

    #[test]
    fn circuit_half_opens_after_recovery_timeout() {
        let breaker = CircuitBreaker::new(1, 30);
        breaker.record_failure_at(100);
        assert_eq!(breaker.state_at(129), CircuitState::Open);
        assert_eq!(breaker.state_at(130), CircuitState::HalfOpen);
        assert!(breaker.check_at(130).is_ok());
    }

    #[test]
    fn failed_trial_reopens() {
        let breaker = CircuitBreaker::new(5, 30);
        for t in 0..5 {
            breaker.record_failure_at(100 + t);
        }
        assert_eq!(breaker.state_at(140), CircuitState::HalfOpen);
        breaker.record_failure_at(140);
        assert_eq!(breaker.state_at(141), CircuitState::Open);
    }

    #[test]
    fn success_closes_circuit() {
        let breaker = CircuitBreaker::new(1, 30);
        breaker.record_failure_at(100);
        breaker.record_success();
        assert_eq!(breaker.state_at(101), CircuitState::Closed);
    }

    #[tokio::test]
    async fn call_rejects_while_open() {
        let breaker = CircuitBreaker::new(1, 3600);
        let _ = breaker.call(async { Err::<(), _>(transient()) }).await;
        let calls = AtomicU32::new(0);
        let result = breaker
            .call(async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(BuildError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
