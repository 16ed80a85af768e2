//! Circuit breaker pattern for failure detection and recovery.
//!
//! A breaker trips open after a run of consecutive failures, refuses calls
//! for a cooldown window, then lets exactly one probe through to decide
//! whether to close again. It never retries on its own.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::errors::GenerationError;
use crate::domain::models::{CircuitBreakerConfig, Generation, GenerationContext};
use crate::domain::ports::{Clock, Generator};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally.
    Closed,
    /// Circuit is open, requests are blocked.
    Open,
    /// Cooldown elapsed, a single probe decides the next state.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Result of a circuit breaker check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitCheckResult {
    /// Request is allowed.
    Allowed,
    /// This caller holds the single half-open probe.
    Probe,
    /// Request is blocked by open circuit.
    Blocked { retry_after: DateTime<Utc> },
}

impl CircuitCheckResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed | Self::Probe)
    }
}

/// Statistics for a circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub open_count: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub state_changed_at: DateTime<Utc>,
}

#[derive(Debug)]
struct BreakerState {
    mode: CircuitState,
    failure_count: u32,
    next_attempt_at: Option<DateTime<Utc>>,
    probe_in_flight: bool,
    open_count: u32,
    state_changed_at: DateTime<Utc>,
}

/// Consecutive-failure circuit breaker driven by an injected clock.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    cooldown: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            name: name.into(),
            failure_threshold: config.failure_threshold.max(1),
            cooldown: Duration::seconds(i64::try_from(config.cooldown_secs).unwrap_or(i64::MAX / 1000)),
            clock,
            state: Mutex::new(BreakerState {
                mode: CircuitState::Closed,
                failure_count: 0,
                next_attempt_at: None,
                probe_in_flight: false,
                open_count: 0,
                state_changed_at: now,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check whether a call may proceed, moving an expired open circuit to
    /// half-open and handing out its single probe.
    pub async fn check(&self) -> CircuitCheckResult {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        match state.mode {
            CircuitState::Closed => CircuitCheckResult::Allowed,
            CircuitState::Open => {
                let retry_after = state.next_attempt_at.unwrap_or(now);
                if now >= retry_after {
                    state.mode = CircuitState::HalfOpen;
                    state.state_changed_at = now;
                    state.probe_in_flight = true;
                    debug!(breaker = %self.name, "circuit half-open, probing");
                    CircuitCheckResult::Probe
                } else {
                    CircuitCheckResult::Blocked { retry_after }
                }
            }
            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    CircuitCheckResult::Blocked {
                        retry_after: state.next_attempt_at.unwrap_or(now),
                    }
                } else {
                    state.probe_in_flight = true;
                    CircuitCheckResult::Probe
                }
            }
        }
    }

    /// Record a success: the counter resets and the circuit closes.
    pub async fn record_success(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        if state.mode != CircuitState::Closed {
            debug!(breaker = %self.name, "circuit closed");
            state.state_changed_at = now;
        }
        state.mode = CircuitState::Closed;
        state.failure_count = 0;
        state.next_attempt_at = None;
        state.probe_in_flight = false;
    }

    /// Record a failure, opening the circuit at the threshold or when the
    /// half-open probe fails.
    pub async fn record_failure(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.failure_count = state.failure_count.saturating_add(1);
        let should_open = match state.mode {
            CircuitState::Closed => state.failure_count >= self.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if should_open {
            let retry_after = now + self.cooldown;
            state.mode = CircuitState::Open;
            state.next_attempt_at = Some(retry_after);
            state.probe_in_flight = false;
            state.open_count += 1;
            state.state_changed_at = now;
            warn!(
                breaker = %self.name,
                failures = state.failure_count,
                retry_after = %retry_after,
                "circuit opened"
            );
        }
    }

    /// Run `operation` under breaker protection.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if let CircuitCheckResult::Blocked { retry_after } = self.check().await {
            return Err(CircuitBreakerError::CircuitOpen { retry_after });
        }
        match operation().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(e) => {
                self.record_failure().await;
                Err(CircuitBreakerError::OperationFailed(e))
            }
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.mode
    }

    pub async fn stats(&self) -> CircuitStats {
        let state = self.state.lock().await;
        CircuitStats {
            name: self.name.clone(),
            state: state.mode,
            failure_count: state.failure_count,
            failure_threshold: self.failure_threshold,
            open_count: state.open_count,
            next_attempt_at: state.next_attempt_at,
            state_changed_at: state.state_changed_at,
        }
    }
}

/// Error from circuit breaker protected operation.
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// The circuit is open and blocking requests.
    CircuitOpen { retry_after: DateTime<Utc> },
    /// The underlying operation failed.
    OperationFailed(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CircuitOpen { retry_after } => {
                write!(f, "Circuit breaker open, retry after {retry_after}")
            }
            Self::OperationFailed(e) => write!(f, "Operation failed: {e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CircuitBreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CircuitOpen { .. } => None,
            Self::OperationFailed(e) => Some(e),
        }
    }
}

/// A generator with its own breaker, so one unhealthy backend is skipped
/// quickly while the others keep answering.
pub struct GuardedGenerator {
    inner: Arc<dyn Generator>,
    breaker: CircuitBreaker,
}

impl GuardedGenerator {
    pub fn new(inner: Arc<dyn Generator>, config: &CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let breaker = CircuitBreaker::new(format!("generator:{}", inner.name()), config, clock);
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl Generator for GuardedGenerator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn invoke(
        &self,
        prompt: &str,
        context: &GenerationContext,
    ) -> Result<Generation, GenerationError> {
        match self
            .breaker
            .execute(|| self.inner.invoke(prompt, context))
            .await
        {
            Ok(generation) => Ok(generation),
            Err(CircuitBreakerError::CircuitOpen { retry_after }) => {
                Err(GenerationError::CircuitOpen(retry_after))
            }
            Err(CircuitBreakerError::OperationFailed(e)) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::adapters::clock::ManualClock;
    use crate::adapters::generators::ScriptedGenerator;

    fn config(threshold: u32, cooldown_secs: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            cooldown_secs,
        }
    }

    async fn fail(breaker: &CircuitBreaker, calls: &AtomicU32) -> Result<(), CircuitBreakerError<String>> {
        breaker
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("boom".to_string())
            })
            .await
    }

    #[tokio::test]
    async fn test_opens_at_threshold() {
        let clock = Arc::new(ManualClock::default());
        let breaker = CircuitBreaker::new("t", &config(3, 60), clock);
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            assert!(fail(&breaker, &calls).await.is_err());
        }
        assert_eq!(breaker.state().await, CircuitState::Closed);

        assert!(fail(&breaker, &calls).await.is_err());
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert_eq!(breaker.stats().await.open_count, 1);
    }

    #[tokio::test]
    async fn test_open_circuit_skips_operation() {
        let clock = Arc::new(ManualClock::default());
        let breaker = CircuitBreaker::new("t", &config(2, 60), clock);
        let calls = AtomicU32::new(0);
        let _ = fail(&breaker, &calls).await;
        let _ = fail(&breaker, &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let result = fail(&breaker, &calls).await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_half_open_single_probe_then_close() {
        let clock = Arc::new(ManualClock::default());
        let breaker = CircuitBreaker::new("t", &config(1, 60), clock.clone());
        let calls = AtomicU32::new(0);
        let _ = fail(&breaker, &calls).await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        clock.advance(std::time::Duration::from_secs(61));
        let probe = breaker.check().await;
        assert_eq!(probe, CircuitCheckResult::Probe);
        assert!(probe.is_allowed());
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
        // A second caller is held back while the probe is outstanding.
        assert!(!breaker.check().await.is_allowed());

        breaker.record_success().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert_eq!(breaker.stats().await.failure_count, 0);
    }

    #[tokio::test]
    async fn test_failed_probe_reopens() {
        let clock = Arc::new(ManualClock::default());
        let breaker = CircuitBreaker::new("t", &config(2, 30), clock.clone());
        let calls = AtomicU32::new(0);
        let _ = fail(&breaker, &calls).await;
        let _ = fail(&breaker, &calls).await;

        clock.advance(std::time::Duration::from_secs(31));
        assert!(fail(&breaker, &calls).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert_eq!(breaker.stats().await.open_count, 2);

        // Still inside the new cooldown window.
        let result = fail(&breaker, &calls).await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let clock = Arc::new(ManualClock::default());
        let breaker = CircuitBreaker::new("t", &config(3, 60), clock);
        let calls = AtomicU32::new(0);
        let _ = fail(&breaker, &calls).await;
        let _ = fail(&breaker, &calls).await;
        let ok: Result<u8, CircuitBreakerError<String>> = breaker.execute(|| async { Ok(1) }).await;
        assert_eq!(ok.unwrap(), 1);
        let _ = fail(&breaker, &calls).await;
        let _ = fail(&breaker, &calls).await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_guarded_generator_short_circuits() {
        let clock = Arc::new(ManualClock::default());
        let scripted = Arc::new(ScriptedGenerator::failing("flaky", "down"));
        let guarded = GuardedGenerator::new(scripted.clone(), &config(2, 60), clock);
        let ctx = GenerationContext::new(crate::domain::models::GenerationPhase::Initial);

        assert!(matches!(
            guarded.invoke("q", &ctx).await,
            Err(GenerationError::Transport(_))
        ));
        let _ = guarded.invoke("q", &ctx).await;
        assert!(matches!(
            guarded.invoke("q", &ctx).await,
            Err(GenerationError::CircuitOpen(_))
        ));
        assert_eq!(scripted.call_count(), 2);
        assert_eq!(guarded.breaker().state().await, CircuitState::Open);
    }
}
