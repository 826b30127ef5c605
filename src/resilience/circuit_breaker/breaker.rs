//! Breaker state machine.
//!
//! # State Transitions
//! ```text
//! Standby    → Tripped:    condition holds at a periodic check
//! Tripped    → Recovering: FallbackDuration elapsed
//! Recovering → Tripped:    condition holds again (fresh fallback window)
//! Recovering → Standby:    RecoveryDuration elapsed
//! ```
//!
//! # Design Decisions
//! - One mutex guards state, timestamps and the metrics window; request
//!   paths hold it only to admit and to record
//! - Transitions are driven by a timer task per breaker that holds a weak
//!   reference, so dropping the breaker ends it; `Drop` also aborts it
//! - Side effects are spawned after the lock is released

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::resilience::circuit_breaker::metrics::RollingMetrics;
use crate::resilience::circuit_breaker::side_effect::Webhook;
use crate::resilience::circuit_breaker::spec::CircuitBreakerSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Standby,
    Tripped,
    Recovering,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Standby => "standby",
            BreakerState::Tripped => "tripped",
            BreakerState::Recovering => "recovering",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Pass,
    Fallback,
}

struct Inner {
    state: BreakerState,
    /// When the current state was entered.
    since: Instant,
    metrics: RollingMetrics,
}

struct Shared {
    id: String,
    spec: CircuitBreakerSpec,
    inner: Mutex<Inner>,
    webhooks: reqwest::Client,
}

pub struct CircuitBreaker {
    shared: Arc<Shared>,
    timer: JoinHandle<()>,
}

impl CircuitBreaker {
    /// Creates the breaker in standby and starts its check timer. Must be
    /// called from within a tokio runtime.
    pub fn new(id: impl Into<String>, spec: CircuitBreakerSpec) -> Self {
        let now = Instant::now();
        let shared = Arc::new(Shared {
            id: id.into(),
            inner: Mutex::new(Inner {
                state: BreakerState::Standby,
                since: now,
                metrics: RollingMetrics::new(now),
            }),
            webhooks: reqwest::Client::new(),
            spec,
        });
        let timer = tokio::spawn(run_timer(Arc::downgrade(&shared), shared.spec.check_period));
        tracing::debug!(breaker = %shared.id, condition = %shared.spec.condition_text, "Circuit breaker created");
        Self { shared, timer }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn spec(&self) -> &CircuitBreakerSpec {
        &self.shared.spec
    }

    pub fn state(&self) -> BreakerState {
        self.shared.lock().state
    }

    /// Runs one periodic check immediately.
    pub fn check_now(&self) {
        self.shared.check(Instant::now());
    }

    pub fn admit(&self) -> Admission {
        let inner = self.shared.lock();
        match inner.state {
            BreakerState::Standby => Admission::Pass,
            BreakerState::Tripped => Admission::Fallback,
            BreakerState::Recovering => {
                let elapsed = Instant::now().saturating_duration_since(inner.since);
                let p = recovery_ratio(elapsed, self.shared.spec.recovery_duration);
                drop(inner);
                if rand::thread_rng().gen_bool(p) {
                    Admission::Pass
                } else {
                    Admission::Fallback
                }
            }
        }
    }

    /// Records the outcome of a request that reached the backend.
    pub fn record(&self, status: u16, latency: Duration, network_error: bool) {
        let now = Instant::now();
        self.shared
            .lock()
            .metrics
            .record(now, status, latency, network_error);
    }
}

impl Drop for CircuitBreaker {
    fn drop(&mut self) {
        self.timer.abort();
        tracing::debug!(breaker = %self.shared.id, "Circuit breaker removed");
    }
}

/// Pass-through probability while recovering: ramps from 0 to 0.5.
fn recovery_ratio(elapsed: Duration, recovery: Duration) -> f64 {
    if recovery.is_zero() {
        return 0.5;
    }
    (0.5 * elapsed.as_secs_f64() / recovery.as_secs_f64()).clamp(0.0, 0.5)
}

async fn run_timer(shared: Weak<Shared>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match shared.upgrade() {
            Some(shared) => shared.check(Instant::now()),
            None => break,
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self, now: Instant) {
        let effect = {
            let mut inner = self.lock();
            inner.metrics.advance(now);
            let elapsed = now.saturating_duration_since(inner.since);
            match inner.state {
                BreakerState::Standby => {
                    if self.spec.condition.eval(&inner.metrics) {
                        self.transition(&mut inner, BreakerState::Tripped, now);
                        self.spec.on_tripped.clone()
                    } else {
                        None
                    }
                }
                BreakerState::Tripped => {
                    if elapsed >= self.spec.fallback_duration {
                        self.transition(&mut inner, BreakerState::Recovering, now);
                    }
                    None
                }
                BreakerState::Recovering => {
                    if self.spec.condition.eval(&inner.metrics) {
                        self.transition(&mut inner, BreakerState::Tripped, now);
                        self.spec.on_tripped.clone()
                    } else if elapsed >= self.spec.recovery_duration {
                        self.transition(&mut inner, BreakerState::Standby, now);
                        self.spec.on_standby.clone()
                    } else {
                        None
                    }
                }
            }
        };

        if let Some(hook) = effect {
            self.fire(hook);
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState, now: Instant) {
        let from = inner.state;
        inner.state = to;
        inner.since = now;
        if to == BreakerState::Tripped {
            inner.metrics.reset(now);
        }
        tracing::warn!(breaker = %self.id, from = %from, to = %to, "Circuit breaker state change");
        metrics::counter!(
            "proxy_breaker_transitions_total",
            "breaker" => self.id.clone(),
            "to" => to.as_str()
        )
        .increment(1);
    }

    fn fire(&self, hook: Webhook) {
        let client = self.webhooks.clone();
        let id = self.id.clone();
        tokio::spawn(async move {
            if let Err(e) = hook.exec(&client).await {
                tracing::warn!(breaker = %id, error = %e, "Circuit breaker side effect failed");
            }
        });
    }
}
