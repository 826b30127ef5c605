//! Circuit breaker middleware.
//!
//! # States
//! - Standby: requests pass through and feed the rolling metrics window
//! - Tripped: every request gets the fallback
//! - Recovering: requests pass with a probability ramping from 0 to 0.5
//!
//! # Condition Functions
//! - `NetworkErrorRatio()`: share of requests that failed in transport
//! - `LatencyAtQuantileMS(q)`: latency at percentile `q`, in milliseconds
//! - `ResponseCodeRatio(a, b, c, d)`: codes in `[a, b)` over codes in `[c, d)`

pub mod breaker;
pub mod fallback;
pub mod layer;
pub mod metrics;
pub mod side_effect;
pub mod spec;

pub use breaker::{Admission, BreakerState, CircuitBreaker};
pub use fallback::Fallback;
pub use layer::{CircuitBreakerLayer, CircuitBreakerService};
pub use metrics::RollingMetrics;
pub use side_effect::{SideEffectError, Webhook};
pub use spec::{compile_condition, CircuitBreakerSpec};
