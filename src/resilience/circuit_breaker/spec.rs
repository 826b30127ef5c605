//! Breaker configuration as stored under a frontend:
//!
//! ```json
//! {
//!   "Condition": "NetworkErrorRatio() > 0.5",
//!   "Fallback": {"Type": "response", "Action": {"StatusCode": 503, "Body": "down"}},
//!   "FallbackDuration": "10s",
//!   "RecoveryDuration": "10s",
//!   "CheckPeriod": "100ms",
//!   "OnTripped": {"Type": "webhook", "Action": {"URL": "http://alerts/"}},
//!   "OnStandby": null
//! }
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::duration::parse_duration;
use crate::predicate::{Functions, Operators, Parser, Predicate, PredicateError, Value};
use crate::resilience::circuit_breaker::fallback::Fallback;
use crate::resilience::circuit_breaker::metrics::RollingMetrics;
use crate::resilience::circuit_breaker::side_effect::Webhook;
use crate::resilience::SpecError;

pub const DEFAULT_CHECK_PERIOD: Duration = Duration::from_millis(100);
pub const DEFAULT_FALLBACK_DURATION: Duration = Duration::from_secs(10);
pub const DEFAULT_RECOVERY_DURATION: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawSpec {
    condition: String,
    fallback: serde_json::Value,
    #[serde(default)]
    fallback_duration: Option<String>,
    #[serde(default)]
    recovery_duration: Option<String>,
    #[serde(default)]
    check_period: Option<String>,
    #[serde(default)]
    on_tripped: Option<serde_json::Value>,
    #[serde(default)]
    on_standby: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerSpec {
    pub condition_text: String,
    pub condition: Predicate<RollingMetrics>,
    pub fallback: Fallback,
    pub fallback_duration: Duration,
    pub recovery_duration: Duration,
    pub check_period: Duration,
    pub on_tripped: Option<Webhook>,
    pub on_standby: Option<Webhook>,
}

impl CircuitBreakerSpec {
    pub fn from_json(value: &serde_json::Value) -> Result<Self, SpecError> {
        let raw = RawSpec::deserialize(value)?;
        let condition = compile_condition(&raw.condition).map_err(|source| {
            SpecError::Predicate {
                field: "Condition",
                source,
            }
        })?;
        let fallback = Fallback::from_json(&raw.fallback)?;
        let check_period = duration_field("CheckPeriod", raw.check_period, DEFAULT_CHECK_PERIOD)?;
        if check_period.is_zero() {
            return Err(SpecError::Invalid("CheckPeriod must be positive".to_string()));
        }
        let side_effect = |field: &'static str, v: Option<serde_json::Value>| match v {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(v) => Webhook::from_json(field, &v).map(Some),
        };
        Ok(Self {
            condition_text: raw.condition,
            condition,
            fallback,
            fallback_duration: duration_field(
                "FallbackDuration",
                raw.fallback_duration,
                DEFAULT_FALLBACK_DURATION,
            )?,
            recovery_duration: duration_field(
                "RecoveryDuration",
                raw.recovery_duration,
                DEFAULT_RECOVERY_DURATION,
            )?,
            check_period,
            on_tripped: side_effect("OnTripped", raw.on_tripped)?,
            on_standby: side_effect("OnStandby", raw.on_standby)?,
        })
    }
}

fn duration_field(
    field: &'static str,
    value: Option<String>,
    default: Duration,
) -> Result<Duration, SpecError> {
    match value.as_deref() {
        None | Some("") => Ok(default),
        Some(s) => parse_duration(s).map_err(|source| SpecError::Duration { field, source }),
    }
}

/// Compiles a trip condition over the rolling metrics window.
pub fn compile_condition(text: &str) -> Result<Predicate<RollingMetrics>, PredicateError> {
    let functions = Functions::new()
        .float_mapper("NetworkErrorRatio", |m: &RollingMetrics| m.network_error_ratio())
        .with_float("LatencyAtQuantileMS", |quantile| {
            if !(0.0..=100.0).contains(&quantile) {
                return Err(format!("quantile {} is outside 0..100", quantile));
            }
            Ok(Value::float_mapper(move |m: &RollingMetrics| {
                m.latency_at_quantile_ms(quantile)
            }))
        })
        .with_int_quad("ResponseCodeRatio", |start_a, end_a, start_b, end_b| {
            if start_a >= end_a || start_b >= end_b {
                return Err("each code range must have start < end".to_string());
            }
            Ok(Value::float_mapper(move |m: &RollingMetrics| {
                m.response_code_ratio(start_a, end_a, start_b, end_b)
            }))
        });
    Parser::new(functions, Operators::standard()).parse(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time::Instant;

    fn fallback() -> serde_json::Value {
        json!({"Type": "response", "Action": {"StatusCode": 503, "Body": "down"}})
    }

    #[test]
    fn test_defaults() {
        let spec = CircuitBreakerSpec::from_json(&json!({
            "Condition": "NetworkErrorRatio() > 0.5",
            "Fallback": fallback()
        }))
        .unwrap();
        assert_eq!(spec.check_period, DEFAULT_CHECK_PERIOD);
        assert_eq!(spec.fallback_duration, DEFAULT_FALLBACK_DURATION);
        assert_eq!(spec.recovery_duration, DEFAULT_RECOVERY_DURATION);
        assert!(spec.on_tripped.is_none());
    }

    #[test]
    fn test_durations_parsed() {
        let spec = CircuitBreakerSpec::from_json(&json!({
            "Condition": "LatencyAtQuantileMS(50.0) > 20",
            "Fallback": fallback(),
            "FallbackDuration": "1m",
            "RecoveryDuration": "250ms",
            "CheckPeriod": "1s"
        }))
        .unwrap();
        assert_eq!(spec.fallback_duration, Duration::from_secs(60));
        assert_eq!(spec.recovery_duration, Duration::from_millis(250));
        assert_eq!(spec.check_period, Duration::from_secs(1));
    }

    #[test]
    fn test_bad_condition_rejected() {
        let err = CircuitBreakerSpec::from_json(&json!({
            "Condition": "ResponseCodeRatio(500, 600) > 0.5",
            "Fallback": fallback()
        }))
        .unwrap_err();
        assert!(matches!(err, SpecError::Predicate { field: "Condition", .. }));

        let err = CircuitBreakerSpec::from_json(&json!({
            "Condition": "NetworkErrorRatio() > 0.5",
            "Fallback": fallback(),
            "CheckPeriod": "soon"
        }))
        .unwrap_err();
        assert!(matches!(err, SpecError::Duration { field: "CheckPeriod", .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_condition_reads_metrics() {
        let now = Instant::now();
        let mut m = RollingMetrics::new(now);
        let p = compile_condition("ResponseCodeRatio(500, 600, 0, 600) > 0.5").unwrap();
        m.record(now, 500, Duration::from_millis(1), false);
        assert!(p.eval(&m));
        m.record(now, 200, Duration::from_millis(1), false);
        m.record(now, 200, Duration::from_millis(1), false);
        assert!(!p.eval(&m));
    }
}
