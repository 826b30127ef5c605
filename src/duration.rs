//! Duration strings of the form used across the configuration surface:
//! `"10s"`, `"250ms"`, `"1m30s"`, `"1.5h"`.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid duration {input:?}: {reason}")]
pub struct DurationError {
    pub input: String,
    pub reason: &'static str,
}

const UNITS: &[(&str, f64)] = &[
    ("ns", 1e-9),
    ("us", 1e-6),
    ("µs", 1e-6),
    ("ms", 1e-3),
    ("s", 1.0),
    ("m", 60.0),
    ("h", 3600.0),
];

pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let fail = |reason| DurationError {
        input: input.to_string(),
        reason,
    };
    let s = input.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(fail("empty"));
    }
    if s.starts_with('-') {
        return Err(fail("negative"));
    }

    let mut rest = s;
    let mut total = 0.0_f64;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if digits == 0 {
            return Err(fail("expected a number"));
        }
        let value: f64 = rest[..digits].parse().map_err(|_| fail("bad number"))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        let scale = UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(|| fail(if unit.is_empty() { "missing unit" } else { "unknown unit" }))?;
        total += value * scale;
        rest = &rest[unit_len..];
    }

    Duration::try_from_secs_f64(total).map_err(|_| fail("out of range"))
}

/// Shortest round-trippable rendering, e.g. `1m30s`, `250ms`.
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }
    if d < Duration::from_secs(1) {
        let ms = d.as_millis();
        if Duration::from_millis(ms as u64) == d {
            return format!("{}ms", ms);
        }
        return format!("{}us", d.as_micros());
    }
    let mut secs = d.as_secs();
    let mut out = String::new();
    if secs >= 3600 {
        out.push_str(&format!("{}h", secs / 3600));
        secs %= 3600;
    }
    if secs >= 60 {
        out.push_str(&format!("{}m", secs / 60));
        secs %= 60;
    }
    let millis = d.subsec_millis();
    if millis > 0 {
        out.push_str(&format!("{}.{:03}s", secs, millis));
    } else if secs > 0 || out.is_empty() {
        out.push_str(&format!("{}s", secs));
    }
    out
}
