//! Duration parsing for configuration values
//!
//! Accepts plain seconds (`30`, `"30"`) or duration literals made of
//! `<number><unit>` groups (`"1h30m"`, `"1.5s"`, `"500ms"`).

use crate::{Error, Result};
use serde_json::Value;
use std::time::Duration;

/// Parse a configuration value holding seconds or a duration literal
///
/// `null` and the empty string mean zero.
pub fn parse_duration_value(value: &Value) -> Result<Duration> {
    match value {
        Value::Null => Ok(Duration::ZERO),
        Value::Number(n) => {
            if let Some(secs) = n.as_u64() {
                Ok(Duration::from_secs(secs))
            } else {
                match n.as_f64() {
                    Some(secs) if secs >= 0.0 && secs.is_finite() => {
                        Ok(Duration::from_secs_f64(secs))
                    }
                    _ => Err(invalid(&n.to_string())),
                }
            }
        }
        Value::String(s) => parse_duration(s),
        other => Err(invalid(&other.to_string())),
    }
}

/// Parse seconds or a duration literal
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return Ok(Duration::ZERO);
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        let secs: u64 = s.parse().map_err(|_| invalid(input))?;
        return Ok(Duration::from_secs(secs));
    }
    parse_literal(s).ok_or_else(|| invalid(input))
}

fn parse_literal(s: &str) -> Option<Duration> {
    let s = s.strip_prefix('+').unwrap_or(s);
    if s == "0" {
        return Some(Duration::ZERO);
    }

    let mut total_nanos: f64 = 0.0;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let number: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total_nanos += number * scale;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(total_nanos.round() as u64))
}

fn invalid(input: &str) -> Error {
    Error::Config(format!("invalid duration: {:?}", input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_seconds() {
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
        assert_eq!(
            parse_duration_value(&json!(45)).unwrap(),
            Duration::from_secs(45)
        );
        assert_eq!(
            parse_duration_value(&json!("600")).unwrap(),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
    }

    #[test]
    fn test_empty_and_null_mean_zero() {
        assert_eq!(parse_duration("").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration_value(&Value::Null).unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_malformed() {
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("-5s").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration_value(&json!(-3)).is_err());
        assert!(parse_duration_value(&json!(true)).is_err());
    }
}
