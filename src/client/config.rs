//! Plugin configuration decoding and resolution
//!
//! The host hands over a loosely typed mapping. Values are decoded weakly:
//! `"true"` and `1` are both booleans, `"4"` is a number, numbers are
//! accepted where strings are expected. Unknown keys are ignored.

use super::connection_string::ConnectionString;
use crate::connection::{PoolPolicy, TlsConfig, DEFAULT_MAX_OPEN};
use crate::duration::parse_duration_value;
use crate::{Error, Result};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

/// Configuration mapping as received from the host
pub type ConfigMap = Map<String, Value>;

/// Weakly decoded configuration keys
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    #[serde(deserialize_with = "weak::string")]
    pub connection_url: String,
    #[serde(deserialize_with = "weak::string")]
    pub username: String,
    #[serde(deserialize_with = "weak::string")]
    pub password: String,
    #[serde(deserialize_with = "weak::string")]
    pub username_template: String,
    #[serde(deserialize_with = "weak::unsigned")]
    pub max_open_connections: u64,
    #[serde(deserialize_with = "weak::unsigned")]
    pub max_idle_connections: u64,
    pub max_connection_lifetime: Value,
    #[serde(deserialize_with = "weak::boolean")]
    pub tls: bool,
    #[serde(deserialize_with = "weak::boolean")]
    pub tls_skip_verify: bool,
    #[serde(deserialize_with = "weak::string")]
    pub tls_ca: String,
    #[serde(deserialize_with = "weak::string")]
    pub tls_certificate_key: String,
    #[serde(deserialize_with = "weak::string")]
    pub tls_server_name: String,
    #[serde(deserialize_with = "weak::string")]
    pub database: String,
    #[serde(deserialize_with = "weak::boolean")]
    pub debug: bool,
}

impl RawConfig {
    /// Decode a host mapping
    pub fn decode(map: &ConfigMap) -> Result<Self> {
        serde_json::from_value(Value::Object(map.clone()))
            .map_err(|e| Error::Config(format!("invalid configuration: {}", e)))
    }

    fn has_tls_material(&self) -> bool {
        !self.tls_ca.is_empty()
            || !self.tls_certificate_key.is_empty()
            || !self.tls_server_name.is_empty()
    }
}

/// Validated producer configuration
#[derive(Clone)]
pub struct ProducerConfig {
    /// Fully resolved DSN
    pub connection_url: String,
    /// Login user from the configuration
    pub username: String,
    /// Login password from the configuration
    pub password: String,
    /// Pool policy with idle clamped to open
    pub policy: PoolPolicy,
    /// TLS settings built from inline PEM material
    pub tls: Option<TlsConfig>,
    /// The mapping exactly as received
    pub raw: ConfigMap,
}

impl std::fmt::Debug for ProducerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerConfig")
            .field("username", &self.username)
            .field("password", &"***")
            .field("policy", &self.policy)
            .field("tls", &self.tls)
            .finish_non_exhaustive()
    }
}

impl ProducerConfig {
    /// Decode and validate a host mapping; performs no network IO
    pub fn resolve(map: &ConfigMap) -> Result<Self> {
        let raw = RawConfig::decode(map)?;

        if raw.connection_url.is_empty() {
            return Err(Error::Config("connection_url cannot be empty".into()));
        }

        let url = resolve_placeholders(&raw.connection_url, &raw.username, &raw.password);
        let mut cs = ConnectionString::parse(&url)?;

        if raw.tls {
            cs = cs.with_tls(raw.tls_skip_verify);
        }
        if !raw.database.is_empty() {
            cs = cs.with_database(&raw.database);
        }
        if !raw.username.is_empty() {
            cs = cs.with_username(&raw.username);
        }
        if !raw.password.is_empty() {
            cs = cs.with_password(&raw.password);
        }
        if raw.debug {
            cs = cs.with_debug();
        }

        let tls = if raw.has_tls_material() {
            if !cs.tls {
                cs = cs.with_tls(raw.tls_skip_verify);
            }
            Some(build_tls(&raw)?)
        } else {
            None
        };

        let connection_url = cs.build()?;
        let policy = pool_policy(&raw)?;

        Ok(Self {
            connection_url,
            username: raw.username,
            password: raw.password,
            policy,
            tls,
            raw: map.clone(),
        })
    }
}

/// Substitute `{{username}}` / `{{password}}` in a DSN template
///
/// Values are percent-encoded so they survive URL parsing unchanged.
pub fn resolve_placeholders(url: &str, username: &str, password: &str) -> String {
    let username = utf8_percent_encode(username, NON_ALPHANUMERIC).to_string();
    let password = utf8_percent_encode(password, NON_ALPHANUMERIC).to_string();
    url.replace("{{username}}", &username)
        .replace("{{password}}", &password)
}

fn pool_policy(raw: &RawConfig) -> Result<PoolPolicy> {
    let max_open = match raw.max_open_connections {
        0 => DEFAULT_MAX_OPEN,
        n => usize::try_from(n)
            .map_err(|_| Error::Config("max_open_connections is out of range".into()))?,
    };
    let max_idle = match usize::try_from(raw.max_idle_connections) {
        Ok(0) => max_open,
        Ok(n) => n.min(max_open),
        Err(_) => max_open,
    };
    let max_lifetime = parse_lifetime(&raw.max_connection_lifetime)?;

    Ok(PoolPolicy {
        max_open,
        max_idle,
        max_lifetime,
    })
}

fn parse_lifetime(value: &Value) -> Result<Duration> {
    parse_duration_value(value)
        .map_err(|e| Error::Config(format!("invalid max_connection_lifetime: {}", e)))
}

fn build_tls(raw: &RawConfig) -> Result<TlsConfig> {
    let mut builder = TlsConfig::builder().danger_accept_invalid_certs(raw.tls_skip_verify);
    if !raw.tls_ca.is_empty() {
        builder = builder.ca_pem(&raw.tls_ca);
    }
    if !raw.tls_certificate_key.is_empty() {
        builder = builder.client_identity_pem(&raw.tls_certificate_key);
    }
    if !raw.tls_server_name.is_empty() {
        builder = builder.server_name(&raw.tls_server_name);
    }
    builder.build()
}

/// Coercing field deserializers
mod weak {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(String::new()),
            Value::String(s) => Ok(s),
            Value::Bool(b) => Ok(if b { "1" } else { "0" }.to_string()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(D::Error::custom(format!(
                "expected a string, got {}",
                kind(&other)
            ))),
        }
    }

    pub fn boolean<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(false),
            Value::Bool(b) => Ok(b),
            Value::Number(n) => Ok(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
            Value::String(s) => match s.as_str() {
                "" => Ok(false),
                "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
                "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
                _ => Err(D::Error::custom(format!("cannot parse {:?} as bool", s))),
            },
            other => Err(D::Error::custom(format!(
                "expected a bool, got {}",
                kind(&other)
            ))),
        }
    }

    pub fn unsigned<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(0),
            Value::Bool(b) => Ok(u64::from(b)),
            Value::Number(n) => {
                if let Some(v) = n.as_u64() {
                    Ok(v)
                } else {
                    match n.as_f64() {
                        Some(f) if f >= 0.0 && f.is_finite() => Ok(f.trunc() as u64),
                        _ => Err(D::Error::custom(format!("{} is not a non-negative integer", n))),
                    }
                }
            }
            Value::String(s) if s.trim().is_empty() => Ok(0),
            Value::String(s) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| D::Error::custom(format!("cannot parse {:?} as integer", s))),
            other => Err(D::Error::custom(format!(
                "expected an integer, got {}",
                kind(&other)
            ))),
        }
    }

    fn kind(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> ConfigMap {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_weak_decoding() {
        let raw = RawConfig::decode(&map(json!({
            "connection_url": "tcp://h:9000",
            "max_open_connections": "7",
            "max_idle_connections": 2.0,
            "tls": "true",
            "tls_skip_verify": 1,
            "debug": "0",
            "password": 1234,
            "unknown_key": ["ignored"],
        })))
        .unwrap();

        assert_eq!(raw.max_open_connections, 7);
        assert_eq!(raw.max_idle_connections, 2);
        assert!(raw.tls);
        assert!(raw.tls_skip_verify);
        assert!(!raw.debug);
        assert_eq!(raw.password, "1234");
    }

    #[test]
    fn test_weak_decoding_rejects_garbage() {
        let err = RawConfig::decode(&map(json!({"tls": "maybe"}))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        assert!(RawConfig::decode(&map(json!({"max_open_connections": "many"}))).is_err());
        assert!(RawConfig::decode(&map(json!({"max_open_connections": -1}))).is_err());
    }

    #[test]
    fn test_resolve_example() {
        let config = ProducerConfig::resolve(&map(json!({
            "connection_url": "tcp://h:9000?username={{username}}&password={{password}}",
            "username": "admin",
            "password": "pw",
        })))
        .unwrap();

        assert_eq!(config.connection_url, "tcp://h:9000?password=pw&username=admin");
        assert_eq!(config.policy, PoolPolicy::default());
        assert!(config.tls.is_none());
        assert_eq!(config.raw.len(), 3);
    }

    #[test]
    fn test_resolve_placeholders_survive_special_characters() {
        let config = ProducerConfig::resolve(&map(json!({
            "connection_url": "tcp://{{username}}:{{password}}@h:9000/db",
            "username": "vault user",
            "password": "p@ss&word=1",
        })))
        .unwrap();

        let cs = ConnectionString::parse(&config.connection_url).unwrap();
        assert_eq!(cs.username, "vault user");
        assert_eq!(cs.password, "p@ss&word=1");
        assert_eq!(cs.database, "db");
    }

    #[test]
    fn test_resolve_applies_overrides() {
        let config = ProducerConfig::resolve(&map(json!({
            "connection_url": "tcp://h:9000/old?username=root&compress=lz4",
            "username": "vault",
            "database": "new",
            "tls": true,
            "tls_skip_verify": true,
            "debug": true,
        })))
        .unwrap();

        assert_eq!(
            config.connection_url,
            "tcp://h:9000/new?compress=lz4&debug=true&secure=true&skip_verify=true&username=vault"
        );
    }

    #[test]
    fn test_resolve_requires_connection_url() {
        let err = ProducerConfig::resolve(&map(json!({"username": "admin"}))).unwrap_err();
        assert_eq!(err.to_string(), "connection_url cannot be empty");
    }

    #[test]
    fn test_resolve_rejects_bad_dsn() {
        let err = ProducerConfig::resolve(&map(json!({
            "connection_url": "tcp://h:port",
        })))
        .unwrap_err();
        assert!(matches!(err, Error::ConnectionString(_)));
    }

    #[test]
    fn test_idle_never_exceeds_open() {
        for (open, idle, want_open, want_idle) in [
            (0, 0, 4, 4),
            (10, 0, 10, 10),
            (10, 3, 10, 3),
            (2, 50, 2, 2),
            (0, 9, 4, 4),
        ] {
            let config = ProducerConfig::resolve(&map(json!({
                "connection_url": "tcp://h:9000",
                "max_open_connections": open,
                "max_idle_connections": idle,
            })))
            .unwrap();
            assert_eq!(config.policy.max_open, want_open);
            assert_eq!(config.policy.max_idle, want_idle);
            assert!(config.policy.max_idle <= config.policy.max_open);
        }
    }

    #[test]
    fn test_lifetime_forms() {
        for (value, want) in [
            (json!(null), Duration::ZERO),
            (json!(60), Duration::from_secs(60)),
            (json!("60"), Duration::from_secs(60)),
            (json!("1m30s"), Duration::from_secs(90)),
        ] {
            let config = ProducerConfig::resolve(&map(json!({
                "connection_url": "tcp://h:9000",
                "max_connection_lifetime": value,
            })))
            .unwrap();
            assert_eq!(config.policy.max_lifetime, want);
        }

        let err = ProducerConfig::resolve(&map(json!({
            "connection_url": "tcp://h:9000",
            "max_connection_lifetime": "forever",
        })))
        .unwrap_err();
        assert!(err.to_string().starts_with("invalid max_connection_lifetime"));
    }

    #[test]
    fn test_tls_material_enables_tls() {
        let config = ProducerConfig::resolve(&map(json!({
            "connection_url": "tcp://h:9440",
            "tls_server_name": "clickhouse.internal",
            "tls_skip_verify": true,
        })))
        .unwrap();

        let tls = config.tls.expect("tls config");
        assert_eq!(tls.server_name(), Some("clickhouse.internal"));
        assert!(config.connection_url.contains("secure=true"));
    }

    #[test]
    fn test_bad_ca_is_rejected() {
        let err = ProducerConfig::resolve(&map(json!({
            "connection_url": "tcp://h:9440",
            "tls_ca": "not a pem",
        })))
        .unwrap_err();
        assert!(err.to_string().contains("failed to append CA"));
    }
}
