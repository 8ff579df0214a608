//! Connection string parsing and building
//!
//! Supports formats:
//! * tcp://host:port[/database][?param=value&...]
//! * clickhouse://[user[:password]@]host:port[/database][?param=value&...]
//!
//! Recognised query parameters are `username`, `password`, `secure`,
//! `skip_verify` and `debug`. Everything else is kept verbatim in `extra`
//! and emitted again, key-sorted, by `build`.

use crate::connection::{ConnectOptions, TlsConfig};
use crate::duration::parse_duration;
use crate::{Error, Result};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::collections::BTreeMap;
use url::form_urlencoded;
use url::Url;

/// Characters escaped in the database path segment
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

const PARAM_USERNAME: &str = "username";
const PARAM_PASSWORD: &str = "password";
const PARAM_SECURE: &str = "secure";
const PARAM_SKIP_VERIFY: &str = "skip_verify";
const PARAM_DEBUG: &str = "debug";

/// Extra keys the native driver interprets
const PARAM_DIAL_TIMEOUT: &str = "dial_timeout";
const PARAM_READ_TIMEOUT: &str = "read_timeout";
const PARAM_WRITE_TIMEOUT: &str = "write_timeout";

/// Structured ClickHouse DSN
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionString {
    /// Server host
    pub host: String,
    /// Native port (0 = unset)
    pub port: u16,
    /// Default database (empty = none)
    pub database: String,
    /// Login user
    pub username: String,
    /// Login password
    pub password: String,
    /// `secure=true`
    pub tls: bool,
    /// `skip_verify=true`
    pub tls_skip_verify: bool,
    /// `debug=true`
    pub debug: bool,
    /// Unrecognised query parameters
    pub extra: BTreeMap<String, String>,
}

impl ConnectionString {
    /// Empty connection string; set at least host and port before `build`
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a DSN
    pub fn parse(dsn: &str) -> Result<Self> {
        let url = Url::parse(dsn).map_err(|e| Error::ConnectionString(e.to_string()))?;

        match url.scheme() {
            "tcp" | "clickhouse" => {}
            other => {
                return Err(Error::ConnectionString(format!(
                    "unsupported scheme {:?}, expected tcp:// or clickhouse://",
                    other
                )))
            }
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::ConnectionString("missing host".into()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']').to_string();

        let port = url
            .port()
            .ok_or_else(|| Error::ConnectionString("missing port".into()))?;

        let database = decode(url.path().trim_start_matches('/'))?;

        let mut cs = ConnectionString {
            host,
            port,
            database,
            username: decode(url.username())?,
            password: decode(url.password().unwrap_or_default())?,
            ..Default::default()
        };

        let mut seen_username = false;
        let mut seen_password = false;
        let mut seen_secure = false;
        let mut seen_skip_verify = false;
        let mut seen_debug = false;

        // First occurrence of a key wins
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                PARAM_USERNAME if !seen_username => {
                    seen_username = true;
                    cs.username = value.into_owned();
                }
                PARAM_PASSWORD if !seen_password => {
                    seen_password = true;
                    cs.password = value.into_owned();
                }
                PARAM_SECURE if !seen_secure => {
                    seen_secure = true;
                    cs.tls = parse_bool(PARAM_SECURE, &value)?;
                }
                PARAM_SKIP_VERIFY if !seen_skip_verify => {
                    seen_skip_verify = true;
                    cs.tls_skip_verify = parse_bool(PARAM_SKIP_VERIFY, &value)?;
                }
                PARAM_DEBUG if !seen_debug => {
                    seen_debug = true;
                    cs.debug = parse_bool(PARAM_DEBUG, &value)?;
                }
                PARAM_USERNAME | PARAM_PASSWORD | PARAM_SECURE | PARAM_SKIP_VERIFY
                | PARAM_DEBUG => {}
                _ => {
                    cs.extra
                        .entry(key.into_owned())
                        .or_insert_with(|| value.into_owned());
                }
            }
        }

        Ok(cs)
    }

    /// Set the host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the default database
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the login user
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Set the login password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Enable TLS, optionally without certificate verification
    pub fn with_tls(mut self, skip_verify: bool) -> Self {
        self.tls = true;
        self.tls_skip_verify = skip_verify;
        self
    }

    /// Enable driver debug logging
    pub fn with_debug(mut self) -> Self {
        self.debug = true;
        self
    }

    /// Add a passthrough query parameter
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Fail unless host and port are set and the database is a usable path segment
    pub fn check(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::ConnectionString("host cannot be empty".into()));
        }
        if self.port == 0 {
            return Err(Error::ConnectionString("port cannot be empty".into()));
        }
        // URL parsing resolves dot segments, escaped or not
        if self.database == "." || self.database == ".." {
            return Err(Error::ConnectionString(format!(
                "invalid database name {:?}",
                self.database
            )));
        }
        Ok(())
    }

    /// Serialize to `tcp://host:port[/database]?sorted-params`
    ///
    /// Output is deterministic: parameters are sorted by key, flags appear only
    /// when true and credentials only when non-empty.
    pub fn build(&self) -> Result<String> {
        self.check()?;

        let mut params: BTreeMap<&str, &str> = BTreeMap::new();
        for (key, value) in &self.extra {
            params.insert(key, value);
        }
        if self.debug {
            params.insert(PARAM_DEBUG, "true");
        }
        if !self.password.is_empty() {
            params.insert(PARAM_PASSWORD, &self.password);
        }
        if self.tls {
            params.insert(PARAM_SECURE, "true");
        }
        if self.tls_skip_verify {
            params.insert(PARAM_SKIP_VERIFY, "true");
        }
        if !self.username.is_empty() {
            params.insert(PARAM_USERNAME, &self.username);
        }

        let mut dsn = String::from("tcp://");
        if self.host.contains(':') {
            dsn.push('[');
            dsn.push_str(&self.host);
            dsn.push(']');
        } else {
            dsn.push_str(&self.host);
        }
        dsn.push(':');
        dsn.push_str(&self.port.to_string());

        if !self.database.is_empty() {
            dsn.push('/');
            dsn.extend(utf8_percent_encode(&self.database, PATH_SEGMENT));
        }

        if !params.is_empty() {
            let mut query = form_urlencoded::Serializer::new(String::new());
            for (key, value) in params {
                query.append_pair(key, value);
            }
            dsn.push('?');
            dsn.push_str(&query.finish());
        }

        Ok(dsn)
    }

    /// Native driver options for this DSN
    ///
    /// When `secure` is set and no `tls` is supplied, a configuration using the
    /// system roots (or no verification, with `skip_verify`) is built.
    pub fn to_connect_options(&self, tls: Option<&TlsConfig>) -> Result<ConnectOptions> {
        self.check()?;

        let mut builder = ConnectOptions::builder(&self.host, self.port)
            .database(&self.database)
            .user(&self.username)
            .password(&self.password)
            .debug(self.debug);

        if self.tls {
            let tls = match tls {
                Some(tls) => tls.clone(),
                None => TlsConfig::builder()
                    .danger_accept_invalid_certs(self.tls_skip_verify)
                    .build()?,
            };
            builder = builder.tls(tls);
        }

        if let Some(timeout) = self.extra_duration(PARAM_DIAL_TIMEOUT)? {
            builder = builder.dial_timeout(timeout);
        }
        if let Some(timeout) = self.extra_duration(PARAM_READ_TIMEOUT)? {
            builder = builder.read_timeout(timeout);
        }
        if let Some(timeout) = self.extra_duration(PARAM_WRITE_TIMEOUT)? {
            builder = builder.write_timeout(timeout);
        }

        Ok(builder.build())
    }

    fn extra_duration(&self, key: &str) -> Result<Option<std::time::Duration>> {
        match self.extra.get(key) {
            None => Ok(None),
            Some(raw) => {
                let duration = parse_duration(raw).map_err(|_| {
                    Error::ConnectionString(format!("invalid {} value {:?}", key, raw))
                })?;
                Ok((!duration.is_zero()).then_some(duration))
            }
        }
    }
}

/// Boolean literals accepted for flag parameters
fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(Error::ConnectionString(format!(
            "invalid boolean value {:?} for {}",
            value, key
        ))),
    }
}

fn decode(raw: &str) -> Result<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| Error::ConnectionString(e.to_string()))
}
