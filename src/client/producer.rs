//! Connection producer
//!
//! Owns the validated configuration and at most one live handle. Every
//! operation that reads or replaces either takes the same async mutex for its
//! whole duration; `secret_values` reads a separate snapshot and never blocks.

use super::config::{ConfigMap, ProducerConfig};
use super::connection_string::ConnectionString;
use crate::connection::{Connector, Handle, Pool, PoolPolicy, TlsConfig};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Marker the host substitutes for secret values
pub const REDACTED_PASSWORD: &str = "[password]";

/// Opens a lazily connecting native `Pool` for a DSN
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeConnector;

impl Connector for NativeConnector {
    fn open(
        &self,
        dsn: &str,
        policy: &PoolPolicy,
        tls: Option<&TlsConfig>,
    ) -> Result<Arc<dyn Handle>> {
        let options = ConnectionString::parse(dsn)?.to_connect_options(tls)?;
        Ok(Arc::new(Pool::new(options, *policy)))
    }
}

/// State guarded by the producer lock
pub struct ProducerState {
    connector: Arc<dyn Connector>,
    config: Option<ProducerConfig>,
    initialized: bool,
    handle: Option<Arc<dyn Handle>>,
}

impl ProducerState {
    /// Whether initialize has accepted a configuration
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Current configuration, if any
    pub fn config(&self) -> Option<&ProducerConfig> {
        self.config.as_ref()
    }

    /// Return a live handle, replacing the current one if its probe fails
    ///
    /// At most one replacement per call; there is no retry loop.
    pub async fn connection(&mut self) -> Result<Arc<dyn Handle>> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }

        if let Some(handle) = self.handle.take() {
            match handle.ping().await {
                Ok(()) => {
                    self.handle = Some(handle.clone());
                    return Ok(handle);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "liveness probe failed, recreating connection");
                    crate::metrics::counters::connection_recreated();
                    if let Err(close_err) = handle.close().await {
                        tracing::debug!(error = %close_err, "ignoring error closing stale handle");
                    }
                }
            }
        }

        let config = self.config.as_ref().ok_or(Error::NotInitialized)?;
        let handle = self
            .connector
            .open(&config.connection_url, &config.policy, config.tls.as_ref())?;
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Close and drop the live handle; errors are ignored
    pub async fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.close().await {
                tracing::debug!(error = %e, "ignoring error while closing connection");
            }
        }
    }
}

/// Brokers access to the single live handle
pub struct ConnectionProducer {
    state: Mutex<ProducerState>,
    password: RwLock<String>,
}

impl Default for ConnectionProducer {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionProducer {
    /// Producer backed by the native driver
    pub fn new() -> Self {
        Self::with_connector(Arc::new(NativeConnector))
    }

    /// Producer backed by a custom connector
    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self {
            state: Mutex::new(ProducerState {
                connector,
                config: None,
                initialized: false,
                handle: None,
            }),
            password: RwLock::new(String::new()),
        }
    }

    /// Validate `config`, optionally proving the server is reachable
    ///
    /// The producer counts as initialized as soon as the configuration is
    /// accepted, even when verification then fails.
    pub async fn initialize(&self, config: &ConfigMap, verify_connection: bool) -> Result<ConfigMap> {
        let mut state = self.state.lock().await;

        let resolved = ProducerConfig::resolve(config)?;
        let raw = resolved.raw.clone();

        // A new configuration gets a new handle
        state.close().await;
        *self.password.write() = resolved.password.clone();
        tracing::info!(
            max_open = resolved.policy.max_open,
            max_idle = resolved.policy.max_idle,
            max_lifetime = ?resolved.policy.max_lifetime,
            tls = resolved.tls.is_some(),
            verify_connection,
            "connection producer initialized"
        );
        state.config = Some(resolved);
        state.initialized = true;

        if verify_connection {
            let handle = state
                .connection()
                .await
                .map_err(|e| Error::VerifyConnection(Box::new(e)))?;
            handle
                .ping()
                .await
                .map_err(|e| Error::VerifyPing(Box::new(e)))?;
        }

        Ok(raw)
    }

    /// Exclusive access to the producer state
    pub async fn lock(&self) -> MutexGuard<'_, ProducerState> {
        self.state.lock().await
    }

    /// Live handle, probing and recreating as needed
    pub async fn connection(&self) -> Result<Arc<dyn Handle>> {
        self.state.lock().await.connection().await
    }

    /// Whether initialize has accepted a configuration
    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    /// Snapshot of the current configuration
    pub async fn config(&self) -> Option<ProducerConfig> {
        self.state.lock().await.config.clone()
    }

    /// Values the host must redact, mapped to their replacement
    pub fn secret_values(&self) -> HashMap<String, String> {
        let password = self.password.read();
        let mut values = HashMap::new();
        if !password.is_empty() {
            values.insert(password.clone(), REDACTED_PASSWORD.to_string());
        }
        values
    }

    /// Close the live handle; idempotent
    pub async fn close(&self) -> Result<()> {
        self.state.lock().await.close().await;
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProducer").finish_non_exhaustive()
    }
}
