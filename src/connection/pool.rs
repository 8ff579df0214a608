//! Connection pool and the handle seam used by the producer
//!
//! A `Pool` is created lazily: no socket is opened until the first `ping`
//! or `execute`. Sessions are checked out under a `max_open` permit, handed
//! back to a bounded idle queue, and dropped once older than `max_lifetime`
//! or after any IO/protocol failure.

use super::conn::{ConnectOptions, Connection};
use super::tls::TlsConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default `max_open`
pub const DEFAULT_MAX_OPEN: usize = 4;

/// Pool sizing and recycling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolPolicy {
    /// Maximum sessions checked out at once (0 = unlimited)
    pub max_open: usize,
    /// Maximum sessions kept idle
    pub max_idle: usize,
    /// Sessions older than this are closed (zero = no limit)
    pub max_lifetime: Duration,
}

impl Default for PoolPolicy {
    fn default() -> Self {
        Self {
            max_open: DEFAULT_MAX_OPEN,
            max_idle: DEFAULT_MAX_OPEN,
            max_lifetime: Duration::ZERO,
        }
    }
}

impl PoolPolicy {
    /// Whether a session created at `created` has outlived the policy
    pub fn is_expired(&self, created: Instant) -> bool {
        !self.max_lifetime.is_zero() && created.elapsed() >= self.max_lifetime
    }
}

/// A live, poolable connection to the server
#[async_trait]
pub trait Handle: Send + Sync + fmt::Debug {
    /// Liveness probe
    async fn ping(&self) -> Result<()>;

    /// Run one statement to completion, discarding any result rows
    async fn execute(&self, statement: &str) -> Result<()>;

    /// Release every resource; best-effort and idempotent
    async fn close(&self) -> Result<()>;
}

/// Opens handles from a DSN
///
/// Opening must not touch the network; the first `ping`/`execute` does.
pub trait Connector: Send + Sync {
    /// Create a handle for `dsn` under `policy`, using `tls` when given
    fn open(
        &self,
        dsn: &str,
        policy: &PoolPolicy,
        tls: Option<&TlsConfig>,
    ) -> Result<Arc<dyn Handle>>;
}

struct Session {
    conn: Connection,
    created: Instant,
}

/// Pool of native sessions for one endpoint
pub struct Pool {
    options: ConnectOptions,
    policy: PoolPolicy,
    permits: Option<Arc<Semaphore>>,
    idle: Mutex<VecDeque<Session>>,
    closed: AtomicBool,
    opened: AtomicU64,
}

impl Pool {
    /// Create a pool; no connection is made yet
    pub fn new(options: ConnectOptions, policy: PoolPolicy) -> Self {
        let permits = (policy.max_open > 0).then(|| Arc::new(Semaphore::new(policy.max_open)));
        Self {
            options,
            policy,
            permits,
            idle: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            opened: AtomicU64::new(0),
        }
    }

    /// Active policy
    pub fn policy(&self) -> &PoolPolicy {
        &self.policy
    }

    /// Options used for new sessions
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Number of idle sessions
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Sessions opened over the pool's lifetime
    pub fn opened_count(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn acquire(&self) -> Result<(Session, Option<OwnedSemaphorePermit>)> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        let permit = match &self.permits {
            Some(permits) => Some(
                permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::PoolClosed)?,
            ),
            None => None,
        };

        loop {
            let candidate = self.idle.lock().pop_front();
            match candidate {
                Some(session) if self.policy.is_expired(session.created) => {
                    tracing::debug!("closing session past max lifetime");
                    let _ = session.conn.close().await;
                }
                Some(session) => return Ok((session, permit)),
                None => break,
            }
        }

        let session = self.open_session().await?;
        Ok((session, permit))
    }

    async fn open_session(&self) -> Result<Session> {
        let start = Instant::now();
        let conn = Connection::connect(&self.options).await?;
        crate::metrics::counters::connection_opened();
        crate::metrics::histograms::connect_duration(start.elapsed().as_millis() as u64);
        self.opened.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            host = %self.options.host,
            port = self.options.port,
            "opened native session"
        );

        Ok(Session {
            conn,
            created: Instant::now(),
        })
    }

    async fn release(&self, session: Session, permit: Option<OwnedSemaphorePermit>) {
        let keep = !self.is_closed()
            && session.conn.is_reusable()
            && !self.policy.is_expired(session.created);

        let rejected = if keep {
            let mut idle = self.idle.lock();
            if idle.len() < self.policy.max_idle {
                idle.push_back(session);
                None
            } else {
                Some(session)
            }
        } else {
            Some(session)
        };

        if let Some(session) = rejected {
            let _ = session.conn.close().await;
        }
        drop(permit);
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("options", &self.options)
            .field("policy", &self.policy)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl Handle for Pool {
    async fn ping(&self) -> Result<()> {
        let (mut session, permit) = self.acquire().await?;
        let result = session.conn.ping().await;
        self.release(session, permit).await;
        result
    }

    async fn execute(&self, statement: &str) -> Result<()> {
        let (mut session, permit) = self.acquire().await?;
        let result = session.conn.execute(statement).await;
        self.release(session, permit).await;
        result.map(|outcome| {
            tracing::trace!(rows = outcome.rows, rows_read = outcome.rows_read, "statement done");
        })
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(permits) = &self.permits {
            permits.close();
        }

        let drained: Vec<Session> = self.idle.lock().drain(..).collect();
        for session in drained {
            if let Err(e) = session.conn.close().await {
                tracing::debug!(error = %e, "ignoring error while closing idle session");
            }
        }
        Ok(())
    }
}
