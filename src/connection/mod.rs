//! Connection management
//!
//! This module handles:
//! * Transport abstraction (plain TCP vs TLS over TCP)
//! * Native session lifecycle (hello, ping, query execution)
//! * State machine enforcement
//! * TLS configuration
//! * Pooling behind the `Handle` / `Connector` seam

mod conn;
mod pool;
mod state;
mod tls;
mod transport;

pub use conn::{ConnectOptions, ConnectOptionsBuilder, Connection, QueryOutcome, DEFAULT_USER};
pub use pool::{Connector, Handle, Pool, PoolPolicy, DEFAULT_MAX_OPEN};
pub use state::ConnectionState;
pub use tls::{parse_server_name, TlsConfig, TlsConfigBuilder};
pub use transport::Transport;
