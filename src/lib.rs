//! ClickHouse credential lifecycle plugin
//!
//! `clickhouse-dbplugin` creates, rotates and revokes ClickHouse users from
//! administrator-supplied SQL templates on behalf of a secrets-management host.
//!
//! # Overview
//!
//! * [`client::ClickhousePlugin`] implements the host operations
//!   (`initialize`, `new_user`, `update_user`, `delete_user`, `close`)
//! * A single connection producer serializes every credential operation
//!   behind one lock and self-heals a stale connection once per call
//! * Connections use a small native-protocol driver over plain or TLS TCP
//!
//! # Example
//!
//! ```no_run
//! # async fn example() -> clickhouse_dbplugin::Result<()> {
//! use clickhouse_dbplugin::client::{
//!     ClickhousePlugin, Database, InitializeRequest, NewUserRequest, Statements,
//! };
//! use serde_json::json;
//!
//! let plugin = ClickhousePlugin::with_defaults();
//! let config = json!({
//!     "connection_url": "tcp://localhost:9000?username={{username}}&password={{password}}",
//!     "username": "admin",
//!     "password": "secret",
//! });
//! plugin
//!     .initialize(InitializeRequest {
//!         config: config.as_object().cloned().unwrap_or_default(),
//!         verify_connection: true,
//!     })
//!     .await?;
//!
//! let created = plugin
//!     .new_user(NewUserRequest {
//!         username_config: Default::default(),
//!         statements: Statements::new([
//!             "CREATE USER '{{name}}' IDENTIFIED BY '{{password}}'; GRANT SELECT ON *.* TO '{{name}}';",
//!         ]),
//!         password: "Secr3t!".into(),
//!         expiration: chrono::Utc::now().into(),
//!     })
//!     .await?;
//! println!("created {}", created.username);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod duration;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod username;

pub use client::{ClickhousePlugin, ConnectionString, Database};
pub use error::{Error, Result};

/// Crate version, reported as the plugin version by default
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
