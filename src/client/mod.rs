//! Credential lifecycle client
//!
//! This module handles:
//! * Connection string parsing and building
//! * Configuration decoding and DSN resolution
//! * The connection producer and statement execution
//! * The host-facing [`Database`] operations

mod config;
mod connection_string;
mod executor;
mod plugin;
mod producer;

pub use config::{resolve_placeholders, ConfigMap, ProducerConfig, RawConfig};
pub use connection_string::ConnectionString;
pub use executor::{execute_statements, split_statements, substitute, Substitutions};
pub use plugin::{
    ChangeExpiration, ChangePassword, ClickhousePlugin, Database, DeleteUserRequest,
    DeleteUserResponse, InitializeRequest, InitializeResponse, NewUserRequest, NewUserResponse,
    Statements, UpdateUserRequest, UpdateUserResponse, UsernameMetadata,
    DEFAULT_REVOCATION_STATEMENT, DEFAULT_ROTATION_STATEMENT, EXPIRATION_FORMAT, TYPE_NAME,
};
pub use producer::{ConnectionProducer, NativeConnector, ProducerState, REDACTED_PASSWORD};
