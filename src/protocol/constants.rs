//! ClickHouse native protocol constants

/// Client name announced in Hello and client info
pub const CLIENT_NAME: &str = "clickhouse-dbplugin";

/// Client version announced to the server
pub const CLIENT_VERSION_MAJOR: u64 = 1;

/// Client minor version announced to the server
pub const CLIENT_VERSION_MINOR: u64 = 1;

/// Protocol revision spoken by this client
///
/// Servers negotiate down to `min(client, server)`, so every revision gated
/// field newer than this one is never sent nor expected.
pub const CLIENT_REVISION: u64 = 54213;

/// Upper bound for any length-prefixed string on the wire (256 MiB)
pub const MAX_STRING_LENGTH: u64 = 256 * 1024 * 1024;

/// Revisions that gate optional fields
pub mod revision {
    /// Data packets carry a temporary table name
    pub const MIN_WITH_TEMPORARY_TABLES: u64 = 50264;

    /// Progress packets carry total_rows
    pub const MIN_WITH_TOTAL_ROWS_IN_PROGRESS: u64 = 51554;

    /// Blocks are prefixed with block info
    pub const MIN_WITH_BLOCK_INFO: u64 = 51903;

    /// Query packets carry client info
    pub const MIN_WITH_CLIENT_INFO: u64 = 54032;

    /// Server hello carries the server timezone
    pub const MIN_WITH_SERVER_TIMEZONE: u64 = 54058;

    /// Client info carries a quota key
    pub const MIN_WITH_QUOTA_KEY_IN_CLIENT_INFO: u64 = 54060;

    /// Server hello carries a display name
    pub const MIN_WITH_SERVER_DISPLAY_NAME: u64 = 54372;

    /// Server hello carries a patch version
    pub const MIN_WITH_VERSION_PATCH: u64 = 54401;

    /// Progress packets carry written rows/bytes
    pub const MIN_WITH_CLIENT_WRITE_INFO: u64 = 54420;
}

/// Packet codes sent by the client
pub mod client_packet {
    /// Handshake
    pub const HELLO: u64 = 0;

    /// Query with settings and client info
    pub const QUERY: u64 = 1;

    /// Data block
    pub const DATA: u64 = 2;

    /// Cancel the running query
    pub const CANCEL: u64 = 3;

    /// Liveness probe
    pub const PING: u64 = 4;
}

/// Packet codes sent by the server
pub mod server_packet {
    /// Handshake reply
    pub const HELLO: u64 = 0;

    /// Data block
    pub const DATA: u64 = 1;

    /// Exception raised while processing a request
    pub const EXCEPTION: u64 = 2;

    /// Query progress
    pub const PROGRESS: u64 = 3;

    /// Reply to Ping
    pub const PONG: u64 = 4;

    /// All packets for the query were sent
    pub const END_OF_STREAM: u64 = 5;

    /// Profiling counters
    pub const PROFILE_INFO: u64 = 6;

    /// Block with totals
    pub const TOTALS: u64 = 7;

    /// Block with minimums and maximums
    pub const EXTREMES: u64 = 8;

    /// Reply to a tables status request
    pub const TABLES_STATUS_RESPONSE: u64 = 9;

    /// Block of server log records
    pub const LOG: u64 = 10;

    /// Column descriptions for external tables
    pub const TABLE_COLUMNS: u64 = 11;
}

/// Processing stage requested in Query
pub mod query_stage {
    /// Run the query to completion
    pub const COMPLETE: u64 = 2;
}

/// Compression flag in Query
pub mod compression {
    /// Blocks are not compressed
    pub const DISABLED: u64 = 0;
}

/// Client info field values
pub mod client_info {
    /// Query issued directly by this client
    pub const QUERY_KIND_INITIAL: u8 = 1;

    /// Native TCP interface
    pub const INTERFACE_TCP: u8 = 1;
}
