//! Protocol packet types

/// Packet sent by the client
#[derive(Debug, Clone)]
pub enum ClientPacket {
    /// Handshake with credentials
    Hello {
        /// Client name
        client_name: String,
        /// Client major version
        version_major: u64,
        /// Client minor version
        version_minor: u64,
        /// Protocol revision spoken by the client
        revision: u64,
        /// Default database for the session
        database: String,
        /// Login user
        user: String,
        /// Login password
        password: String,
    },

    /// Query, always followed by an empty data block
    Query {
        /// Query id (empty lets the server assign one)
        query_id: String,
        /// Client info, sent when the server revision allows it
        client_info: ClientInfo,
        /// Statement text
        query: String,
    },

    /// Empty data block terminating external table data
    EmptyData,

    /// Liveness probe
    Ping,
}

/// Client description attached to each query
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// Address reported as the query origin
    pub initial_address: String,
    /// Operating system user of this process
    pub os_user: String,
    /// Host name of this machine
    pub client_hostname: String,
    /// Client name
    pub client_name: String,
    /// Client major version
    pub version_major: u64,
    /// Client minor version
    pub version_minor: u64,
    /// Protocol revision spoken by the client
    pub revision: u64,
    /// Quota key
    pub quota_key: String,
}

/// Packet sent by the server
#[derive(Debug, Clone)]
pub enum ServerPacket {
    /// Handshake reply
    Hello(ServerInfo),

    /// Result data block
    Data(BlockSummary),

    /// Exception raised by the server
    Exception(ServerException),

    /// Query progress
    Progress(Progress),

    /// Reply to Ping
    Pong,

    /// End of the current query
    EndOfStream,

    /// Profiling counters
    ProfileInfo(ProfileInfo),

    /// Totals block
    Totals(BlockSummary),

    /// Extremes block
    Extremes(BlockSummary),

    /// Server log block
    Log(BlockSummary),

    /// External table column descriptions
    TableColumns {
        /// External table name
        table: String,
        /// Column description string
        columns: String,
    },
}

impl ServerPacket {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello(_) => "hello",
            Self::Data(_) => "data",
            Self::Exception(_) => "exception",
            Self::Progress(_) => "progress",
            Self::Pong => "pong",
            Self::EndOfStream => "end_of_stream",
            Self::ProfileInfo(_) => "profile_info",
            Self::Totals(_) => "totals",
            Self::Extremes(_) => "extremes",
            Self::Log(_) => "log",
            Self::TableColumns { .. } => "table_columns",
        }
    }
}

/// Server identity from the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// Server name (usually "ClickHouse")
    pub name: String,
    /// Server major version
    pub version_major: u64,
    /// Server minor version
    pub version_minor: u64,
    /// Server protocol revision
    pub revision: u64,
    /// Server timezone
    pub timezone: Option<String>,
    /// Server display name
    pub display_name: Option<String>,
    /// Server patch version
    pub version_patch: Option<u64>,
}

/// Exception raised by the server, possibly wrapping a nested cause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerException {
    /// ClickHouse error code
    pub code: i32,
    /// Exception class name
    pub name: String,
    /// Message
    pub message: String,
    /// Server-side stack trace
    pub stack_trace: String,
    /// Nested exception
    pub nested: Option<Box<ServerException>>,
}

/// Query progress counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Rows read so far
    pub rows: u64,
    /// Bytes read so far
    pub bytes: u64,
    /// Estimated total rows
    pub total_rows: u64,
}

/// Profiling counters sent at the end of a query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileInfo {
    /// Rows produced
    pub rows: u64,
    /// Blocks produced
    pub blocks: u64,
    /// Bytes produced
    pub bytes: u64,
    /// Whether a LIMIT was applied
    pub applied_limit: bool,
    /// Rows before LIMIT
    pub rows_before_limit: u64,
    /// Whether rows_before_limit was computed
    pub calculated_rows_before_limit: bool,
}

/// Column name and type from a block header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnHeader {
    /// Column name
    pub name: String,
    /// ClickHouse type name
    pub type_name: String,
}

/// Shape of a decoded block; column data is skipped, not materialized
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockSummary {
    /// Temporary table name (empty for query results)
    pub table: String,
    /// Column headers
    pub columns: Vec<ColumnHeader>,
    /// Row count
    pub rows: u64,
}
