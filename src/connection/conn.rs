//! Core connection type

use super::state::ConnectionState;
use super::tls::TlsConfig;
use super::transport::Transport;
use crate::protocol::constants::{
    CLIENT_NAME, CLIENT_REVISION, CLIENT_VERSION_MAJOR, CLIENT_VERSION_MINOR,
};
use crate::protocol::{decode_packet, encode_packet, ClientInfo, ClientPacket, ServerException};
use crate::protocol::{ServerInfo, ServerPacket};
use crate::{Error, Result};
use bytes::{Buf, BytesMut};
use std::future::Future;
use std::io;
use std::time::Duration;
use tracing::Instrument;

/// User ClickHouse assumes when none is given
pub const DEFAULT_USER: &str = "default";

/// Connection options for one native session
///
/// Use `ConnectOptions::builder()` for timeouts, TLS and credentials.
#[derive(Clone)]
pub struct ConnectOptions {
    /// Server host
    pub host: String,
    /// Native protocol port
    pub port: u16,
    /// Default database (empty = server default)
    pub database: String,
    /// Login user
    pub user: String,
    /// Login password
    pub password: String,
    /// TLS configuration; `None` means plaintext
    pub tls: Option<TlsConfig>,
    /// Log every packet at debug level
    pub debug: bool,
    /// Bound on TCP connect + TLS + handshake
    pub dial_timeout: Option<Duration>,
    /// Bound on each socket read
    pub read_timeout: Option<Duration>,
    /// Bound on each socket write
    pub write_timeout: Option<Duration>,
}

impl ConnectOptions {
    /// Create options with defaults (user `default`, no TLS, no timeouts)
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::builder(host, port).build()
    }

    /// Create a builder for advanced configuration
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let options = ConnectOptions::builder("localhost", 9000)
    ///     .user("admin")
    ///     .password("secret")
    ///     .read_timeout(Duration::from_secs(30))
    ///     .build();
    /// ```
    pub fn builder(host: impl Into<String>, port: u16) -> ConnectOptionsBuilder {
        ConnectOptionsBuilder {
            options: ConnectOptions {
                host: host.into(),
                port,
                database: String::new(),
                user: DEFAULT_USER.to_string(),
                password: String::new(),
                tls: None,
                debug: false,
                dial_timeout: None,
                read_timeout: None,
                write_timeout: None,
            },
        }
    }
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("tls", &self.tls.is_some())
            .field("debug", &self.debug)
            .field("dial_timeout", &self.dial_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

/// Builder for `ConnectOptions`
#[derive(Debug, Clone)]
pub struct ConnectOptionsBuilder {
    options: ConnectOptions,
}

impl ConnectOptionsBuilder {
    /// Set the default database
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.options.database = database.into();
        self
    }

    /// Set the login user; empty keeps `default`
    pub fn user(mut self, user: impl Into<String>) -> Self {
        let user = user.into();
        if !user.is_empty() {
            self.options.user = user;
        }
        self
    }

    /// Set the login password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.options.password = password.into();
        self
    }

    /// Use TLS with this configuration
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.options.tls = Some(tls);
        self
    }

    /// Log packets at debug level
    pub fn debug(mut self, debug: bool) -> Self {
        self.options.debug = debug;
        self
    }

    /// Set connect + handshake timeout
    ///
    /// Default: None (no timeout)
    pub fn dial_timeout(mut self, duration: Duration) -> Self {
        self.options.dial_timeout = Some(duration);
        self
    }

    /// Set per-read timeout
    ///
    /// Default: None (no timeout)
    pub fn read_timeout(mut self, duration: Duration) -> Self {
        self.options.read_timeout = Some(duration);
        self
    }

    /// Set per-write timeout
    ///
    /// Default: None (no timeout)
    pub fn write_timeout(mut self, duration: Duration) -> Self {
        self.options.write_timeout = Some(duration);
        self
    }

    /// Build the options
    pub fn build(self) -> ConnectOptions {
        self.options
    }
}

/// Counters collected while a statement ran
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOutcome {
    /// Rows returned in data blocks
    pub rows: u64,
    /// Rows read by the server, from progress packets
    pub rows_read: u64,
}

/// ClickHouse native protocol session
pub struct Connection {
    transport: Transport,
    state: ConnectionState,
    read_buf: BytesMut,
    server: Option<ServerInfo>,
    revision: u64,
    client_info: ClientInfo,
    debug: bool,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl Connection {
    /// Wrap an established transport; call `handshake` next
    pub fn new(transport: Transport, options: &ConnectOptions) -> Self {
        Self {
            transport,
            state: ConnectionState::Initial,
            read_buf: BytesMut::with_capacity(8192),
            server: None,
            revision: CLIENT_REVISION,
            client_info: client_info(),
            debug: options.debug,
            read_timeout: options.read_timeout,
            write_timeout: options.write_timeout,
        }
    }

    /// Open the socket (TLS when configured) and authenticate
    pub async fn connect(options: &ConnectOptions) -> Result<Self> {
        let span = tracing::info_span!(
            "connect",
            host = %options.host,
            port = options.port,
            tls = options.tls.is_some()
        );

        let open = async {
            let transport = match &options.tls {
                Some(tls) => Transport::connect_tcp_tls(&options.host, options.port, tls).await?,
                None => Transport::connect_tcp(&options.host, options.port).await?,
            };
            let mut conn = Connection::new(transport, options);
            conn.handshake(options).await?;
            Ok::<_, Error>(conn)
        };

        let what = || format!("connecting to {}:{}", options.host, options.port);
        with_deadline(options.dial_timeout, what, open)
            .instrument(span)
            .await
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Server identity, once the handshake completed
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server.as_ref()
    }

    /// Negotiated protocol revision
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether the session can serve another request
    pub fn is_reusable(&self) -> bool {
        self.state == ConnectionState::Idle
    }

    /// Send Hello and read the server hello
    pub async fn handshake(&mut self, options: &ConnectOptions) -> Result<&ServerInfo> {
        let result = self.run_handshake(options).await;
        if result.is_err() {
            self.state = ConnectionState::Closed;
        }
        result?;
        self.server
            .as_ref()
            .ok_or_else(|| Error::Protocol("handshake completed without server info".into()))
    }

    async fn run_handshake(&mut self, options: &ConnectOptions) -> Result<()> {
        self.state.transition(ConnectionState::Handshaking)?;

        let hello = ClientPacket::Hello {
            client_name: CLIENT_NAME.to_string(),
            version_major: CLIENT_VERSION_MAJOR,
            version_minor: CLIENT_VERSION_MINOR,
            revision: CLIENT_REVISION,
            database: options.database.clone(),
            user: options.user.clone(),
            password: options.password.clone(),
        };
        self.send_packets(&[hello]).await?;

        match self.receive_packet().await? {
            ServerPacket::Hello(info) => {
                self.revision = info.revision.min(CLIENT_REVISION);
                tracing::debug!(
                    server = %info.name,
                    version = %format!("{}.{}", info.version_major, info.version_minor),
                    revision = self.revision,
                    "handshake complete"
                );
                self.server = Some(info);
            }
            ServerPacket::Exception(e) => return Err(server_error(e)),
            other => {
                return Err(Error::Protocol(format!(
                    "unexpected packet during handshake: {}",
                    other.kind()
                )))
            }
        }

        self.state.transition(ConnectionState::Idle)?;
        Ok(())
    }

    /// Liveness probe
    pub async fn ping(&mut self) -> Result<()> {
        let result = self.run_ping().await;
        if result.is_err() {
            self.state = ConnectionState::Closed;
        }
        result
    }

    async fn run_ping(&mut self) -> Result<()> {
        self.state.transition(ConnectionState::Pinging)?;
        self.send_packets(&[ClientPacket::Ping]).await?;

        loop {
            match self.receive_packet().await? {
                ServerPacket::Pong => break,
                ServerPacket::Progress(_) => continue,
                ServerPacket::Exception(e) => return Err(server_error(e)),
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected packet in reply to ping: {}",
                        other.kind()
                    )))
                }
            }
        }

        self.state.transition(ConnectionState::Idle)?;
        Ok(())
    }

    /// Run one statement to completion
    ///
    /// A server exception leaves the session usable; any other failure closes it.
    pub async fn execute(&mut self, query: &str) -> Result<QueryOutcome> {
        let result = self.run_query(query).await;
        match &result {
            Err(Error::Server { .. }) | Ok(_) => {}
            Err(_) => self.state = ConnectionState::Closed,
        }
        result
    }

    async fn run_query(&mut self, query: &str) -> Result<QueryOutcome> {
        if self.state != ConnectionState::Idle {
            return Err(Error::InvalidState {
                expected: ConnectionState::Idle.to_string(),
                actual: self.state.to_string(),
            });
        }

        self.state.transition(ConnectionState::QueryInProgress)?;
        let packets = [
            ClientPacket::Query {
                query_id: String::new(),
                client_info: self.client_info.clone(),
                query: query.to_string(),
            },
            ClientPacket::EmptyData,
        ];
        self.send_packets(&packets).await?;
        self.state.transition(ConnectionState::ReadingResults)?;

        let mut outcome = QueryOutcome::default();
        loop {
            match self.receive_packet().await? {
                ServerPacket::Data(block)
                | ServerPacket::Totals(block)
                | ServerPacket::Extremes(block) => {
                    outcome.rows += block.rows;
                }
                ServerPacket::Progress(progress) => {
                    outcome.rows_read += progress.rows;
                }
                ServerPacket::ProfileInfo(_)
                | ServerPacket::Log(_)
                | ServerPacket::TableColumns { .. } => {}
                ServerPacket::Exception(e) => {
                    // No EndOfStream follows an exception
                    self.state.transition(ConnectionState::Idle)?;
                    return Err(server_error(e));
                }
                ServerPacket::EndOfStream => break,
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected packet in query response: {}",
                        other.kind()
                    )))
                }
            }
        }

        self.state.transition(ConnectionState::Idle)?;
        Ok(outcome)
    }

    /// Encode and write packets as one buffer
    async fn send_packets(&mut self, packets: &[ClientPacket]) -> Result<()> {
        let mut buf = BytesMut::new();
        for packet in packets {
            buf.extend_from_slice(&encode_packet(packet, self.revision)?);
        }

        let write_timeout = self.write_timeout;
        let transport = &mut self.transport;
        with_deadline(write_timeout, || "writing to server".to_string(), async move {
            transport.write_all(&buf).await?;
            transport.flush().await
        })
        .await
    }

    /// Receive one server packet
    async fn receive_packet(&mut self) -> Result<ServerPacket> {
        loop {
            match decode_packet(&self.read_buf, self.revision) {
                Ok((packet, consumed)) => {
                    self.read_buf.advance(consumed);
                    if self.debug {
                        tracing::debug!(packet = packet.kind(), bytes = consumed, "received packet");
                    }
                    return Ok(packet);
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {}
                Err(e) => return Err(Error::Protocol(e.to_string())),
            }

            // Need more data
            let read_timeout = self.read_timeout;
            let transport = &mut self.transport;
            let read_buf = &mut self.read_buf;
            let n = with_deadline(read_timeout, || "reading from server".to_string(), async move {
                transport.read_buf(read_buf).await
            })
            .await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<()> {
        self.state.transition(ConnectionState::Closed)?;
        self.transport.shutdown().await?;
        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("transport", &self.transport)
            .field("state", &self.state)
            .field("revision", &self.revision)
            .finish()
    }
}

/// Client info sent with every query
pub(crate) fn client_info() -> ClientInfo {
    ClientInfo {
        initial_address: "0.0.0.0:0".to_string(),
        os_user: whoami::username(),
        client_hostname: whoami::fallible::hostname().unwrap_or_default(),
        client_name: CLIENT_NAME.to_string(),
        version_major: CLIENT_VERSION_MAJOR,
        version_minor: CLIENT_VERSION_MINOR,
        revision: CLIENT_REVISION,
        quota_key: String::new(),
    }
}

fn server_error(e: ServerException) -> Error {
    Error::Server {
        code: e.code,
        name: e.name,
        message: e.message,
    }
}

/// Run `fut` under an optional deadline
async fn with_deadline<T, F>(
    limit: Option<Duration>,
    what: impl FnOnce() -> String,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout(format!("{} after {:?}", what(), limit)))?,
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::server_packet;
    use crate::protocol::encode::{put_string, put_uvarint};
    use bytes::BufMut;
    use tokio_test::io::Builder;

    const SERVER_REVISION: u64 = 54465;

    fn options() -> ConnectOptions {
        ConnectOptions::builder("localhost", 9000)
            .user("admin")
            .password("secret")
            .database("default")
            .build()
    }

    fn hello_bytes(options: &ConnectOptions) -> Vec<u8> {
        encode_packet(
            &ClientPacket::Hello {
                client_name: CLIENT_NAME.to_string(),
                version_major: CLIENT_VERSION_MAJOR,
                version_minor: CLIENT_VERSION_MINOR,
                revision: CLIENT_REVISION,
                database: options.database.clone(),
                user: options.user.clone(),
                password: options.password.clone(),
            },
            CLIENT_REVISION,
        )
        .unwrap()
        .to_vec()
    }

    fn server_hello_bytes() -> Vec<u8> {
        let mut buf = BytesMut::new();
        put_uvarint(&mut buf, server_packet::HELLO);
        put_string(&mut buf, "ClickHouse");
        put_uvarint(&mut buf, 23);
        put_uvarint(&mut buf, 8);
        put_uvarint(&mut buf, SERVER_REVISION);
        put_string(&mut buf, "UTC");
        buf.to_vec()
    }

    fn query_bytes(query: &str) -> Vec<u8> {
        let mut buf = encode_packet(
            &ClientPacket::Query {
                query_id: String::new(),
                client_info: client_info(),
                query: query.to_string(),
            },
            CLIENT_REVISION,
        )
        .unwrap();
        buf.extend_from_slice(&encode_packet(&ClientPacket::EmptyData, CLIENT_REVISION).unwrap());
        buf.to_vec()
    }

    fn exception_bytes(code: i32, message: &str) -> Vec<u8> {
        let mut buf = BytesMut::new();
        put_uvarint(&mut buf, server_packet::EXCEPTION);
        buf.put_i32_le(code);
        put_string(&mut buf, "DB::Exception");
        put_string(&mut buf, message);
        put_string(&mut buf, "");
        buf.put_u8(0);
        buf.to_vec()
    }

    #[tokio::test]
    async fn test_handshake_negotiates_revision() {
        let options = options();
        let mock = Builder::new()
            .write(&hello_bytes(&options))
            .read(&server_hello_bytes())
            .build();
        let mut conn = Connection::new(Transport::Mock(mock), &options);

        let info = conn.handshake(&options).await.unwrap().clone();
        assert_eq!(info.name, "ClickHouse");
        assert_eq!(info.revision, SERVER_REVISION);
        assert_eq!(conn.revision(), CLIENT_REVISION);
        assert_eq!(conn.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_handshake_authentication_failure() {
        let options = options();
        let mock = Builder::new()
            .write(&hello_bytes(&options))
            .read(&exception_bytes(516, "admin: Authentication failed"))
            .build();
        let mut conn = Connection::new(Transport::Mock(mock), &options);

        let err = conn.handshake(&options).await.unwrap_err();
        assert!(matches!(err, Error::Server { code: 516, .. }));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let options = options();
        let mock = Builder::new()
            .write(&hello_bytes(&options))
            .read(&server_hello_bytes())
            .write(&[4])
            .read(&[server_packet::PONG as u8])
            .build();
        let mut conn = Connection::new(Transport::Mock(mock), &options);
        conn.handshake(&options).await.unwrap();

        conn.ping().await.unwrap();
        assert!(conn.is_reusable());
    }

    #[tokio::test]
    async fn test_execute_until_end_of_stream() {
        let options = options();
        let mut response = Vec::new();
        // progress: rows, bytes, total_rows
        response.extend_from_slice(&[server_packet::PROGRESS as u8, 3, 10, 3]);
        // profile info
        response.extend_from_slice(&[server_packet::PROFILE_INFO as u8, 0, 0, 0, 0, 0, 0]);
        response.push(server_packet::END_OF_STREAM as u8);

        let mock = Builder::new()
            .write(&hello_bytes(&options))
            .read(&server_hello_bytes())
            .write(&query_bytes("CREATE USER 'u' IDENTIFIED BY 'p'"))
            .read(&response[..4])
            .read(&response[4..])
            .build();
        let mut conn = Connection::new(Transport::Mock(mock), &options);
        conn.handshake(&options).await.unwrap();

        let outcome = conn
            .execute("CREATE USER 'u' IDENTIFIED BY 'p'")
            .await
            .unwrap();
        assert_eq!(outcome.rows_read, 3);
        assert_eq!(outcome.rows, 0);
        assert!(conn.is_reusable());
    }

    #[tokio::test]
    async fn test_execute_server_exception_keeps_session() {
        let options = options();
        let mock = Builder::new()
            .write(&hello_bytes(&options))
            .read(&server_hello_bytes())
            .write(&query_bytes("DROP USER nope"))
            .read(&exception_bytes(192, "There is no user `nope`"))
            .build();
        let mut conn = Connection::new(Transport::Mock(mock), &options);
        conn.handshake(&options).await.unwrap();

        let err = conn.execute("DROP USER nope").await.unwrap_err();
        match err {
            Error::Server { code, message, .. } => {
                assert_eq!(code, 192);
                assert!(message.contains("nope"));
            }
            other => panic!("expected server error, got {:?}", other),
        }
        assert!(conn.is_reusable());
    }

    #[tokio::test]
    async fn test_execute_eof_breaks_session() {
        let options = options();
        let mock = Builder::new()
            .write(&hello_bytes(&options))
            .read(&server_hello_bytes())
            .write(&query_bytes("SELECT 1"))
            .build();
        let mut conn = Connection::new(Transport::Mock(mock), &options);
        conn.handshake(&options).await.unwrap();

        let err = conn.execute("SELECT 1").await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        assert!(!conn.is_reusable());
    }

    #[tokio::test]
    async fn test_execute_requires_idle() {
        let options = options();
        let mock = Builder::new().build();
        let mut conn = Connection::new(Transport::Mock(mock), &options);

        let err = conn.execute("SELECT 1").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[test]
    fn test_connect_options_defaults() {
        let options = ConnectOptions::new("localhost", 9000);
        assert_eq!(options.user, DEFAULT_USER);
        assert!(options.tls.is_none());
        assert!(options.dial_timeout.is_none());
        assert!(options.read_timeout.is_none());
        assert!(!options.debug);
    }

    #[test]
    fn test_connect_options_builder_fluent() {
        let options = ConnectOptions::builder("db", 9440)
            .user("")
            .password("pw")
            .database("analytics")
            .debug(true)
            .dial_timeout(Duration::from_secs(5))
            .write_timeout(Duration::from_secs(7))
            .build();

        assert_eq!(options.user, DEFAULT_USER);
        assert_eq!(options.password, "pw");
        assert_eq!(options.database, "analytics");
        assert!(options.debug);
        assert_eq!(options.dial_timeout, Some(Duration::from_secs(5)));
        assert_eq!(options.write_timeout, Some(Duration::from_secs(7)));
    }
}
