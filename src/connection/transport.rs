//! Transport abstraction (plain TCP vs TLS over TCP)

use super::tls::{parse_server_name, TlsConfig};
use crate::{Error, Result};
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Transport layer abstraction
#[allow(clippy::large_enum_variant)]
pub enum Transport {
    /// Plain TCP connection
    Plain(TcpStream),
    /// TLS-encrypted TCP connection
    Tls(tokio_rustls::client::TlsStream<TcpStream>),
    /// Scripted in-memory stream for tests
    #[cfg(test)]
    Mock(tokio_test::io::Mock),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Plain(_) => f.write_str("Transport::Plain(TcpStream)"),
            Transport::Tls(_) => f.write_str("Transport::Tls(TlsStream)"),
            #[cfg(test)]
            Transport::Mock(_) => f.write_str("Transport::Mock"),
        }
    }
}

impl Transport {
    /// Connect via plain TCP
    pub async fn connect_tcp(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(Transport::Plain(stream))
    }

    /// Connect via TLS-encrypted TCP
    ///
    /// The certificate is checked against the configured server name override,
    /// or the connection host.
    pub async fn connect_tcp_tls(host: &str, port: u16, tls_config: &TlsConfig) -> Result<Self> {
        let tcp_stream = TcpStream::connect((host, port)).await?;
        tcp_stream.set_nodelay(true)?;

        let server_name = parse_server_name(tls_config.server_name().unwrap_or(host))?;

        let tls_connector = tokio_rustls::TlsConnector::from(tls_config.client_config());
        let tls_stream = tls_connector
            .connect(server_name, tcp_stream)
            .await
            .map_err(|e| Error::Config(format!("TLS handshake failed: {}", e)))?;

        Ok(Transport::Tls(tls_stream))
    }

    /// Whether the transport is encrypted
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    /// Write bytes to the transport
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            Transport::Plain(stream) => stream.write_all(buf).await?,
            Transport::Tls(stream) => stream.write_all(buf).await?,
            #[cfg(test)]
            Transport::Mock(stream) => stream.write_all(buf).await?,
        }
        Ok(())
    }

    /// Flush the transport
    pub async fn flush(&mut self) -> Result<()> {
        match self {
            Transport::Plain(stream) => stream.flush().await?,
            Transport::Tls(stream) => stream.flush().await?,
            #[cfg(test)]
            Transport::Mock(stream) => stream.flush().await?,
        }
        Ok(())
    }

    /// Read bytes into buffer
    pub async fn read_buf(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let n = match self {
            Transport::Plain(stream) => stream.read_buf(buf).await?,
            Transport::Tls(stream) => stream.read_buf(buf).await?,
            #[cfg(test)]
            Transport::Mock(stream) => stream.read_buf(buf).await?,
        };
        Ok(n)
    }

    /// Shutdown the transport
    pub async fn shutdown(&mut self) -> Result<()> {
        match self {
            Transport::Plain(stream) => stream.shutdown().await?,
            Transport::Tls(stream) => stream.shutdown().await?,
            #[cfg(test)]
            Transport::Mock(stream) => stream.shutdown().await?,
        }
        Ok(())
    }
}
