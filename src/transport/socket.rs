//! Async TCP transport.
//!
//! A [`Connector`] opens one stream to the server and hands it back as
//! separate reader and writer halves, so the receive and dispatch tasks can
//! own one half each.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};

use super::error::{TransportError, TransportResult};
use super::frame::EncodedFrame;
use crate::core::constants::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT};

/// Read half of a connected transport.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Write half of a connected transport.
pub type BoxWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Server address as configured (host name or IP literal plus port).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Both halves of a freshly opened transport.
pub struct TransportHalves {
    /// Inbound byte stream.
    pub reader: BoxReader,
    /// Outbound byte stream.
    pub writer: BoxWriter,
}

impl fmt::Debug for TransportHalves {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHalves").finish_non_exhaustive()
    }
}

impl TransportHalves {
    /// Split any bidirectional stream into boxed halves.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

/// Opens transports to the server.
pub trait Connector: Send + Sync {
    /// Open one connection to `endpoint`.
    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = TransportResult<TransportHalves>> + Send;
}

/// TCP connector with a connect timeout.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl TcpConnector {
    /// Create a connector that gives up after `connect_timeout`.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn open(endpoint: &Endpoint) -> TransportResult<TcpStream> {
        let addr = lookup_host((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| TransportError::Resolve(format!("{endpoint}: {e}")))?
            .next()
            .ok_or_else(|| TransportError::Resolve(endpoint.to_string()))?;

        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> TransportResult<TransportHalves> {
        let stream = tokio::time::timeout(self.connect_timeout, Self::open(endpoint))
            .await
            .map_err(|_| TransportError::ConnectTimeout)??;

        tracing::debug!(%endpoint, "tcp stream open");
        let (reader, writer) = stream.into_split();
        Ok(TransportHalves {
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
    }
}

/// Write one encoded frame and flush it.
pub async fn write_frame<W>(writer: &mut W, frame: &EncodedFrame) -> TransportResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(frame.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
