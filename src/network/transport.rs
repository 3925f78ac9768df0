//! Byte-stream transport to grid servers.
//!
//! The transport knows nothing about messages; it only opens streams.
//! Connections, pooling and framing are layered on top.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("'{address}' is not in host:port form")]
    MissingPort { address: String },

    #[error("'{address}' has an empty host")]
    EmptyHost { address: String },

    #[error("'{address}' has an invalid port")]
    InvalidPort { address: String },
}

/// Identity of one grid server endpoint, `host:port`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerAddress(String);

impl ServerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Parse and validate a `host:port` string
    pub fn parse(address: &str) -> Result<Self, AddressError> {
        let (host, port) = address.rsplit_once(':').ok_or_else(|| AddressError::MissingPort {
            address: address.to_string(),
        })?;
        if host.is_empty() {
            return Err(AddressError::EmptyHost {
                address: address.to_string(),
            });
        }
        port.parse::<u16>().map_err(|_| AddressError::InvalidPort {
            address: address.to_string(),
        })?;
        Ok(Self(address.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

/// A bidirectional byte stream to one server
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Opens byte streams to servers.
///
/// Object-safe so the pool can hold an `Arc<dyn Transport>`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, server: &ServerAddress) -> io::Result<Box<dyn ByteStream>>;
}

/// Plain TCP transport
#[derive(Debug, Clone, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, server: &ServerAddress) -> io::Result<Box<dyn ByteStream>> {
        let stream = TcpStream::connect(server.as_str()).await?;
        stream.set_nodelay(true)?;
        debug!("Opened TCP stream to {}", server);
        Ok(Box::new(stream))
    }
}
