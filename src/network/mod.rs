pub mod client;
pub mod connection;
pub mod pool;
pub mod transport;

pub use client::GridClient;
pub use connection::{Connection, ConnectionError};
pub use pool::{
    ConnectionPool, Outcome, PoolConfig, PoolError, PoolStatus, PooledConnection, ServerSelection,
    ServerStatus, DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_MAX_CONNECTIONS_PER_SERVER, DEFAULT_STALE_REPLY_TIMEOUT,
};
pub use transport::{AddressError, ByteStream, ServerAddress, TcpTransport, Transport};
