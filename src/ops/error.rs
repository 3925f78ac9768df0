use crate::messages::{CodecError, MessageType};
use crate::network::{ConnectionError, ServerAddress};
use crate::security::SecurityError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Definitive answer from a reachable server that the request failed.
///
/// Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    #[error("{operation} failed on server ({message_type}): {message}")]
    OperationFailed {
        operation: &'static str,
        message_type: MessageType,
        message: String,
    },

    #[error("{operation} raised a server exception: {message}")]
    Exception {
        operation: &'static str,
        message: String,
    },

    #[error("{operation} not authorized: {message}")]
    Unauthorized {
        operation: &'static str,
        message: String,
    },

    #[error("{operation} requires authentication: {message}")]
    AuthenticationRequired {
        operation: &'static str,
        message: String,
    },

    #[error("{operation} received unexpected response type {message_type}")]
    UnexpectedResponse {
        operation: &'static str,
        message_type: MessageType,
    },
}

/// Failure to turn a response into an operation result
#[derive(Error, Debug)]
pub enum ResponseError {
    #[error(transparent)]
    Server(#[from] ServerError),

    /// The response was well framed but its parts did not decode
    #[error("Malformed response: {0}")]
    Malformed(#[from] CodecError),
}

/// Why one attempt failed over to another server
#[derive(Error, Debug)]
pub enum AttemptFailure {
    #[error("could not connect to {server}: {source}")]
    Connect {
        server: ServerAddress,
        #[source]
        source: io::Error,
    },

    #[error("transport failure on {server}: {source}")]
    Transport {
        server: ServerAddress,
        #[source]
        source: ConnectionError,
    },

    #[error("{server} did not respond within {timeout:?}")]
    Timeout {
        server: ServerAddress,
        timeout: Duration,
    },

    #[error("protocol anomaly from {server}: {source}")]
    Protocol {
        server: ServerAddress,
        #[source]
        source: CodecError,
    },
}

impl AttemptFailure {
    pub fn server(&self) -> &ServerAddress {
        match self {
            AttemptFailure::Connect { server, .. }
            | AttemptFailure::Transport { server, .. }
            | AttemptFailure::Timeout { server, .. }
            | AttemptFailure::Protocol { server, .. } => server,
        }
    }
}

fn describe_last(last_error: &Option<AttemptFailure>) -> String {
    match last_error {
        Some(error) => format!(", last error: {}", error),
        None => String::new(),
    }
}

fn describe_servers(servers: &[ServerAddress]) -> String {
    servers
        .iter()
        .map(ServerAddress::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// The single terminal error an `execute` call can produce
#[derive(Error, Debug)]
pub enum ExecuteError {
    #[error("No server left to try after [{}]{}", describe_servers(.tried), describe_last(.last_error))]
    ExhaustedServers {
        tried: Vec<ServerAddress>,
        last_error: Option<AttemptFailure>,
    },

    #[error("Gave up after {attempts} attempts against [{}]{}", describe_servers(.tried), describe_last(.last_error))]
    RetriesExhausted {
        attempts: u32,
        tried: Vec<ServerAddress>,
        last_error: Option<AttemptFailure>,
    },

    #[error(transparent)]
    Server(#[from] ServerError),

    /// The request itself could not be encoded
    #[error("Failed to encode request: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error("Operation cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl ExecuteError {
    /// Servers that were tried and failed before giving up
    pub fn tried_servers(&self) -> &[ServerAddress] {
        match self {
            ExecuteError::ExhaustedServers { tried, .. }
            | ExecuteError::RetriesExhausted { tried, .. } => tried,
            _ => &[],
        }
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self, ExecuteError::Server(_))
    }
}
