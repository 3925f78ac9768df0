use crate::messages::wire::{CodecError, FramedMessage, WireConfig, WireError};
use crate::messages::Message;
use crate::network::transport::{ByteStream, ServerAddress};
use std::fmt;
use std::io;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument, trace, warn};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Failure of one send or receive on a connection
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

impl From<WireError> for ConnectionError {
    fn from(error: WireError) -> Self {
        match error {
            WireError::Io(e) => ConnectionError::Io(e),
            WireError::Codec(e) => ConnectionError::Codec(e),
        }
    }
}

impl ConnectionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConnectionError::Timeout { .. })
    }
}

/// One logical channel to one server.
///
/// Owned by the pool and lent to exactly one attempt at a time.
pub struct Connection {
    id: u64,
    server: ServerAddress,
    stream: Box<dyn ByteStream>,
    framed: FramedMessage,
    // Bytes read but not yet decoded; survives a cancelled receive
    read_buffer: Vec<u8>,
    // Replies still due for requests whose receive timed out
    owed_replies: u32,
    created_at: Instant,
    last_used: Instant,
    timeouts: u32,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("server", &self.server)
            .field("timeouts", &self.timeouts)
            .field("owed_replies", &self.owed_replies)
            .finish()
    }
}

impl Connection {
    pub fn new(
        id: u64,
        server: ServerAddress,
        stream: Box<dyn ByteStream>,
        wire_config: WireConfig,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            server,
            stream,
            framed: FramedMessage::new(wire_config),
            read_buffer: Vec::new(),
            owed_replies: 0,
            created_at: now,
            last_used: now,
            timeouts: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn server(&self) -> &ServerAddress {
        &self.server
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Timeouts seen on this connection since it was opened
    pub fn timeouts(&self) -> u32 {
        self.timeouts
    }

    pub(crate) fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    #[instrument(level = "debug", skip(self, message), fields(connection_id = self.id, server = %self.server))]
    pub async fn send(&mut self, message: &Message, timeout: Duration) -> Result<(), ConnectionError> {
        self.touch();
        match tokio::time::timeout(timeout, self.framed.write_message(&mut self.stream, message)).await {
            Ok(result) => result.map_err(ConnectionError::from),
            Err(_elapsed) => {
                warn!(timeout = ?timeout, "Send timed out");
                Err(ConnectionError::Timeout {
                    operation: "send",
                    timeout,
                })
            }
        }
    }

    /// Replies the server still owes for receives that timed out
    pub fn owed_replies(&self) -> u32 {
        self.owed_replies
    }

    /// Receive the next message.
    ///
    /// On timeout the reply is counted as owed and any partial frame stays
    /// buffered, so the stream is still in step for
    /// [`discard_owed_replies`](Self::discard_owed_replies).
    #[instrument(level = "debug", skip(self), fields(connection_id = self.id, server = %self.server))]
    pub async fn receive(&mut self, timeout: Duration) -> Result<Message, ConnectionError> {
        let result = tokio::time::timeout(timeout, self.read_frame()).await;
        self.touch();
        match result {
            Ok(result) => result,
            Err(_elapsed) => {
                self.owed_replies += 1;
                warn!(timeout = ?timeout, owed = self.owed_replies, "Receive timed out");
                Err(ConnectionError::Timeout {
                    operation: "receive",
                    timeout,
                })
            }
        }
    }

    /// Read and drop every late reply still owed, each bounded by `timeout`.
    ///
    /// Returns how many were discarded. On error the connection is out of
    /// step and must be closed.
    #[instrument(level = "debug", skip(self), fields(connection_id = self.id, server = %self.server))]
    pub async fn discard_owed_replies(&mut self, timeout: Duration) -> Result<u32, ConnectionError> {
        let mut discarded = 0;
        while self.owed_replies > 0 {
            let stale = match tokio::time::timeout(timeout, self.read_frame()).await {
                Ok(result) => result?,
                Err(_elapsed) => {
                    return Err(ConnectionError::Timeout {
                        operation: "discard late reply",
                        timeout,
                    })
                }
            };
            debug!(message_type = %stale.message_type(), "Discarded late reply");
            self.owed_replies -= 1;
            discarded += 1;
        }
        Ok(discarded)
    }

    // Cancel-safe: bytes only leave `read_buffer` as a whole frame
    async fn read_frame(&mut self) -> Result<Message, ConnectionError> {
        loop {
            if let Some(length) = self.framed.frame_length(&self.read_buffer)? {
                let message = self.framed.decode(&self.read_buffer[..length]);
                self.read_buffer.drain(..length);
                return Ok(message?);
            }

            self.read_buffer.reserve(READ_CHUNK_SIZE);
            let read = self.stream.read_buf(&mut self.read_buffer).await?;
            if read == 0 {
                return Err(ConnectionError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "connection closed with {} bytes of an incomplete frame buffered",
                        self.read_buffer.len()
                    ),
                )));
            }
            trace!(read, buffered = self.read_buffer.len(), "Read from stream");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{MessageBuilder, MessageType, Part};
    use tokio::io::AsyncWriteExt;

    fn size_request() -> Message {
        let mut builder = MessageBuilder::new(MessageType::Size, 1);
        builder.add_string("orders");
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn test_send_then_receive() {
        let framed = FramedMessage::default();
        let request = size_request();
        let response = Message::response(MessageType::Response, vec![Part::int(12)]);

        let mock = tokio_test::io::Builder::new()
            .write(&framed.encode(&request).unwrap())
            .read(&framed.encode(&response).unwrap())
            .build();
        let mut connection = Connection::new(1, "s1:1".into(), Box::new(mock), WireConfig::default());

        connection.send(&request, Duration::from_secs(1)).await.unwrap();
        let received = connection.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(received, response);
    }

    #[tokio::test]
    async fn test_receive_times_out() {
        let (client, _server) = tokio::io::duplex(1024);
        let mut connection = Connection::new(2, "s1:1".into(), Box::new(client), WireConfig::default());

        let err = connection.receive(Duration::from_millis(50)).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_timeout_mid_frame_keeps_stream_in_step() {
        let (client, mut server) = tokio::io::duplex(1024);
        let framed = FramedMessage::default();
        let late = framed
            .encode(&Message::response(MessageType::Response, vec![Part::int(111)]))
            .unwrap();
        let fresh = framed
            .encode(&Message::response(MessageType::Response, vec![Part::int(222)]))
            .unwrap();

        let mut connection = Connection::new(5, "s1:1".into(), Box::new(client), WireConfig::default());
        server.write_all(&late[..4]).await.unwrap();
        let err = connection.receive(Duration::from_millis(50)).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(connection.owed_replies(), 1);

        server.write_all(&late[4..]).await.unwrap();
        server.write_all(&fresh).await.unwrap();
        assert_eq!(connection.discard_owed_replies(Duration::from_secs(1)).await.unwrap(), 1);
        assert_eq!(connection.owed_replies(), 0);

        let received = connection.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(received.part(0).unwrap().as_int().unwrap(), 222);
    }

    #[tokio::test]
    async fn test_discard_times_out_when_reply_never_comes() {
        let (client, _server) = tokio::io::duplex(1024);
        let mut connection = Connection::new(6, "s1:1".into(), Box::new(client), WireConfig::default());

        assert!(connection.receive(Duration::from_millis(20)).await.is_err());
        let err = connection
            .discard_owed_replies(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_peer_close_mid_message_is_io_error() {
        let (client, mut server) = tokio::io::duplex(1024);
        let bytes = FramedMessage::default()
            .encode(&Message::response(MessageType::Response, vec![Part::string("abc")]))
            .unwrap();
        server.write_all(&bytes[..bytes.len() - 2]).await.unwrap();
        drop(server);

        let mut connection = Connection::new(3, "s1:1".into(), Box::new(client), WireConfig::default());
        let err = connection.receive(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Io(_)), "got {}", err);
    }

    #[tokio::test]
    async fn test_garbage_is_codec_error() {
        let (client, mut server) = tokio::io::duplex(1024);
        server.write_all(&[0x7f, 0x7f, 0, 0, 0]).await.unwrap();

        let mut connection = Connection::new(4, "s1:1".into(), Box::new(client), WireConfig::default());
        let err = connection.receive(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Codec(CodecError::UnknownMessageType { .. })
        ));
    }
}
