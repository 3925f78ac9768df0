use crate::messages::types::{Message, MessageType, Part, PartKind, FLAG_EARLY_ACK, FLAG_SECURE_PART};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, instrument, trace, warn};

// Wire layout constants
pub const HEADER_SIZE: usize = 5; // i16 type + i16 part count + u8 flags
pub const PART_PREFIX_SIZE: usize = 5; // u32 length + u8 kind
pub const SECURE_PREFIX_SIZE: usize = 4; // u32 length
pub const MAX_PART_COUNT: usize = i16::MAX as usize;

pub const DEFAULT_MAX_PART_SIZE: usize = 16 * 1024 * 1024; // 16MB
pub const SUSPICIOUS_PART_THRESHOLD: usize = 8 * 1024 * 1024; // 8MB threshold for logging

const KNOWN_FLAGS: u8 = FLAG_EARLY_ACK | FLAG_SECURE_PART;

/// Limits applied while encoding and decoding messages
#[derive(Debug, Clone)]
pub struct WireConfig {
    /// Largest single part (or secure part) accepted in either direction
    pub max_part_size: usize,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            max_part_size: DEFAULT_MAX_PART_SIZE,
        }
    }
}

impl WireConfig {
    pub fn with_max_part_size(max_part_size: usize) -> Self {
        Self { max_part_size }
    }
}

/// Malformed or inconsistent message bytes.
///
/// A codec error never yields a partial message.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Truncated message while reading {operation}: needed {needed} bytes, {available} available")]
    Truncated {
        operation: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("Unknown message type code: {code}")]
    UnknownMessageType { code: i16 },

    #[error("Invalid part count in header: {count}")]
    InvalidPartCount { count: i16 },

    #[error("Too many parts: {count} exceeds maximum of {max}")]
    TooManyParts { count: usize, max: usize },

    #[error("Unknown part kind: {kind}")]
    UnknownPartKind { kind: u8 },

    #[error("Unknown header flags: {flags:#04x}")]
    UnknownFlags { flags: u8 },

    #[error("Part too large: {size} bytes exceeds maximum of {max_size} bytes")]
    PartTooLarge { size: usize, max_size: usize },

    #[error("Part count mismatch: declared {declared}, written {actual}")]
    PartCountMismatch { declared: usize, actual: usize },

    #[error("{count} trailing bytes after the last declared part")]
    TrailingBytes { count: usize },

    #[error("Missing part {index}: message has {part_count} parts")]
    MissingPart { index: usize, part_count: usize },

    #[error("Invalid part: {reason}")]
    InvalidPart { reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Failure while moving a message over a byte stream
#[derive(Error, Debug)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Clone, Copy)]
struct Header {
    message_type: MessageType,
    part_count: usize,
    early_ack: bool,
    has_secure_part: bool,
}

fn parse_header(bytes: [u8; HEADER_SIZE]) -> Result<Header, CodecError> {
    let code = i16::from_be_bytes([bytes[0], bytes[1]]);
    let count = i16::from_be_bytes([bytes[2], bytes[3]]);
    let flags = bytes[4];

    let message_type =
        MessageType::from_code(code).ok_or(CodecError::UnknownMessageType { code })?;
    if count < 0 {
        return Err(CodecError::InvalidPartCount { count });
    }
    if flags & !KNOWN_FLAGS != 0 {
        return Err(CodecError::UnknownFlags { flags });
    }

    Ok(Header {
        message_type,
        part_count: count as usize,
        early_ack: flags & FLAG_EARLY_ACK != 0,
        has_secure_part: flags & FLAG_SECURE_PART != 0,
    })
}

/// Bounds-checked cursor over an in-memory message
struct SliceReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> SliceReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    fn take(&mut self, needed: usize, operation: &'static str) -> Result<&'a [u8], CodecError> {
        if self.remaining() < needed {
            return Err(CodecError::Truncated {
                operation,
                needed,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.position..self.position + needed];
        self.position += needed;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self, operation: &'static str) -> Result<[u8; N], CodecError> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N, operation)?);
        Ok(array)
    }
}

/// Encoder/decoder for the grid message envelope.
///
/// Layout: `type: i16 | part count: i16 | flags: u8`, then each part as
/// `length: u32 | kind: u8 | payload`, then the secure part as
/// `length: u32 | token` when flag bit 1 is set. All integers are big-endian.
#[derive(Debug, Clone, Default)]
pub struct FramedMessage {
    wire_config: WireConfig,
}

impl FramedMessage {
    pub fn new(wire_config: WireConfig) -> Self {
        Self { wire_config }
    }

    pub fn wire_config(&self) -> &WireConfig {
        &self.wire_config
    }

    fn validate_part_size(&self, size: usize) -> Result<(), CodecError> {
        if size > self.wire_config.max_part_size || size > u32::MAX as usize {
            error!(
                size = size,
                max_size = self.wire_config.max_part_size,
                "Part size exceeds maximum allowed size"
            );
            return Err(CodecError::PartTooLarge {
                size,
                max_size: self.wire_config.max_part_size,
            });
        }
        if size > SUSPICIOUS_PART_THRESHOLD {
            warn!(
                size = size,
                threshold = SUSPICIOUS_PART_THRESHOLD,
                "Part size exceeds suspicious threshold but is still allowed"
            );
        }
        Ok(())
    }

    fn parse_part_prefix(&self, bytes: [u8; PART_PREFIX_SIZE]) -> Result<(PartKind, usize), CodecError> {
        let length = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let kind = PartKind::from_byte(bytes[4]).ok_or(CodecError::UnknownPartKind { kind: bytes[4] })?;
        self.validate_part_size(length)?;
        Ok((kind, length))
    }

    fn parse_secure_prefix(&self, bytes: [u8; SECURE_PREFIX_SIZE]) -> Result<usize, CodecError> {
        let length = u32::from_be_bytes(bytes) as usize;
        self.validate_part_size(length)?;
        Ok(length)
    }

    /// Encode a message into its wire bytes
    #[instrument(level = "trace", skip(self, message), fields(message_type = %message.message_type(), parts = message.part_count()))]
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, CodecError> {
        let part_count = message.part_count();
        if part_count > MAX_PART_COUNT {
            return Err(CodecError::TooManyParts {
                count: part_count,
                max: MAX_PART_COUNT,
            });
        }

        let body_size: usize = message
            .parts()
            .iter()
            .map(|part| PART_PREFIX_SIZE + part.len())
            .sum();
        let secure_size = message
            .secure_part()
            .map(|token| SECURE_PREFIX_SIZE + token.len())
            .unwrap_or(0);

        let mut buffer = Vec::with_capacity(HEADER_SIZE + body_size + secure_size);
        buffer.extend_from_slice(&message.message_type().code().to_be_bytes());
        buffer.extend_from_slice(&(part_count as i16).to_be_bytes());
        buffer.push(message.header_flags());

        for part in message.parts() {
            self.validate_part_size(part.len())?;
            buffer.extend_from_slice(&(part.len() as u32).to_be_bytes());
            buffer.push(part.kind() as u8);
            buffer.extend_from_slice(part.payload());
        }

        if let Some(token) = message.secure_part() {
            self.validate_part_size(token.len())?;
            buffer.extend_from_slice(&(token.len() as u32).to_be_bytes());
            buffer.extend_from_slice(token);
        }

        trace!("Encoded message into {} bytes", buffer.len());
        Ok(buffer)
    }

    /// Length of the first complete frame in `data`, or `None` while more
    /// bytes are needed.
    ///
    /// Only prefixes are inspected, so a buffered reader can call this on
    /// every partial read without decoding payloads.
    pub fn frame_length(&self, data: &[u8]) -> Result<Option<usize>, CodecError> {
        if data.len() < HEADER_SIZE {
            return Ok(None);
        }
        let mut header_bytes = [0u8; HEADER_SIZE];
        header_bytes.copy_from_slice(&data[..HEADER_SIZE]);
        let header = parse_header(header_bytes)?;

        let mut offset = HEADER_SIZE;
        for _ in 0..header.part_count {
            if data.len() < offset + PART_PREFIX_SIZE {
                return Ok(None);
            }
            let mut prefix = [0u8; PART_PREFIX_SIZE];
            prefix.copy_from_slice(&data[offset..offset + PART_PREFIX_SIZE]);
            let (_, length) = self.parse_part_prefix(prefix)?;
            offset += PART_PREFIX_SIZE + length;
        }

        if header.has_secure_part {
            if data.len() < offset + SECURE_PREFIX_SIZE {
                return Ok(None);
            }
            let mut prefix = [0u8; SECURE_PREFIX_SIZE];
            prefix.copy_from_slice(&data[offset..offset + SECURE_PREFIX_SIZE]);
            offset += SECURE_PREFIX_SIZE + self.parse_secure_prefix(prefix)?;
        }

        Ok((data.len() >= offset).then_some(offset))
    }

    /// Decode exactly one message from `data`; leftover bytes are an error
    #[instrument(level = "trace", skip(self, data), fields(data_size = data.len()))]
    pub fn decode(&self, data: &[u8]) -> Result<Message, CodecError> {
        let mut reader = SliceReader::new(data);
        let header = parse_header(reader.take_array::<HEADER_SIZE>("header")?)?;

        let mut parts = Vec::with_capacity(header.part_count.min(64));
        for _ in 0..header.part_count {
            let prefix = reader.take_array::<PART_PREFIX_SIZE>("part prefix")?;
            let (kind, length) = self.parse_part_prefix(prefix)?;
            let payload = reader.take(length, "part payload")?;
            parts.push(Part::new(kind, payload.to_vec()));
        }

        let secure_part = if header.has_secure_part {
            let prefix = reader.take_array::<SECURE_PREFIX_SIZE>("secure part prefix")?;
            let length = self.parse_secure_prefix(prefix)?;
            Some(reader.take(length, "secure part")?.to_vec())
        } else {
            None
        };

        if reader.remaining() > 0 {
            return Err(CodecError::TrailingBytes {
                count: reader.remaining(),
            });
        }

        Ok(Message::from_wire(
            header.message_type,
            parts,
            header.early_ack,
            secure_part,
        ))
    }

    #[instrument(level = "debug", skip(self, writer, message), fields(message_type = %message.message_type()))]
    pub async fn write_message(
        &self,
        writer: &mut (impl AsyncWrite + Unpin),
        message: &Message,
    ) -> Result<(), WireError> {
        let bytes = self.encode(message)?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        debug!("Wrote {} byte message", bytes.len());
        Ok(())
    }

    /// Read one message from a stream.
    ///
    /// Reading stops as soon as the declared parts (and the secure part, if
    /// flagged) have arrived. A message flagged early-ack is handed back
    /// like any other; nothing waits for a further frame.
    ///
    /// A stream that ends mid-frame fails with `WireError::Io(UnexpectedEof)`,
    /// whereas [`decode`](Self::decode) reports the same short input as
    /// `CodecError::Truncated`: here the bytes may still be in flight, there
    /// they are known to be all there is.
    #[instrument(level = "debug", skip(self, reader))]
    pub async fn read_message(
        &self,
        reader: &mut (impl AsyncRead + Unpin),
    ) -> Result<Message, WireError> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_bytes).await?;
        let header = parse_header(header_bytes)?;
        trace!(
            message_type = %header.message_type,
            parts = header.part_count,
            early_ack = header.early_ack,
            secure = header.has_secure_part,
            "Read message header"
        );

        let mut parts = Vec::with_capacity(header.part_count.min(64));
        for _ in 0..header.part_count {
            let mut prefix = [0u8; PART_PREFIX_SIZE];
            reader.read_exact(&mut prefix).await?;
            let (kind, length) = self.parse_part_prefix(prefix)?;
            // Allocate only after the length passed validation
            let mut payload = vec![0u8; length];
            reader.read_exact(&mut payload).await?;
            parts.push(Part::new(kind, payload));
        }

        let secure_part = if header.has_secure_part {
            let mut prefix = [0u8; SECURE_PREFIX_SIZE];
            reader.read_exact(&mut prefix).await?;
            let length = self.parse_secure_prefix(prefix)?;
            let mut token = vec![0u8; length];
            reader.read_exact(&mut token).await?;
            Some(token)
        } else {
            None
        };

        debug!("Read {} message with {} parts", header.message_type, parts.len());
        Ok(Message::from_wire(
            header.message_type,
            parts,
            header.early_ack,
            secure_part,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::types::MessageBuilder;

    fn message_with_parts(parts: Vec<Part>) -> Message {
        let mut builder = MessageBuilder::new(MessageType::Put, parts.len());
        for part in parts {
            builder.add_part(part);
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_round_trip_preserves_part_order() {
        let framed = FramedMessage::default();
        for n in 0..=8usize {
            let parts: Vec<Part> = (0..n)
                .map(|i| {
                    if i % 3 == 0 {
                        Part::empty()
                    } else {
                        Part::bytes(vec![i as u8; i * 7])
                    }
                })
                .collect();
            let message = message_with_parts(parts.clone());
            let decoded = framed.decode(&framed.encode(&message).unwrap()).unwrap();
            assert_eq!(decoded.parts(), parts.as_slice(), "n = {}", n);
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn test_header_layout() {
        let framed = FramedMessage::default();
        let mut builder = MessageBuilder::new(MessageType::Size, 1);
        builder.add_string("ab");
        let message = builder.build().unwrap().with_secure_part(vec![0xaa]);

        let bytes = framed.encode(&message).unwrap();
        assert_eq!(
            bytes,
            vec![
                0x00, 81, // SIZE
                0x00, 1, // one part
                FLAG_SECURE_PART,
                0, 0, 0, 2, 0, b'a', b'b', // part
                0, 0, 0, 1, 0xaa, // secure part
            ]
        );
    }

    #[test]
    fn test_flags_round_trip() {
        let framed = FramedMessage::default();
        let message = message_with_parts(vec![Part::int(3)])
            .with_early_ack(true)
            .with_secure_part(b"token".to_vec());
        let decoded = framed.decode(&framed.encode(&message).unwrap()).unwrap();
        assert!(decoded.early_ack());
        assert_eq!(decoded.secure_part(), Some(&b"token"[..]));
    }

    #[test]
    fn test_truncated_input_is_rejected() {
        let framed = FramedMessage::default();
        let message = message_with_parts(vec![Part::string("hello"), Part::int(1)]);
        let bytes = framed.encode(&message).unwrap();
        for cut in [0, 3, HEADER_SIZE, HEADER_SIZE + 2, bytes.len() - 1] {
            let err = framed.decode(&bytes[..cut]).unwrap_err();
            assert!(matches!(err, CodecError::Truncated { .. }), "cut {}: {}", cut, err);
        }
    }

    #[test]
    fn test_trailing_bytes_are_rejected() {
        let framed = FramedMessage::default();
        let mut bytes = framed.encode(&message_with_parts(vec![Part::int(1)])).unwrap();
        bytes.extend_from_slice(&[0, 0]);
        assert!(matches!(
            framed.decode(&bytes),
            Err(CodecError::TrailingBytes { count: 2 })
        ));
    }

    #[test]
    fn test_invalid_header_fields() {
        let framed = FramedMessage::default();
        assert!(matches!(
            framed.decode(&[0x7f, 0x00, 0, 0, 0]),
            Err(CodecError::UnknownMessageType { code: 0x7f00 })
        ));
        assert!(matches!(
            framed.decode(&[0, 5, 0xff, 0xff, 0]),
            Err(CodecError::InvalidPartCount { count: -1 })
        ));
        assert!(matches!(
            framed.decode(&[0, 5, 0, 0, 0x80]),
            Err(CodecError::UnknownFlags { flags: 0x80 })
        ));
        assert!(matches!(
            framed.decode(&[0, 5, 0, 1, 0, 0, 0, 0, 0, 9]),
            Err(CodecError::UnknownPartKind { kind: 9 })
        ));
    }

    #[test]
    fn test_oversized_parts_are_rejected() {
        let framed = FramedMessage::new(WireConfig::with_max_part_size(4));
        let message = message_with_parts(vec![Part::bytes(vec![0u8; 5])]);
        assert!(matches!(
            framed.encode(&message),
            Err(CodecError::PartTooLarge { size: 5, max_size: 4 })
        ));

        // A declared length above the limit fails before any allocation
        let bytes = [0, 7, 0, 1, 0, 0xff, 0xff, 0xff, 0xff, 0];
        assert!(matches!(
            framed.decode(&bytes),
            Err(CodecError::PartTooLarge { .. })
        ));
    }

    #[test]
    fn test_frame_length_waits_for_complete_frame() {
        let framed = FramedMessage::default();
        let message = message_with_parts(vec![Part::string("hello"), Part::int(1)])
            .with_secure_part(b"token".to_vec());
        let bytes = framed.encode(&message).unwrap();

        for cut in 0..bytes.len() {
            assert_eq!(framed.frame_length(&bytes[..cut]).unwrap(), None, "cut {}", cut);
        }
        assert_eq!(framed.frame_length(&bytes).unwrap(), Some(bytes.len()));

        let mut two = bytes.clone();
        two.extend_from_slice(&bytes);
        assert_eq!(framed.frame_length(&two).unwrap(), Some(bytes.len()));
    }

    #[test]
    fn test_frame_length_rejects_bad_header() {
        let framed = FramedMessage::default();
        assert!(matches!(
            framed.frame_length(&[0x7f, 0x7f, 0, 0, 0]),
            Err(CodecError::UnknownMessageType { .. })
        ));
    }

    #[tokio::test]
    async fn test_stream_read_write() {
        let framed = FramedMessage::default();
        let message = message_with_parts(vec![Part::string("region"), Part::empty()]);

        let mut buffer = Vec::new();
        framed.write_message(&mut buffer, &message).await.unwrap();

        let mut reader = buffer.as_slice();
        let decoded = framed.read_message(&mut reader).await.unwrap();
        assert_eq!(decoded, message);
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn test_stream_read_eof_is_io_error() {
        let framed = FramedMessage::default();
        let bytes = framed.encode(&message_with_parts(vec![Part::string("abc")])).unwrap();
        let mut reader = &bytes[..bytes.len() - 1];
        let err = framed.read_message(&mut reader).await.unwrap_err();
        match err {
            WireError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected io error, got {}", other),
        }
    }
}
