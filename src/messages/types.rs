use crate::messages::wire::CodecError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Header flag bit set when the sender accepts an early acknowledgment
pub const FLAG_EARLY_ACK: u8 = 0x01;
/// Header flag bit set when a secure (authentication) part trails the parts
pub const FLAG_SECURE_PART: u8 = 0x02;

/// Request and response kinds understood by the grid server.
///
/// Every request kind that can fail has a dedicated `*Error` kind, see
/// [`MessageType::error_type`]. `Exception`, `Unauthorized` and
/// `AuthenticationRequired` are protocol-level errors that any request may
/// receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum MessageType {
    Get = 0,
    Response = 1,
    Exception = 2,
    GetError = 3,
    Ping = 5,
    Reply = 6,
    Put = 7,
    PutError = 8,
    Remove = 9,
    RemoveError = 10,
    Query = 34,
    QueryError = 35,
    Size = 81,
    SizeError = 82,
    Unauthorized = 200,
    AuthenticationRequired = 201,
}

impl MessageType {
    /// Request kinds a client may issue
    pub const REQUESTS: [MessageType; 6] = [
        MessageType::Get,
        MessageType::Ping,
        MessageType::Put,
        MessageType::Remove,
        MessageType::Query,
        MessageType::Size,
    ];

    pub fn code(self) -> i16 {
        self as i16
    }

    pub fn from_code(code: i16) -> Option<Self> {
        let message_type = match code {
            0 => MessageType::Get,
            1 => MessageType::Response,
            2 => MessageType::Exception,
            3 => MessageType::GetError,
            5 => MessageType::Ping,
            6 => MessageType::Reply,
            7 => MessageType::Put,
            8 => MessageType::PutError,
            9 => MessageType::Remove,
            10 => MessageType::RemoveError,
            34 => MessageType::Query,
            35 => MessageType::QueryError,
            81 => MessageType::Size,
            82 => MessageType::SizeError,
            200 => MessageType::Unauthorized,
            201 => MessageType::AuthenticationRequired,
            _ => return None,
        };
        Some(message_type)
    }

    /// The operation-specific error kind a server answers this request with
    pub fn error_type(self) -> Option<MessageType> {
        match self {
            MessageType::Get => Some(MessageType::GetError),
            MessageType::Put => Some(MessageType::PutError),
            MessageType::Remove => Some(MessageType::RemoveError),
            MessageType::Query => Some(MessageType::QueryError),
            MessageType::Size => Some(MessageType::SizeError),
            // A ping that reaches a live server cannot fail on its own;
            // problems surface as a generic exception.
            MessageType::Ping => Some(MessageType::Exception),
            _ => None,
        }
    }

    /// Errors any operation may receive regardless of its own error kind
    pub fn is_generic_error(self) -> bool {
        matches!(
            self,
            MessageType::Exception | MessageType::Unauthorized | MessageType::AuthenticationRequired
        )
    }

    pub fn is_operation_error(self) -> bool {
        matches!(
            self,
            MessageType::GetError
                | MessageType::PutError
                | MessageType::RemoveError
                | MessageType::QueryError
                | MessageType::SizeError
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::Get => "GET",
            MessageType::Response => "RESPONSE",
            MessageType::Exception => "EXCEPTION",
            MessageType::GetError => "GET_ERROR",
            MessageType::Ping => "PING",
            MessageType::Reply => "REPLY",
            MessageType::Put => "PUT",
            MessageType::PutError => "PUT_ERROR",
            MessageType::Remove => "REMOVE",
            MessageType::RemoveError => "REMOVE_ERROR",
            MessageType::Query => "QUERY",
            MessageType::QueryError => "QUERY_ERROR",
            MessageType::Size => "SIZE",
            MessageType::SizeError => "SIZE_ERROR",
            MessageType::Unauthorized => "UNAUTHORIZED",
            MessageType::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

/// How the payload of a part should be interpreted by the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PartKind {
    Bytes = 0,
    Object = 1,
}

impl PartKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(PartKind::Bytes),
            1 => Some(PartKind::Object),
            _ => None,
        }
    }
}

/// One length-prefixed value inside a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    kind: PartKind,
    payload: Vec<u8>,
}

impl Part {
    pub fn new(kind: PartKind, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    pub fn bytes(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(PartKind::Bytes, payload.into())
    }

    pub fn empty() -> Self {
        Self::new(PartKind::Bytes, Vec::new())
    }

    /// UTF-8 string part
    pub fn string(value: &str) -> Self {
        Self::bytes(value.as_bytes())
    }

    /// Big-endian 32-bit integer part
    pub fn int(value: i32) -> Self {
        Self::bytes(value.to_be_bytes())
    }

    /// Big-endian 64-bit integer part
    pub fn long(value: i64) -> Self {
        Self::bytes(value.to_be_bytes())
    }

    /// Serialize any serde value into an object part
    pub fn object<T: Serialize>(value: &T) -> Result<Self, CodecError> {
        let payload = bincode::serialize(value)?;
        Ok(Self::new(PartKind::Object, payload))
    }

    pub fn kind(&self) -> PartKind {
        self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn as_str(&self) -> Result<&str, CodecError> {
        std::str::from_utf8(&self.payload).map_err(|e| CodecError::InvalidPart {
            reason: format!("part is not valid UTF-8: {}", e),
        })
    }

    pub fn as_int(&self) -> Result<i32, CodecError> {
        let bytes: [u8; 4] = self.payload.as_slice().try_into().map_err(|_| {
            CodecError::InvalidPart {
                reason: format!("expected 4 byte int part, got {} bytes", self.payload.len()),
            }
        })?;
        Ok(i32::from_be_bytes(bytes))
    }

    pub fn as_long(&self) -> Result<i64, CodecError> {
        let bytes: [u8; 8] = self.payload.as_slice().try_into().map_err(|_| {
            CodecError::InvalidPart {
                reason: format!("expected 8 byte long part, got {} bytes", self.payload.len()),
            }
        })?;
        Ok(i64::from_be_bytes(bytes))
    }

    pub fn to_object<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        if self.kind != PartKind::Object {
            return Err(CodecError::InvalidPart {
                reason: "expected an object part, got a bytes part".to_string(),
            });
        }
        Ok(bincode::deserialize(&self.payload)?)
    }
}

/// A complete request or response envelope.
///
/// Messages are immutable once built: fields are only reachable through
/// accessors, and the builder methods consume `self`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    message_type: MessageType,
    parts: Vec<Part>,
    early_ack: bool,
    secure_part: Option<Vec<u8>>,
}

impl Message {
    pub(crate) fn from_wire(
        message_type: MessageType,
        parts: Vec<Part>,
        early_ack: bool,
        secure_part: Option<Vec<u8>>,
    ) -> Self {
        Self {
            message_type,
            parts,
            early_ack,
            secure_part,
        }
    }

    /// Response carrying the given parts
    pub fn response(message_type: MessageType, parts: Vec<Part>) -> Self {
        Self::from_wire(message_type, parts, false, None)
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn part(&self, index: usize) -> Result<&Part, CodecError> {
        self.parts.get(index).ok_or(CodecError::MissingPart {
            index,
            part_count: self.parts.len(),
        })
    }

    pub fn into_parts(self) -> Vec<Part> {
        self.parts
    }

    pub fn early_ack(&self) -> bool {
        self.early_ack
    }

    pub fn secure_part(&self) -> Option<&[u8]> {
        self.secure_part.as_deref()
    }

    pub fn has_secure_part(&self) -> bool {
        self.secure_part.is_some()
    }

    pub fn with_early_ack(mut self, early_ack: bool) -> Self {
        self.early_ack = early_ack;
        self
    }

    pub fn with_secure_part(mut self, token: Vec<u8>) -> Self {
        self.secure_part = Some(token);
        self
    }

    /// Flags byte as written in the wire header
    pub fn header_flags(&self) -> u8 {
        let mut flags = 0;
        if self.early_ack {
            flags |= FLAG_EARLY_ACK;
        }
        if self.secure_part.is_some() {
            flags |= FLAG_SECURE_PART;
        }
        flags
    }
}

/// Collects the parts of an outgoing request.
///
/// The part count is declared up front and checked by [`MessageBuilder::build`].
#[derive(Debug)]
pub struct MessageBuilder {
    message_type: MessageType,
    declared_parts: usize,
    parts: Vec<Part>,
}

impl MessageBuilder {
    pub fn new(message_type: MessageType, declared_parts: usize) -> Self {
        Self {
            message_type,
            declared_parts,
            parts: Vec::with_capacity(declared_parts),
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn add_part(&mut self, part: Part) -> &mut Self {
        self.parts.push(part);
        self
    }

    pub fn add_string(&mut self, value: &str) -> &mut Self {
        self.add_part(Part::string(value))
    }

    pub fn add_bytes(&mut self, value: impl Into<Vec<u8>>) -> &mut Self {
        self.add_part(Part::bytes(value))
    }

    pub fn add_int(&mut self, value: i32) -> &mut Self {
        self.add_part(Part::int(value))
    }

    pub fn add_object<T: Serialize>(&mut self, value: &T) -> Result<&mut Self, CodecError> {
        let part = Part::object(value)?;
        Ok(self.add_part(part))
    }

    pub fn build(self) -> Result<Message, CodecError> {
        if self.parts.len() != self.declared_parts {
            return Err(CodecError::PartCountMismatch {
                declared: self.declared_parts,
                actual: self.parts.len(),
            });
        }
        Ok(Message::from_wire(self.message_type, self.parts, false, None))
    }
}
