pub mod types;
pub mod wire;

pub use types::{
    Message, MessageBuilder, MessageType, Part, PartKind, FLAG_EARLY_ACK, FLAG_SECURE_PART,
};
pub use wire::{
    // Core codec types
    CodecError,
    FramedMessage,
    WireConfig,
    WireError,
    // Wire layout constants
    DEFAULT_MAX_PART_SIZE,
    HEADER_SIZE,
    MAX_PART_COUNT,
    PART_PREFIX_SIZE,
    SECURE_PREFIX_SIZE,
};
