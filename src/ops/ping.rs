use crate::messages::{CodecError, Message, MessageBuilder, MessageType};
use crate::ops::error::ResponseError;
use crate::ops::operation::{expect_response, Operation};

/// Liveness check; a live server answers `REPLY`
#[derive(Debug, Clone, Copy, Default)]
pub struct PingOp;

impl Operation for PingOp {
    type Output = ();

    fn kind(&self) -> &'static str {
        "ping"
    }

    fn message_type(&self) -> MessageType {
        MessageType::Ping
    }

    fn part_count(&self) -> usize {
        0
    }

    fn build_request(&self, _request: &mut MessageBuilder) -> Result<(), CodecError> {
        Ok(())
    }

    fn process_response(&self, response: Message) -> Result<(), ResponseError> {
        expect_response(self.kind(), &response, MessageType::Reply)
    }
}
