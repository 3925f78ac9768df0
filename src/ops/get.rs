use crate::messages::{CodecError, Message, MessageBuilder, MessageType};
use crate::ops::error::ResponseError;
use crate::ops::operation::{expect_response, Operation};

/// Fetch the value stored under `key`.
///
/// A `RESPONSE` without parts means the key is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetOp {
    region: String,
    key: String,
}

impl GetOp {
    pub fn new(region: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            key: key.into(),
        }
    }
}

impl Operation for GetOp {
    type Output = Option<Vec<u8>>;

    fn kind(&self) -> &'static str {
        "get"
    }

    fn message_type(&self) -> MessageType {
        MessageType::Get
    }

    fn part_count(&self) -> usize {
        2
    }

    fn build_request(&self, request: &mut MessageBuilder) -> Result<(), CodecError> {
        request.add_string(&self.region).add_string(&self.key);
        Ok(())
    }

    fn process_response(&self, response: Message) -> Result<Option<Vec<u8>>, ResponseError> {
        expect_response(self.kind(), &response, MessageType::Response)?;
        Ok(response
            .into_parts()
            .into_iter()
            .next()
            .map(|part| part.into_payload()))
    }

    fn needs_user_id(&self) -> bool {
        true
    }
}
