use crate::messages::{CodecError, Message, MessageBuilder, MessageType};
use crate::ops::error::{ResponseError, ServerError};
use crate::ops::operation::{server_error, Operation};

/// Store `value` under `key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOp {
    region: String,
    key: String,
    value: Vec<u8>,
}

impl PutOp {
    pub fn new(region: impl Into<String>, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            region: region.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Operation for PutOp {
    type Output = ();

    fn kind(&self) -> &'static str {
        "put"
    }

    fn message_type(&self) -> MessageType {
        MessageType::Put
    }

    fn part_count(&self) -> usize {
        3
    }

    fn build_request(&self, request: &mut MessageBuilder) -> Result<(), CodecError> {
        request
            .add_string(&self.region)
            .add_string(&self.key)
            .add_bytes(self.value.clone());
        Ok(())
    }

    fn process_response(&self, response: Message) -> Result<(), ResponseError> {
        match response.message_type() {
            MessageType::Reply | MessageType::Response => Ok(()),
            message_type if message_type.is_generic_error() || message_type.is_operation_error() => {
                Err(server_error(self.kind(), &response).into())
            }
            message_type => Err(ServerError::UnexpectedResponse {
                operation: self.kind(),
                message_type,
            }
            .into()),
        }
    }

    fn needs_user_id(&self) -> bool {
        true
    }
}
