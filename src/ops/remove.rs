use crate::messages::{CodecError, Message, MessageBuilder, MessageType};
use crate::ops::error::ResponseError;
use crate::ops::operation::{response_part, Operation};

/// Delete `key`; resolves to whether the key existed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveOp {
    region: String,
    key: String,
}

impl RemoveOp {
    pub fn new(region: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            key: key.into(),
        }
    }
}

impl Operation for RemoveOp {
    type Output = bool;

    fn kind(&self) -> &'static str {
        "remove"
    }

    fn message_type(&self) -> MessageType {
        MessageType::Remove
    }

    fn part_count(&self) -> usize {
        2
    }

    fn build_request(&self, request: &mut MessageBuilder) -> Result<(), CodecError> {
        request.add_string(&self.region).add_string(&self.key);
        Ok(())
    }

    fn process_response(&self, response: Message) -> Result<bool, ResponseError> {
        Ok(response_part(self.kind(), &response)?.as_int()? != 0)
    }

    fn needs_user_id(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Part;

    #[test]
    fn test_remove_existed_flag() {
        let op = RemoveOp::new("orders", "o-1");
        let existed = Message::response(MessageType::Response, vec![Part::int(1)]);
        assert!(op.process_response(existed).unwrap());

        let absent = Message::response(MessageType::Response, vec![Part::int(0)]);
        assert!(!op.process_response(absent).unwrap());
    }

    #[test]
    fn test_remove_error_type() {
        let op = RemoveOp::new("orders", "o-1");
        assert!(op.is_error_response(MessageType::RemoveError));
        assert!(op.needs_user_id());
    }
}
