use crate::messages::{CodecError, Message, MessageBuilder, MessageType};
use crate::ops::error::ResponseError;
use crate::ops::operation::{response_part, Operation};

/// Number of entries a server holds for one region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeOp {
    region: String,
}

impl SizeOp {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

impl Operation for SizeOp {
    type Output = u32;

    fn kind(&self) -> &'static str {
        "size"
    }

    fn message_type(&self) -> MessageType {
        MessageType::Size
    }

    fn part_count(&self) -> usize {
        1
    }

    fn build_request(&self, request: &mut MessageBuilder) -> Result<(), CodecError> {
        request.add_string(&self.region);
        Ok(())
    }

    fn process_response(&self, response: Message) -> Result<u32, ResponseError> {
        let size = response_part(self.kind(), &response)?.as_int()?;
        u32::try_from(size).map_err(|_| {
            CodecError::InvalidPart {
                reason: format!("negative region size {}", size),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Part;
    use crate::ops::error::ServerError;

    fn request_for(op: &SizeOp) -> Message {
        let mut builder = MessageBuilder::new(op.message_type(), op.part_count());
        op.build_request(&mut builder).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_request_layout() {
        let op = SizeOp::new("orders");
        let request = request_for(&op);

        assert_eq!(request.message_type(), MessageType::Size);
        assert_eq!(request.part_count(), 1);
        assert_eq!(request.part(0).unwrap().as_str().unwrap(), "orders");
        assert!(!op.early_ack());
        assert!(!op.needs_user_id());
    }

    #[test]
    fn test_secure_part_survives_early_ack_clear() {
        let op = SizeOp::new("orders");
        let request = request_for(&op)
            .with_early_ack(true)
            .with_secure_part(b"token".to_vec())
            .with_early_ack(op.early_ack());

        assert_eq!(request.header_flags(), crate::messages::FLAG_SECURE_PART);
    }

    #[test]
    fn test_process_response() {
        let op = SizeOp::new("orders");
        let ok = Message::response(MessageType::Response, vec![Part::int(42)]);
        assert_eq!(op.process_response(ok).unwrap(), 42);

        let negative = Message::response(MessageType::Response, vec![Part::int(-1)]);
        assert!(matches!(
            op.process_response(negative),
            Err(ResponseError::Malformed(CodecError::InvalidPart { .. }))
        ));
    }

    #[test]
    fn test_size_error_is_server_error() {
        let op = SizeOp::new("missing");
        assert!(op.is_error_response(MessageType::SizeError));
        assert!(!op.is_error_response(MessageType::GetError));

        let response = Message::response(MessageType::SizeError, vec![Part::string("region not found")]);
        match op.process_response(response) {
            Err(ResponseError::Server(ServerError::OperationFailed { message, .. })) => {
                assert_eq!(message, "region not found");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
