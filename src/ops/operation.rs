use crate::messages::{CodecError, Message, MessageBuilder, MessageType, Part};
use crate::ops::error::{ResponseError, ServerError};
use crate::stats::{AttemptToken, StatsRegistry};

/// A unit of client work that the [`Executor`](crate::ops::Executor) can
/// send to a grid server.
///
/// Implementations describe the request and interpret the response; the
/// executor owns connections, retries and failover. New request kinds are
/// added by implementing this trait.
pub trait Operation: Send + Sync {
    type Output: Send;

    /// Stable name used for stats and logs, e.g. `"size"`
    fn kind(&self) -> &'static str;

    fn message_type(&self) -> MessageType;

    /// Number of parts `build_request` writes
    fn part_count(&self) -> usize;

    fn build_request(&self, request: &mut MessageBuilder) -> Result<(), CodecError>;

    /// Whether `response_type` is this operation's own error reply.
    ///
    /// Generic protocol errors (`EXCEPTION`, `UNAUTHORIZED`, ...) are
    /// recognised by the executor for every operation.
    fn is_error_response(&self, response_type: MessageType) -> bool {
        self.message_type().error_type() == Some(response_type)
    }

    /// Decode a success payload, or turn an error reply into a [`ServerError`]
    fn process_response(&self, response: Message) -> Result<Self::Output, ResponseError>;

    /// Whether the current security token must ride along as the secure part
    fn needs_user_id(&self) -> bool {
        false
    }

    /// Whether the peer may acknowledge before the full response is ready
    fn early_ack(&self) -> bool {
        false
    }

    fn start_attempt(&self, stats: &StatsRegistry) -> AttemptToken {
        stats.start_attempt(self.kind())
    }

    fn end_send_attempt(&self, stats: &StatsRegistry, token: &mut AttemptToken, failed: bool) {
        stats.end_send_attempt(token, failed);
    }

    fn end_attempt(&self, stats: &StatsRegistry, token: AttemptToken, timed_out: bool, failed: bool) {
        stats.end_attempt(token, timed_out, failed);
    }
}

/// Build the [`ServerError`] an error reply stands for.
///
/// The first part, when present and textual, carries the server's message.
pub fn server_error(operation: &'static str, response: &Message) -> ServerError {
    let message = response
        .parts()
        .first()
        .and_then(|part| part.as_str().ok())
        .unwrap_or("")
        .to_string();

    match response.message_type() {
        MessageType::Exception => ServerError::Exception { operation, message },
        MessageType::Unauthorized => ServerError::Unauthorized { operation, message },
        MessageType::AuthenticationRequired => {
            ServerError::AuthenticationRequired { operation, message }
        }
        message_type if message_type.is_operation_error() => ServerError::OperationFailed {
            operation,
            message_type,
            message,
        },
        message_type => ServerError::UnexpectedResponse {
            operation,
            message_type,
        },
    }
}

/// Check that `response` is of the `expected` success type
pub fn expect_response(
    operation: &'static str,
    response: &Message,
    expected: MessageType,
) -> Result<(), ResponseError> {
    let message_type = response.message_type();
    if message_type == expected {
        return Ok(());
    }
    if message_type.is_generic_error() || message_type.is_operation_error() {
        return Err(server_error(operation, response).into());
    }
    Err(ServerError::UnexpectedResponse {
        operation,
        message_type,
    }
    .into())
}

/// The single object part of a `RESPONSE` reply
pub fn response_part<'a>(
    operation: &'static str,
    response: &'a Message,
) -> Result<&'a Part, ResponseError> {
    expect_response(operation, response, MessageType::Response)?;
    Ok(response.part(0)?)
}
