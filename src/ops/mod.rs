//! Operations and the executor that dispatches them with failover.

pub mod error;
pub mod executor;
pub mod get;
pub mod operation;
pub mod ping;
pub mod put;
pub mod remove;
pub mod size;

pub use error::{AttemptFailure, ExecuteError, ResponseError, ServerError};
pub use executor::{
    CancelHandle, Executor, ExecutorConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_PER_ATTEMPT_TIMEOUT,
};
pub use get::GetOp;
pub use operation::{expect_response, response_part, server_error, Operation};
pub use ping::PingOp;
pub use put::PutOp;
pub use remove::RemoveOp;
pub use size::SizeOp;
