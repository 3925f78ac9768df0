pub mod cli;
pub mod config;
pub mod messages;
pub mod network;
pub mod ops;
pub mod security;
pub mod stats;

// Re-export key types for easy testing
pub use config::ClientConfig;
pub use messages::{Message, MessageBuilder, MessageType, Part};
pub use network::{ConnectionPool, GridClient, ServerAddress, Transport};
pub use ops::{ExecuteError, Executor, Operation};
pub use stats::StatsRegistry;
