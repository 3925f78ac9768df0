//! Security token supply for operations that carry a user id.

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SecurityError {
    #[error("Security token unavailable: {0}")]
    Unavailable(String),
}

/// Provides the current user/session authentication token on demand.
///
/// Only consulted for operations whose `needs_user_id()` is true.
pub trait TokenSupplier: Send + Sync {
    fn current_token(&self) -> Result<Vec<u8>, SecurityError>;
}

/// A fixed token, e.g. handed in on the command line
#[derive(Clone)]
pub struct StaticToken {
    token: Vec<u8>,
}

impl StaticToken {
    pub fn new(token: impl Into<Vec<u8>>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticToken")
            .field("fingerprint", &fingerprint(&self.token))
            .finish()
    }
}

impl TokenSupplier for StaticToken {
    fn current_token(&self) -> Result<Vec<u8>, SecurityError> {
        if self.token.is_empty() {
            return Err(SecurityError::Unavailable("token is empty".to_string()));
        }
        Ok(self.token.clone())
    }
}

/// Short, log-safe identifier for a token
pub fn fingerprint(token: &[u8]) -> String {
    let digest = Sha256::digest(token);
    hex::encode(&digest[..6])
}
