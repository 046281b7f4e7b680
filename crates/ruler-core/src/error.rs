use std::time::Duration;

use thiserror::Error;

/// Core error type for ruler ring operations.
#[derive(Error, Debug)]
pub enum RulerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ring store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Token collision: {0}")]
    TokenCollision(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RulerError {
    /// Whether the error came from talking to the ring store.
    ///
    /// Codec failures count as store failures: a blob we cannot read or write
    /// is as unusable as a store we cannot reach.
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::Serialization(_) | Self::Deserialization(_)
        )
    }
}

impl From<serde_json::Error> for RulerError {
    fn from(e: serde_json::Error) -> Self {
        RulerError::Serialization(e.to_string())
    }
}

/// Result type alias using RulerError.
pub type Result<T> = std::result::Result<T, RulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_classification() {
        assert!(RulerError::StoreUnavailable("down".into()).is_store_error());
        assert!(RulerError::Deserialization("bad blob".into()).is_store_error());
        assert!(!RulerError::InvalidState("started".into()).is_store_error());
        assert!(!RulerError::Timeout(Duration::from_secs(1)).is_store_error());
    }

    #[test]
    fn test_error_display() {
        let err = RulerError::StoreUnavailable("cas retries exhausted".into());
        assert_eq!(
            err.to_string(),
            "Ring store unavailable: cas retries exhausted"
        );
    }
}
