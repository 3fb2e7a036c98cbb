//! Error types for chapterhouse

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication required to open paid episode {episode_id}")]
    AuthenticationRequired { episode_id: i64 },

    /// Carries enough detail for the caller to offer a top-up.
    #[error("Insufficient coins for episode {episode_id} ({title}): costs {coin_cost}, balance {balance}")]
    InsufficientCoins {
        episode_id: i64,
        title: String,
        coin_cost: i64,
        balance: i64,
    },

    #[error("No further chapter: {0}")]
    OutOfRange(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Job already running: {0}")]
    JobInProgress(&'static str),

    #[error("Storage failure: {0}")]
    StorageFailure(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Conditions the request path reports to the reader as-is.
    ///
    /// Everything else is an infrastructure failure and should be logged
    /// and mapped to a generic message by the caller.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            CoreError::NotFound(_)
                | CoreError::AuthenticationRequired { .. }
                | CoreError::InsufficientCoins { .. }
                | CoreError::OutOfRange(_)
                | CoreError::InvalidInput(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_facing_classification() {
        assert!(CoreError::NotFound("episode 1".into()).is_user_facing());
        assert!(CoreError::AuthenticationRequired { episode_id: 1 }.is_user_facing());
        assert!(CoreError::OutOfRange("next".into()).is_user_facing());
        assert!(!CoreError::StorageFailure("disk".into()).is_user_facing());
        assert!(!CoreError::JobInProgress("flush").is_user_facing());
    }

    #[test]
    fn test_insufficient_coins_message() {
        let err = CoreError::InsufficientCoins {
            episode_id: 7,
            title: "The Gate".into(),
            coin_cost: 10,
            balance: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("episode 7"));
        assert!(msg.contains("The Gate"));
        assert!(msg.contains("costs 10"));
    }
}
