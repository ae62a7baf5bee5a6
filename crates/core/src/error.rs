use thiserror::Error;

pub type RetentionResult<T> = Result<T, RetentionError>;

#[derive(Error, Debug)]
pub enum RetentionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Unknown entity: {0}")]
    NotFound(String),

    #[error("Invalid queue transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Condition evaluation error: {0}")]
    Condition(String),

    #[error("Personalization error: {0}")]
    Personalization(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
