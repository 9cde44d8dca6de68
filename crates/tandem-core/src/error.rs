use thiserror::Error;

/// Errors produced by the tandem protocol and coordination layers.
#[derive(Debug, Error)]
pub enum TandemError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session full: {0}")]
    SessionFull(String),

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("unsupported payload type: {0}")]
    PayloadWrongType(String),

    #[error("not permitted: {0}")]
    NotPermitted(String),

    #[error("rate limited")]
    RateLimited,

    #[error("codec error: {0}")]
    Codec(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for TandemError {
    fn from(e: serde_json::Error) -> Self {
        TandemError::Codec(e.to_string())
    }
}

pub type TandemResult<T> = Result<T, TandemError>;
