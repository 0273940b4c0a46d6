//! Error type shared across the gateway and its library crates.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Stream publish or consume failure that is not a raw Redis error,
    /// e.g. the bridge used before `start` or a publish timeout.
    #[error("broker: {0}")]
    Broker(String),

    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    /// Membership or project lookup against a collaborator service failed.
    #[error("upstream service: {0}")]
    Upstream(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Inbound bytes did not decode into the expected shape; `context`
    /// names the producer-visible detail, never the raw payload.
    #[error("malformed payload: {context}")]
    Deserialization { context: String },

    #[error("config: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        // Connectivity and timeout failures read differently in logs than
        // plain HTTP errors, so keep them distinguishable in the message.
        if err.is_timeout() {
            Self::Upstream(format!("request timed out: {err}"))
        } else if err.is_connect() {
            Self::Upstream(format!("connection failed: {err}"))
        } else {
            Self::Upstream(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
