use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("message encode error: {0}")]
    Encode(#[source] rmp_serde::encode::Error),
    #[error("message decode error: {0}")]
    Decode(#[source] rmp_serde::decode::Error),
    #[error("http transport error: {0}")]
    Http(#[source] reqwest::Error),
    #[error("drive identity mismatch: expected {expected}, found {found}")]
    DriveMismatch { expected: String, found: String },
    #[error("auth token invalid: {0}")]
    Auth(String),
    #[error("handler not found: method={method}")]
    HandlerNotFound { method: String },
    #[error("framing error: {0}")]
    Framing(String),
    #[error("request timed out")]
    Timeout,
    #[error("remote returned error: {0}")]
    Remote(String),
    #[error("connection closed")]
    ConnectionClosed,
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Http(err)
    }
}
