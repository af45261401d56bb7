use thiserror::Error;

/// Unified error type for movelog request handling.
#[derive(Error, Debug)]
pub enum MovelogError {
    #[error("Content-Length header missing")]
    MissingContentLength,

    #[error("Content-Length header invalid: {0}")]
    InvalidContentLength(String),

    #[error("body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("invalid row {row}: {reason}")]
    InvalidRow { row: usize, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MovelogError {
    /// Map to HTTP status code.
    pub fn status_code(&self) -> u16 {
        match self {
            MovelogError::MissingContentLength => 411,
            MovelogError::InvalidContentLength(_) => 400,
            MovelogError::PayloadTooLarge { .. } => 413,
            MovelogError::InvalidJson(_) => 400,
            MovelogError::InvalidRow { .. } => 400,
            MovelogError::Io(_) => 500,
        }
    }

    /// Plain-text body sent to the client. Details stay in the server log.
    pub fn response_body(&self) -> &'static str {
        match self {
            MovelogError::MissingContentLength => "Missing Content-Length",
            MovelogError::InvalidContentLength(_) => "Invalid Content-Length",
            MovelogError::PayloadTooLarge { .. } => "Payload too large",
            MovelogError::InvalidJson(_) => "Invalid JSON data",
            MovelogError::InvalidRow { .. } => "Invalid row data",
            MovelogError::Io(_) => "Failed to store data",
        }
    }
}
