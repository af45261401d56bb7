use crate::wire;
use movelog_core::error::MovelogError;
use movelog_core::row::RowBatch;
use movelog_store::LogFile;
use tracing::{error, warn};

pub const BODY_STORED: &str = "Data received and stored successfully";
pub const BODY_NOT_FOUND: &str = "Not Found";

/// Longest slice of an offending body copied into the server log.
const LOGGED_BODY_LIMIT: usize = 512;

/// Outcome of a single request, ready to be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: &'static str,
    pub rows_written: usize,
}

impl Reply {
    fn new(status: u16, body: &'static str) -> Self {
        Self { status, body, rows_written: 0 }
    }

    pub fn from_error(err: &MovelogError) -> Self {
        Self::new(err.status_code(), err.response_body())
    }

    /// Reply whose body is just the reason phrase, e.g. `Bad Request`.
    pub fn status_only(status: u16) -> Self {
        Self::new(status, wire::status_text(status))
    }
}

/// Dispatch on method only; the path is ignored.
pub fn dispatch(method: &str, body: &[u8], log: &LogFile) -> Reply {
    match method {
        "OPTIONS" => Reply::new(200, ""),
        "POST" => ingest(body, log),
        // HEAD responses never carry a body.
        "HEAD" => Reply::new(404, ""),
        _ => Reply::new(404, BODY_NOT_FOUND),
    }
}

/// Parse, validate and append one batch. Nothing is written unless the
/// whole body is valid.
pub fn ingest(body: &[u8], log: &LogFile) -> Reply {
    let batch = match RowBatch::parse(body) {
        Ok(batch) => batch,
        Err(e) => {
            match &e {
                MovelogError::InvalidJson(detail) => warn!(
                    error = %detail,
                    body = %truncated_body(body),
                    "Rejected invalid JSON"
                ),
                other => warn!(error = %other, "Rejected malformed rows"),
            }
            return Reply::from_error(&e);
        }
    };

    match log.append(&batch) {
        Ok(rows_written) => Reply {
            status: 200,
            body: BODY_STORED,
            rows_written,
        },
        Err(io_err) => {
            error!(
                error = %io_err,
                path = %log.path().display(),
                rows = batch.len(),
                "Failed to append batch"
            );
            Reply::from_error(&MovelogError::Io(io_err))
        }
    }
}

fn truncated_body(body: &[u8]) -> String {
    let end = body.len().min(LOGGED_BODY_LIMIT);
    let mut text = String::from_utf8_lossy(&body[..end]).into_owned();
    if body.len() > LOGGED_BODY_LIMIT {
        text.push_str("...");
    }
    text
}
