use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Tracing target for access-log events, so they can be filtered separately
/// (`RUST_LOG=movelog::access=off`).
pub const ACCESS_TARGET: &str = "movelog::access";

/// Structured access log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub timestamp: String,
    pub client_ip: String,
    pub method: String,
    pub uri: String,
    pub response_status: u16,
    pub rows_written: usize,
    pub latency_ms: f64,
}

impl AccessLogEntry {
    pub fn new(
        client_ip: &str,
        method: &str,
        uri: &str,
        response_status: u16,
        rows_written: usize,
        latency_ms: f64,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            client_ip: client_ip.to_string(),
            method: method.to_string(),
            uri: uri.to_string(),
            response_status,
            rows_written,
            latency_ms,
        }
    }

    /// Emit the entry as a tracing event under [`ACCESS_TARGET`].
    pub fn emit(&self) {
        tracing::info!(
            target: ACCESS_TARGET,
            timestamp = %self.timestamp,
            client_ip = %self.client_ip,
            method = %self.method,
            uri = %self.uri,
            status = self.response_status,
            rows = self.rows_written,
            latency_ms = self.latency_ms,
            "{} {} {} {:.2}ms",
            self.method,
            self.uri,
            self.response_status,
            self.latency_ms,
        );
    }
}
