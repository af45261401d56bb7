pub mod access_log;
pub mod logging;

pub use access_log::AccessLogEntry;
pub use logging::init_tracing;
