pub mod config;
pub mod error;
pub mod row;

pub use config::MovelogConfig;
pub use error::MovelogError;
pub use row::{LogRow, RowBatch};
