pub mod connection;
pub mod handler;
pub mod server;
pub mod wire;

pub use server::{IngestServer, ServerHandle, ShutdownHandle};
