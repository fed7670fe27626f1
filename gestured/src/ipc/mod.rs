//! IPC: Unix socket server speaking length-prefixed s-expressions.

pub mod dispatch;
pub mod server;

pub use server::IpcServer;
