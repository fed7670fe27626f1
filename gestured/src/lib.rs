//! gestured: turns noisy per-frame gesture scores into debounced gesture
//! events.
//!
//! The pipeline lives in [`pipeline`]; [`ipc`] exposes sessions over a
//! Unix socket.

pub mod config;
pub mod error;
pub mod ipc;
pub mod pipeline;
pub mod sexp;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::GestureSession;
