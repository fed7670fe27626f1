//! Error types shared by the pipeline and its session driver.

use thiserror::Error;

/// Errors surfaced by a gesture session.
///
/// Arbitration failures never appear here: they are recovered locally by
/// the fallback decision (see `pipeline::arbitration`).
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration rejected at session start.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The session was stopped or failed and accepts no more frames.
    #[error("session stopped")]
    SessionStopped,
    /// The landmark source reported a fatal fault.
    #[error("landmark source failed: {0}")]
    LandmarkSource(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
