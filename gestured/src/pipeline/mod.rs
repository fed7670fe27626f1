//! The gesture decision pipeline.
//!
//! Stages, leaves first:
//! - `motion`: anchor velocity
//! - `threshold`: adaptive confidence threshold
//! - `history`: per-name score history and stability
//! - `resolver`: thresholding, ranking and tie-breaks
//! - `arbitration`: external adjudication of unresolved ties
//! - `debounce`: anti-chatter state machine
//! - `sequence`: combo detection
//!
//! `session` wires them together per capture session.

pub mod arbitration;
pub mod debounce;
pub mod events;
pub mod history;
pub mod landmarks;
pub mod motion;
pub mod resolver;
pub mod sequence;
pub mod session;
pub mod threshold;

pub use arbitration::{
    ArbitrationContext, ArbitrationError, ArbitrationRequest, ArbitrationResponse, Arbiter,
    CommandArbiter,
};
pub use events::{Decision, GestureEvent, PipelineEvent};
pub use landmarks::{CandidateScoreMap, HandLandmark, LandmarkFrame, Point2, ScoredFrame, Vector2};
pub use session::{GestureSession, LandmarkSource, SessionState, TemplateScorer};
