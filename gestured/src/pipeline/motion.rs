//! Hand motion tracking from the anchor landmark.
//!
//! Velocity is the per-frame displacement of the anchor in normalized image
//! coordinates.  The previous anchor is forgotten once the hand has been out
//! of view for longer than `reset_after_ms`, so tracking that resumes does not
//! report one huge jump.

use tracing::trace;

use super::landmarks::{HandLandmark, LandmarkFrame, Point2, Vector2};

/// Motion state for one session.
#[derive(Debug, Clone, Default)]
pub struct MotionState {
    /// Anchor position from the last frame with a hand.
    pub previous_anchor: Option<Point2>,
    /// Displacement since the previous anchor.
    pub velocity: Vector2,
    /// Euclidean norm of `velocity`.
    pub magnitude: f32,
}

/// Per-session motion tracker.
#[derive(Debug, Clone)]
pub struct MotionTracker {
    anchor: HandLandmark,
    reset_after_ms: u64,
    state: MotionState,
    /// Timestamp of the last frame with a hand.
    last_seen_ms: Option<u64>,
}

impl MotionTracker {
    pub fn new(anchor: HandLandmark, reset_after_ms: u64) -> Self {
        Self {
            anchor,
            reset_after_ms,
            state: MotionState::default(),
            last_seen_ms: None,
        }
    }

    /// Update with the current frame (or `None` when no hand is detected).
    pub fn update(&mut self, frame: Option<&LandmarkFrame>, timestamp_ms: u64) -> &MotionState {
        let Some(frame) = frame else {
            self.state.velocity = Vector2::ZERO;
            self.state.magnitude = 0.0;
            if let Some(seen) = self.last_seen_ms {
                if timestamp_ms.saturating_sub(seen) > self.reset_after_ms
                    && self.state.previous_anchor.take().is_some()
                {
                    trace!("Motion anchor cleared after {}ms without a hand", timestamp_ms - seen);
                }
            }
            return &self.state;
        };

        // A long gap between hand frames is absence even without empty frames.
        if let Some(seen) = self.last_seen_ms {
            if timestamp_ms.saturating_sub(seen) > self.reset_after_ms
                && self.state.previous_anchor.take().is_some()
            {
                trace!("Motion anchor cleared after a {}ms gap", timestamp_ms - seen);
            }
        }

        let anchor = frame.project(self.anchor);
        let velocity = match self.state.previous_anchor {
            Some(prev) => Vector2::between(prev, anchor),
            None => Vector2::ZERO,
        };

        self.state.previous_anchor = Some(anchor);
        self.state.velocity = velocity;
        self.state.magnitude = velocity.magnitude();
        self.last_seen_ms = Some(timestamp_ms);
        &self.state
    }

    pub fn state(&self) -> &MotionState {
        &self.state
    }

    /// Current anchor position, if a hand has been seen.
    pub fn position(&self) -> Point2 {
        self.state.previous_anchor.unwrap_or_default()
    }

    pub fn reset(&mut self) {
        self.state = MotionState::default();
        self.last_seen_ms = None;
    }
}
