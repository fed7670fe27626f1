//! Adaptive confidence threshold.
//!
//! Fast hand motion raises the working threshold to suppress motion-blur
//! false positives; a steady hand lowers it to improve sensitivity.  The
//! instantaneous target is blended into the previous value with exponential
//! smoothing and clamped to `[floor, ceiling]`.

use tracing::trace;

/// Configuration for the adaptive threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdConfig {
    /// Threshold with neither fast nor steady motion.
    pub base: f32,
    /// Lower bound for the working threshold.
    pub floor: f32,
    /// Upper bound for the working threshold.
    pub ceiling: f32,
    /// Added to `base` when motion exceeds `high_motion_cutoff`.
    pub raise_step: f32,
    /// Subtracted from `base` when motion is below `low_motion_cutoff`.
    pub lower_step: f32,
    /// Anchor displacement per frame above which the hand is "fast".
    pub high_motion_cutoff: f32,
    /// Anchor displacement per frame below which the hand is "steady".
    pub low_motion_cutoff: f32,
    /// Weight of the previous value in the blend (0.0-1.0).
    pub smoothing: f32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            base: 7.0,
            floor: 5.0,
            ceiling: 9.0,
            raise_step: 1.0,
            lower_step: 0.5,
            high_motion_cutoff: 0.05,
            low_motion_cutoff: 0.01,
            smoothing: 0.9,
        }
    }
}

/// Threshold state; `floor <= current <= ceiling` always holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdState {
    pub current: f32,
    pub floor: f32,
    pub ceiling: f32,
}

/// Per-session threshold controller.
#[derive(Debug, Clone)]
pub struct AdaptiveThreshold {
    config: ThresholdConfig,
    state: ThresholdState,
}

impl AdaptiveThreshold {
    /// Create a controller starting at the clamped base value.
    pub fn new(config: ThresholdConfig) -> Self {
        let state = ThresholdState {
            current: config.base.clamp(config.floor, config.ceiling),
            floor: config.floor,
            ceiling: config.ceiling,
        };
        Self { config, state }
    }

    /// Instantaneous target for a given motion magnitude.
    pub fn target(&self, magnitude: f32) -> f32 {
        if magnitude > self.config.high_motion_cutoff {
            self.config.base + self.config.raise_step
        } else if magnitude < self.config.low_motion_cutoff {
            self.config.base - self.config.lower_step
        } else {
            self.config.base
        }
    }

    /// Blend toward the target for this frame and return the new threshold.
    pub fn update(&mut self, magnitude: f32) -> f32 {
        let target = self.target(magnitude);
        let alpha = self.config.smoothing;
        let blended = alpha * self.state.current + (1.0 - alpha) * target;
        self.state.current = blended.clamp(self.state.floor, self.state.ceiling);
        trace!(
            "Threshold: magnitude={:.4} target={:.2} current={:.3}",
            magnitude,
            target,
            self.state.current,
        );
        self.state.current
    }

    pub fn current(&self) -> f32 {
        self.state.current
    }

    pub fn state(&self) -> ThresholdState {
        self.state
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}
