//! Pipeline configuration: defaults, presets, validation and plist loading.
//!
//! A config file is a single s-expression plist.  Missing keys keep their
//! defaults; unknown keys are logged and ignored.
//!
//! ```lisp
//! (:preset :background
//!  :dwell-ms 400
//!  :threshold-ceiling 8.5
//!  :swipes (("swipe_left" left) ("swipe_right" right))
//!  :patterns (("cancel" "thumbs_up" "thumbs_down")))
//! ```

use std::path::Path;

use anyhow::Context;
use lexpr::Value;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::pipeline::debounce::DebounceConfig;
use crate::pipeline::landmarks::HandLandmark;
use crate::pipeline::resolver::{ResolverConfig, SwipeBinding, SwipeDirection};
use crate::pipeline::sequence::{SequenceConfig, SequencePattern};
use crate::pipeline::threshold::ThresholdConfig;
use crate::sexp::{atom_string, get_value, is_nil, list_items, number, plist_keys, quote};

/// Every tunable of a gesture session.  Immutable once a session starts.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Landmark whose position drives motion tracking.
    pub anchor: HandLandmark,
    /// Hand absence (ms) after which the motion anchor is forgotten.
    pub anchor_reset_ms: u64,
    pub threshold: ThresholdConfig,
    /// Scores kept per gesture name.
    pub history_capacity: usize,
    /// Added to the standard deviation in the stability metric.
    pub stability_epsilon: f32,
    pub resolver: ResolverConfig,
    pub debounce: DebounceConfig,
    pub sequence: SequenceConfig,
    /// Wall-clock budget for one arbitration call.
    pub arbitration_timeout_ms: u64,
    /// Frames buffered while arbitration is pending; the oldest is dropped
    /// beyond this.
    pub arbitration_backlog: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            anchor: HandLandmark::Wrist,
            anchor_reset_ms: 500,
            threshold: ThresholdConfig::default(),
            history_capacity: 10,
            stability_epsilon: 0.01,
            resolver: ResolverConfig::default(),
            debounce: DebounceConfig::default(),
            sequence: SequenceConfig::default(),
            arbitration_timeout_ms: 800,
            arbitration_backlog: 4,
        }
    }
}

impl PipelineConfig {
    /// Interactive capture: full threshold range.
    pub fn foreground() -> Self {
        Self::default()
    }

    /// Background capture: a lower ceiling so fast motion cannot push the
    /// threshold out of reach of a partially visible hand.
    pub fn background() -> Self {
        let mut config = Self::default();
        config.threshold.ceiling = 8.0;
        config
    }

    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "foreground" | "default" => Some(Self::foreground()),
            "background" => Some(Self::background()),
            _ => None,
        }
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let t = &self.threshold;
        let finite = [
            t.base,
            t.floor,
            t.ceiling,
            t.raise_step,
            t.lower_step,
            t.high_motion_cutoff,
            t.low_motion_cutoff,
            t.smoothing,
            self.stability_epsilon,
            self.resolver.near_tie_ratio,
            self.resolver.stability_margin,
            self.resolver.swipe_min_speed,
        ];
        if finite.iter().any(|v| !v.is_finite()) {
            return Err(invalid("non-finite numeric value"));
        }
        if t.floor > t.ceiling {
            return Err(invalid(format!(
                "threshold floor {} exceeds ceiling {}",
                t.floor, t.ceiling
            )));
        }
        if t.base < t.floor || t.base > t.ceiling {
            return Err(invalid(format!(
                "threshold base {} outside [{}, {}]",
                t.base, t.floor, t.ceiling
            )));
        }
        if !(0.0..1.0).contains(&t.smoothing) {
            return Err(invalid(format!("smoothing {} outside [0, 1)", t.smoothing)));
        }
        if t.low_motion_cutoff > t.high_motion_cutoff {
            return Err(invalid("low motion cutoff exceeds high motion cutoff"));
        }
        if self.resolver.near_tie_ratio <= 0.0 || self.resolver.near_tie_ratio > 1.0 {
            return Err(invalid(format!(
                "near-tie ratio {} outside (0, 1]",
                self.resolver.near_tie_ratio
            )));
        }
        if self.resolver.stability_margin < 0.0 {
            return Err(invalid("stability margin is negative"));
        }
        if self.stability_epsilon <= 0.0 {
            return Err(invalid("stability epsilon must be positive"));
        }
        if self.history_capacity == 0 {
            return Err(invalid("history capacity is zero"));
        }
        if self.sequence.capacity == 0 {
            return Err(invalid("sequence capacity is zero"));
        }
        if self.arbitration_backlog == 0 {
            return Err(invalid("arbitration backlog is zero"));
        }
        if self.arbitration_timeout_ms == 0 {
            return Err(invalid("arbitration timeout is zero"));
        }
        for pattern in &self.sequence.patterns {
            if pattern.gestures.is_empty() || pattern.action.is_empty() {
                return Err(invalid("empty sequence pattern"));
            }
            if pattern.gestures.len() > self.sequence.capacity {
                return Err(invalid(format!(
                    "pattern {} longer than the sequence window",
                    pattern.action
                )));
            }
        }
        Ok(())
    }

    // ── Loading ────────────────────────────────────────────

    /// Read and validate a config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config =
            Self::from_str(&text).with_context(|| format!("loading config {}", path.display()))?;
        debug!("Loaded pipeline config from {}", path.display());
        Ok(config)
    }

    /// Parse a plist config string.
    pub fn from_str(text: &str) -> Result<Self> {
        let value = lexpr::from_str(text).map_err(|e| invalid(format!("parse error: {}", e)))?;
        Self::from_sexp(&value)
    }

    /// Build from a parsed plist, applying `:preset` first.
    pub fn from_sexp(value: &Value) -> Result<Self> {
        let mut config = match get_value(value, "preset").and_then(atom_string) {
            Some(name) => Self::preset(&name).ok_or_else(|| invalid(format!("unknown preset {}", name)))?,
            None => Self::default(),
        };

        for key in plist_keys(value) {
            let Some(v) = get_value(value, &key) else {
                continue;
            };
            config.apply(&key, v)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, key: &str, v: &Value) -> Result<()> {
        match key {
            "preset" => {}
            "anchor" => {
                let name = atom_string(v).unwrap_or_default();
                self.anchor = HandLandmark::from_str(&name)
                    .ok_or_else(|| invalid(format!("unknown landmark {}", name)))?;
            }
            "anchor-reset-ms" => self.anchor_reset_ms = uint(key, v)?,
            "dwell-ms" => self.debounce.dwell_ms = uint(key, v)?,
            "absence-timeout-ms" => self.debounce.absence_timeout_ms = uint(key, v)?,
            "threshold-base" => self.threshold.base = float(key, v)?,
            "threshold-floor" => self.threshold.floor = float(key, v)?,
            "threshold-ceiling" => self.threshold.ceiling = float(key, v)?,
            "raise-step" => self.threshold.raise_step = float(key, v)?,
            "lower-step" => self.threshold.lower_step = float(key, v)?,
            "high-motion-cutoff" => self.threshold.high_motion_cutoff = float(key, v)?,
            "low-motion-cutoff" => self.threshold.low_motion_cutoff = float(key, v)?,
            "smoothing" => self.threshold.smoothing = float(key, v)?,
            "history-capacity" => self.history_capacity = uint(key, v)? as usize,
            "stability-epsilon" => self.stability_epsilon = float(key, v)?,
            "near-tie-ratio" => self.resolver.near_tie_ratio = float(key, v)?,
            "stability-margin" => self.resolver.stability_margin = float(key, v)?,
            "swipe-min-speed" => self.resolver.swipe_min_speed = float(key, v)?,
            "swipes" => self.resolver.swipes = parse_swipes(v)?,
            "sequence-span-ms" => self.sequence.span_ms = uint(key, v)?,
            "sequence-capacity" => self.sequence.capacity = uint(key, v)? as usize,
            "patterns" => self.sequence.patterns = parse_patterns(v)?,
            "arbitration-timeout-ms" => self.arbitration_timeout_ms = uint(key, v)?,
            "arbitration-backlog" => self.arbitration_backlog = uint(key, v)? as usize,
            other => warn!("Config: ignoring unknown key :{}", other),
        }
        Ok(())
    }

    // ── Rendering ──────────────────────────────────────────

    /// The active configuration as a plist `from_sexp` accepts.
    pub fn config_sexp(&self) -> String {
        let t = &self.threshold;
        let r = &self.resolver;
        let swipes: Vec<String> = r
            .swipes
            .iter()
            .map(|b| format!("({} {})", quote(&b.gesture), b.direction.as_str()))
            .collect();
        let patterns: Vec<String> = self
            .sequence
            .patterns
            .iter()
            .map(|p| {
                let names: Vec<String> = p.gestures.iter().map(|g| quote(g)).collect();
                format!("({} {})", quote(&p.action), names.join(" "))
            })
            .collect();
        format!(
            "(:anchor :{} :anchor-reset-ms {} :dwell-ms {} :absence-timeout-ms {} \
             :threshold-base {:?} :threshold-floor {:?} :threshold-ceiling {:?} \
             :raise-step {:?} :lower-step {:?} :high-motion-cutoff {:?} :low-motion-cutoff {:?} \
             :smoothing {:?} :history-capacity {} :stability-epsilon {:?} \
             :near-tie-ratio {:?} :stability-margin {:?} :swipe-min-speed {:?} :swipes ({}) \
             :sequence-span-ms {} :sequence-capacity {} :patterns ({}) \
             :arbitration-timeout-ms {} :arbitration-backlog {})",
            self.anchor.as_str(),
            self.anchor_reset_ms,
            self.debounce.dwell_ms,
            self.debounce.absence_timeout_ms,
            t.base,
            t.floor,
            t.ceiling,
            t.raise_step,
            t.lower_step,
            t.high_motion_cutoff,
            t.low_motion_cutoff,
            t.smoothing,
            self.history_capacity,
            self.stability_epsilon,
            r.near_tie_ratio,
            r.stability_margin,
            r.swipe_min_speed,
            swipes.join(" "),
            self.sequence.span_ms,
            self.sequence.capacity,
            patterns.join(" "),
            self.arbitration_timeout_ms,
            self.arbitration_backlog,
        )
    }
}

fn invalid(msg: impl Into<String>) -> PipelineError {
    PipelineError::InvalidConfig(msg.into())
}

fn float(key: &str, v: &Value) -> Result<f32> {
    number(v)
        .map(|n| n as f32)
        .ok_or_else(|| invalid(format!(":{} expects a number", key)))
}

fn uint(key: &str, v: &Value) -> Result<u64> {
    v.as_u64()
        .ok_or_else(|| invalid(format!(":{} expects a non-negative integer", key)))
}

/// `(("swipe_left" left) ...)`
fn parse_swipes(v: &Value) -> Result<Vec<SwipeBinding>> {
    if is_nil(v) {
        return Ok(Vec::new());
    }
    list_items(v)
        .into_iter()
        .map(|entry| {
            let parts: Vec<String> = list_items(entry).into_iter().filter_map(atom_string).collect();
            match parts.as_slice() {
                [gesture, dir] => SwipeDirection::from_str(dir)
                    .map(|d| SwipeBinding::new(gesture, d))
                    .ok_or_else(|| invalid(format!("bad swipe direction {}", dir))),
                _ => Err(invalid("swipe entries are (\"name\" left|right)")),
            }
        })
        .collect()
}

/// `(("action" "first" "second" ...) ...)`
fn parse_patterns(v: &Value) -> Result<Vec<SequencePattern>> {
    if is_nil(v) {
        return Ok(Vec::new());
    }
    list_items(v)
        .into_iter()
        .map(|entry| {
            let parts: Vec<String> = list_items(entry).into_iter().filter_map(atom_string).collect();
            match parts.split_first() {
                Some((action, gestures)) if !gestures.is_empty() => Ok(SequencePattern {
                    gestures: gestures.to_vec(),
                    action: action.clone(),
                }),
                _ => Err(invalid("pattern entries are (\"action\" \"gesture\" ...)")),
            }
        })
        .collect()
}
