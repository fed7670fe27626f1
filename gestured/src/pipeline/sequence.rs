//! Multi-gesture combo detection over recently emitted events.

use std::collections::VecDeque;

use tracing::debug;

/// An ordered run of gesture names mapped to a combo action.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencePattern {
    pub gestures: Vec<String>,
    pub action: String,
}

impl SequencePattern {
    pub fn new(gestures: &[&str], action: &str) -> Self {
        Self {
            gestures: gestures.iter().map(|g| g.to_string()).collect(),
            action: action.to_string(),
        }
    }
}

/// Sequence window configuration and the pattern table.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceConfig {
    /// Entries older than this relative to the newest are stale.
    pub span_ms: u64,
    /// Maximum entries retained.
    pub capacity: usize,
    /// Read-only pattern table.
    pub patterns: Vec<SequencePattern>,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            span_ms: 3000,
            capacity: 5,
            patterns: vec![
                SequencePattern::new(&["thumbs_up", "thumbs_down"], "cancel"),
                SequencePattern::new(&["open_palm", "fist"], "grab"),
                SequencePattern::new(&["fist", "open_palm"], "release"),
                SequencePattern::new(&["swipe_left", "swipe_right"], "refresh"),
                SequencePattern::new(&["peace", "thumbs_up"], "screenshot"),
            ],
        }
    }
}

/// A matched combo.
#[derive(Debug, Clone, PartialEq)]
pub struct ComboMatch {
    pub action: String,
    pub gestures: Vec<String>,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone)]
struct WindowEntry {
    name: String,
    timestamp_ms: u64,
}

/// Per-session sequence detector.
#[derive(Debug, Clone)]
pub struct SequenceDetector {
    config: SequenceConfig,
    window: VecDeque<WindowEntry>,
}

impl SequenceDetector {
    /// Patterns are checked longest first so a three-step combo is not
    /// pre-empted by its two-step suffix.
    pub fn new(mut config: SequenceConfig) -> Self {
        config
            .patterns
            .sort_by(|a, b| b.gestures.len().cmp(&a.gestures.len()));
        let capacity = config.capacity;
        Self {
            config,
            window: VecDeque::with_capacity(capacity),
        }
    }

    /// Append an emitted gesture and report a combo if the window now ends
    /// with a known pattern.  A match consumes the window.
    pub fn push(&mut self, name: &str, timestamp_ms: u64) -> Option<ComboMatch> {
        let span = self.config.span_ms;
        self.window
            .retain(|e| timestamp_ms.saturating_sub(e.timestamp_ms) <= span);

        if self.window.len() >= self.config.capacity {
            self.window.pop_front();
        }
        self.window.push_back(WindowEntry {
            name: name.to_string(),
            timestamp_ms,
        });

        let pattern = self
            .config
            .patterns
            .iter()
            .find(|p| self.window_ends_with(&p.gestures))?;

        debug!("Combo matched: {} ({:?})", pattern.action, pattern.gestures);
        let combo = ComboMatch {
            action: pattern.action.clone(),
            gestures: pattern.gestures.clone(),
            timestamp_ms,
        };
        self.window.clear();
        Some(combo)
    }

    fn window_ends_with(&self, gestures: &[String]) -> bool {
        if gestures.is_empty() || gestures.len() > self.window.len() {
            return false;
        }
        let skip = self.window.len() - gestures.len();
        self.window
            .iter()
            .skip(skip)
            .zip(gestures)
            .all(|(entry, name)| &entry.name == name)
    }

    /// Names currently in the window, oldest first.
    pub fn window_names(&self) -> Vec<&str> {
        self.window.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> SequenceDetector {
        SequenceDetector::new(SequenceConfig::default())
    }

    #[test]
    fn test_pair_within_span_matches() {
        let mut d = detector();
        assert!(d.push("thumbs_up", 1000).is_none());
        let combo = d.push("thumbs_down", 1200).expect("combo expected");
        assert_eq!(combo.action, "cancel");
        assert_eq!(combo.gestures, vec!["thumbs_up", "thumbs_down"]);
        assert!(d.is_empty(), "match consumes the window");
    }

    #[test]
    fn test_pair_outside_span_does_not_match() {
        let mut d = detector();
        d.push("thumbs_up", 1000);
        assert!(d.push("thumbs_down", 5000).is_none());
        assert_eq!(d.window_names(), vec!["thumbs_down"]);
    }

    #[test]
    fn test_order_matters() {
        let mut d = detector();
        d.push("thumbs_down", 0);
        assert!(d.push("thumbs_up", 100).is_none());
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut d = SequenceDetector::new(SequenceConfig {
            patterns: Vec::new(),
            ..SequenceConfig::default()
        });
        for (i, name) in ["a", "b", "c", "d", "e", "f"].iter().enumerate() {
            d.push(name, i as u64 * 100);
        }
        assert_eq!(d.window_names(), vec!["b", "c", "d", "e", "f"]);
    }

    #[test]
    fn test_longer_pattern_preferred() {
        let mut d = SequenceDetector::new(SequenceConfig {
            patterns: vec![
                SequencePattern::new(&["b", "c"], "short"),
                SequencePattern::new(&["a", "b", "c"], "long"),
            ],
            ..SequenceConfig::default()
        });
        d.push("a", 0);
        d.push("b", 100);
        assert_eq!(d.push("c", 200).unwrap().action, "long");
    }

    #[test]
    fn test_stale_entries_discarded_on_new_gesture() {
        let mut d = detector();
        d.push("open_palm", 0);
        d.push("peace", 2500);
        // open_palm is now 3500ms old, peace 1000ms.
        assert!(d.push("fist", 3500).is_none());
        assert_eq!(d.window_names(), vec!["peace", "fist"]);
    }
}
