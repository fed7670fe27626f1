//! Event debouncer: the anti-chatter state machine.
//!
//! A changed winner is emitted only once the dwell interval has elapsed
//! since the previous emission; the same winner is never re-emitted while
//! held.  Sustained hand absence returns to `Idle` and forgets the held name
//! so the next sighting of the same gesture is fresh.

use tracing::debug;

/// Debouncer timing configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DebounceConfig {
    /// Minimum time (ms) between emissions of different names.
    pub dwell_ms: u64,
    /// Hand absence (ms) after which the held name is forgotten.
    pub absence_timeout_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            dwell_ms: 350,
            absence_timeout_ms: 500,
        }
    }
}

/// Debouncer state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebouncePhase {
    /// No recent gesture.
    Idle,
    /// A gesture is the current steady-state output.
    Holding(String),
}

/// What the debouncer decided for one resolved winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceDecision {
    /// New event; caller emits it.
    Emit,
    /// Already holding this name.
    Holding,
    /// Changed name inside the dwell interval.
    Suppressed,
}

/// Per-session debouncer.
#[derive(Debug, Clone)]
pub struct Debouncer {
    config: DebounceConfig,
    phase: DebouncePhase,
    last_emitted_name: Option<String>,
    last_emitted_at_ms: Option<u64>,
    /// Timestamp of the last frame with a hand.
    last_present_ms: Option<u64>,
    suppressed: u64,
}

impl Debouncer {
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            config,
            phase: DebouncePhase::Idle,
            last_emitted_name: None,
            last_emitted_at_ms: None,
            last_present_ms: None,
            suppressed: 0,
        }
    }

    /// Record hand presence for a frame.  Returns true when sustained
    /// absence just reset the state machine to `Idle`.
    ///
    /// Absence counts from the last frame with a hand, so a gap with no
    /// frames at all resets the same way a run of empty frames does.
    pub fn observe_presence(&mut self, present: bool, now_ms: u64) -> bool {
        let absent_for = self.last_present_ms.map(|seen| now_ms.saturating_sub(seen));
        if present {
            self.last_present_ms = Some(now_ms);
        }
        match absent_for {
            Some(gap) if gap > self.config.absence_timeout_ms && self.last_emitted_name.is_some() => {
                debug!("Debounce: hand absent {}ms, returning to idle", gap);
                self.last_emitted_name = None;
                self.phase = DebouncePhase::Idle;
                true
            }
            _ => false,
        }
    }

    /// Feed a resolved winner observed at `now_ms`.
    pub fn offer(&mut self, name: &str, now_ms: u64) -> DebounceDecision {
        if self.last_emitted_name.as_deref() == Some(name) {
            return DebounceDecision::Holding;
        }

        let dwell_elapsed = match self.last_emitted_at_ms {
            Some(at) => now_ms.saturating_sub(at) >= self.config.dwell_ms,
            None => true,
        };
        if !dwell_elapsed {
            self.suppressed += 1;
            debug!(
                "Debounce: suppressed {} ({}ms since last emission)",
                name,
                now_ms.saturating_sub(self.last_emitted_at_ms.unwrap_or(now_ms)),
            );
            return DebounceDecision::Suppressed;
        }

        self.last_emitted_name = Some(name.to_string());
        self.last_emitted_at_ms = Some(now_ms);
        self.phase = DebouncePhase::Holding(name.to_string());
        DebounceDecision::Emit
    }

    pub fn phase(&self) -> &DebouncePhase {
        &self.phase
    }

    pub fn last_emitted_name(&self) -> Option<&str> {
        self.last_emitted_name.as_deref()
    }

    pub fn last_emitted_at_ms(&self) -> Option<u64> {
        self.last_emitted_at_ms
    }

    /// Number of changed winners rejected inside the dwell interval.
    pub fn suppressed_count(&self) -> u64 {
        self.suppressed
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debouncer() -> Debouncer {
        Debouncer::new(DebounceConfig::default())
    }

    #[test]
    fn test_first_gesture_emits() {
        let mut d = debouncer();
        assert_eq!(d.offer("fist", 0), DebounceDecision::Emit);
        assert_eq!(d.phase(), &DebouncePhase::Holding("fist".to_string()));
        assert_eq!(d.last_emitted_at_ms(), Some(0));
    }

    #[test]
    fn test_sustained_gesture_emits_once() {
        let mut d = debouncer();
        let emitted = (0..30)
            .filter(|i| d.offer("fist", i * 33) == DebounceDecision::Emit)
            .count();
        assert_eq!(emitted, 1);
    }

    #[test]
    fn test_change_inside_dwell_suppressed() {
        let mut d = debouncer();
        d.offer("fist", 1000);
        assert_eq!(d.offer("peace", 1100), DebounceDecision::Suppressed);
        assert_eq!(d.offer("fist", 1200), DebounceDecision::Holding);
        assert_eq!(d.offer("peace", 1349), DebounceDecision::Suppressed);
        assert_eq!(d.offer("peace", 1350), DebounceDecision::Emit);
        assert_eq!(d.suppressed_count(), 2);
    }

    #[test]
    fn test_oscillation_respects_dwell() {
        let mut d = debouncer();
        let mut emissions: Vec<(String, u64)> = Vec::new();
        for i in 0..100u64 {
            let name = if i % 2 == 0 { "fist" } else { "peace" };
            let t = i * 40;
            if d.offer(name, t) == DebounceDecision::Emit {
                emissions.push((name.to_string(), t));
            }
        }
        for pair in emissions.windows(2) {
            assert_ne!(pair[0].0, pair[1].0);
            assert!(pair[1].1 - pair[0].1 >= 350, "emissions too close: {:?}", pair);
        }
    }

    #[test]
    fn test_absence_resets_held_name() {
        let mut d = debouncer();
        d.observe_presence(true, 0);
        d.offer("fist", 0);
        assert!(!d.observe_presence(false, 300));
        assert!(d.observe_presence(false, 501));
        assert_eq!(d.phase(), &DebouncePhase::Idle);
        assert_eq!(d.last_emitted_name(), None);

        d.observe_presence(true, 600);
        assert_eq!(d.offer("fist", 600), DebounceDecision::Emit);
    }

    #[test]
    fn test_frame_gap_counts_as_absence() {
        let mut d = debouncer();
        d.observe_presence(true, 0);
        d.offer("fist", 0);
        assert!(d.observe_presence(true, 700));
        assert_eq!(d.phase(), &DebouncePhase::Idle);
        assert_eq!(d.offer("fist", 700), DebounceDecision::Emit);
        assert!(!d.observe_presence(true, 733));
    }

    #[test]
    fn test_short_absence_keeps_holding() {
        let mut d = debouncer();
        d.observe_presence(true, 0);
        d.offer("fist", 0);
        d.observe_presence(false, 400);
        d.observe_presence(true, 450);
        assert_eq!(d.offer("fist", 450), DebounceDecision::Holding);
    }

    #[test]
    fn test_reset() {
        let mut d = debouncer();
        d.offer("fist", 0);
        d.reset();
        assert_eq!(d.phase(), &DebouncePhase::Idle);
        assert_eq!(d.last_emitted_at_ms(), None);
    }
}
