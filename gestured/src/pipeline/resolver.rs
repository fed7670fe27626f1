//! Candidate resolution: thresholding, ranking, and tie-breaking.
//!
//! Survivors of the adaptive threshold are ranked by raw score.  When the
//! top two are within the near-tie band the steadier signal wins, then a
//! swipe whose direction agrees with the hand's horizontal velocity.  A tie
//! neither rule settles is reported as `Ambiguous` for arbitration.

use std::cmp::Ordering;

use tracing::debug;

use super::history::ConfidenceHistory;
use super::landmarks::CandidateScoreMap;
use super::motion::MotionState;

/// Maximum number of ranked candidates considered.
const TOP_K: usize = 3;

// ── Swipe bindings ─────────────────────────────────────────

/// Horizontal direction of a lateral swipe gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwipeDirection {
    Left,
    Right,
}

impl SwipeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }
}

/// Marks a gesture name as a swipe in a direction.
#[derive(Debug, Clone, PartialEq)]
pub struct SwipeBinding {
    pub gesture: String,
    pub direction: SwipeDirection,
}

impl SwipeBinding {
    pub fn new(gesture: &str, direction: SwipeDirection) -> Self {
        Self {
            gesture: gesture.to_string(),
            direction,
        }
    }
}

// ── Config ─────────────────────────────────────────────────

/// Tie-break configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
    /// Second score at or above `ratio * first` counts as a near tie.
    pub near_tie_ratio: f32,
    /// Relative stability lead required to break a tie (0.5 = 1.5x).
    pub stability_margin: f32,
    /// Minimum horizontal anchor displacement per frame confirming a swipe.
    pub swipe_min_speed: f32,
    /// Gestures subject to directional confirmation.
    pub swipes: Vec<SwipeBinding>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            near_tie_ratio: 0.9,
            stability_margin: 0.5,
            swipe_min_speed: 0.02,
            swipes: vec![
                SwipeBinding::new("swipe_left", SwipeDirection::Left),
                SwipeBinding::new("swipe_right", SwipeDirection::Right),
            ],
        }
    }
}

// ── Results ────────────────────────────────────────────────

/// A named gesture with its raw score for this frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub name: String,
    pub score: f32,
}

impl Candidate {
    pub fn new(name: &str, score: f32) -> Self {
        Self {
            name: name.to_string(),
            score,
        }
    }
}

/// What settled a near tie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    /// No near tie.
    None,
    /// One candidate's history was clearly steadier.
    Stability,
    /// One candidate was a swipe confirmed by hand velocity.
    Motion,
}

/// Outcome of resolving one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// No candidate exceeded the threshold.
    NoGesture,
    /// A single winner.
    Resolved {
        winner: Candidate,
        motion_confirmed: bool,
        tie_break: TieBreak,
    },
    /// Near-tied candidates the local rules could not separate, highest
    /// raw score first.
    Ambiguous { tied: Vec<Candidate> },
}

// ── Resolver ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CandidateResolver {
    config: ResolverConfig,
}

impl CandidateResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// Select the winning gesture for a frame.
    ///
    /// `history` must already contain this frame's scores.
    pub fn resolve(
        &self,
        candidates: &CandidateScoreMap,
        threshold: f32,
        motion: &MotionState,
        history: &ConfidenceHistory,
    ) -> Resolution {
        let mut ranked: Vec<Candidate> = candidates
            .iter()
            .filter(|(_, score)| *score > threshold)
            .map(|(name, score)| Candidate::new(name, score))
            .collect();

        if ranked.is_empty() {
            return Resolution::NoGesture;
        }

        ranked.sort_by(rank_order);
        ranked.truncate(TOP_K);

        let top_score = ranked[0].score;
        let near_tie = ranked
            .get(1)
            .is_some_and(|second| second.score >= self.config.near_tie_ratio * top_score);

        if !near_tie {
            return self.resolved(ranked.swap_remove(0), motion, TieBreak::None);
        }

        let first = history.stability(&ranked[0].name);
        let second = history.stability(&ranked[1].name);
        let margin = 1.0 + self.config.stability_margin;

        if second > first * margin {
            debug!(
                "Tie-break: {} ({:.2}) steadier than {} ({:.2})",
                ranked[1].name, second, ranked[0].name, first,
            );
            return self.resolved(ranked.swap_remove(1), motion, TieBreak::Stability);
        }
        if first > second * margin {
            return self.resolved(ranked.swap_remove(0), motion, TieBreak::Stability);
        }

        let first_confirmed = self.swipe_confirmed(&ranked[0].name, motion);
        let second_confirmed = self.swipe_confirmed(&ranked[1].name, motion);
        match (first_confirmed, second_confirmed) {
            (true, false) => self.resolved(ranked.swap_remove(0), motion, TieBreak::Motion),
            (false, true) => {
                debug!("Tie-break: swipe {} confirmed by motion", ranked[1].name);
                self.resolved(ranked.swap_remove(1), motion, TieBreak::Motion)
            }
            _ => {
                let band = self.config.near_tie_ratio * top_score;
                let tied: Vec<Candidate> = ranked.into_iter().filter(|c| c.score >= band).collect();
                debug!("Ambiguous frame: {} tied candidates", tied.len());
                Resolution::Ambiguous { tied }
            }
        }
    }

    fn resolved(&self, winner: Candidate, motion: &MotionState, tie_break: TieBreak) -> Resolution {
        let motion_confirmed = self.swipe_confirmed(&winner.name, motion);
        Resolution::Resolved {
            winner,
            motion_confirmed,
            tie_break,
        }
    }

    /// Direction of a gesture if it is a configured swipe.
    pub fn swipe_direction(&self, name: &str) -> Option<SwipeDirection> {
        self.config
            .swipes
            .iter()
            .find(|b| b.gesture == name)
            .map(|b| b.direction)
    }

    /// Whether `name` is a swipe moving the way it claims.
    ///
    /// Non-swipes and unconfirmed swipes both return false; neither is
    /// ever disqualified by this check.
    pub fn swipe_confirmed(&self, name: &str, motion: &MotionState) -> bool {
        let min = self.config.swipe_min_speed;
        match self.swipe_direction(name) {
            Some(SwipeDirection::Left) => motion.velocity.x <= -min,
            Some(SwipeDirection::Right) => motion.velocity.x >= min,
            None => false,
        }
    }
}

/// Score descending, then name ascending for determinism.
fn rank_order(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.name.cmp(&b.name))
}

/// Highest raw score of a tie, name ascending on equal scores.
pub fn highest_score(tied: &[Candidate]) -> Option<&Candidate> {
    tied.iter().min_by(|a, b| rank_order(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::landmarks::Vector2;

    fn scores(pairs: &[(&str, f32)]) -> CandidateScoreMap {
        pairs.iter().map(|(n, s)| (*n, *s)).collect()
    }

    fn still() -> MotionState {
        MotionState::default()
    }

    fn moving(vx: f32) -> MotionState {
        let velocity = Vector2 { x: vx, y: 0.0 };
        MotionState {
            previous_anchor: None,
            velocity,
            magnitude: velocity.magnitude(),
        }
    }

    fn history_with(samples: &[(&str, &[f32])]) -> ConfidenceHistory {
        let mut h = ConfidenceHistory::new(10, 0.01);
        for (name, values) in samples {
            for v in values.iter() {
                h.record(name, *v);
            }
        }
        h
    }

    fn winner_name(r: &Resolution) -> Option<&str> {
        match r {
            Resolution::Resolved { winner, .. } => Some(winner.name.as_str()),
            _ => None,
        }
    }

    #[test]
    fn test_nothing_above_threshold() {
        let resolver = CandidateResolver::new(ResolverConfig::default());
        let map = scores(&[("fist", 5.0), ("peace", 6.9)]);
        let r = resolver.resolve(&map, 7.0, &still(), &history_with(&[]));
        assert_eq!(r, Resolution::NoGesture);
    }

    #[test]
    fn test_score_equal_to_threshold_is_rejected() {
        let resolver = CandidateResolver::new(ResolverConfig::default());
        let map = scores(&[("fist", 7.0)]);
        let h = history_with(&[("fist", &[7.0])]);
        assert_eq!(resolver.resolve(&map, 7.0, &still(), &h), Resolution::NoGesture);
        assert_eq!(winner_name(&resolver.resolve(&map, 6.99, &still(), &h)), Some("fist"));
    }

    #[test]
    fn test_empty_map_is_no_gesture() {
        let resolver = CandidateResolver::new(ResolverConfig::default());
        let r = resolver.resolve(&CandidateScoreMap::new(), 0.0, &still(), &history_with(&[]));
        assert_eq!(r, Resolution::NoGesture);
    }

    #[test]
    fn test_clear_winner() {
        let resolver = CandidateResolver::new(ResolverConfig::default());
        let map = scores(&[("fist", 9.0), ("peace", 7.0)]);
        let h = history_with(&[("fist", &[9.0]), ("peace", &[7.0])]);
        let r = resolver.resolve(&map, 6.0, &still(), &h);
        assert_eq!(winner_name(&r), Some("fist"));
        assert!(matches!(r, Resolution::Resolved { tie_break: TieBreak::None, .. }));
    }

    #[test]
    fn test_steadier_second_wins_near_tie() {
        let resolver = CandidateResolver::new(ResolverConfig::default());
        let map = scores(&[("thumbs_up", 8.0), ("ok", 7.6)]);
        let h = history_with(&[
            ("thumbs_up", &[6.0, 8.0, 5.5, 8.5, 6.0, 8.0, 5.0, 9.0, 6.5, 8.0]),
            ("ok", &[7.6; 10]),
        ]);
        let r = resolver.resolve(&map, 7.0, &still(), &h);
        assert_eq!(winner_name(&r), Some("ok"), "got {:?}", r);
        assert!(matches!(r, Resolution::Resolved { tie_break: TieBreak::Stability, .. }));
    }

    #[test]
    fn test_steadier_first_keeps_lead() {
        let resolver = CandidateResolver::new(ResolverConfig::default());
        let map = scores(&[("thumbs_up", 8.0), ("ok", 7.6)]);
        let h = history_with(&[
            ("thumbs_up", &[8.0; 10]),
            ("ok", &[6.0, 8.0, 5.5, 8.5, 6.0, 8.0, 5.0, 9.0, 6.5, 7.6]),
        ]);
        let r = resolver.resolve(&map, 7.0, &still(), &h);
        assert_eq!(winner_name(&r), Some("thumbs_up"));
    }

    #[test]
    fn test_equally_stable_tie_is_ambiguous() {
        let resolver = CandidateResolver::new(ResolverConfig::default());
        let map = scores(&[("A", 8.0), ("B", 7.9), ("C", 3.0)]);
        let h = history_with(&[("A", &[8.0]), ("B", &[7.9]), ("C", &[3.0])]);
        let r = resolver.resolve(&map, 2.0, &still(), &h);
        match r {
            Resolution::Ambiguous { tied } => {
                let names: Vec<&str> = tied.iter().map(|c| c.name.as_str()).collect();
                assert_eq!(names, vec!["A", "B"]);
            }
            other => panic!("expected ambiguous, got {:?}", other),
        }
    }

    #[test]
    fn test_confirmed_swipe_breaks_tie() {
        let resolver = CandidateResolver::new(ResolverConfig::default());
        let map = scores(&[("open_palm", 8.0), ("swipe_left", 7.8)]);
        let h = history_with(&[("open_palm", &[8.0]), ("swipe_left", &[7.8])]);
        let r = resolver.resolve(&map, 7.0, &moving(-0.05), &h);
        assert_eq!(winner_name(&r), Some("swipe_left"));
        assert!(matches!(
            r,
            Resolution::Resolved { tie_break: TieBreak::Motion, motion_confirmed: true, .. }
        ));
    }

    #[test]
    fn test_contradicting_motion_does_not_disqualify_swipe() {
        let resolver = CandidateResolver::new(ResolverConfig::default());
        let map = scores(&[("swipe_right", 9.0)]);
        let h = history_with(&[("swipe_right", &[9.0])]);
        let r = resolver.resolve(&map, 7.0, &moving(-0.1), &h);
        assert_eq!(winner_name(&r), Some("swipe_right"));
        assert!(matches!(r, Resolution::Resolved { motion_confirmed: false, .. }));

        let r = resolver.resolve(&map, 7.0, &still(), &h);
        assert_eq!(winner_name(&r), Some("swipe_right"));
    }

    #[test]
    fn test_top_three_only() {
        let resolver = CandidateResolver::new(ResolverConfig::default());
        let map = scores(&[("a", 8.0), ("b", 7.95), ("c", 7.9), ("d", 7.85)]);
        let h = history_with(&[("a", &[8.0]), ("b", &[7.95]), ("c", &[7.9]), ("d", &[7.85])]);
        match resolver.resolve(&map, 7.0, &still(), &h) {
            Resolution::Ambiguous { tied } => assert_eq!(tied.len(), 3),
            other => panic!("expected ambiguous, got {:?}", other),
        }
    }

    #[test]
    fn test_highest_score_fallback_order() {
        let tied = vec![Candidate::new("B", 7.9), Candidate::new("A", 8.0)];
        assert_eq!(highest_score(&tied).unwrap().name, "A");
        let even = vec![Candidate::new("z", 8.0), Candidate::new("m", 8.0)];
        assert_eq!(highest_score(&even).unwrap().name, "m");
        assert!(highest_score(&[]).is_none());
    }

    #[test]
    fn test_swipe_direction_as_str() {
        assert_eq!(SwipeDirection::Left.as_str(), "left");
        assert_eq!(SwipeDirection::from_str("right"), Some(SwipeDirection::Right));
        assert_eq!(SwipeDirection::from_str("up"), None);
    }
}
