//! Hand landmark data structures.
//!
//! Models the 21 keypoints produced by the external pose estimator and the
//! per-frame candidate score map produced by the external template scorer.
//! The pipeline never computes either; it only consumes them.

use std::collections::BTreeMap;

use tracing::debug;

// ── Landmark definitions ───────────────────────────────────

/// The 21 hand keypoints, in estimator order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandLandmark {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexMcp,
    IndexPip,
    IndexDip,
    IndexTip,
    MiddleMcp,
    MiddlePip,
    MiddleDip,
    MiddleTip,
    RingMcp,
    RingPip,
    RingDip,
    RingTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

/// Total number of landmarks per hand.
pub const LANDMARK_COUNT: usize = 21;

/// All landmarks in index order.
const ALL_LANDMARKS: [HandLandmark; LANDMARK_COUNT] = [
    HandLandmark::Wrist,
    HandLandmark::ThumbCmc,
    HandLandmark::ThumbMcp,
    HandLandmark::ThumbIp,
    HandLandmark::ThumbTip,
    HandLandmark::IndexMcp,
    HandLandmark::IndexPip,
    HandLandmark::IndexDip,
    HandLandmark::IndexTip,
    HandLandmark::MiddleMcp,
    HandLandmark::MiddlePip,
    HandLandmark::MiddleDip,
    HandLandmark::MiddleTip,
    HandLandmark::RingMcp,
    HandLandmark::RingPip,
    HandLandmark::RingDip,
    HandLandmark::RingTip,
    HandLandmark::PinkyMcp,
    HandLandmark::PinkyPip,
    HandLandmark::PinkyDip,
    HandLandmark::PinkyTip,
];

impl HandLandmark {
    /// Convert landmark enum to array index (0-20).
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// String representation for IPC and config files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wrist => "wrist",
            Self::ThumbCmc => "thumb-cmc",
            Self::ThumbMcp => "thumb-mcp",
            Self::ThumbIp => "thumb-ip",
            Self::ThumbTip => "thumb-tip",
            Self::IndexMcp => "index-mcp",
            Self::IndexPip => "index-pip",
            Self::IndexDip => "index-dip",
            Self::IndexTip => "index-tip",
            Self::MiddleMcp => "middle-mcp",
            Self::MiddlePip => "middle-pip",
            Self::MiddleDip => "middle-dip",
            Self::MiddleTip => "middle-tip",
            Self::RingMcp => "ring-mcp",
            Self::RingPip => "ring-pip",
            Self::RingDip => "ring-dip",
            Self::RingTip => "ring-tip",
            Self::PinkyMcp => "pinky-mcp",
            Self::PinkyPip => "pinky-pip",
            Self::PinkyDip => "pinky-dip",
            Self::PinkyTip => "pinky-tip",
        }
    }

    /// Parse a landmark from its string representation.
    pub fn from_str(s: &str) -> Option<Self> {
        ALL_LANDMARKS.iter().copied().find(|l| l.as_str() == s)
    }
}

// ── Geometry ───────────────────────────────────────────────

/// Point in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Per-frame displacement in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub fn between(from: Point2, to: Point2) -> Self {
        Self {
            x: to.x - from.x,
            y: to.y - from.y,
        }
    }

    /// Euclidean norm.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }
}

// ── Frames ─────────────────────────────────────────────────

/// One hand pose for one video frame.
#[derive(Debug, Clone)]
pub struct LandmarkFrame {
    /// Keypoints (x, y, z) indexed by `HandLandmark`.
    points: Vec<[f32; 3]>,
    /// Frame timestamp in milliseconds.
    pub timestamp_ms: u64,
}

impl LandmarkFrame {
    /// Build a frame, rejecting point sets of the wrong size.
    pub fn new(points: Vec<[f32; 3]>, timestamp_ms: u64) -> Option<Self> {
        if points.len() != LANDMARK_COUNT {
            debug!(
                "Landmark frame: expected {} points, got {}",
                LANDMARK_COUNT,
                points.len(),
            );
            return None;
        }
        Some(Self {
            points,
            timestamp_ms,
        })
    }

    /// 3D position of a landmark.
    pub fn point(&self, landmark: HandLandmark) -> [f32; 3] {
        self.points[landmark.index()]
    }

    /// Landmark projected onto the image plane.
    pub fn project(&self, landmark: HandLandmark) -> Point2 {
        let p = self.point(landmark);
        Point2::new(p[0], p[1])
    }

    pub fn points(&self) -> &[[f32; 3]] {
        &self.points
    }
}

/// Gesture name → raw confidence for one frame.
///
/// Backed by a `BTreeMap` so iteration order is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateScoreMap {
    scores: BTreeMap<String, f32>,
}

impl CandidateScoreMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a score. Non-finite scores are dropped.
    pub fn insert(&mut self, name: impl Into<String>, score: f32) {
        if score.is_finite() {
            self.scores.insert(name.into(), score);
        }
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.scores.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.scores.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<S: Into<String>> FromIterator<(S, f32)> for CandidateScoreMap {
    fn from_iter<I: IntoIterator<Item = (S, f32)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (name, score) in iter {
            map.insert(name, score);
        }
        map
    }
}

/// A frame as delivered to the pipeline: optional hand pose plus scores.
#[derive(Debug, Clone)]
pub struct ScoredFrame {
    pub timestamp_ms: u64,
    pub landmarks: Option<LandmarkFrame>,
    pub candidates: CandidateScoreMap,
}

impl ScoredFrame {
    pub fn new(
        timestamp_ms: u64,
        landmarks: Option<LandmarkFrame>,
        candidates: CandidateScoreMap,
    ) -> Self {
        Self {
            timestamp_ms,
            landmarks,
            candidates,
        }
    }

    /// A frame with no hand in view.
    pub fn empty(timestamp_ms: u64) -> Self {
        Self::new(timestamp_ms, None, CandidateScoreMap::new())
    }

    /// A hand counts as present only when the estimator produced landmarks
    /// and the scorer produced at least one candidate.
    pub fn hand_present(&self) -> bool {
        self.landmarks.is_some() && !self.candidates.is_empty()
    }
}

/// Build a frame with every landmark at the same position.
#[cfg(test)]
pub(crate) fn uniform_frame(x: f32, y: f32, timestamp_ms: u64) -> LandmarkFrame {
    LandmarkFrame::new(vec![[x, y, 0.0]; LANDMARK_COUNT], timestamp_ms)
        .expect("uniform frame has the right point count")
}

// ── Tests ──────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_landmark_indices() {
        assert_eq!(HandLandmark::Wrist.index(), 0);
        assert_eq!(HandLandmark::PinkyTip.index(), 20);
        for (i, l) in ALL_LANDMARKS.iter().enumerate() {
            assert_eq!(l.index(), i);
        }
    }

    #[test]
    fn test_landmark_str_roundtrip() {
        for l in ALL_LANDMARKS {
            assert_eq!(HandLandmark::from_str(l.as_str()), Some(l));
        }
        assert_eq!(HandLandmark::from_str("elbow"), None);
    }

    #[test]
    fn test_frame_rejects_wrong_count() {
        assert!(LandmarkFrame::new(vec![[0.0; 3]; 10], 0).is_none());
        assert!(LandmarkFrame::new(vec![[0.0; 3]; LANDMARK_COUNT], 0).is_some());
    }

    #[test]
    fn test_project() {
        let mut points = vec![[0.0; 3]; LANDMARK_COUNT];
        points[HandLandmark::IndexTip.index()] = [0.25, 0.75, -0.1];
        let frame = LandmarkFrame::new(points, 10).unwrap();
        assert_eq!(frame.project(HandLandmark::IndexTip), Point2::new(0.25, 0.75));
    }

    #[test]
    fn test_vector_magnitude() {
        let v = Vector2::between(Point2::new(0.0, 0.0), Point2::new(3.0, 4.0));
        assert!((v.magnitude() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_score_map_drops_non_finite() {
        let mut map = CandidateScoreMap::new();
        map.insert("fist", 7.0);
        map.insert("peace", f32::NAN);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("fist"), Some(7.0));
    }

    #[test]
    fn test_hand_present() {
        let scores: CandidateScoreMap = [("fist", 7.0)].into_iter().collect();
        assert!(ScoredFrame::new(0, Some(uniform_frame(0.5, 0.5, 0)), scores.clone()).hand_present());
        assert!(!ScoredFrame::new(0, None, scores).hand_present());
        assert!(!ScoredFrame::new(0, Some(uniform_frame(0.5, 0.5, 0)), CandidateScoreMap::new())
            .hand_present());
        assert!(!ScoredFrame::empty(0).hand_present());
    }
}
