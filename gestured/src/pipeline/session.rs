//! Per-session gesture pipeline.
//!
//! `GestureSession` owns every piece of per-session state and runs frames
//! through the stages in order:
//!
//! motion → threshold → history → resolver → (arbitration) → debouncer →
//! sequence detector.
//!
//! Each processing call returns the events it produced, in emission order.
//! While an arbitration decision is outstanding, incoming frames wait in a
//! small drop-oldest backlog and are replayed once the decision is applied,
//! so emission order always follows frame order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::arbitration::{
    ArbitrationContext, ArbitrationGateway, ArbitrationOutcome, ArbitrationRequest, Arbiter,
};
use super::debounce::{DebounceDecision, Debouncer};
use super::events::{Decision, GestureEvent, PipelineEvent};
use super::history::ConfidenceHistory;
use super::landmarks::{CandidateScoreMap, LandmarkFrame, Point2, ScoredFrame, Vector2};
use super::motion::MotionTracker;
use super::resolver::{Candidate, CandidateResolver, Resolution};
use super::sequence::SequenceDetector;
use super::threshold::AdaptiveThreshold;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::sexp::quote;

/// Recent emitted names kept for arbitration context.
const RECENT_GESTURES: usize = 5;

// ── External stages ────────────────────────────────────────

/// Upstream pose estimator.
pub trait LandmarkSource {
    /// Next frame, `Ok(None)` when no hand is in view.  An error is fatal
    /// to the session.
    fn next_frame(&mut self) -> Result<Option<LandmarkFrame>>;
}

/// Upstream template matcher.
pub trait TemplateScorer {
    /// Score a pose against known gestures.  `threshold` is the session's
    /// current working threshold, for scorers that prune early.
    fn score(&mut self, frame: &LandmarkFrame, threshold: f32) -> CandidateScoreMap;
}

// ── Session ────────────────────────────────────────────────

/// Lifecycle of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Stopped,
    Failed(String),
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Stopped => "stopped",
            Self::Failed(_) => "failed",
        }
    }
}

/// Where and when the ambiguous frame was seen.
#[derive(Debug, Clone, Copy)]
struct FrameContext {
    timestamp_ms: u64,
    position: Point2,
    velocity: Vector2,
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    frames: u64,
    events: u64,
    combos: u64,
    dropped_frames: u64,
}

/// All state for one capture session.
#[derive(Debug)]
pub struct GestureSession {
    config: PipelineConfig,
    motion: MotionTracker,
    threshold: AdaptiveThreshold,
    history: ConfidenceHistory,
    resolver: CandidateResolver,
    debouncer: Debouncer,
    sequence: SequenceDetector,
    gateway: ArbitrationGateway,
    /// Context of the frame awaiting arbitration.
    pending: Option<FrameContext>,
    backlog: VecDeque<ScoredFrame>,
    activity: String,
    recent: VecDeque<String>,
    state: SessionState,
    counters: Counters,
}

impl GestureSession {
    /// Start a session.  Invalid configuration is rejected here.
    pub fn new(config: PipelineConfig, arbiter: Option<Arc<dyn Arbiter>>) -> Result<Self> {
        config.validate()?;
        let timeout = Duration::from_millis(config.arbitration_timeout_ms);
        let session = Self {
            motion: MotionTracker::new(config.anchor, config.anchor_reset_ms),
            threshold: AdaptiveThreshold::new(config.threshold.clone()),
            history: ConfidenceHistory::new(config.history_capacity, config.stability_epsilon),
            resolver: CandidateResolver::new(config.resolver.clone()),
            debouncer: Debouncer::new(config.debounce.clone()),
            sequence: SequenceDetector::new(config.sequence.clone()),
            gateway: ArbitrationGateway::new(arbiter, timeout),
            pending: None,
            backlog: VecDeque::with_capacity(config.arbitration_backlog),
            activity: String::new(),
            recent: VecDeque::with_capacity(RECENT_GESTURES),
            state: SessionState::Active,
            counters: Counters::default(),
            config,
        };
        info!(
            "Gesture session started (arbiter: {})",
            if session.gateway.is_configured() { "yes" } else { "no" }
        );
        Ok(session)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Whether an arbitration decision is outstanding.
    pub fn is_pending(&self) -> bool {
        self.gateway.is_pending()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.counters.dropped_frames
    }

    /// Name currently held by the debouncer.
    pub fn held_gesture(&self) -> Option<&str> {
        self.debouncer.last_emitted_name()
    }

    pub fn current_threshold(&self) -> f32 {
        self.threshold.current()
    }

    /// Label describing what the user is doing, sent to the arbiter.
    pub fn set_activity(&mut self, activity: &str) {
        debug!("Session activity: {:?}", activity);
        self.activity = activity.to_string();
    }

    /// Recently emitted gesture names, oldest first.
    pub fn recent_gestures(&self) -> Vec<String> {
        self.recent.iter().cloned().collect()
    }

    // ── Frame processing ───────────────────────────────────

    /// Process one frame and return the events it produced.
    pub fn process_frame(&mut self, frame: ScoredFrame) -> Result<Vec<PipelineEvent>> {
        self.ensure_active()?;
        let mut events = Vec::new();
        self.collect_decision(&mut events);
        self.enqueue(frame);
        self.drain(&mut events);
        Ok(events)
    }

    /// Apply an arbitration decision if one has arrived or timed out.
    /// Returns nothing once the session has stopped.
    pub fn poll(&mut self) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        if !self.is_active() {
            return events;
        }
        self.collect_decision(&mut events);
        self.drain(&mut events);
        events
    }

    /// Block on any outstanding arbitration and replay the whole backlog.
    pub fn flush(&mut self) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while self.is_active() && (self.gateway.is_pending() || !self.backlog.is_empty()) {
            if let Some(outcome) = self.gateway.wait() {
                self.apply_outcome(outcome, &mut events);
            }
            self.drain(&mut events);
        }
        events
    }

    /// Pull one frame from `source`, score it and process it.  A source
    /// error fails the session and yields `SessionFailed`.
    pub fn pump(
        &mut self,
        source: &mut dyn LandmarkSource,
        scorer: &mut dyn TemplateScorer,
        now_ms: u64,
    ) -> Result<Vec<PipelineEvent>> {
        self.ensure_active()?;
        let landmarks = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => return Ok(self.fail(&e.to_string())),
        };
        let frame = match landmarks {
            Some(landmarks) => {
                let candidates = scorer.score(&landmarks, self.threshold.current());
                ScoredFrame::new(landmarks.timestamp_ms, Some(landmarks), candidates)
            }
            None => ScoredFrame::empty(now_ms),
        };
        self.process_frame(frame)
    }

    /// Tear the session down after an upstream fault.
    pub fn fail(&mut self, reason: &str) -> Vec<PipelineEvent> {
        if !self.is_active() {
            return Vec::new();
        }
        warn!("Gesture session failed: {}", reason);
        self.teardown(SessionState::Failed(reason.to_string()));
        vec![PipelineEvent::SessionFailed {
            reason: reason.to_string(),
        }]
    }

    /// Stop the session.  In-flight arbitration is abandoned and no further
    /// events are produced.
    pub fn stop(&mut self) {
        if !self.is_active() {
            return;
        }
        info!(
            "Gesture session stopped after {} frames, {} events",
            self.counters.frames, self.counters.events
        );
        self.teardown(SessionState::Stopped);
    }

    fn teardown(&mut self, state: SessionState) {
        self.gateway.cancel();
        self.pending = None;
        self.backlog.clear();
        self.motion.reset();
        self.threshold.reset();
        self.history.clear();
        self.debouncer.reset();
        self.sequence.clear();
        self.recent.clear();
        self.state = state;
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(PipelineError::SessionStopped)
        }
    }

    fn enqueue(&mut self, frame: ScoredFrame) {
        if self.backlog.len() >= self.config.arbitration_backlog {
            if let Some(dropped) = self.backlog.pop_front() {
                self.counters.dropped_frames += 1;
                debug!(
                    "Backlog full, dropping frame at {}ms",
                    dropped.timestamp_ms
                );
            }
        }
        self.backlog.push_back(frame);
    }

    /// Evaluate queued frames until the backlog empties or a frame starts
    /// a new arbitration.
    fn drain(&mut self, events: &mut Vec<PipelineEvent>) {
        while !self.gateway.is_pending() {
            let Some(frame) = self.backlog.pop_front() else {
                break;
            };
            self.evaluate(frame, events);
        }
    }

    fn collect_decision(&mut self, events: &mut Vec<PipelineEvent>) {
        if let Some(outcome) = self.gateway.poll() {
            self.apply_outcome(outcome, events);
        }
    }

    fn apply_outcome(&mut self, outcome: ArbitrationOutcome, events: &mut Vec<PipelineEvent>) {
        let Some(context) = self.pending.take() else {
            debug!("Arbitration outcome without a pending frame, ignored");
            return;
        };
        self.offer(outcome.winner, outcome.decision, context, events);
    }

    /// Run one frame through the stages.
    fn evaluate(&mut self, frame: ScoredFrame, events: &mut Vec<PipelineEvent>) {
        self.counters.frames += 1;
        let now = frame.timestamp_ms;
        let present = frame.hand_present();

        let magnitude = self.motion.update(frame.landmarks.as_ref(), now).magnitude;
        if self.debouncer.observe_presence(present, now) {
            debug!("Hand absent, debouncer reset at {}ms", now);
        }
        let threshold = self.threshold.update(magnitude);
        self.history.record_frame(&frame.candidates);

        if !present {
            return;
        }

        let context = FrameContext {
            timestamp_ms: now,
            position: self.motion.position(),
            velocity: self.motion.state().velocity,
        };

        match self.resolver.resolve(
            &frame.candidates,
            threshold,
            self.motion.state(),
            &self.history,
        ) {
            Resolution::NoGesture => {}
            Resolution::Resolved { winner, .. } => {
                self.offer(winner, Decision::Local, context, events);
            }
            Resolution::Ambiguous { tied } => {
                let request_context = ArbitrationContext {
                    activity: self.activity.clone(),
                    recent: self.recent_gestures(),
                    position: context.position,
                };
                let Some(request) = ArbitrationRequest::new(tied, request_context) else {
                    return;
                };
                match self.gateway.submit(request) {
                    Some(outcome) => self.offer(outcome.winner, outcome.decision, context, events),
                    None => self.pending = Some(context),
                }
            }
        }
    }

    /// Hand a winner to the debouncer and the sequence detector.
    fn offer(
        &mut self,
        winner: Candidate,
        decision: Decision,
        context: FrameContext,
        events: &mut Vec<PipelineEvent>,
    ) {
        if self.debouncer.offer(&winner.name, context.timestamp_ms) != DebounceDecision::Emit {
            return;
        }

        debug!(
            "Gesture {} ({:.2}, {}) at {}ms",
            winner.name,
            winner.score,
            decision.as_str(),
            context.timestamp_ms
        );
        if self.recent.len() >= RECENT_GESTURES {
            self.recent.pop_front();
        }
        self.recent.push_back(winner.name.clone());

        let combo = self.sequence.push(&winner.name, context.timestamp_ms);
        self.counters.events += 1;
        events.push(PipelineEvent::Gesture(GestureEvent {
            name: winner.name,
            confidence: winner.score,
            timestamp_ms: context.timestamp_ms,
            hand_position: context.position,
            velocity: context.velocity,
            decision,
        }));

        if let Some(combo) = combo {
            info!("Combo {} ({})", combo.action, combo.gestures.join(" → "));
            self.counters.combos += 1;
            events.push(PipelineEvent::Combo {
                action: combo.action,
                gestures: combo.gestures,
                timestamp_ms: combo.timestamp_ms,
            });
        }
    }

    // ── Reporting ──────────────────────────────────────────

    /// Generate s-expression for IPC status.
    pub fn status_sexp(&self) -> String {
        let held = self
            .debouncer
            .last_emitted_name()
            .map(quote)
            .unwrap_or_else(|| "nil".to_string());
        let threshold = self.threshold.state();
        let motion = self.motion.state();
        let stats = self.gateway.stats();
        format!(
            "(:state :{} :held {} :threshold {:.3} :floor {:.1} :ceiling {:.1} :motion {:.4} \
             :activity {} :pending {} :backlog {} :frames {} :events {} :combos {} \
             :suppressed {} :dropped {} :arbitrations {} :arbitrated {} :fallbacks {})",
            self.state.as_str(),
            held,
            threshold.current,
            threshold.floor,
            threshold.ceiling,
            motion.magnitude,
            quote(&self.activity),
            if self.gateway.is_pending() { "t" } else { "nil" },
            self.backlog.len(),
            self.counters.frames,
            self.counters.events,
            self.counters.combos,
            self.debouncer.suppressed_count(),
            self.counters.dropped_frames,
            stats.requests,
            stats.arbitrated,
            stats.fallbacks,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::arbitration::mock::{FixedArbiter, HangingArbiter};
    use crate::pipeline::arbitration::{ArbitrationError, ArbitrationResponse};
    use crate::pipeline::landmarks::uniform_frame;
    use crossbeam_channel::{Receiver, Sender};

    fn make_frame(timestamp_ms: u64, scores: &[(&str, f32)]) -> ScoredFrame {
        ScoredFrame::new(
            timestamp_ms,
            Some(uniform_frame(0.5, 0.5, timestamp_ms)),
            scores.iter().map(|(n, s)| (*n, *s)).collect(),
        )
    }

    fn session() -> GestureSession {
        GestureSession::new(PipelineConfig::default(), None).unwrap()
    }

    fn with_arbiter(arbiter: impl Arbiter + 'static, timeout_ms: u64) -> GestureSession {
        let config = PipelineConfig {
            arbitration_timeout_ms: timeout_ms,
            ..PipelineConfig::default()
        };
        GestureSession::new(config, Some(Arc::new(arbiter))).unwrap()
    }

    fn gesture_names(events: &[PipelineEvent]) -> Vec<&str> {
        events.iter().filter_map(|e| e.gesture_name()).collect()
    }

    fn run(session: &mut GestureSession, frames: Vec<ScoredFrame>) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        for frame in frames {
            events.extend(session.process_frame(frame).unwrap());
        }
        events
    }

    /// Answers once the test releases it.
    struct GatedArbiter {
        release: Receiver<()>,
        answer: &'static str,
    }

    impl Arbiter for GatedArbiter {
        fn arbitrate(
            &self,
            _request: &ArbitrationRequest,
            timeout: Duration,
        ) -> std::result::Result<ArbitrationResponse, ArbitrationError> {
            self.release
                .recv_timeout(timeout)
                .map_err(|_| ArbitrationError::Timeout(timeout))?;
            Ok(ArbitrationResponse {
                gesture: self.answer.to_string(),
                confidence: 8.0,
                explanation: String::new(),
            })
        }
    }

    fn gated(answer: &'static str) -> (GestureSession, Sender<()>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let session = with_arbiter(GatedArbiter { release: rx, answer }, 5000);
        (session, tx)
    }

    #[test]
    fn test_session_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<GestureSession>();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = PipelineConfig::default();
        config.threshold.floor = 9.5;
        assert!(matches!(
            GestureSession::new(config, None),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_below_threshold_never_emits() {
        let mut s = session();
        let frames = (0..50).map(|i| make_frame(i * 33, &[("fist", 4.9), ("peace", 3.0)])).collect();
        assert!(run(&mut s, frames).is_empty());
    }

    #[test]
    fn test_score_at_working_threshold_never_emits() {
        let mut config = PipelineConfig::default();
        config.threshold.smoothing = 0.0;
        config.threshold.lower_step = 0.0;
        let mut s = GestureSession::new(config, None).unwrap();
        let frames = (0..10).map(|i| make_frame(i * 33, &[("fist", 7.0)])).collect();
        assert!(run(&mut s, frames).is_empty());
        assert_eq!(s.current_threshold(), 7.0);

        let events = s.process_frame(make_frame(330, &[("fist", 7.01)])).unwrap();
        assert_eq!(gesture_names(&events), vec!["fist"]);
    }

    #[test]
    fn test_empty_candidates_is_no_gesture() {
        let mut s = session();
        assert!(s.process_frame(make_frame(0, &[])).unwrap().is_empty());
        assert!(s.process_frame(ScoredFrame::empty(33)).unwrap().is_empty());
    }

    #[test]
    fn test_sustained_gesture_emits_once() {
        let mut s = session();
        let frames = (0..60).map(|i| make_frame(i * 33, &[("fist", 9.0)])).collect();
        let events = run(&mut s, frames);
        assert_eq!(gesture_names(&events), vec!["fist"]);
        match &events[0] {
            PipelineEvent::Gesture(e) => {
                assert_eq!(e.timestamp_ms, 0);
                assert_eq!(e.decision, Decision::Local);
                assert_eq!(e.hand_position, Point2::new(0.5, 0.5));
            }
            other => panic!("expected gesture, got {:?}", other),
        }
    }

    #[test]
    fn test_oscillating_winners_respect_dwell() {
        let mut s = session();
        let frames = (0..120)
            .map(|i| {
                let name = if (i / 3) % 2 == 0 { "fist" } else { "peace" };
                make_frame(i * 33, &[(name, 9.0)])
            })
            .collect();
        let events = run(&mut s, frames);
        let emitted: Vec<(String, u64)> = events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Gesture(g) => Some((g.name.clone(), g.timestamp_ms)),
                _ => None,
            })
            .collect();
        assert!(emitted.len() > 1);
        for pair in emitted.windows(2) {
            assert!(
                pair[1].1 - pair[0].1 >= 350,
                "changed names {:?} emitted too close together",
                pair
            );
        }
    }

    #[test]
    fn test_absence_then_same_gesture_emits_again() {
        let mut s = session();
        let mut frames: Vec<ScoredFrame> = (0..10).map(|i| make_frame(i * 33, &[("fist", 9.0)])).collect();
        frames.extend((10..30).map(|i| ScoredFrame::empty(i * 33)));
        frames.push(make_frame(30 * 33, &[("fist", 9.0)]));
        let events = run(&mut s, frames);
        assert_eq!(gesture_names(&events), vec!["fist", "fist"]);
    }

    #[test]
    fn test_frame_gap_then_same_gesture_emits_again() {
        let mut s = session();
        let mut frames: Vec<ScoredFrame> = (0..10).map(|i| make_frame(i * 33, &[("fist", 9.0)])).collect();
        frames.push(make_frame(1000, &[("fist", 9.0)]));
        frames.push(make_frame(1033, &[("fist", 9.0)]));
        let events = run(&mut s, frames);
        assert_eq!(gesture_names(&events), vec!["fist", "fist"]);
    }

    #[test]
    fn test_backlog_dropping_empty_frames_still_resets_held_gesture() {
        let (mut s, release) = gated("A");
        let mut events = run(&mut s, vec![make_frame(0, &[("fist", 9.5)])]);
        events.extend(s.process_frame(make_frame(33, &[("A", 8.0), ("B", 7.9)])).unwrap());
        assert!(s.is_pending());
        // Every no-hand frame is pushed out of the backlog by later frames.
        for i in 2..12 {
            events.extend(s.process_frame(ScoredFrame::empty(i * 66)).unwrap());
        }
        for t in [800, 833, 866, 900] {
            events.extend(s.process_frame(make_frame(t, &[("fist", 9.5)])).unwrap());
        }
        release.send(()).unwrap();
        events.extend(s.flush());
        // "A" lands inside the dwell after the first fist and is suppressed.
        assert_eq!(gesture_names(&events), vec!["fist", "fist"]);
        assert!(s.dropped_frames() >= 4);
    }

    #[test]
    fn test_short_absence_does_not_re_emit() {
        let mut s = session();
        let mut frames: Vec<ScoredFrame> = (0..10).map(|i| make_frame(i * 33, &[("fist", 9.0)])).collect();
        frames.extend((10..20).map(|i| ScoredFrame::empty(i * 33)));
        frames.push(make_frame(20 * 33, &[("fist", 9.0)]));
        let events = run(&mut s, frames);
        assert_eq!(gesture_names(&events), vec!["fist"]);
    }

    #[test]
    fn test_steadier_candidate_wins_near_tie() {
        let mut s = session();
        let noisy = [6.0, 8.0, 5.5, 8.5, 6.0, 8.0, 5.0, 9.0, 6.5, 8.0];
        let frames = noisy
            .iter()
            .enumerate()
            .map(|(i, t)| make_frame(i as u64 * 40, &[("thumbs_up", *t), ("ok", 7.6)]))
            .collect();
        let events = run(&mut s, frames);
        assert_eq!(gesture_names(&events), vec!["ok"]);
        assert_eq!(s.held_gesture(), Some("ok"));

        // Without history the same frame is a plain tie settled by raw score.
        let mut fresh = session();
        let events = fresh.process_frame(make_frame(0, &[("thumbs_up", 8.0), ("ok", 7.6)])).unwrap();
        assert_eq!(gesture_names(&events), vec!["thumbs_up"]);
    }

    #[test]
    fn test_arbitration_timeout_falls_back_to_highest() {
        let mut s = with_arbiter(HangingArbiter, 50);
        let events = s.process_frame(make_frame(0, &[("A", 8.0), ("B", 7.9)])).unwrap();
        assert!(events.is_empty());
        assert!(s.is_pending());

        let events = s.flush();
        match events.as_slice() {
            [PipelineEvent::Gesture(e)] => {
                assert_eq!(e.name, "A");
                assert_eq!(e.decision, Decision::Fallback);
                assert_eq!(e.timestamp_ms, 0);
            }
            other => panic!("expected one fallback gesture, got {:?}", other),
        }
        assert!(!s.is_pending());
    }

    #[test]
    fn test_unconfigured_arbiter_decides_synchronously() {
        let mut s = session();
        let events = s.process_frame(make_frame(0, &[("A", 8.0), ("B", 7.9)])).unwrap();
        match events.as_slice() {
            [PipelineEvent::Gesture(e)] => {
                assert_eq!(e.name, "A");
                assert_eq!(e.decision, Decision::Fallback);
            }
            other => panic!("expected immediate fallback, got {:?}", other),
        }
    }

    #[test]
    fn test_arbiter_choice_emitted() {
        let mut s = with_arbiter(FixedArbiter("B"), 2000);
        s.process_frame(make_frame(0, &[("A", 8.0), ("B", 7.9)])).unwrap();
        let events = s.flush();
        match events.as_slice() {
            [PipelineEvent::Gesture(e)] => {
                assert_eq!(e.name, "B");
                assert_eq!(e.decision, Decision::Arbitrated);
            }
            other => panic!("expected arbitrated gesture, got {:?}", other),
        }
    }

    #[test]
    fn test_backlog_drops_oldest_and_replays_in_order() {
        let (mut s, release) = gated("B");
        assert!(s.process_frame(make_frame(0, &[("A", 8.0), ("B", 7.9)])).unwrap().is_empty());

        for i in 1..=6 {
            let events = s.process_frame(make_frame(i * 100, &[("fist", 9.5)])).unwrap();
            assert!(events.is_empty(), "no events while arbitration is pending");
        }
        assert_eq!(s.backlog_len(), 4);
        assert_eq!(s.dropped_frames(), 2);

        release.send(()).unwrap();
        let events = s.flush();
        let names = gesture_names(&events);
        assert_eq!(names, vec!["B", "fist"]);
        match &events[1] {
            PipelineEvent::Gesture(e) => assert_eq!(e.timestamp_ms, 400),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(s.backlog_len(), 0);
    }

    #[test]
    fn test_stop_discards_in_flight_arbitration() {
        let (mut s, release) = gated("B");
        s.process_frame(make_frame(0, &[("A", 8.0), ("B", 7.9)])).unwrap();
        s.stop();
        let _ = release.send(());
        std::thread::sleep(Duration::from_millis(50));
        assert!(s.poll().is_empty());
        assert!(s.flush().is_empty());
        assert!(matches!(
            s.process_frame(make_frame(100, &[("fist", 9.0)])),
            Err(PipelineError::SessionStopped)
        ));
        assert_eq!(s.state(), &SessionState::Stopped);
    }

    #[test]
    fn test_combo_within_span() {
        let mut s = session();
        let events = run(
            &mut s,
            vec![
                make_frame(0, &[("thumbs_up", 9.0)]),
                make_frame(400, &[("thumbs_down", 9.0)]),
            ],
        );
        assert_eq!(gesture_names(&events), vec!["thumbs_up", "thumbs_down"]);
        match events.last() {
            Some(PipelineEvent::Combo { action, .. }) => assert_eq!(action, "cancel"),
            other => panic!("expected combo, got {:?}", other),
        }
    }

    #[test]
    fn test_combo_outside_span() {
        let mut s = session();
        let events = run(
            &mut s,
            vec![
                make_frame(0, &[("thumbs_up", 9.0)]),
                make_frame(4000, &[("thumbs_down", 9.0)]),
            ],
        );
        assert!(events.iter().all(|e| !matches!(e, PipelineEvent::Combo { .. })));
    }

    #[test]
    fn test_recent_gestures_capped() {
        let mut s = session();
        let names = ["a", "b", "c", "d", "e", "f", "g"];
        let frames = names
            .iter()
            .enumerate()
            .map(|(i, n)| make_frame(i as u64 * 400, &[(n, 9.0)]))
            .collect();
        run(&mut s, frames);
        assert_eq!(s.recent_gestures(), vec!["c", "d", "e", "f", "g"]);
    }

    struct ScriptedSource {
        frames: VecDeque<Result<Option<LandmarkFrame>>>,
    }

    impl LandmarkSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Option<LandmarkFrame>> {
            self.frames.pop_front().unwrap_or(Ok(None))
        }
    }

    struct ConstantScorer(&'static str, f32);

    impl TemplateScorer for ConstantScorer {
        fn score(&mut self, _frame: &LandmarkFrame, _threshold: f32) -> CandidateScoreMap {
            [(self.0, self.1)].into_iter().collect()
        }
    }

    #[test]
    fn test_pump_scores_source_frames() {
        let mut s = session();
        let mut source = ScriptedSource {
            frames: VecDeque::from(vec![Ok(Some(uniform_frame(0.5, 0.5, 0))), Ok(None)]),
        };
        let mut scorer = ConstantScorer("peace", 9.0);
        let events = s.pump(&mut source, &mut scorer, 0).unwrap();
        assert_eq!(gesture_names(&events), vec!["peace"]);
        assert!(s.pump(&mut source, &mut scorer, 33).unwrap().is_empty());
    }

    #[test]
    fn test_source_failure_is_fatal() {
        let mut s = session();
        let mut source = ScriptedSource {
            frames: VecDeque::from(vec![Err(PipelineError::LandmarkSource(
                "camera unplugged".to_string(),
            ))]),
        };
        let mut scorer = ConstantScorer("peace", 9.0);
        let events = s.pump(&mut source, &mut scorer, 0).unwrap();
        assert!(matches!(
            events.as_slice(),
            [PipelineEvent::SessionFailed { reason }] if reason.contains("camera unplugged")
        ));
        assert!(matches!(s.state(), SessionState::Failed(_)));
        assert!(matches!(
            s.process_frame(make_frame(33, &[("peace", 9.0)])),
            Err(PipelineError::SessionStopped)
        ));
    }

    #[test]
    fn test_status_sexp() {
        let mut s = session();
        s.set_activity("reader");
        s.process_frame(make_frame(0, &[("fist", 9.0)])).unwrap();
        let status = s.status_sexp();
        assert!(status.contains(":state :active"));
        assert!(status.contains(":held \"fist\""));
        assert!(status.contains(":activity \"reader\""));
        assert!(status.contains(":pending nil"));
        assert!(lexpr::from_str(&status).is_ok(), "bad status: {}", status);
    }
}
