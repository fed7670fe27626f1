//! Rolling confidence history and the stability metric.
//!
//! Stability is inversely proportional to the spread of a gesture's recent
//! scores: a candidate that has been consistently high beats one that is
//! spiking, even when the spike is momentarily higher.

use std::collections::{HashMap, VecDeque};

use super::landmarks::CandidateScoreMap;

/// Per-session ring buffers of recent scores, keyed by gesture name.
#[derive(Debug, Clone)]
pub struct ConfidenceHistory {
    capacity: usize,
    epsilon: f32,
    scores: HashMap<String, VecDeque<f32>>,
}

impl ConfidenceHistory {
    pub fn new(capacity: usize, epsilon: f32) -> Self {
        Self {
            capacity: capacity.max(1),
            epsilon,
            scores: HashMap::new(),
        }
    }

    /// Append a single score, evicting the oldest beyond capacity.
    pub fn record(&mut self, name: &str, score: f32) {
        let capacity = self.capacity;
        let ring = self
            .scores
            .entry(name.to_string())
            .or_insert_with(|| VecDeque::with_capacity(capacity));
        if ring.len() >= capacity {
            ring.pop_front();
        }
        ring.push_back(score);
    }

    /// Append every score present in a frame's candidate map.
    pub fn record_frame(&mut self, candidates: &CandidateScoreMap) {
        for (name, score) in candidates.iter() {
            self.record(name, score);
        }
    }

    /// Recent scores for a name, oldest first.
    pub fn samples(&self, name: &str) -> Option<&VecDeque<f32>> {
        self.scores.get(name)
    }

    /// Population standard deviation of the recent scores.
    pub fn std_dev(&self, name: &str) -> Option<f32> {
        let ring = self.scores.get(name).filter(|r| !r.is_empty())?;
        let n = ring.len() as f32;
        let mean = ring.iter().sum::<f32>() / n;
        let variance = ring.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / n;
        Some(variance.sqrt())
    }

    /// `1 / (stddev + ε)`; zero for a name never seen.
    pub fn stability(&self, name: &str) -> f32 {
        match self.std_dev(name) {
            Some(sd) => 1.0 / (sd + self.epsilon),
            None => 0.0,
        }
    }

    /// Number of gesture names tracked.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn clear(&mut self) {
        self.scores.clear();
    }
}
