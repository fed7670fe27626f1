//! Arbitration gateway for near-tied candidates.
//!
//! An `Ambiguous` frame is handed to an external `Arbiter` on a detached
//! worker thread.  The session keeps polling; the answer comes back over a
//! channel tagged with its request id so results for abandoned requests are
//! recognised and dropped.  Whatever goes wrong (timeout, transport failure,
//! a malformed answer, a name that was not in the tie) the gateway falls back
//! to the highest raw score of the tie, which is computed up front and so is
//! always available synchronously.

use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::events::Decision;
use super::landmarks::Point2;
use super::resolver::{highest_score, Candidate};
use crate::sexp::{get_float, get_string, quote};

// ── Errors ─────────────────────────────────────────────────

/// Why an arbitration attempt produced no usable answer.
#[derive(Debug, Error)]
pub enum ArbitrationError {
    #[error("arbiter did not answer within {0:?}")]
    Timeout(Duration),
    #[error("arbiter unavailable: {0}")]
    Unavailable(String),
    #[error("malformed arbiter response: {0}")]
    Malformed(String),
    #[error("arbiter I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("arbiter worker disconnected")]
    Disconnected,
}

// ── Request / response ─────────────────────────────────────

/// Session context shipped alongside the tied candidates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArbitrationContext {
    /// Free-form label of what the user is doing (e.g. "home", "reader").
    pub activity: String,
    /// Most recent emitted gesture names, oldest first.
    pub recent: Vec<String>,
    pub position: Point2,
}

/// A non-empty set of tied candidates plus context.
#[derive(Debug, Clone, PartialEq)]
pub struct ArbitrationRequest {
    pub candidates: Vec<Candidate>,
    pub context: ArbitrationContext,
    fallback: Candidate,
}

impl ArbitrationRequest {
    /// Returns `None` for an empty tie.
    pub fn new(candidates: Vec<Candidate>, context: ArbitrationContext) -> Option<Self> {
        let fallback = highest_score(&candidates)?.clone();
        Some(Self {
            candidates,
            context,
            fallback,
        })
    }

    /// Deterministic local decision used whenever arbitration fails.
    pub fn fallback(&self) -> &Candidate {
        &self.fallback
    }

    /// Whether `name` is one of the tied candidates.
    pub fn contains(&self, name: &str) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.name == name)
    }

    pub fn to_sexp(&self) -> String {
        let candidates: Vec<String> = self
            .candidates
            .iter()
            .map(|c| format!("({} {:.2})", quote(&c.name), c.score))
            .collect();
        let recent: Vec<String> = self.context.recent.iter().map(|n| quote(n)).collect();
        format!(
            "(:type :arbitrate :candidates ({}) :activity {} :recent ({}) :position ({:.4} {:.4}))",
            candidates.join(" "),
            quote(&self.context.activity),
            recent.join(" "),
            self.context.position.x,
            self.context.position.y,
        )
    }
}

/// The arbiter's answer.  Untrusted until checked against the request.
#[derive(Debug, Clone, PartialEq)]
pub struct ArbitrationResponse {
    pub gesture: String,
    pub confidence: f32,
    pub explanation: String,
}

impl ArbitrationResponse {
    /// Parse `(:gesture "name" :confidence 8.1 :explanation "...")`.
    pub fn parse(text: &str) -> Result<Self, ArbitrationError> {
        let value = lexpr::from_str(text.trim())
            .map_err(|e| ArbitrationError::Malformed(format!("parse error: {}", e)))?;
        let gesture = get_string(&value, "gesture")
            .filter(|g| !g.is_empty() && g != "nil")
            .ok_or_else(|| ArbitrationError::Malformed("missing :gesture".to_string()))?;
        Ok(Self {
            gesture,
            confidence: get_float(&value, "confidence").unwrap_or(0.0) as f32,
            explanation: get_string(&value, "explanation").unwrap_or_default(),
        })
    }
}

// ── Arbiter trait ──────────────────────────────────────────

/// External adjudicator for ambiguous frames.
///
/// Implementations may block; they run on a worker thread and should give
/// up once `timeout` has elapsed.  The gateway enforces the deadline on its
/// side regardless.
pub trait Arbiter: Send + Sync {
    fn arbitrate(
        &self,
        request: &ArbitrationRequest,
        timeout: Duration,
    ) -> Result<ArbitrationResponse, ArbitrationError>;

    /// Label used in logs.
    fn name(&self) -> &str {
        "arbiter"
    }
}

/// Runs an external command per request: the request s-expression goes to
/// its stdin, one response s-expression is read from its stdout.
#[derive(Debug, Clone)]
pub struct CommandArbiter {
    program: String,
    args: Vec<String>,
}

impl CommandArbiter {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Split a command line on whitespace.  No shell quoting.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        let args: Vec<&str> = parts.collect();
        Some(Self::new(program, &args))
    }
}

impl Arbiter for CommandArbiter {
    fn arbitrate(
        &self,
        request: &ArbitrationRequest,
        timeout: Duration,
    ) -> Result<ArbitrationResponse, ArbitrationError> {
        let deadline = Instant::now() + timeout;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ArbitrationError::Unavailable(format!("{}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            let mut payload = request.to_sexp();
            payload.push('\n');
            // A child that exits without reading stdin is not an error yet.
            if let Err(e) = stdin.write_all(payload.as_bytes()) {
                debug!("Arbiter stdin write failed: {}", e);
            }
        }

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ArbitrationError::Unavailable("no stdout pipe".to_string()))?;
        let (tx, rx) = crossbeam_channel::bounded(1);
        thread::Builder::new()
            .name("arbiter-stdout".to_string())
            .spawn(move || {
                let mut output = String::new();
                let result = stdout.read_to_string(&mut output).map(|_| output);
                let _ = tx.send(result);
            })?;

        let remaining = deadline.saturating_duration_since(Instant::now());
        let output = match rx.recv_timeout(remaining) {
            Ok(result) => result?,
            Err(RecvTimeoutError::Timeout) => {
                if let Err(e) = child.kill() {
                    debug!("Arbiter kill failed: {}", e);
                }
                let _ = child.wait();
                return Err(ArbitrationError::Timeout(timeout));
            }
            Err(RecvTimeoutError::Disconnected) => return Err(ArbitrationError::Disconnected),
        };

        let status = child.wait()?;
        if !status.success() {
            return Err(ArbitrationError::Unavailable(format!(
                "{} exited with {}",
                self.program, status
            )));
        }
        ArbitrationResponse::parse(&output)
    }

    fn name(&self) -> &str {
        &self.program
    }
}

// ── Gateway ────────────────────────────────────────────────

/// Final decision for an ambiguous frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ArbitrationOutcome {
    pub winner: Candidate,
    pub decision: Decision,
    pub explanation: Option<String>,
}

/// Counters exposed in session status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArbitrationStats {
    pub requests: u64,
    pub arbitrated: u64,
    pub fallbacks: u64,
    pub rejected: u64,
    pub discarded: u64,
}

type WorkerResult = (u64, Result<ArbitrationResponse, ArbitrationError>);

struct PendingArbitration {
    id: u64,
    request: ArbitrationRequest,
    deadline: Instant,
}

/// Per-session arbitration gateway.  At most one request is in flight.
pub struct ArbitrationGateway {
    arbiter: Option<Arc<dyn Arbiter>>,
    timeout: Duration,
    next_id: u64,
    pending: Option<PendingArbitration>,
    results_tx: Sender<WorkerResult>,
    results_rx: Receiver<WorkerResult>,
    stats: ArbitrationStats,
}

impl ArbitrationGateway {
    /// `arbiter == None` means every tie takes the fallback immediately.
    pub fn new(arbiter: Option<Arc<dyn Arbiter>>, timeout: Duration) -> Self {
        let (results_tx, results_rx) = crossbeam_channel::unbounded();
        Self {
            arbiter,
            timeout,
            next_id: 1,
            pending: None,
            results_tx,
            results_rx,
            stats: ArbitrationStats::default(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.arbiter.is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn stats(&self) -> ArbitrationStats {
        self.stats
    }

    /// Start arbitration.  Returns the decision right away when no arbiter
    /// is configured or the worker cannot be started; otherwise `None` and
    /// the answer arrives through `poll` or `wait`.
    ///
    /// A request still in flight is abandoned.
    pub fn submit(&mut self, request: ArbitrationRequest) -> Option<ArbitrationOutcome> {
        self.stats.requests += 1;
        if self.pending.take().is_some() {
            debug!("Arbitration: superseding in-flight request");
        }

        let Some(arbiter) = self.arbiter.as_ref().map(Arc::clone) else {
            return Some(self.fallback(&request, "no arbiter configured"));
        };

        let id = self.next_id;
        self.next_id += 1;
        let tx = self.results_tx.clone();
        let timeout = self.timeout;
        let job = request.clone();
        let spawned = thread::Builder::new()
            .name(format!("arbiter-{}", id))
            .spawn(move || {
                let result = arbiter.arbitrate(&job, timeout);
                // The session may be gone; nobody is waiting then.
                let _ = tx.send((id, result));
            });
        if let Err(e) = spawned {
            return Some(self.fallback(&request, &format!("worker spawn failed: {}", e)));
        }

        debug!(
            "Arbitration #{} submitted: {} candidates",
            id,
            request.candidates.len()
        );
        self.pending = Some(PendingArbitration {
            id,
            request,
            deadline: Instant::now() + self.timeout,
        });
        None
    }

    /// Non-blocking check for the pending decision.
    pub fn poll(&mut self) -> Option<ArbitrationOutcome> {
        self.pending.as_ref()?;
        loop {
            match self.results_rx.try_recv() {
                Ok(result) => {
                    if let Some(outcome) = self.accept(result) {
                        return Some(outcome);
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return self.fail_pending(ArbitrationError::Disconnected);
                }
            }
        }
        let expired = self
            .pending
            .as_ref()
            .is_some_and(|p| Instant::now() >= p.deadline);
        if expired {
            return self.fail_pending(ArbitrationError::Timeout(self.timeout));
        }
        None
    }

    /// Block until the pending decision arrives or its deadline passes.
    pub fn wait(&mut self) -> Option<ArbitrationOutcome> {
        loop {
            let deadline = self.pending.as_ref()?.deadline;
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.results_rx.recv_timeout(remaining) {
                Ok(result) => {
                    if let Some(outcome) = self.accept(result) {
                        return Some(outcome);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    return self.fail_pending(ArbitrationError::Timeout(self.timeout));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return self.fail_pending(ArbitrationError::Disconnected);
                }
            }
        }
    }

    /// Abandon the in-flight request.  Its result will be discarded.
    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            info!("Arbitration #{} abandoned", pending.id);
        }
    }

    /// Handle one worker result.  `None` when it belongs to an abandoned
    /// request.
    fn accept(&mut self, (id, result): WorkerResult) -> Option<ArbitrationOutcome> {
        if self.pending.as_ref().map(|p| p.id) != Some(id) {
            self.stats.discarded += 1;
            debug!("Arbitration #{}: stale result discarded", id);
            return None;
        }
        let pending = self.pending.take()?;
        let response = match result {
            Ok(response) => response,
            Err(e) => return Some(self.fallback(&pending.request, &e.to_string())),
        };

        match pending.request.contains(&response.gesture) {
            Some(winner) => {
                self.stats.arbitrated += 1;
                debug!(
                    "Arbitration #{} chose {} ({})",
                    id, winner.name, response.explanation
                );
                Some(ArbitrationOutcome {
                    winner: winner.clone(),
                    decision: Decision::Arbitrated,
                    explanation: Some(response.explanation).filter(|e| !e.is_empty()),
                })
            }
            None => {
                self.stats.rejected += 1;
                warn!(
                    "Arbitration #{}: arbiter chose {:?}, not among {:?}",
                    id,
                    response.gesture,
                    pending
                        .request
                        .candidates
                        .iter()
                        .map(|c| c.name.as_str())
                        .collect::<Vec<_>>(),
                );
                Some(self.fallback(&pending.request, "unknown gesture"))
            }
        }
    }

    fn fail_pending(&mut self, error: ArbitrationError) -> Option<ArbitrationOutcome> {
        let pending = self.pending.take()?;
        Some(self.fallback(&pending.request, &error.to_string()))
    }

    fn fallback(&mut self, request: &ArbitrationRequest, reason: &str) -> ArbitrationOutcome {
        self.stats.fallbacks += 1;
        if self.arbiter.is_some() {
            warn!(
                "Arbitration fallback to {}: {}",
                request.fallback().name,
                reason
            );
        } else {
            debug!("Arbitration fallback to {}: {}", request.fallback().name, reason);
        }
        ArbitrationOutcome {
            winner: request.fallback().clone(),
            decision: Decision::Fallback,
            explanation: None,
        }
    }
}

impl std::fmt::Debug for ArbitrationGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArbitrationGateway")
            .field("arbiter", &self.arbiter.as_ref().map(|a| a.name().to_string()))
            .field("timeout", &self.timeout)
            .field("pending", &self.pending.as_ref().map(|p| p.id))
            .field("stats", &self.stats)
            .finish()
    }
}

// ── Test arbiters ──────────────────────────────────────────

#[cfg(test)]
pub(crate) mod mock {
    use super::*;

    /// Always answers with the same name.
    pub struct FixedArbiter(pub &'static str);

    impl Arbiter for FixedArbiter {
        fn arbitrate(
            &self,
            _request: &ArbitrationRequest,
            _timeout: Duration,
        ) -> Result<ArbitrationResponse, ArbitrationError> {
            Ok(ArbitrationResponse {
                gesture: self.0.to_string(),
                confidence: 9.0,
                explanation: "fixed".to_string(),
            })
        }
    }

    /// Never answers in time.
    pub struct HangingArbiter;

    impl Arbiter for HangingArbiter {
        fn arbitrate(
            &self,
            _request: &ArbitrationRequest,
            _timeout: Duration,
        ) -> Result<ArbitrationResponse, ArbitrationError> {
            thread::sleep(Duration::from_secs(5));
            Err(ArbitrationError::Unavailable("slept".to_string()))
        }
    }

    /// Fails immediately.
    pub struct BrokenArbiter;

    impl Arbiter for BrokenArbiter {
        fn arbitrate(
            &self,
            _request: &ArbitrationRequest,
            _timeout: Duration,
        ) -> Result<ArbitrationResponse, ArbitrationError> {
            Err(ArbitrationError::Unavailable("connection refused".to_string()))
        }
    }
}
