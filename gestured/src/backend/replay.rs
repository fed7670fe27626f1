//! Replay backend: run one session over a recorded frame log.
//!
//! The log holds one s-expression per line, in the same shape as the IPC
//! messages:
//!
//! ```lisp
//! ; comment
//! (:type :session-context :activity "reader")
//! (:type :frame :timestamp-ms 0 :landmarks (...) :candidates (("fist" 8.9)))
//! (:type :landmark-error :reason "camera unplugged")
//! ```
//!
//! Events are written one per line.  Arbitration is waited on as soon as it
//! starts, so a replay is deterministic regardless of arbiter latency.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use gestured::ipc::dispatch::parse_frame;
use gestured::pipeline::{Arbiter, PipelineEvent};
use gestured::sexp::get_string;
use gestured::{GestureSession, PipelineConfig};
use tracing::{info, warn};

/// Counts reported after a replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub frames: u64,
    pub events: u64,
    pub skipped: u64,
}

/// Replay `path` (`-` for stdin) and print events to stdout.
pub fn run(path: &Path, config: PipelineConfig, arbiter: Option<Arc<dyn Arbiter>>) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let summary = if path.as_os_str() == "-" {
        replay(io::stdin().lock(), &mut out, config, arbiter)?
    } else {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        replay(BufReader::new(file), &mut out, config, arbiter)?
    };
    info!(
        "Replay finished: {} frame(s), {} event(s), {} line(s) skipped",
        summary.frames, summary.events, summary.skipped
    );
    Ok(())
}

/// Drive a session from `reader`, writing event s-expressions to `out`.
pub fn replay<R: BufRead, W: Write>(
    reader: R,
    out: &mut W,
    config: PipelineConfig,
    arbiter: Option<Arc<dyn Arbiter>>,
) -> anyhow::Result<ReplaySummary> {
    let mut session = GestureSession::new(config, arbiter)?;
    let mut summary = ReplaySummary::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(';') {
            continue;
        }

        let value = match lexpr::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                warn!("line {}: malformed s-expression: {}", line_no, e);
                summary.skipped += 1;
                continue;
            }
        };

        let events = match get_string(&value, "type").as_deref() {
            Some("frame") => match parse_frame(&value) {
                Ok(frame) => {
                    summary.frames += 1;
                    let mut events = session.process_frame(frame)?;
                    if session.is_pending() {
                        events.extend(session.flush());
                    }
                    events
                }
                Err(reason) => {
                    warn!("line {}: {}", line_no, reason);
                    summary.skipped += 1;
                    continue;
                }
            },
            Some("session-context") => {
                if let Some(activity) = get_string(&value, "activity") {
                    session.set_activity(&activity);
                }
                continue;
            }
            Some("landmark-error") => {
                let reason = get_string(&value, "reason")
                    .unwrap_or_else(|| "landmark source failed".to_string());
                session.fail(&reason)
            }
            other => {
                warn!("line {}: unexpected message type {:?}", line_no, other);
                summary.skipped += 1;
                continue;
            }
        };

        summary.events += write_events(out, &events)?;
        if !session.is_active() {
            info!("Session ended at line {}", line_no);
            break;
        }
    }

    let tail = session.flush();
    summary.events += write_events(out, &tail)?;
    session.stop();
    out.flush()?;
    Ok(summary)
}

fn write_events<W: Write>(out: &mut W, events: &[PipelineEvent]) -> io::Result<u64> {
    for event in events {
        writeln!(out, "{}", event.to_sexp())?;
    }
    Ok(events.len() as u64)
}
