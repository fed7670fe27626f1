//! Events produced for downstream consumers.

use super::landmarks::{Point2, Vector2};
use crate::sexp::{format_event, quote};

/// How the winning gesture was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Resolved by local ranking and tie-breaking.
    Local,
    /// Adjudicated by the external arbiter.
    Arbitrated,
    /// Arbitration failed or was unavailable; highest raw score of the tie.
    Fallback,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Arbitrated => "arbitrated",
            Self::Fallback => "fallback",
        }
    }
}

/// A debounced gesture, immutable once emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct GestureEvent {
    pub name: String,
    pub confidence: f32,
    pub timestamp_ms: u64,
    pub hand_position: Point2,
    pub velocity: Vector2,
    pub decision: Decision,
}

/// Everything a session reports, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// A debounced gesture.
    Gesture(GestureEvent),
    /// A combo completed by the preceding gesture.
    Combo {
        action: String,
        gestures: Vec<String>,
        timestamp_ms: u64,
    },
    /// The landmark source failed; the session is gone.
    SessionFailed { reason: String },
}

impl PipelineEvent {
    /// Convert the event to an IPC s-expression.
    pub fn to_sexp(&self) -> String {
        match self {
            Self::Gesture(e) => format_event(
                "gesture",
                &[
                    ("name", quote(&e.name)),
                    ("confidence", format!("{:.2}", e.confidence)),
                    ("timestamp-ms", e.timestamp_ms.to_string()),
                    (
                        "position",
                        format!("({:.4} {:.4})", e.hand_position.x, e.hand_position.y),
                    ),
                    ("velocity", format!("({:.4} {:.4})", e.velocity.x, e.velocity.y)),
                    ("decision", format!(":{}", e.decision.as_str())),
                ],
            ),
            Self::Combo {
                action,
                gestures,
                timestamp_ms,
            } => {
                let names: Vec<String> = gestures.iter().map(|g| quote(g)).collect();
                format_event(
                    "combo",
                    &[
                        ("action", quote(action)),
                        ("gestures", format!("({})", names.join(" "))),
                        ("timestamp-ms", timestamp_ms.to_string()),
                    ],
                )
            }
            Self::SessionFailed { reason } => {
                format_event("session-failed", &[("reason", quote(reason))])
            }
        }
    }

    /// The gesture name, for gesture events.
    pub fn gesture_name(&self) -> Option<&str> {
        match self {
            Self::Gesture(e) => Some(&e.name),
            _ => None,
        }
    }
}
