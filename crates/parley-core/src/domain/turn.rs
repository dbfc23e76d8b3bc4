//! Turn records and interruptions.
//!
//! A [`Turn`] is one request/response cycle. While it runs it is owned by the
//! response pipeline; once finalized (or cancelled) it is appended to the
//! conversation history and never mutated again.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tool::ToolCallRecord;
use super::trigger::Trigger;

// ── Interruptions ──────────────────────────────────────────────────

/// What interrupted a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptionKind {
    /// The user started speaking over playback.
    Speech,
    /// A new transcript arrived while the turn was running.
    Transcript,
    /// A tool result arrived while the turn was running.
    ToolResult,
    /// A manual prompt arrived while the turn was running.
    Manual,
    /// A control signal (pause, cancel, ...) was applied.
    Control,
}

/// An interruption recorded on an active turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interruption {
    /// Monotonic, time-based ID (nanoseconds since the Unix epoch, bumped
    /// to stay strictly increasing).
    pub id: u64,
    /// Origin label, copied from the trigger.
    pub source: String,
    pub kind: InterruptionKind,
    pub resolved: bool,
}

static LAST_INTERRUPTION_ID: AtomicU64 = AtomicU64::new(0);

impl Interruption {
    pub fn new(source: impl Into<String>, kind: InterruptionKind) -> Self {
        Self {
            id: next_interruption_id(),
            source: source.into(),
            kind,
            resolved: false,
        }
    }
}

fn next_interruption_id() -> u64 {
    let now = Utc::now()
        .timestamp_nanos_opt()
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(0);
    let mut last = LAST_INTERRUPTION_ID.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_INTERRUPTION_ID.compare_exchange_weak(
            last,
            next,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => return next,
            Err(current) => last = current,
        }
    }
}

// ── Turn ───────────────────────────────────────────────────────────

/// Terminal status of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Active,
    Finalized,
    Cancelled,
}

/// One request/response cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub id: Uuid,
    /// The trigger that started this turn.
    pub trigger: Trigger,
    /// Assistant responses in generation order (one per model call).
    pub responses: Vec<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub interruptions: Vec<Interruption>,
    /// Text the user is estimated to have heard, set at finalize.
    #[serde(default)]
    pub spoken_text: String,
    pub finalized: bool,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Turn {
    /// Start a new turn for `trigger`.
    pub fn new(trigger: Trigger) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger,
            responses: Vec::new(),
            tool_calls: Vec::new(),
            interruptions: Vec::new(),
            spoken_text: String::new(),
            finalized: false,
            cancelled: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    #[must_use]
    pub const fn status(&self) -> TurnStatus {
        if self.cancelled {
            TurnStatus::Cancelled
        } else if self.finalized {
            TurnStatus::Finalized
        } else {
            TurnStatus::Active
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.finalized || self.cancelled
    }

    /// All assistant text of this turn, concatenated.
    #[must_use]
    pub fn response_text(&self) -> String {
        self.responses.concat()
    }

    /// Mark an interruption resolved. Returns `false` if the ID is unknown.
    pub fn resolve_interruption(&mut self, id: u64) -> bool {
        self.interruptions
            .iter_mut()
            .find(|i| i.id == id)
            .is_some_and(|i| {
                i.resolved = true;
                true
            })
    }

    /// Interruptions not yet resolved.
    pub fn pending_interruptions(&self) -> impl Iterator<Item = &Interruption> {
        self.interruptions.iter().filter(|i| !i.resolved)
    }
}
