//! Triggers: external stimuli that start or interrupt a turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Control signals applied to an in-flight turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlSignal {
    /// Pause playback and rewind to the estimated heard position.
    Pause,
    /// Resume a paused turn.
    Resume,
    /// Mute speech output without cancelling generation.
    StopSpeaking,
    /// Cancel the turn entirely.
    Cancel,
}

/// What kind of stimulus produced a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "signal", rename_all = "snake_case")]
pub enum TriggerKind {
    /// A final transcript from speech-to-text.
    Transcript,
    /// The result of an asynchronous tool call.
    ToolResult,
    /// A prompt submitted directly (typed input, API call).
    Manual,
    /// A control signal for the active turn.
    Control(ControlSignal),
}

impl TriggerKind {
    /// Whether this trigger carries content that warrants its own turn.
    #[must_use]
    pub const fn starts_turn(self) -> bool {
        !matches!(self, Self::Control(_))
    }
}

/// An external stimulus that can start or interrupt a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    /// Unique trigger ID.
    pub id: Uuid,
    /// Kind of stimulus.
    pub kind: TriggerKind,
    /// Free-form origin label (e.g. `"stt"`, `"api"`, `"tool:weather"`).
    pub source: String,
    /// Text payload (transcript, prompt, or tool output).
    pub text: String,
    /// When the trigger was received.
    pub received_at: DateTime<Utc>,
}

impl Trigger {
    /// Create a trigger stamped with the current time.
    pub fn new(kind: TriggerKind, source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            source: source.into(),
            text: text.into(),
            received_at: Utc::now(),
        }
    }

    /// A final transcript from speech-to-text.
    pub fn transcript(text: impl Into<String>) -> Self {
        Self::new(TriggerKind::Transcript, "stt", text)
    }

    /// A manually submitted prompt.
    pub fn manual(text: impl Into<String>) -> Self {
        Self::new(TriggerKind::Manual, "manual", text)
    }

    /// The result of a tool call delivered out of band.
    pub fn tool_result(tool: &str, output: impl Into<String>) -> Self {
        Self::new(TriggerKind::ToolResult, format!("tool:{tool}"), output)
    }

    /// A control signal.
    pub fn control(signal: ControlSignal, source: impl Into<String>) -> Self {
        Self::new(TriggerKind::Control(signal), source, String::new())
    }
}
