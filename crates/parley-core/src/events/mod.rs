//! Canonical event union emitted at the boundary of a voice turn.
//!
//! Every observable step of a turn (speech detection, transcripts, model
//! output, tool calls, synthesis, playback progress and the turn lifecycle)
//! is reported as a [`TurnEvent`] through the [`TurnEvents`] port.
//!
//! # Wire Format
//!
//! Events are serialized with a `type` tag:
//!
//! ```json
//! { "type": "playback_transcript_updated", "turnId": "…", "text": "Hello.", "delta": "Hello.", "replaced": false }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Events produced while listening to the user and running turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    // ========== Listening ==========
    /// The user started speaking.
    SpeechStarted,

    /// The user stopped speaking.
    SpeechEnded,

    /// A low-latency, unstable transcript hypothesis.
    InterimTranscript { text: String },

    /// A stable prefix of the current utterance.
    PartialTranscript { text: String },

    /// The final transcript of an utterance.
    FinalTranscript { text: String },

    // ========== Response generation ==========
    /// A chunk of model output text.
    ResponseTextSegment {
        #[serde(rename = "turnId")]
        turn_id: Uuid,
        text: String,
    },

    /// The complete model output of one generation round.
    ResponseFinal {
        #[serde(rename = "turnId")]
        turn_id: Uuid,
        text: String,
    },

    /// A tool call is about to run.
    ToolCallStarted {
        #[serde(rename = "turnId")]
        turn_id: Uuid,
        #[serde(rename = "callId")]
        call_id: String,
        name: String,
    },

    /// A tool call finished.
    ToolCallCompleted {
        #[serde(rename = "turnId")]
        turn_id: Uuid,
        #[serde(rename = "callId")]
        call_id: String,
        output: String,
    },

    /// A tool call failed.
    ToolCallFailed {
        #[serde(rename = "turnId")]
        turn_id: Uuid,
        #[serde(rename = "callId")]
        call_id: String,
        error: String,
    },

    // ========== Synthesis ==========
    /// The TTS engine produced a frame of audio.
    SynthesizedSpeechFrame {
        #[serde(rename = "turnId")]
        turn_id: Uuid,
        bytes: usize,
    },

    /// The TTS engine reached a mark.
    SynthesizedSpeechMark {
        #[serde(rename = "turnId")]
        turn_id: Uuid,
        #[serde(rename = "markId")]
        mark_id: String,
    },

    /// The TTS engine finished producing audio for this turn.
    SynthesizedSpeechFinal {
        #[serde(rename = "turnId")]
        turn_id: Uuid,
    },

    // ========== Playback ==========
    /// First audio was handed to the output device.
    PlaybackStarted {
        #[serde(rename = "turnId")]
        turn_id: Uuid,
    },

    /// A frame of audio was handed to the output device.
    PlaybackFrame {
        #[serde(rename = "turnId")]
        turn_id: Uuid,
        bytes: usize,
    },

    /// The output device confirmed a mark was played.
    PlaybackMarkPlayed {
        #[serde(rename = "turnId")]
        turn_id: Uuid,
        #[serde(rename = "markId")]
        mark_id: String,
    },

    /// The estimate of what the user has heard changed.
    ///
    /// `delta` is the new suffix when `replaced` is false, or the full text
    /// when playback regressed (after a pause/rewind).
    PlaybackTranscriptUpdated {
        #[serde(rename = "turnId")]
        turn_id: Uuid,
        text: String,
        delta: String,
        replaced: bool,
    },

    /// A whole segment of text was confirmed as played.
    PlaybackTranscriptSegment {
        #[serde(rename = "turnId")]
        turn_id: Uuid,
        text: String,
    },

    /// Playback of this turn's audio ended.
    PlaybackEnded {
        #[serde(rename = "turnId")]
        turn_id: Uuid,
    },

    // ========== Turn lifecycle ==========
    TurnStarted {
        #[serde(rename = "turnId")]
        turn_id: Uuid,
    },

    TurnCompleted {
        #[serde(rename = "turnId")]
        turn_id: Uuid,
    },

    TurnFailed {
        #[serde(rename = "turnId")]
        turn_id: Uuid,
        error: String,
    },

    TurnCancelled {
        #[serde(rename = "turnId")]
        turn_id: Uuid,
    },
}

impl TurnEvent {
    /// Get the event type name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::SpeechStarted => "speech_started",
            Self::SpeechEnded => "speech_ended",
            Self::InterimTranscript { .. } => "interim_transcript",
            Self::PartialTranscript { .. } => "partial_transcript",
            Self::FinalTranscript { .. } => "final_transcript",
            Self::ResponseTextSegment { .. } => "response_text_segment",
            Self::ResponseFinal { .. } => "response_final",
            Self::ToolCallStarted { .. } => "tool_call_started",
            Self::ToolCallCompleted { .. } => "tool_call_completed",
            Self::ToolCallFailed { .. } => "tool_call_failed",
            Self::SynthesizedSpeechFrame { .. } => "synthesized_speech_frame",
            Self::SynthesizedSpeechMark { .. } => "synthesized_speech_mark",
            Self::SynthesizedSpeechFinal { .. } => "synthesized_speech_final",
            Self::PlaybackStarted { .. } => "playback_started",
            Self::PlaybackFrame { .. } => "playback_frame",
            Self::PlaybackMarkPlayed { .. } => "playback_mark_played",
            Self::PlaybackTranscriptUpdated { .. } => "playback_transcript_updated",
            Self::PlaybackTranscriptSegment { .. } => "playback_transcript_segment",
            Self::PlaybackEnded { .. } => "playback_ended",
            Self::TurnStarted { .. } => "turn_started",
            Self::TurnCompleted { .. } => "turn_completed",
            Self::TurnFailed { .. } => "turn_failed",
            Self::TurnCancelled { .. } => "turn_cancelled",
        }
    }
}

/// Port for emitting turn events.
///
/// # Design
///
/// - **Object-safe**: `&self` for dynamic dispatch via `Arc<dyn TurnEvents>`
/// - **Fire-and-forget**: no `Result`; implementations handle delivery failures
/// - **Non-blocking**: called from buffer callbacks, so must never await
pub trait TurnEvents: Send + Sync {
    fn emit(&self, event: TurnEvent);
}

/// Event sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTurnEvents;

impl TurnEvents for NoopTurnEvents {
    fn emit(&self, _event: TurnEvent) {}
}

/// Event sink backed by an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelTurnEvents {
    tx: mpsc::UnboundedSender<TurnEvent>,
}

impl ChannelTurnEvents {
    /// Create the sink and the receiver that consumes it.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TurnEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TurnEvents for ChannelTurnEvents {
    fn emit(&self, event: TurnEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Turn event receiver dropped");
        }
    }
}
