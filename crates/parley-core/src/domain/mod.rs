//! Pure domain types: turns, triggers, tool calls and audio encodings.
//!
//! Nothing in here performs I/O or holds locks; concurrency lives in
//! `parley-voice`.

mod encoding;
mod tool;
mod trigger;
mod turn;

pub use encoding::{AudioFormat, DEFAULT_SAMPLE_RATE, EncodingInfo};
pub use tool::{ToolCall, ToolCallRecord, ToolOutcome};
pub use trigger::{ControlSignal, Trigger, TriggerKind};
pub use turn::{Interruption, InterruptionKind, Turn, TurnStatus};
