#![doc = include_str!(concat!(env!("OUT_DIR"), "/README_GENERATED.md"))]
#![deny(unused_crate_dependencies)]

pub mod audio_buffer;
pub mod conversation;
pub mod error;
pub mod listener;
pub mod output;
pub mod pipeline;
pub mod session;
pub mod speech_player;
pub mod text_buffer;
pub mod trigger_player;
pub mod tts;

// Re-export key types for convenience
pub use audio_buffer::{AudioBuffer, AudioBufferSnapshot, AudioItem, MarkKind, MarkSnapshot};
pub use conversation::{ActiveTurn, Conversation};
pub use error::{ConversationError, FacadeError, PipelineError, QueueError, SessionError};
pub use listener::TranscriptionBridge;
pub use output::AudioOutput;
pub use pipeline::{PipelineConfig, PipelineState, ResponsePipeline, build_messages};
pub use session::VoiceSession;
pub use speech_player::{SpeechPlayer, TextOrMark};
pub use text_buffer::TextBuffer;
pub use trigger_player::{TriggerPlayer, TurnRunner};
pub use tts::TextToSpeech;

// Silence unused dev-dependency warnings; integration tests use them
#[cfg(test)]
use serde_json as _;
#[cfg(test)]
use tracing_subscriber as _;
