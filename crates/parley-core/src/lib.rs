#![doc = include_str!(concat!(env!("OUT_DIR"), "/README_GENERATED.md"))]
#![deny(unused_crate_dependencies)]

pub mod domain;
pub mod events;
pub mod ports;
pub mod settings;

// Re-export commonly used types for convenience
pub use domain::{
    AudioFormat, ControlSignal, DEFAULT_SAMPLE_RATE, EncodingInfo, Interruption, InterruptionKind,
    ToolCall, ToolCallRecord, ToolOutcome, Trigger, TriggerKind, Turn, TurnStatus,
};
pub use events::{ChannelTurnEvents, NoopTurnEvents, TurnEvent, TurnEvents};
pub use ports::{
    AudioCallback, AudioInput, AudioOutputClient, CallbackAudioOutput, ChatMessage, ChatRole,
    LanguageModel, LegacyAudioOutput, LegacyTtsClient, LegacyTtsStream, LlmChunk, LlmChunkStream,
    MarkPlayed, ModelResponse, PromptModel, SpeechCallbacks, SpeechGenerator,
    SpeechGeneratorClient, StreamingModel, ToolExecutor, TranscribeOptions, Transcriber,
    TtsClient,
};
pub use settings::{
    DEFAULT_MAX_TOOL_ITERATIONS, DEFAULT_QUEUE_CAPACITY, DEFAULT_SEGMENT_BOUNDARIES,
    SettingsError, VoiceSettings, VoiceSettingsUpdate, validate_settings,
};

// Silence unused dev-dependency warnings; integration tests use it
#[cfg(test)]
use tokio_test as _;
