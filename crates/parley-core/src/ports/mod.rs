//! Port definitions (trait abstractions) for external collaborators.
//!
//! Vendor adapters (speech-to-text, text-to-speech, audio devices, model
//! providers, tool catalogs) implement these traits outside the core.
//!
//! # Design Rules
//!
//! - No vendor or transport types in any signature
//! - Adapter failures are opaque `anyhow::Error`s
//! - Where two protocol generations exist, a tagged enum ([`TtsClient`],
//!   [`AudioOutputClient`], [`LanguageModel`]) records which one a client
//!   speaks, so callers resolve the protocol once instead of per call

mod audio;
mod llm;
mod stt;
mod tts;

pub use audio::{
    AudioInput, AudioOutputClient, CallbackAudioOutput, LegacyAudioOutput, MarkPlayed,
};
pub use llm::{
    ChatMessage, ChatRole, LanguageModel, LlmChunk, LlmChunkStream, ModelResponse, PromptModel,
    StreamingModel, ToolExecutor,
};
pub use stt::{TranscribeOptions, Transcriber};
pub use tts::{
    AudioCallback, LegacyTtsClient, LegacyTtsStream, SpeechCallbacks, SpeechGenerator,
    SpeechGeneratorClient, TtsClient,
};
