//! Text-to-speech client ports.
//!
//! # Protocols
//!
//! - **Legacy** ([`LegacyTtsClient`]): open a stream, push text, flush to force
//!   synthesis of buffered text, close. Audio arrives through the callback
//!   given to `open_stream`. There are no marks.
//! - **Generator** ([`SpeechGeneratorClient`]): a per-turn speech generator
//!   with explicit marks, end-of-text and cancellation. Audio, reached marks
//!   and end of speech are reported through [`SpeechCallbacks`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::EncodingInfo;

/// Callback receiving synthesized audio.
pub type AudioCallback = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Callbacks supplied by the core when a speech generator is created.
#[derive(Clone)]
pub struct SpeechCallbacks {
    /// A frame of synthesized audio.
    pub on_audio: AudioCallback,
    /// All audio preceding the mark with this ID has been delivered.
    pub on_mark: Arc<dyn Fn(String) + Send + Sync>,
    /// All audio for the submitted text has been delivered.
    pub on_speech_ended: Arc<dyn Fn() + Send + Sync>,
}

impl std::fmt::Debug for SpeechCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechCallbacks").finish_non_exhaustive()
    }
}

/// Legacy streaming TTS client.
#[async_trait]
pub trait LegacyTtsClient: Send + Sync {
    async fn open_stream(
        &self,
        encoding: EncodingInfo,
        on_audio: AudioCallback,
    ) -> anyhow::Result<Box<dyn LegacyTtsStream>>;
}

/// An open legacy TTS stream.
///
/// `close` returns once all buffered audio has been delivered.
#[async_trait]
pub trait LegacyTtsStream: Send + Sync {
    async fn send_text(&self, text: &str) -> anyhow::Result<()>;
    async fn flush_buffer(&self) -> anyhow::Result<()>;
    async fn close(&self) -> anyhow::Result<()>;
}

/// Callback-driven TTS client.
#[async_trait]
pub trait SpeechGeneratorClient: Send + Sync {
    async fn new_speech_generator(
        &self,
        encoding: EncodingInfo,
        callbacks: SpeechCallbacks,
    ) -> anyhow::Result<Box<dyn SpeechGenerator>>;
}

/// A per-turn speech generator.
#[async_trait]
pub trait SpeechGenerator: Send + Sync {
    async fn send_text(&self, text: &str) -> anyhow::Result<()>;
    /// Request `on_mark(id)` once all audio for text sent so far is delivered.
    async fn mark(&self, id: &str) -> anyhow::Result<()>;
    async fn end_of_text(&self) -> anyhow::Result<()>;
    /// Abort synthesis; no further callbacks should fire.
    async fn cancel(&self) -> anyhow::Result<()>;
    async fn close(&self) -> anyhow::Result<()>;
}

/// A configured TTS client, tagged by protocol.
#[derive(Clone)]
pub enum TtsClient {
    Legacy(Arc<dyn LegacyTtsClient>),
    Generator(Arc<dyn SpeechGeneratorClient>),
}

impl TtsClient {
    /// Whether the client reports marks aligned with its audio.
    #[must_use]
    pub const fn supports_marks(&self) -> bool {
        matches!(self, Self::Generator(_))
    }

    #[must_use]
    pub const fn protocol_name(&self) -> &'static str {
        match self {
            Self::Legacy(_) => "legacy",
            Self::Generator(_) => "generator",
        }
    }
}

impl std::fmt::Debug for TtsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TtsClient").field(&self.protocol_name()).finish()
    }
}
