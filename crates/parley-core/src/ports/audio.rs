//! Audio output and audio input ports.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use super::tts::AudioCallback;
use crate::domain::EncodingInfo;

/// Completion handler for an output mark: `Ok` once the audio preceding the
/// mark has been played, `Err` if the mark was dropped (buffer cleared,
/// connection lost).
pub type MarkPlayed = Box<dyn FnOnce(anyhow::Result<()>) + Send>;

/// Output client that blocks on marks.
#[async_trait]
pub trait LegacyAudioOutput: Send + Sync {
    fn encoding_info(&self) -> EncodingInfo;
    async fn send_audio(&self, audio: Bytes) -> anyhow::Result<()>;
    async fn clear_buffer(&self) -> anyhow::Result<()>;
    /// Insert a mark and wait until it is played.
    async fn await_mark(&self, id: &str) -> anyhow::Result<()>;
}

/// Output client that reports marks through a completion handler.
#[async_trait]
pub trait CallbackAudioOutput: Send + Sync {
    fn encoding_info(&self) -> EncodingInfo;
    async fn send_audio(&self, audio: Bytes) -> anyhow::Result<()>;
    async fn clear_buffer(&self) -> anyhow::Result<()>;
    /// Insert a mark; `on_played` is invoked exactly once.
    async fn mark(&self, id: &str, on_played: MarkPlayed) -> anyhow::Result<()>;
}

/// A configured output client, tagged by protocol.
#[derive(Clone)]
pub enum AudioOutputClient {
    Legacy(Arc<dyn LegacyAudioOutput>),
    Callback(Arc<dyn CallbackAudioOutput>),
}

impl AudioOutputClient {
    /// Whether marks are reported through callbacks, which enables
    /// sentence-level segmentation.
    #[must_use]
    pub const fn supports_callback_marks(&self) -> bool {
        matches!(self, Self::Callback(_))
    }

    #[must_use]
    pub fn encoding_info(&self) -> EncodingInfo {
        match self {
            Self::Legacy(client) => client.encoding_info(),
            Self::Callback(client) => client.encoding_info(),
        }
    }

    #[must_use]
    pub const fn protocol_name(&self) -> &'static str {
        match self {
            Self::Legacy(_) => "legacy",
            Self::Callback(_) => "callback",
        }
    }
}

impl std::fmt::Debug for AudioOutputClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AudioOutputClient")
            .field(&self.protocol_name())
            .finish()
    }
}

/// Microphone (or telephony leg) delivering raw audio.
#[async_trait]
pub trait AudioInput: Send + Sync {
    fn encoding_info(&self) -> EncodingInfo;
    /// Deliver audio to `on_audio` until `cancel` fires or the source ends.
    async fn stream(&self, cancel: CancellationToken, on_audio: AudioCallback) -> anyhow::Result<()>;
}
