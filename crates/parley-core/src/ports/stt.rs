//! Speech-to-text port.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::domain::EncodingInfo;

type TextCallback = Arc<dyn Fn(&str) + Send + Sync>;
type SignalCallback = Arc<dyn Fn() + Send + Sync>;

/// Options for a transcription session.
///
/// Every callback is optional; unset callbacks are skipped.
#[derive(Clone, Default)]
pub struct TranscribeOptions {
    /// Encoding of the audio that will be sent.
    pub encoding: EncodingInfo,
    pub on_speech_started: Option<SignalCallback>,
    pub on_speech_ended: Option<SignalCallback>,
    /// Unstable hypothesis for the current utterance.
    pub on_interim: Option<TextCallback>,
    /// Stable prefix of the current utterance.
    pub on_partial: Option<TextCallback>,
    /// Final transcript of an utterance.
    pub on_final: Option<TextCallback>,
}

impl TranscribeOptions {
    #[must_use]
    pub fn new(encoding: EncodingInfo) -> Self {
        Self {
            encoding,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn on_speech_started(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_speech_started = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_speech_ended(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_speech_ended = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_interim(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_interim = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_partial(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_partial = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_final(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_final = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for TranscribeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscribeOptions")
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

/// Streaming speech-to-text engine.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Run a transcription session until `cancel` fires or the engine stops.
    async fn transcribe(
        &self,
        cancel: CancellationToken,
        options: TranscribeOptions,
    ) -> anyhow::Result<()>;

    /// Feed audio into the running session.
    async fn send_audio(&self, audio: Bytes) -> anyhow::Result<()>;
}
