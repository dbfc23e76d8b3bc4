//! `TextToSpeech` facade over the two TTS client protocols.
//!
//! The protocol is fixed when the facade is built from a [`TtsClient`]
//! snapshot, so reconfiguring the session mid-turn only affects later turns.
//!
//! | Operation     | Legacy stream               | Generator            | No client                 |
//! |---------------|-----------------------------|----------------------|---------------------------|
//! | `send_text`   | `send_text`                 | `send_text`          | dropped                   |
//! | `mark`        | flush, then loop back       | `mark`               | looped back immediately   |
//! | `end_of_text` | flush, close, speech ended  | `end_of_text`        | speech ended immediately  |
//! | `cancel`      | `close`                     | `cancel`             | no-op                     |
//!
//! The session is opened lazily on first use; [`TextToSpeech::wait_until_initialized`]
//! lets a caller wait for it while staying responsive to cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parley_core::{EncodingInfo, LegacyTtsStream, SpeechCallbacks, SpeechGenerator, TtsClient};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::FacadeError;
use crate::speech_player::SpeechPlayer;

enum Session {
    Legacy(Box<dyn LegacyTtsStream>),
    Generator(Box<dyn SpeechGenerator>),
}

/// Per-turn text-to-speech facade.
pub struct TextToSpeech {
    client: Option<TtsClient>,
    encoding: EncodingInfo,
    callbacks: SpeechCallbacks,
    session: OnceCell<Session>,
    muted: Arc<AtomicBool>,
    closed: AtomicBool,
    cancelled: AtomicBool,
}

impl std::fmt::Debug for TextToSpeech {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextToSpeech")
            .field("client", &self.client)
            .field("initialized", &self.session.initialized())
            .field("muted", &self.is_muted())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl TextToSpeech {
    /// Build the facade. Audio reaching `callbacks.on_audio` is gated by
    /// [`mute`](Self::mute).
    pub fn new(
        client: Option<TtsClient>,
        encoding: EncodingInfo,
        callbacks: SpeechCallbacks,
    ) -> Self {
        let muted = Arc::new(AtomicBool::new(false));
        let gate = Arc::clone(&muted);
        let forward = callbacks.on_audio;
        let callbacks = SpeechCallbacks {
            on_audio: Arc::new(move |audio| {
                if !gate.load(Ordering::Acquire) {
                    forward(audio);
                }
            }),
            on_mark: callbacks.on_mark,
            on_speech_ended: callbacks.on_speech_ended,
        };

        Self {
            client,
            encoding,
            callbacks,
            session: OnceCell::new(),
            muted,
            closed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Build the facade with callbacks feeding `player`.
    pub fn for_player(
        client: Option<TtsClient>,
        encoding: EncodingInfo,
        player: &SpeechPlayer,
    ) -> Self {
        let (audio, mark, ended) = (player.clone(), player.clone(), player.clone());
        Self::new(
            client,
            encoding,
            SpeechCallbacks {
                on_audio: Arc::new(move |bytes| audio.on_audio(bytes)),
                on_mark: Arc::new(move |id| mark.on_mark(id)),
                on_speech_ended: Arc::new(move || ended.on_speech_ended()),
            },
        )
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    /// Whether the client reports marks aligned with its audio.
    pub fn supports_marks(&self) -> bool {
        self.client.as_ref().is_some_and(TtsClient::supports_marks)
    }

    async fn open(&self, client: &TtsClient) -> Result<Session, FacadeError> {
        let protocol = client.protocol_name();
        let session = match client {
            TtsClient::Legacy(client) => client
                .open_stream(self.encoding, Arc::clone(&self.callbacks.on_audio))
                .await
                .map(Session::Legacy),
            TtsClient::Generator(client) => client
                .new_speech_generator(self.encoding, self.callbacks.clone())
                .await
                .map(Session::Generator),
        }
        .map_err(|source| FacadeError::TtsInit { protocol, source })?;

        // close() ran while the session was opening and found nothing to close.
        if self.closed.load(Ordering::Acquire) {
            let result = match &session {
                Session::Legacy(stream) => stream.close().await,
                Session::Generator(generator) => generator.close().await,
            };
            if let Err(e) = result {
                warn!(error = %e, protocol, "Closing late TTS session failed");
            }
            return Err(FacadeError::Closed);
        }

        debug!(protocol, encoding = ?self.encoding, "TTS session opened");
        Ok(session)
    }

    /// The open session, opening it on first use. `None` without a client.
    async fn session(&self) -> Result<Option<&Session>, FacadeError> {
        let Some(client) = &self.client else {
            return Ok(None);
        };
        if self.closed.load(Ordering::Acquire) {
            return Err(FacadeError::Closed);
        }
        self.session
            .get_or_try_init(|| self.open(client))
            .await
            .map(Some)
    }

    /// Wait until the session is open, or until `cancel` fires.
    pub async fn wait_until_initialized(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), FacadeError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(FacadeError::Cancelled),
            result = self.session() => result.map(|_| ()),
        }
    }

    pub async fn send_text(&self, text: &str) -> Result<(), FacadeError> {
        match self.session().await? {
            None => {
                trace!(len = text.len(), "No TTS client, text dropped");
                Ok(())
            }
            Some(Session::Legacy(stream)) => stream.send_text(text).await,
            Some(Session::Generator(generator)) => generator.send_text(text).await,
        }
        .map_err(|source| FacadeError::Tts {
            operation: "send_text",
            source,
        })
    }

    /// Request a mark once the audio for text sent so far has been produced.
    pub async fn mark(&self, id: &str) -> Result<(), FacadeError> {
        match self.session().await? {
            None => {}
            Some(Session::Legacy(stream)) => {
                if let Err(e) = stream.flush_buffer().await {
                    warn!(error = %e, mark_id = id, "TTS flush failed, continuing");
                }
            }
            Some(Session::Generator(generator)) => {
                return generator.mark(id).await.map_err(|source| FacadeError::Tts {
                    operation: "mark",
                    source,
                });
            }
        }
        (self.callbacks.on_mark)(id.to_string());
        Ok(())
    }

    /// No more text for this turn.
    pub async fn end_of_text(&self) -> Result<(), FacadeError> {
        match self.session().await? {
            None => {}
            Some(Session::Legacy(stream)) => {
                if let Err(e) = stream.flush_buffer().await {
                    warn!(error = %e, "TTS flush failed, continuing");
                }
                self.close().await?;
            }
            Some(Session::Generator(generator)) => {
                return generator
                    .end_of_text()
                    .await
                    .map_err(|source| FacadeError::Tts {
                        operation: "end_of_text",
                        source,
                    });
            }
        }
        (self.callbacks.on_speech_ended)();
        Ok(())
    }

    /// Abort synthesis. Only the first call reaches the client.
    pub async fn cancel(&self) -> Result<(), FacadeError> {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        match self.session.get() {
            None => Ok(()),
            Some(Session::Legacy(_)) => self.close().await,
            Some(Session::Generator(generator)) => {
                generator
                    .cancel()
                    .await
                    .map_err(|source| FacadeError::Tts {
                        operation: "cancel",
                        source,
                    })
            }
        }
    }

    /// Release the session. Only the first call reaches the client; later
    /// calls (and calls before the session opened) succeed without effect.
    pub async fn close(&self) -> Result<(), FacadeError> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        let result = match self.session.get() {
            None => return Ok(()),
            Some(Session::Legacy(stream)) => stream.close().await,
            Some(Session::Generator(generator)) => generator.close().await,
        };
        debug!("TTS session closed");
        result.map_err(|source| FacadeError::Tts {
            operation: "close",
            source,
        })
    }

    /// Stop forwarding synthesized audio without closing the session.
    pub fn mute(&self) {
        self.muted.store(true, Ordering::Release);
    }

    pub fn unmute(&self) {
        self.muted.store(false, Ordering::Release);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }
}
