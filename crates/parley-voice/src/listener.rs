//! `TranscriptionBridge`: feeds audio input into speech-to-text and turns its
//! callbacks into events, session notifications and transcript triggers.
//!
//! STT callbacks are synchronous and may fire on any thread, so they only
//! push onto an ordered channel; a single dispatcher applies them to the
//! session in arrival order.

use std::sync::Arc;

use bytes::Bytes;
use parley_core::{
    AudioInput, EncodingInfo, TranscribeOptions, Transcriber, Trigger, TurnEvent, TurnEvents,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::session::VoiceSession;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Signal {
    SpeechStarted,
    SpeechEnded,
    Interim(String),
    Partial(String),
    Final(String),
}

/// Connects a [`Transcriber`] (and optionally an [`AudioInput`]) to a
/// [`VoiceSession`].
pub struct TranscriptionBridge {
    transcriber: Arc<dyn Transcriber>,
    input: Option<Arc<dyn AudioInput>>,
    session: VoiceSession,
    events: Arc<dyn TurnEvents>,
}

impl std::fmt::Debug for TranscriptionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptionBridge")
            .field("has_input", &self.input.is_some())
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

fn signal_options(
    encoding: EncodingInfo,
    tx: &mpsc::UnboundedSender<Signal>,
) -> TranscribeOptions {
    let send = |tx: &mpsc::UnboundedSender<Signal>| {
        let tx = tx.clone();
        move |signal: Signal| {
            if tx.send(signal).is_err() {
                trace!("Transcription bridge stopped, STT callback dropped");
            }
        }
    };

    let (started, ended) = (send(tx), send(tx));
    let (interim, partial, fin) = (send(tx), send(tx), send(tx));
    TranscribeOptions::new(encoding)
        .on_speech_started(move || started(Signal::SpeechStarted))
        .on_speech_ended(move || ended(Signal::SpeechEnded))
        .on_interim(move |text| interim(Signal::Interim(text.to_string())))
        .on_partial(move |text| partial(Signal::Partial(text.to_string())))
        .on_final(move |text| fin(Signal::Final(text.to_string())))
}

impl TranscriptionBridge {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        session: VoiceSession,
        events: Arc<dyn TurnEvents>,
    ) -> Self {
        Self {
            transcriber,
            input: None,
            session,
            events,
        }
    }

    /// Stream audio from `input` into the transcriber while running.
    #[must_use]
    pub fn with_input(mut self, input: Arc<dyn AudioInput>) -> Self {
        self.input = Some(input);
        self
    }

    /// Run until `cancel` fires or the transcriber stops.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the transcriber, the audio input or the
    /// session (a stopped session rejects transcripts).
    pub async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let encoding = self
            .input
            .as_ref()
            .map_or_else(EncodingInfo::default, |input| input.encoding_info());
        let token = cancel.child_token();
        let (tx, rx) = mpsc::unbounded_channel();
        let options = signal_options(encoding, &tx);
        drop(tx);

        let transcribe = async {
            let result = self.transcriber.transcribe(token.clone(), options).await;
            debug!(ok = result.is_ok(), "Transcription session ended");
            token.cancel();
            result
        };

        let result = tokio::try_join!(
            transcribe,
            self.pump_audio(token.clone()),
            self.dispatch(rx, token.clone()),
        );
        token.cancel();
        result.map(|_| ())
    }

    async fn pump_audio(&self, token: CancellationToken) -> anyhow::Result<()> {
        let Some(input) = &self.input else {
            return Ok(());
        };
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        let on_audio: parley_core::AudioCallback = Arc::new(move |audio| {
            if tx.send(audio).is_err() {
                trace!("Audio forwarder stopped, input frame dropped");
            }
        });

        let stream = async {
            let result = input.stream(token.clone(), on_audio).await;
            debug!(ok = result.is_ok(), "Audio input ended");
            result
        };
        let forward = async {
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    audio = rx.recv() => match audio {
                        Some(audio) => self.transcriber.send_audio(audio).await?,
                        None => break,
                    },
                }
            }
            Ok::<_, anyhow::Error>(())
        };

        tokio::try_join!(stream, forward).map(|_| ())
    }

    async fn dispatch(
        &self,
        mut rx: mpsc::UnboundedReceiver<Signal>,
        token: CancellationToken,
    ) -> anyhow::Result<()> {
        loop {
            let signal = tokio::select! {
                biased;
                signal = rx.recv() => signal,
                () = token.cancelled() => rx.try_recv().ok(),
            };
            let Some(signal) = signal else {
                return Ok(());
            };
            self.apply(signal).await?;
        }
    }

    async fn apply(&self, signal: Signal) -> anyhow::Result<()> {
        match signal {
            Signal::SpeechStarted => {
                self.events.emit(TurnEvent::SpeechStarted);
                self.session.speech_started().await;
            }
            Signal::SpeechEnded => {
                self.events.emit(TurnEvent::SpeechEnded);
                self.session.speech_ended();
            }
            Signal::Interim(text) => self.events.emit(TurnEvent::InterimTranscript { text }),
            Signal::Partial(text) => self.events.emit(TurnEvent::PartialTranscript { text }),
            Signal::Final(text) => {
                self.events
                    .emit(TurnEvent::FinalTranscript { text: text.clone() });
                if text.trim().is_empty() {
                    debug!("Empty final transcript ignored");
                    return Ok(());
                }
                self.session.handle_trigger(Trigger::transcript(text)).await?;
            }
        }
        Ok(())
    }
}
