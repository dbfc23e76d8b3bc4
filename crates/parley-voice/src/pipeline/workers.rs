//! Worker supervision and the two forwarding workers.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::{FutureExt, StreamExt};
use parley_core::{TurnEvent, TurnEvents};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::audio_buffer::AudioItem;
use crate::error::{FacadeError, PipelineError};
use crate::output::AudioOutput;
use crate::speech_player::{SpeechPlayer, TextOrMark};
use crate::tts::TextToSpeech;

pub const GENERATE: &str = "generate";
pub const TEXT_FORWARD: &str = "text-forward";
pub const AUDIO_FORWARD: &str = "audio-forward";

pub fn failed(worker: &'static str) -> impl FnOnce(FacadeError) -> PipelineError {
    move |e| PipelineError::Worker {
        worker,
        source: e.into(),
    }
}

/// Run `work` until it finishes or `token` fires.
///
/// Cancellation is a clean exit. A panic inside `work` is caught and turned
/// into [`PipelineError::WorkerPanicked`] naming the worker.
pub async fn supervise<F>(
    worker: &'static str,
    token: CancellationToken,
    work: F,
) -> Result<(), PipelineError>
where
    F: Future<Output = Result<(), PipelineError>> + Send,
{
    let guarded = async {
        tokio::select! {
            biased;
            () = token.cancelled() => {
                debug!(worker, "Worker cancelled");
                Ok(())
            }
            result = work => result,
        }
    };

    match AssertUnwindSafe(guarded).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(PipelineError::WorkerPanicked {
            worker,
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

/// Drain segmented text into the TTS facade, then signal end of text.
pub async fn forward_text(
    player: SpeechPlayer,
    tts: Arc<TextToSpeech>,
    token: CancellationToken,
) -> Result<(), PipelineError> {
    match tts.wait_until_initialized(&token).await {
        Err(FacadeError::Cancelled) => return Ok(()),
        other => other.map_err(failed(TEXT_FORWARD))?,
    }

    let mut items = Box::pin(player.text_or_marks());
    while let Some(item) = items.next().await {
        match item {
            TextOrMark::Text(text) => tts.send_text(&text).await,
            TextOrMark::Mark(id) => tts.mark(&id).await,
        }
        .map_err(failed(TEXT_FORWARD))?;
    }

    // The text stream also ends when the turn is torn down.
    if token.is_cancelled() {
        return Ok(());
    }
    tts.end_of_text().await.map_err(failed(TEXT_FORWARD))
}

/// Drain audio and marks into the output; marks come back through
/// [`SpeechPlayer::confirm_output_mark`].
pub async fn forward_audio(
    player: SpeechPlayer,
    output: AudioOutput,
    events: Arc<dyn TurnEvents>,
    token: CancellationToken,
) -> Result<(), PipelineError> {
    let turn_id = player.turn_id();
    let mut items = Box::pin(player.audio());

    while let Some(item) = items.next().await {
        match item {
            AudioItem::Chunk(audio) => {
                player.playback_started();
                let bytes = audio.len();
                output
                    .send_audio(audio)
                    .await
                    .map_err(failed(AUDIO_FORWARD))?;
                events.emit(TurnEvent::PlaybackFrame { turn_id, bytes });
            }
            AudioItem::Mark { id, kind } => {
                let confirm = player.clone();
                let mark_id = id.clone();
                output
                    .mark(
                        &id,
                        Box::new(move |result| match result {
                            Ok(()) => {
                                confirm.confirm_output_mark(&mark_id);
                            }
                            Err(e) => {
                                debug!(mark_id = %mark_id, error = %e, "Output dropped mark");
                            }
                        }),
                    )
                    .await
                    .map_err(failed(AUDIO_FORWARD))?;
                debug!(mark_id = %id, ?kind, "Mark sent to output");
            }
        }
    }

    if !token.is_cancelled() && player.is_playback_started() {
        events.emit(TurnEvent::PlaybackEnded { turn_id });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn explode() -> Result<(), PipelineError> {
        panic!("model exploded")
    }

    async fn explode_with(code: u16) -> Result<(), PipelineError> {
        panic!("status {code}")
    }

    #[tokio::test]
    async fn panics_are_named_after_the_worker() {
        let token = CancellationToken::new();
        let result = supervise("generate", token, explode()).await;

        match result {
            Err(PipelineError::WorkerPanicked { worker, message }) => {
                assert_eq!(worker, "generate");
                assert_eq!(message, "model exploded");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn formatted_panics_keep_their_message() {
        let token = CancellationToken::new();
        let result = supervise("audio-forward", token, explode_with(7)).await;
        assert!(matches!(
            result,
            Err(PipelineError::WorkerPanicked { message, .. }) if message == "status 7"
        ));
    }

    #[tokio::test]
    async fn cancellation_is_a_clean_exit() {
        let token = CancellationToken::new();
        token.cancel();
        let result = supervise("text-forward", token, std::future::pending()).await;
        assert!(result.is_ok());
    }
}
