//! Per-turn speech player: segmentation, playback marks and the estimate
//! of what the user has heard.
//!
//! The player owns one [`TextBuffer`] (model text on its way to TTS) and one
//! [`AudioBuffer`] (synthesized audio on its way to the output). Text is
//! split into segments at boundary characters; each segment is followed by
//! a mark that travels through TTS and the output and comes back as a
//! confirmation once the segment has been played.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_stream::stream;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use parley_core::{EncodingInfo, TurnEvent, TurnEvents};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::audio_buffer::{AudioBuffer, AudioItem, MarkKind};
use crate::text_buffer::TextBuffer;

/// An item of the segmented text stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextOrMark {
    Text(String),
    /// Closes the current segment; carries the mark ID.
    Mark(String),
}

#[derive(Debug, Default)]
struct PlayerState {
    /// Closed segments, in order.
    segments: Vec<String>,
    /// Text of the segment still open.
    current: String,
    /// Segments confirmed played; never exceeds `segments.len()`.
    played_marks: usize,
    /// The end-of-speech mark was played: everything was heard.
    speech_done: bool,
    last_emitted: String,
    playback_started: bool,
}

struct Inner {
    turn_id: Uuid,
    text: TextBuffer,
    audio: AudioBuffer,
    boundaries: Vec<char>,
    events: Arc<dyn TurnEvents>,
    progress_clamp: (Duration, Duration),
    state: Mutex<PlayerState>,
    emitter: Mutex<Option<CancellationToken>>,
}

/// Speech player for a single turn. Cloning is cheap.
#[derive(Clone)]
pub struct SpeechPlayer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SpeechPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechPlayer")
            .field("turn_id", &self.inner.turn_id)
            .field("boundaries", &self.inner.boundaries)
            .finish_non_exhaustive()
    }
}

impl SpeechPlayer {
    /// Create a player.
    ///
    /// `boundaries` empty disables segmentation: the whole response is one
    /// segment and only the end-of-speech mark is used.
    pub fn new(
        turn_id: Uuid,
        encoding: EncodingInfo,
        boundaries: Vec<char>,
        events: Arc<dyn TurnEvents>,
        progress_clamp: (Duration, Duration),
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                turn_id,
                text: TextBuffer::new(),
                audio: AudioBuffer::new(encoding),
                boundaries,
                events,
                progress_clamp,
                state: Mutex::new(PlayerState::default()),
                emitter: Mutex::new(None),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PlayerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: TurnEvent) {
        self.inner.events.emit(event);
    }

    pub fn turn_id(&self) -> Uuid {
        self.inner.turn_id
    }

    pub fn audio_buffer(&self) -> &AudioBuffer {
        &self.inner.audio
    }

    // ── Text side ──────────────────────────────────────────────────

    pub fn add_text_chunk(&self, chunk: impl Into<String>) -> bool {
        self.inner.text.add_chunk(chunk)
    }

    /// No more text will be added for this turn.
    pub fn end_of_text(&self) {
        self.inner.text.complete();
    }

    /// Drop text not yet segmented; the text stream ends.
    pub fn clear_text(&self) {
        self.inner.text.clear();
    }

    fn is_boundary(&self, c: char) -> bool {
        self.inner.boundaries.contains(&c)
    }

    fn extend_segment(&self, text: &str) {
        self.lock().current.push_str(text);
    }

    fn extend_closed_segment(&self, text: &str) {
        let mut state = self.lock();
        match state.segments.last_mut() {
            Some(segment) => segment.push_str(text),
            None => state.current.push_str(text),
        }
    }

    fn close_segment(&self) -> String {
        let mut state = self.lock();
        let segment = std::mem::take(&mut state.current);
        state.segments.push(segment);
        Uuid::new_v4().to_string()
    }

    /// Drain model text, split into segments, each followed by a mark.
    ///
    /// A segment closes as soon as its boundary run reaches the end of
    /// the available text, without waiting for the next chunk. Boundary
    /// characters arriving right after such a close join the closed segment.
    /// When boundaries are configured a trailing mark is always emitted once
    /// the text is complete, unless the last segment was already closed.
    pub fn text_or_marks(&self) -> impl Stream<Item = TextOrMark> + Send + 'static {
        let player = self.clone();
        stream! {
            let mut chunks = Box::pin(player.inner.text.chunks());
            let mut closing = false;
            let mut just_closed = false;

            while let Some(chunk) = chunks.next().await {
                let mut pending = String::new();
                for c in chunk.chars() {
                    let boundary = player.is_boundary(c);
                    if just_closed && !boundary {
                        if !pending.is_empty() {
                            player.extend_closed_segment(&pending);
                            yield TextOrMark::Text(std::mem::take(&mut pending));
                        }
                        just_closed = false;
                    }
                    if closing && !boundary {
                        if !pending.is_empty() {
                            player.extend_segment(&pending);
                            yield TextOrMark::Text(std::mem::take(&mut pending));
                        }
                        yield TextOrMark::Mark(player.close_segment());
                        closing = false;
                    }
                    pending.push(c);
                    closing |= boundary && !just_closed;
                }

                if just_closed {
                    // The whole chunk was boundary characters.
                    if !pending.is_empty() {
                        player.extend_closed_segment(&pending);
                        yield TextOrMark::Text(pending);
                    }
                    continue;
                }
                if !pending.is_empty() {
                    player.extend_segment(&pending);
                    yield TextOrMark::Text(pending);
                }
                if closing {
                    yield TextOrMark::Mark(player.close_segment());
                    closing = false;
                    just_closed = true;
                }
            }

            if !player.inner.boundaries.is_empty()
                && !player.inner.text.is_cleared()
                && !just_closed
            {
                yield TextOrMark::Mark(player.close_segment());
            }
        }
    }

    // ── TTS callbacks ──────────────────────────────────────────────

    /// Synthesized audio arrived.
    pub fn on_audio(&self, audio: Bytes) {
        self.emit(TurnEvent::SynthesizedSpeechFrame {
            turn_id: self.inner.turn_id,
            bytes: audio.len(),
        });
        self.inner.audio.add_audio(audio);
    }

    /// TTS delivered all audio preceding the segment mark `id`.
    pub fn on_mark(&self, id: String) {
        self.emit(TurnEvent::SynthesizedSpeechMark {
            turn_id: self.inner.turn_id,
            mark_id: id.clone(),
        });
        self.inner.audio.mark_with_id(id, MarkKind::Segment);
    }

    /// TTS delivered all audio for the turn.
    pub fn on_speech_ended(&self) {
        self.emit(TurnEvent::SynthesizedSpeechFinal {
            turn_id: self.inner.turn_id,
        });
        self.inner.audio.mark(MarkKind::EndOfSpeech);
        self.inner.audio.set_all_audio_loaded();
    }

    // ── Playback side ──────────────────────────────────────────────

    /// Audio and marks on their way to the output.
    pub fn audio(&self) -> impl Stream<Item = AudioItem> + Send + 'static {
        self.inner.audio.audio()
    }

    /// Record that the first audio reached the output and start the
    /// progress emitter. Only the first call has an effect.
    pub fn playback_started(&self) {
        {
            let mut state = self.lock();
            if state.playback_started {
                return;
            }
            state.playback_started = true;
        }
        self.emit(TurnEvent::PlaybackStarted {
            turn_id: self.inner.turn_id,
        });
        self.start_progress_emitter();
    }

    pub fn is_playback_started(&self) -> bool {
        self.lock().playback_started
    }

    /// The output played up to mark `id`.
    ///
    /// Returns `false` for unknown, duplicate or out-of-order marks; those
    /// emit nothing.
    pub fn confirm_output_mark(&self, id: &str) -> bool {
        if self.inner.audio.confirm_mark(id).is_none() {
            return false;
        }
        self.emit(TurnEvent::PlaybackMarkPlayed {
            turn_id: self.inner.turn_id,
            mark_id: id.to_string(),
        });
        self.settle_confirmed_marks();
        self.emit_progress(true);
        true
    }

    /// Bring `played_marks` in line with the marks the buffer confirmed,
    /// emitting a segment event for each newly played segment.
    fn settle_confirmed_marks(&self) {
        let confirmed = self.inner.audio.confirmed_marks(MarkKind::Segment);
        let ended = self.inner.audio.confirmed_marks(MarkKind::EndOfSpeech) > 0;

        let played: Vec<String> = {
            let mut state = self.lock();
            let target = confirmed.min(state.segments.len());
            let mut played = Vec::new();
            while state.played_marks < target {
                played.push(state.segments[state.played_marks].clone());
                state.played_marks += 1;
            }
            if ended && !state.speech_done {
                state.speech_done = true;
                if !state.current.is_empty() {
                    played.push(state.current.clone());
                }
            }
            played
        };

        for text in played {
            self.emit(TurnEvent::PlaybackTranscriptSegment {
                turn_id: self.inner.turn_id,
                text,
            });
        }
    }

    /// Confirmed segments plus a `progress` fraction (by characters) of the
    /// next one.
    pub fn approximate_spoken_text_so_far(&self, progress: f64) -> String {
        let state = self.lock();
        let mut text = state.segments[..state.played_marks].concat();
        if state.speech_done {
            text.extend(state.segments[state.played_marks..].iter().map(String::as_str));
            text.push_str(&state.current);
            return text;
        }
        let next = state
            .segments
            .get(state.played_marks)
            .unwrap_or(&state.current);
        text.push_str(char_prefix(next, progress));
        text
    }

    /// Current estimate of what the user has heard.
    pub fn spoken_text(&self) -> String {
        self.approximate_spoken_text_so_far(self.inner.audio.approximate_progress())
    }

    pub fn played_marks(&self) -> usize {
        self.lock().played_marks
    }

    /// Closed segments so far.
    pub fn segments(&self) -> Vec<String> {
        self.lock().segments.clone()
    }

    // ── Progress ───────────────────────────────────────────────────

    /// Emit a transcript update if the estimate changed, or always when
    /// `force` is set.
    fn emit_progress(&self, force: bool) {
        let text = self.spoken_text();
        let (delta, replaced) = {
            let mut state = self.lock();
            if !force && text == state.last_emitted {
                return;
            }
            let update = match text.strip_prefix(state.last_emitted.as_str()) {
                Some(suffix) => (suffix.to_string(), false),
                None => (text.clone(), true),
            };
            state.last_emitted.clone_from(&text);
            update
        };
        self.emit(TurnEvent::PlaybackTranscriptUpdated {
            turn_id: self.inner.turn_id,
            text,
            delta,
            replaced,
        });
    }

    /// Estimated time to speak one character of the current segment,
    /// clamped.
    fn poll_interval(&self) -> Duration {
        let (min, max) = self.inner.progress_clamp;
        let chars = {
            let state = self.lock();
            state
                .segments
                .get(state.played_marks)
                .unwrap_or(&state.current)
                .chars()
                .count()
        };
        let chars = u32::try_from(chars.max(1)).unwrap_or(u32::MAX);
        (self.inner.audio.current_segment_duration() / chars).clamp(min, max)
    }

    fn emitter_slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.inner
            .emitter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the background progress emitter. No-op if already running.
    pub fn start_progress_emitter(&self) {
        let token = {
            let mut slot = self.emitter_slot();
            if slot.is_some() {
                return;
            }
            let token = CancellationToken::new();
            *slot = Some(token.clone());
            token
        };

        let player = self.clone();
        tokio::spawn(async move {
            debug!(turn_id = %player.inner.turn_id, "Progress emitter started");
            loop {
                player.emit_progress(false);
                let interval = player.poll_interval();
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
            }
            debug!(turn_id = %player.inner.turn_id, "Progress emitter stopped");
        });
    }

    /// Stop the progress emitter and publish a final estimate.
    pub fn stop_progress_emitter(&self) {
        if let Some(token) = self.emitter_slot().take() {
            token.cancel();
            self.emit_progress(false);
        }
    }

    // ── Controls ───────────────────────────────────────────────────

    /// Pause playback, rewinding to the estimated heard position.
    pub fn pause(&self) -> bool {
        if !self.inner.audio.pause() {
            return false;
        }
        self.settle_confirmed_marks();
        self.emit_progress(false);
        true
    }

    pub fn resume(&self) -> bool {
        self.inner.audio.resume()
    }

    /// Stop playback for the rest of the turn. The heard estimate freezes
    /// at the played position; text keeps flowing so the turn can finish.
    pub fn stop_speaking(&self) -> bool {
        if !self.inner.audio.mute() {
            return false;
        }
        self.settle_confirmed_marks();
        self.emit_progress(false);
        true
    }

    /// Stop both buffers; pending streams end.
    pub fn stop(&self) {
        self.clear_text();
        self.inner.audio.stop();
    }
}

/// The first `fraction` of `text`, counted in characters, rounded down.
fn char_prefix(text: &str, fraction: f64) -> &str {
    let total = text.chars().count();
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let keep = ((total as f64) * fraction.clamp(0.0, 1.0)).floor() as usize;
    text.char_indices()
        .nth(keep)
        .map_or(text, |(idx, _)| &text[..idx])
}
