//! Audio chunks and marks with pause, rewind and mark confirmation.
//!
//! # Playheads
//!
//! - `internal`: number of chunks handed downstream by [`AudioBuffer::audio`]
//! - `external`: number of chunks confirmed played through marks, or
//!   estimated played when pausing
//!
//! `external <= internal <= chunks.len()` holds after every operation.
//!
//! # Marks
//!
//! Marks sit between chunks (`position` is the chunk count when the mark was
//! added). They are broadcast in position order once `internal` reaches them,
//! and confirmed in position order: confirmation never skips a mark that has
//! not been broadcast yet.
//!
//! # Muting
//!
//! [`AudioBuffer::mute`] freezes the heard estimate and drops every chunk
//! not yet played. Marks and the end of speech are still tracked, so the
//! stream ends once all audio is loaded without any output confirmation.
//!
//! # Wakeups
//!
//! Every mutation calls `Notify::notify_one`, which stores at most one
//! permit, so bursts of mutations collapse into a single wakeup. The consumer
//! re-reads state under the lock after each wakeup.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_stream::stream;
use bytes::Bytes;
use futures_util::Stream;
use parley_core::EncodingInfo;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

/// What a mark stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkKind {
    /// End of a text segment.
    Segment,
    /// All synthesized audio for the turn has been added.
    EndOfSpeech,
}

/// An item handed downstream by [`AudioBuffer::audio`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioItem {
    Chunk(Bytes),
    Mark { id: String, kind: MarkKind },
}

#[derive(Debug, Clone)]
struct Mark {
    id: String,
    kind: MarkKind,
    position: usize,
    broadcasted: bool,
    confirmed: bool,
}

#[derive(Debug, Default)]
struct AudioState {
    chunks: Vec<Bytes>,
    marks: Vec<Mark>,
    internal: usize,
    external: usize,
    all_audio_loaded: bool,
    paused: bool,
    muted: bool,
    stopped: bool,
    /// Wall-clock anchor for estimating playback since `external`.
    anchor: Option<Instant>,
    /// Last fraction reported by `approximate_progress` for the current
    /// segment; reset whenever `external` moves.
    last_progress: f64,
}

impl AudioState {
    const fn is_done(&self) -> bool {
        self.all_audio_loaded && (self.muted || self.external == self.chunks.len())
    }

    /// Chunks estimated played by `now`, counting whole chunks only: a
    /// partially played chunk is replayed.
    fn estimate_played(&self, encoding: EncodingInfo, now: Instant) -> usize {
        if self.paused {
            return self.external;
        }
        let elapsed = self
            .anchor
            .map_or(Duration::ZERO, |anchor| now.saturating_duration_since(anchor));
        let mut budget = encoding.bytes_for(elapsed);

        let mut played = self.external;
        while played < self.internal {
            let len = self.chunks[played].len() as u64;
            if len > budget {
                break;
            }
            budget -= len;
            played += 1;
        }
        played
    }

    /// Index of the first mark that has not been broadcast.
    fn next_unbroadcast(&self) -> Option<usize> {
        self.marks.iter().position(|m| !m.broadcasted)
    }

    /// Position closing the segment that starts at `external`.
    fn segment_end(&self) -> usize {
        self.marks
            .iter()
            .find(|m| !m.confirmed && m.position > self.external)
            .map_or(self.chunks.len(), |m| m.position)
    }

    fn bytes_between(&self, from: usize, to: usize) -> u64 {
        self.chunks[from..to].iter().map(|c| c.len() as u64).sum()
    }

    fn set_external(&mut self, position: usize, now: Instant) {
        if position > self.external {
            self.external = position;
            self.last_progress = 0.0;
        }
        self.anchor = Some(now);
    }
}

enum Step {
    Yield(AudioItem),
    Wait,
    End,
}

/// Point-in-time copy of a mark, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkSnapshot {
    pub id: String,
    pub kind: MarkKind,
    pub position: usize,
    pub broadcasted: bool,
    pub confirmed: bool,
}

/// Point-in-time copy of buffer state, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBufferSnapshot {
    pub chunks: usize,
    pub internal_playhead: usize,
    pub external_playhead: usize,
    pub all_audio_loaded: bool,
    pub paused: bool,
    pub muted: bool,
    pub stopped: bool,
    pub marks: Vec<MarkSnapshot>,
}

struct Inner {
    encoding: EncodingInfo,
    state: Mutex<AudioState>,
    notify: Notify,
}

/// Per-turn audio buffer shared by the TTS callbacks, the audio-forward
/// worker and the controls. Cloning is cheap.
#[derive(Clone)]
pub struct AudioBuffer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AudioBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioBuffer")
            .field("encoding", &self.inner.encoding)
            .field("state", &self.snapshot())
            .finish()
    }
}

impl AudioBuffer {
    #[must_use]
    pub fn new(encoding: EncodingInfo) -> Self {
        Self {
            inner: Arc::new(Inner {
                encoding,
                state: Mutex::new(AudioState::default()),
                notify: Notify::new(),
            }),
        }
    }

    #[must_use]
    pub fn encoding(&self) -> EncodingInfo {
        self.inner.encoding
    }

    fn lock(&self) -> MutexGuard<'_, AudioState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn wake(&self) {
        self.inner.notify.notify_one();
    }

    // ── Producer side ──────────────────────────────────────────────

    /// Append a chunk of audio. Ignored once muted or stopped.
    pub fn add_audio(&self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        {
            let mut state = self.lock();
            if state.stopped || state.muted {
                return;
            }
            state.chunks.push(chunk);
        }
        self.wake();
    }

    /// Append a mark after the chunks added so far and return its ID.
    pub fn mark(&self, kind: MarkKind) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.mark_with_id(id.clone(), kind);
        id
    }

    /// Append a mark with a caller-chosen ID.
    pub fn mark_with_id(&self, id: impl Into<String>, kind: MarkKind) {
        {
            let mut state = self.lock();
            if state.stopped {
                return;
            }
            let position = state.chunks.len();
            state.marks.push(Mark {
                id: id.into(),
                kind,
                position,
                broadcasted: false,
                confirmed: false,
            });
        }
        self.wake();
    }

    /// Signal that no more audio will be added.
    pub fn set_all_audio_loaded(&self) {
        self.lock().all_audio_loaded = true;
        self.wake();
    }

    // ── Consumer side ──────────────────────────────────────────────

    fn next_step(&self) -> Step {
        let mut state = self.lock();
        if state.stopped {
            return Step::End;
        }
        // A pause may estimate the whole turn as played and a mute drops the
        // rest; once done there is nothing left to resume.
        if state.paused || state.muted {
            return if state.is_done() { Step::End } else { Step::Wait };
        }

        if let Some(idx) = state.next_unbroadcast() {
            if state.marks[idx].position <= state.internal {
                let internal = state.internal;
                let mark = &mut state.marks[idx];
                mark.broadcasted = true;
                debug_assert!(mark.position <= internal);
                return Step::Yield(AudioItem::Mark {
                    id: mark.id.clone(),
                    kind: mark.kind,
                });
            }
        }

        if state.internal < state.chunks.len() {
            let chunk = state.chunks[state.internal].clone();
            state.internal += 1;
            if state.anchor.is_none() {
                state.anchor = Some(Instant::now());
            }
            return Step::Yield(AudioItem::Chunk(chunk));
        }

        if state.is_done() {
            Step::End
        } else {
            Step::Wait
        }
    }

    /// Lazily hand out chunks and marks in order.
    ///
    /// Waits while paused or starved. Ends when the buffer is stopped, or
    /// once all audio is loaded and every chunk has been confirmed played
    /// (or dropped by [`mute`](Self::mute)).
    /// After a pause rewinds the playheads, chunks and marks past the
    /// estimate are handed out again on resume.
    pub fn audio(&self) -> impl Stream<Item = AudioItem> + Send + 'static {
        let buffer = self.clone();
        stream! {
            loop {
                match buffer.next_step() {
                    Step::Yield(item) => yield item,
                    Step::Wait => buffer.inner.notify.notified().await,
                    Step::End => break,
                }
            }
        }
    }

    /// Confirm that the output played up to the mark with `id`.
    ///
    /// Returns the mark's kind, or `None` if the mark is unknown, already
    /// confirmed, lies beyond a mark that has not been broadcast, or the
    /// buffer is muted.
    pub fn confirm_mark(&self, id: &str) -> Option<MarkKind> {
        self.confirm_mark_at(id, Instant::now())
    }

    fn confirm_mark_at(&self, id: &str, now: Instant) -> Option<MarkKind> {
        let kind = {
            let mut state = self.lock();
            if state.muted {
                return None;
            }
            let idx = state
                .marks
                .iter()
                .take_while(|m| m.broadcasted)
                .position(|m| m.id == id)?;
            if state.marks[idx].confirmed {
                return None;
            }
            state.marks[idx].confirmed = true;
            let (position, kind) = (state.marks[idx].position, state.marks[idx].kind);
            state.set_external(position, now);
            kind
        };
        self.wake();
        Some(kind)
    }

    // ── Controls ───────────────────────────────────────────────────

    /// Pause and rewind both playheads to the estimated played position.
    ///
    /// Returns `false` if already paused, muted, stopped or done.
    pub fn pause(&self) -> bool {
        self.pause_at(Instant::now())
    }

    fn pause_at(&self, now: Instant) -> bool {
        let encoding = self.inner.encoding;
        let mut state = self.lock();
        if state.paused || state.muted || state.stopped || state.is_done() {
            return false;
        }

        let played = state.estimate_played(encoding, now);
        let rewound = state.internal - played;
        state.external = played;
        state.internal = played;
        state.paused = true;
        state.last_progress = 0.0;

        for mark in &mut state.marks {
            if mark.position > played {
                mark.broadcasted = false;
            } else if mark.broadcasted {
                // Estimated played: settle it so later marks stay reachable.
                mark.confirmed = true;
            }
        }

        debug!(playhead = played, rewound, "Audio buffer paused");
        true
    }

    /// Stop playing for the rest of the turn without ending it.
    ///
    /// The external playhead settles on the estimated played position, as
    /// with [`pause`](Self::pause); everything after it is dropped. Returns
    /// `false` if already muted or stopped.
    pub fn mute(&self) -> bool {
        self.mute_at(Instant::now())
    }

    fn mute_at(&self, now: Instant) -> bool {
        let encoding = self.inner.encoding;
        {
            let mut state = self.lock();
            if state.muted || state.stopped {
                return false;
            }

            let played = state.estimate_played(encoding, now);
            let dropped = state.chunks.len() - played;
            state.external = played;
            state.internal = state.chunks.len();
            state.paused = false;
            state.muted = true;
            state.last_progress = 0.0;
            for mark in &mut state.marks {
                if mark.broadcasted && mark.position <= played {
                    mark.confirmed = true;
                }
            }
            debug!(playhead = played, dropped, "Audio buffer muted");
        }
        self.wake();
        true
    }

    /// Resume after [`pause`](Self::pause). Returns `false` if not paused,
    /// stopped or done.
    pub fn resume(&self) -> bool {
        {
            let mut state = self.lock();
            if !state.paused || state.stopped || state.is_done() {
                return false;
            }
            state.paused = false;
            state.anchor = Some(Instant::now());
        }
        self.wake();
        true
    }

    /// Stop the buffer for good and release every waiter.
    pub fn stop(&self) {
        self.lock().stopped = true;
        self.inner.notify.notify_waiters();
        self.wake();
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Fraction of the current unplayed segment estimated played by `now`.
    ///
    /// The segment runs from the external playhead to the next unconfirmed
    /// mark. While playing the reported value never decreases within a
    /// segment; while paused it is exactly `0.0`.
    pub fn approximate_progress(&self) -> f64 {
        self.approximate_progress_at(Instant::now())
    }

    fn approximate_progress_at(&self, now: Instant) -> f64 {
        let mut state = self.lock();
        if state.paused || state.muted || state.stopped {
            state.last_progress = 0.0;
            return 0.0;
        }
        let Some(anchor) = state.anchor else {
            return 0.0;
        };

        let end = state.segment_end();
        let segment = state.bytes_between(state.external, end);
        if segment == 0 {
            return state.last_progress;
        }

        // Audio not yet handed downstream cannot have been played.
        let handed = state.bytes_between(state.external, state.internal.min(end));
        let played = self
            .inner
            .encoding
            .bytes_for(now.saturating_duration_since(anchor))
            .min(handed);

        #[allow(clippy::cast_precision_loss)]
        let fraction = (played as f64 / segment as f64).clamp(0.0, 1.0);
        state.last_progress = state.last_progress.max(fraction);
        state.last_progress
    }

    /// Playback duration of the current unplayed segment.
    pub fn current_segment_duration(&self) -> Duration {
        let state = self.lock();
        let end = state.segment_end();
        self.inner
            .encoding
            .duration_of(state.bytes_between(state.external, end))
    }

    /// Number of confirmed marks of `kind`.
    pub fn confirmed_marks(&self, kind: MarkKind) -> usize {
        self.lock()
            .marks
            .iter()
            .filter(|m| m.kind == kind && m.confirmed)
            .count()
    }

    pub fn is_done(&self) -> bool {
        self.lock().is_done()
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    pub fn snapshot(&self) -> AudioBufferSnapshot {
        let state = self.lock();
        AudioBufferSnapshot {
            chunks: state.chunks.len(),
            internal_playhead: state.internal,
            external_playhead: state.external,
            all_audio_loaded: state.all_audio_loaded,
            paused: state.paused,
            muted: state.muted,
            stopped: state.stopped,
            marks: state
                .marks
                .iter()
                .map(|m| MarkSnapshot {
                    id: m.id.clone(),
                    kind: m.kind,
                    position: m.position,
                    broadcasted: m.broadcasted,
                    confirmed: m.confirmed,
                })
                .collect(),
        }
    }
}
