//! Response pipeline: runs one turn with three concurrent workers.
//!
//! ```text
//!  generate ──text──▶ SpeechPlayer ──text/marks──▶ text-forward ──▶ TextToSpeech
//!                          ▲                                            │
//!                          └──────────── audio / marks / speech ended ◀─┘
//!                          │
//!                          └──audio/marks──▶ audio-forward ──▶ AudioOutput
//!                                                  ▲               │
//!                                                  └─ confirm_mark ◀┘
//! ```
//!
//! # Lifecycle
//!
//! `Created → Running → Finalizing → Done`. Cancellation is a separate flag
//! that can be raised at any point before `Done`.
//!
//! The workers share one child token of the caller's token. The first worker
//! error or panic cancels it so the siblings unwind. Finalization runs after
//! all three have joined, whatever happened before.

mod generate;
mod workers;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use parley_core::{
    AudioOutputClient, EncodingInfo, LanguageModel, ToolExecutor, TtsClient, Turn, TurnEvent,
    TurnEvents, VoiceSettings,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::output::AudioOutput;
use crate::speech_player::SpeechPlayer;
use crate::tts::TextToSpeech;

pub use generate::build_messages;

/// Collaborators and limits for one turn, captured when the turn starts.
#[derive(Clone)]
pub struct PipelineConfig {
    pub llm: Option<LanguageModel>,
    pub tools: Option<Arc<dyn ToolExecutor>>,
    pub tts: Option<TtsClient>,
    pub output: Option<AudioOutputClient>,
    /// Used only when the output reports marks through callbacks.
    pub segment_boundaries: Vec<char>,
    pub max_tool_iterations: u32,
    pub progress_clamp: (Duration, Duration),
    pub system_prompt: Option<String>,
    /// Encoding used when no output client is configured.
    pub default_encoding: EncodingInfo,
}

impl PipelineConfig {
    /// Limits from `settings`, no collaborators.
    pub fn from_settings(settings: &VoiceSettings) -> Self {
        Self {
            llm: None,
            tools: None,
            tts: None,
            output: None,
            segment_boundaries: settings.effective_segment_boundaries(),
            max_tool_iterations: settings.effective_max_tool_iterations(),
            progress_clamp: settings.effective_progress_clamp(),
            system_prompt: settings.system_prompt.clone(),
            default_encoding: settings.effective_default_encoding(),
        }
    }

    #[must_use]
    pub fn with_llm(mut self, llm: LanguageModel) -> Self {
        self.llm = Some(llm);
        self
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Arc<dyn ToolExecutor>) -> Self {
        self.tools = Some(tools);
        self
    }

    #[must_use]
    pub fn with_tts(mut self, tts: TtsClient) -> Self {
        self.tts = Some(tts);
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: AudioOutputClient) -> Self {
        self.output = Some(output);
        self
    }
}

impl std::fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("llm", &self.llm)
            .field("tools", &self.tools.is_some())
            .field("tts", &self.tts)
            .field("output", &self.output)
            .field("segment_boundaries", &self.segment_boundaries)
            .field("max_tool_iterations", &self.max_tool_iterations)
            .finish_non_exhaustive()
    }
}

/// Lifecycle state of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Running,
    Finalizing,
    Done,
}

/// Per-turn resources the controls act on.
struct TurnResources {
    player: SpeechPlayer,
    tts: Arc<TextToSpeech>,
    output: AudioOutput,
    token: CancellationToken,
}

type CancelCallback = Box<dyn FnOnce() + Send>;

struct Inner {
    config: PipelineConfig,
    events: Arc<dyn TurnEvents>,
    state: Mutex<PipelineState>,
    resources: Mutex<Option<Arc<TurnResources>>>,
    cancelled: AtomicBool,
    on_cancel: Mutex<Option<CancelCallback>>,
}

/// Runs one turn. Cloning is cheap; clones control the same run.
#[derive(Clone)]
pub struct ResponsePipeline {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ResponsePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponsePipeline")
            .field("state", &self.state())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ResponsePipeline {
    pub fn new(config: PipelineConfig, events: Arc<dyn TurnEvents>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                events,
                state: Mutex::new(PipelineState::Created),
                resources: Mutex::new(None),
                cancelled: AtomicBool::new(false),
                on_cancel: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> PipelineState {
        *lock(&self.inner.state)
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Register the callback invoked by the first [`cancel`](Self::cancel).
    pub fn on_cancel(&self, callback: impl FnOnce() + Send + 'static) {
        *lock(&self.inner.on_cancel) = Some(Box::new(callback));
    }

    fn resources(&self) -> Option<Arc<TurnResources>> {
        lock(&self.inner.resources).clone()
    }

    /// The speech player of the running turn.
    pub fn speech_player(&self) -> Option<SpeechPlayer> {
        self.resources().map(|r| r.player.clone())
    }

    fn set_state(&self, state: PipelineState) {
        *lock(&self.inner.state) = state;
    }

    /// Run `turn` to completion.
    ///
    /// Always returns the turn, finalized or cancelled, together with every
    /// worker and finalize error joined into one.
    #[tracing::instrument(skip_all, fields(turn_id = %turn.id))]
    pub async fn run(
        &self,
        parent: &CancellationToken,
        turn: Turn,
        history: &[Turn],
    ) -> (Turn, Result<(), PipelineError>) {
        {
            let mut state = lock(&self.inner.state);
            if *state != PipelineState::Created {
                return (turn, Err(PipelineError::AlreadyRan));
            }
            *state = PipelineState::Running;
        }

        let config = &self.inner.config;
        let events = Arc::clone(&self.inner.events);
        let turn_id = turn.id;

        // 1. Per-turn resources.
        let output = AudioOutput::new(config.output.clone(), config.default_encoding);
        let encoding = output.encoding_info();
        let boundaries = if output.supports_callback_marks() {
            config.segment_boundaries.clone()
        } else {
            Vec::new()
        };
        let player = SpeechPlayer::new(
            turn_id,
            encoding,
            boundaries,
            Arc::clone(&events),
            config.progress_clamp,
        );
        let tts = Arc::new(TextToSpeech::for_player(
            config.tts.clone(),
            encoding,
            &player,
        ));
        let token = parent.child_token();
        *lock(&self.inner.resources) = Some(Arc::new(TurnResources {
            player: player.clone(),
            tts: Arc::clone(&tts),
            output: output.clone(),
            token: token.clone(),
        }));
        if self.is_cancelled() {
            token.cancel();
        }

        tokio::spawn({
            let (token, player) = (token.clone(), player.clone());
            async move {
                token.cancelled().await;
                player.stop();
            }
        });

        info!(
            llm = config.llm.as_ref().map(LanguageModel::protocol_name),
            tts = config.tts.as_ref().map(TtsClient::protocol_name),
            output = config.output.as_ref().map(AudioOutputClient::protocol_name),
            "Turn started"
        );
        events.emit(TurnEvent::TurnStarted { turn_id });

        // 2. Three workers under one token.
        let messages = build_messages(config.system_prompt.as_deref(), history, &turn.trigger);
        let shared = Arc::new(Mutex::new(turn));
        let generation = generate::Generation {
            llm: config.llm.clone(),
            tools: config.tools.clone(),
            max_tool_iterations: config.max_tool_iterations,
            player: player.clone(),
            events: Arc::clone(&events),
            turn: Arc::clone(&shared),
        };

        let mut tasks = JoinSet::new();
        tasks.spawn(workers::supervise(
            workers::GENERATE,
            token.clone(),
            generation.run(messages),
        ));
        tasks.spawn(workers::supervise(
            workers::TEXT_FORWARD,
            token.clone(),
            workers::forward_text(player.clone(), Arc::clone(&tts), token.clone()),
        ));
        tasks.spawn(workers::supervise(
            workers::AUDIO_FORWARD,
            token.clone(),
            workers::forward_audio(player.clone(), output, Arc::clone(&events), token.clone()),
        ));

        // 3. Fail fast.
        let mut errors = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let result = joined.unwrap_or_else(|e| {
                Err(PipelineError::WorkerPanicked {
                    worker: "unknown",
                    message: e.to_string(),
                })
            });
            if let Err(e) = result {
                if !token.is_cancelled() {
                    warn!(error = %e, "Worker failed, cancelling siblings");
                    token.cancel();
                }
                errors.push(e);
            }
        }

        // 4. Finalize, unconditionally.
        self.set_state(PipelineState::Finalizing);
        let mut turn = match Arc::try_unwrap(shared) {
            Ok(mutex) => mutex.into_inner().unwrap_or_else(PoisonError::into_inner),
            Err(shared) => {
                let turn = lock(&shared).clone();
                turn
            }
        };
        if let Err(e) = self.finalize(&mut turn, &player, &tts, &token, parent).await {
            errors.push(e);
        }

        let result = PipelineError::join(errors).map_or(Ok(()), Err);
        match (&result, turn.cancelled) {
            (_, true) => {
                info!("Turn cancelled");
                events.emit(TurnEvent::TurnCancelled { turn_id });
            }
            (Err(e), false) => {
                error!(error = %e, "Turn failed");
                events.emit(TurnEvent::TurnFailed {
                    turn_id,
                    error: e.to_string(),
                });
            }
            (Ok(()), false) => {
                info!(responses = turn.responses.len(), "Turn completed");
                events.emit(TurnEvent::TurnCompleted { turn_id });
            }
        }

        self.set_state(PipelineState::Done);
        // 5. The turn and whatever went wrong.
        (turn, result)
    }

    async fn finalize(
        &self,
        turn: &mut Turn,
        player: &SpeechPlayer,
        tts: &TextToSpeech,
        token: &CancellationToken,
        parent: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let closed = tts.close().await.map_err(PipelineError::Finalize);

        player.stop_progress_emitter();
        turn.spoken_text = player.spoken_text();
        token.cancel();
        player.stop();

        turn.finished_at = Some(Utc::now());
        if self.is_cancelled() || parent.is_cancelled() {
            turn.cancelled = true;
        } else {
            turn.finalized = true;
        }
        debug!(
            spoken = turn.spoken_text.len(),
            played_marks = player.played_marks(),
            "Turn finalized"
        );
        closed
    }

    // ── Controls ───────────────────────────────────────────────────

    /// Pause playback and drop queued output audio.
    pub async fn pause(&self) -> bool {
        let Some(resources) = self.resources() else {
            return false;
        };
        if !resources.player.pause() {
            return false;
        }
        if let Err(e) = resources.output.clear().await {
            warn!(error = %e, "Output clear failed on pause");
        }
        true
    }

    pub fn unpause(&self) -> bool {
        self.resources().is_some_and(|r| r.player.resume())
    }

    /// Stop forwarding speech to the output; generation continues.
    pub async fn stop_speaking(&self) {
        let Some(resources) = self.resources() else {
            return;
        };
        resources.tts.mute();
        // Marks queued in the output are dropped by the clear; the player
        // stops waiting for them first.
        if !resources.player.stop_speaking() {
            return;
        }
        if let Err(e) = resources.output.clear().await {
            warn!(error = %e, "Output clear failed on stop speaking");
        }
    }

    /// Cancel the turn. Only the first call has an effect; returns whether
    /// this call was it.
    pub async fn cancel(&self) -> bool {
        if self
            .inner
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        debug!("Cancelling response pipeline");

        if let Some(resources) = self.resources() {
            if let Err(e) = resources.tts.cancel().await {
                warn!(error = %e, "TTS cancel failed");
            }
            if let Err(e) = resources.tts.close().await {
                warn!(error = %e, "TTS close failed");
            }
            resources.token.cancel();
            resources.player.stop();
            if let Err(e) = resources.output.clear().await {
                warn!(error = %e, "Output clear failed on cancel");
            }
        }

        let callback = lock(&self.inner.on_cancel).take();
        if let Some(callback) = callback {
            callback();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use parley_core::{NoopTurnEvents, Trigger};

    use super::*;

    fn pipeline() -> ResponsePipeline {
        ResponsePipeline::new(
            PipelineConfig::from_settings(&VoiceSettings::default()),
            Arc::new(NoopTurnEvents),
        )
    }

    #[tokio::test]
    async fn text_only_turn_completes_without_collaborators() {
        let pipeline = pipeline();
        let (turn, result) = pipeline
            .run(&CancellationToken::new(), Turn::new(Trigger::manual("hi")), &[])
            .await;

        assert!(result.is_ok());
        assert!(turn.finalized);
        assert!(!turn.cancelled);
        assert!(turn.finished_at.is_some());
        assert_eq!(pipeline.state(), PipelineState::Done);
    }

    #[tokio::test]
    async fn second_run_is_rejected() {
        let pipeline = pipeline();
        let token = CancellationToken::new();
        pipeline.run(&token, Turn::new(Trigger::manual("a")), &[]).await;
        let (_, result) = pipeline.run(&token, Turn::new(Trigger::manual("b")), &[]).await;
        assert!(matches!(result, Err(PipelineError::AlreadyRan)));
    }

    #[tokio::test]
    async fn cancel_before_run_yields_cancelled_turn() {
        let pipeline = pipeline();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        pipeline.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(pipeline.cancel().await);
        assert!(!pipeline.cancel().await);
        let (turn, result) = pipeline
            .run(&CancellationToken::new(), Turn::new(Trigger::manual("hi")), &[])
            .await;

        assert!(result.is_ok());
        assert!(turn.cancelled);
        assert!(!turn.finalized);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn controls_without_a_run_are_no_ops() {
        let pipeline = pipeline();
        assert!(!pipeline.pause().await);
        assert!(!pipeline.unpause());
        pipeline.stop_speaking().await;
        assert!(pipeline.speech_player().is_none());
    }
}
