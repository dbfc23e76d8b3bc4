//! `VoiceSession`: wires the conversation, the admission queue and a fresh
//! response pipeline per turn, and decides what an incoming trigger does to
//! the turn in flight.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use async_trait::async_trait;
use parley_core::{
    AudioOutputClient, ControlSignal, InterruptionKind, LanguageModel, ToolExecutor, Trigger,
    TriggerKind, TtsClient, Turn, TurnEvents, VoiceSettings, VoiceSettingsUpdate,
    validate_settings,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::conversation::{ActiveTurn, Conversation};
use crate::error::SessionError;
use crate::pipeline::{PipelineConfig, ResponsePipeline};
use crate::trigger_player::{TriggerPlayer, TurnRunner};

/// Collaborators captured by each new turn.
#[derive(Clone, Default)]
struct Clients {
    llm: Option<LanguageModel>,
    tools: Option<Arc<dyn ToolExecutor>>,
    tts: Option<TtsClient>,
    output: Option<AudioOutputClient>,
}

struct SessionInner {
    settings: RwLock<VoiceSettings>,
    clients: RwLock<Clients>,
    events: Arc<dyn TurnEvents>,
    conversation: Conversation,
    queue: TriggerPlayer,
}

/// A live voice conversation.
///
/// Clients configured here are snapshotted when a turn starts; changing
/// them mid-turn affects the next turn only.
#[derive(Clone)]
pub struct VoiceSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSession")
            .field("queue", &self.inner.queue)
            .field("active", &self.inner.conversation.active_turn())
            .finish_non_exhaustive()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

const fn interruption_kind(kind: TriggerKind) -> InterruptionKind {
    match kind {
        TriggerKind::Transcript => InterruptionKind::Transcript,
        TriggerKind::ToolResult => InterruptionKind::ToolResult,
        TriggerKind::Manual => InterruptionKind::Manual,
        TriggerKind::Control(_) => InterruptionKind::Control,
    }
}

impl SessionInner {
    fn pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::from_settings(&read(&self.settings));
        let clients = read(&self.clients).clone();
        config.llm = clients.llm;
        config.tools = clients.tools;
        config.tts = clients.tts;
        config.output = clients.output;
        config
    }

    async fn run_turn(&self, trigger: Trigger, cancel: CancellationToken) -> anyhow::Result<()> {
        let pipeline = ResponsePipeline::new(self.pipeline_config(), Arc::clone(&self.events));
        let (_active, turn) = self.conversation.begin_turn(trigger, pipeline.clone())?;
        let history = self.conversation.history();

        let (turn, result) = pipeline.run(&cancel, turn, &history).await;
        let turn_id = turn.id;
        self.conversation.finish_turn(turn)?;
        if let Err(e) = result {
            // Already reported as TurnFailed by the pipeline.
            debug!(%turn_id, error = %e, "Turn ended with errors");
        }
        Ok(())
    }
}

/// Runs queued turns against a session without keeping it alive.
struct SessionRunner {
    session: Weak<SessionInner>,
}

#[async_trait]
impl TurnRunner for SessionRunner {
    async fn run_turn(&self, trigger: Trigger, cancel: CancellationToken) -> anyhow::Result<()> {
        let Some(session) = self.session.upgrade() else {
            debug!(trigger_id = %trigger.id, "Session dropped, trigger skipped");
            return Ok(());
        };
        session.run_turn(trigger, cancel).await
    }
}

impl VoiceSession {
    /// Create a session. Call [`start`](Self::start) to begin running turns.
    ///
    /// # Errors
    ///
    /// [`SessionError::Settings`] if `settings` fail validation.
    pub fn new(settings: VoiceSettings, events: Arc<dyn TurnEvents>) -> Result<Self, SessionError> {
        validate_settings(&settings)?;
        let queue = TriggerPlayer::from_settings(&settings);
        Ok(Self {
            inner: Arc::new(SessionInner {
                settings: RwLock::new(settings),
                clients: RwLock::new(Clients::default()),
                events,
                conversation: Conversation::new(),
                queue,
            }),
        })
    }

    // ── Configuration ──────────────────────────────────────────────

    pub fn configure_llm(&self, llm: Option<LanguageModel>) {
        debug!(llm = ?llm, "Language model configured");
        write(&self.inner.clients).llm = llm;
    }

    pub fn configure_tools(&self, tools: Option<Arc<dyn ToolExecutor>>) {
        write(&self.inner.clients).tools = tools;
    }

    pub fn configure_tts(&self, tts: Option<TtsClient>) {
        debug!(tts = ?tts, "TTS client configured");
        write(&self.inner.clients).tts = tts;
    }

    pub fn configure_output(&self, output: Option<AudioOutputClient>) {
        debug!(output = ?output, "Audio output configured");
        write(&self.inner.clients).output = output;
    }

    pub fn settings(&self) -> VoiceSettings {
        read(&self.inner.settings).clone()
    }

    /// Apply a partial settings update.
    ///
    /// The queue capacity is fixed when the session is created; a new value
    /// is stored but does not resize the running queue.
    ///
    /// # Errors
    ///
    /// [`SessionError::Settings`] if the merged settings fail validation;
    /// the current settings are kept.
    pub fn update_settings(&self, update: &VoiceSettingsUpdate) -> Result<(), SessionError> {
        let mut merged = self.settings();
        merged.merge(update);
        validate_settings(&merged)?;
        *write(&self.inner.settings) = merged;
        Ok(())
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Start running queued turns.
    ///
    /// # Errors
    ///
    /// [`SessionError::Queue`] if the session was already started.
    pub fn start(&self) -> Result<(), SessionError> {
        let runner = Arc::new(SessionRunner {
            session: Arc::downgrade(&self.inner),
        });
        self.inner.queue.start(runner)?;
        info!(capacity = self.inner.queue.capacity(), "Voice session started");
        Ok(())
    }

    /// Stop accepting triggers, drop pending ones and cancel the active
    /// turn. Idempotent.
    pub fn stop(&self) {
        self.inner.queue.stop();
        info!("Voice session stopped");
    }

    /// Wait until the consumer has exited after [`stop`](Self::stop).
    pub async fn await_done(&self) {
        self.inner.queue.await_done().await;
    }

    pub fn history(&self) -> Vec<Turn> {
        self.inner.conversation.history()
    }

    pub fn active_turn(&self) -> Option<Arc<ActiveTurn>> {
        self.inner.conversation.active_turn()
    }

    /// Triggers waiting behind the active turn.
    pub fn pending_triggers(&self) -> usize {
        self.inner.queue.len()
    }

    // ── Interruption handling ──────────────────────────────────────

    /// Route a trigger.
    ///
    /// Control signals act on the active turn and are ignored without one.
    /// Any other trigger is queued; if a turn is running it is recorded as an
    /// interruption first, and the turn is cancelled when the settings ask
    /// for it.
    ///
    /// # Errors
    ///
    /// [`SessionError::Queue`] if the session has been stopped.
    pub async fn handle_trigger(&self, trigger: Trigger) -> Result<(), SessionError> {
        let active = self.active_turn();

        if let TriggerKind::Control(signal) = trigger.kind {
            let Some(active) = active else {
                debug!(?signal, "No active turn, control signal ignored");
                return Ok(());
            };
            let id = active.add_interruption(trigger.source, InterruptionKind::Control);
            match signal {
                ControlSignal::Pause => {
                    active.pause().await;
                }
                ControlSignal::Resume => {
                    active.resume();
                }
                ControlSignal::StopSpeaking => active.stop_speaking().await,
                ControlSignal::Cancel => {
                    active.cancel().await;
                }
            }
            active.resolve_interruption(id);
            return Ok(());
        }

        if let Some(active) = active {
            active.add_interruption(trigger.source.clone(), interruption_kind(trigger.kind));
            let heard = active.resolve_pending(InterruptionKind::Speech) > 0;
            let cancel_on_interrupt = read(&self.inner.settings).effective_cancel_on_interrupt();
            if cancel_on_interrupt {
                info!(turn_id = %active.turn_id(), "Cancelling turn on interruption");
                active.cancel().await;
            } else if heard {
                active.resume();
            }
        }
        self.inner.queue.ingest(trigger).await?;
        Ok(())
    }

    /// The user started talking: pause the active turn until they stop or a
    /// transcript arrives.
    pub async fn speech_started(&self) {
        let pause_on_speech = read(&self.inner.settings).effective_pause_on_speech();
        if !pause_on_speech {
            return;
        }
        let Some(active) = self.active_turn() else {
            return;
        };
        active.add_interruption("speech", InterruptionKind::Speech);
        active.pause().await;
    }

    /// The user stopped talking. If no transcript resolved the pause, the
    /// active turn resumes.
    pub fn speech_ended(&self) {
        let Some(active) = self.active_turn() else {
            return;
        };
        if active.resolve_pending(InterruptionKind::Speech) > 0 {
            active.resume();
        }
    }
}
