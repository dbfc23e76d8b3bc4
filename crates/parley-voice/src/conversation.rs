//! Conversation history and the single active-turn slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use parley_core::{Interruption, InterruptionKind, Trigger, Turn};
use tracing::debug;
use uuid::Uuid;

use crate::error::ConversationError;
use crate::pipeline::ResponsePipeline;

/// Handle to the turn currently running.
///
/// The [`Turn`] record itself is owned by the pipeline while it runs;
/// interruptions and control flags live here so the interruption handler
/// can reach them concurrently.
pub struct ActiveTurn {
    turn_id: Uuid,
    trigger: Trigger,
    pipeline: ResponsePipeline,
    cancelled: AtomicBool,
    finalized: AtomicBool,
    interruptions: Mutex<Vec<Interruption>>,
}

impl std::fmt::Debug for ActiveTurn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveTurn")
            .field("turn_id", &self.turn_id)
            .field("cancelled", &self.is_cancelled())
            .field("finalized", &self.is_finalized())
            .finish_non_exhaustive()
    }
}

impl ActiveTurn {
    fn interruptions_mut(&self) -> MutexGuard<'_, Vec<Interruption>> {
        self.interruptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub const fn turn_id(&self) -> Uuid {
        self.turn_id
    }

    pub const fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub const fn pipeline(&self) -> &ResponsePipeline {
        &self.pipeline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    /// Record an interruption and return its ID.
    pub fn add_interruption(&self, source: impl Into<String>, kind: InterruptionKind) -> u64 {
        let interruption = Interruption::new(source, kind);
        let id = interruption.id;
        debug!(turn_id = %self.turn_id, interruption_id = id, ?kind, "Interruption recorded");
        self.interruptions_mut().push(interruption);
        id
    }

    /// Mark an interruption resolved. Returns `false` if the ID is unknown.
    pub fn resolve_interruption(&self, id: u64) -> bool {
        self.interruptions_mut()
            .iter_mut()
            .find(|i| i.id == id)
            .is_some_and(|i| {
                i.resolved = true;
                true
            })
    }

    /// Resolve every pending interruption of `kind`; returns how many.
    pub fn resolve_pending(&self, kind: InterruptionKind) -> usize {
        let mut resolved = 0;
        for interruption in self.interruptions_mut().iter_mut() {
            if interruption.kind == kind && !interruption.resolved {
                interruption.resolved = true;
                resolved += 1;
            }
        }
        resolved
    }

    pub fn interruptions(&self) -> Vec<Interruption> {
        self.interruptions_mut().clone()
    }

    pub async fn pause(&self) -> bool {
        self.pipeline.pause().await
    }

    pub fn resume(&self) -> bool {
        self.pipeline.unpause()
    }

    pub async fn stop_speaking(&self) {
        self.pipeline.stop_speaking().await;
    }

    /// Cancel the turn; returns whether this call cancelled it.
    pub async fn cancel(&self) -> bool {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.pipeline.cancel().await;
        true
    }
}

/// Turn history plus the guard that admits one turn at a time.
#[derive(Debug, Default)]
pub struct Conversation {
    history: Mutex<Vec<Turn>>,
    active: Mutex<Option<Arc<ActiveTurn>>>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    fn active_slot(&self) -> MutexGuard<'_, Option<Arc<ActiveTurn>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn history_mut(&self) -> MutexGuard<'_, Vec<Turn>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the active slot for a new turn.
    ///
    /// # Errors
    ///
    /// [`ConversationError::TurnAlreadyActive`] if another turn holds the
    /// slot.
    pub fn begin_turn(
        &self,
        trigger: Trigger,
        pipeline: ResponsePipeline,
    ) -> Result<(Arc<ActiveTurn>, Turn), ConversationError> {
        let mut slot = self.active_slot();
        if let Some(active) = slot.as_ref() {
            return Err(ConversationError::TurnAlreadyActive(active.turn_id));
        }

        let turn = Turn::new(trigger.clone());
        let active = Arc::new(ActiveTurn {
            turn_id: turn.id,
            trigger,
            pipeline,
            cancelled: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            interruptions: Mutex::new(Vec::new()),
        });
        *slot = Some(Arc::clone(&active));
        debug!(turn_id = %turn.id, "Turn admitted");
        Ok((active, turn))
    }

    pub fn active_turn(&self) -> Option<Arc<ActiveTurn>> {
        self.active_slot().clone()
    }

    /// Append a finished turn to history and release the slot.
    ///
    /// Interruptions recorded on the active handle are merged into the turn.
    ///
    /// # Errors
    ///
    /// [`ConversationError::NotActive`] if `turn` does not hold the slot.
    pub fn finish_turn(&self, mut turn: Turn) -> Result<(), ConversationError> {
        let mut slot = self.active_slot();
        let active = match slot.as_ref() {
            Some(active) if active.turn_id == turn.id => Arc::clone(active),
            _ => return Err(ConversationError::NotActive(turn.id)),
        };

        turn.interruptions.extend(active.interruptions());
        if active.is_cancelled() && !turn.cancelled {
            turn.cancelled = true;
            turn.finalized = false;
        }
        active.finalized.store(true, Ordering::Release);
        *slot = None;
        drop(slot);

        debug!(
            turn_id = %turn.id,
            status = ?turn.status(),
            interruptions = turn.interruptions.len(),
            "Turn recorded"
        );
        self.history_mut().push(turn);
        Ok(())
    }

    /// Snapshot of finished turns, oldest first.
    pub fn history(&self) -> Vec<Turn> {
        self.history_mut().clone()
    }
}

#[cfg(test)]
mod tests {
    use parley_core::{NoopTurnEvents, TurnStatus, VoiceSettings};

    use super::*;
    use crate::pipeline::PipelineConfig;

    fn pipeline() -> ResponsePipeline {
        ResponsePipeline::new(
            PipelineConfig::from_settings(&VoiceSettings::default()),
            Arc::new(NoopTurnEvents),
        )
    }

    #[test]
    fn second_turn_is_rejected_while_one_is_active() {
        let conversation = Conversation::new();
        let (active, _) = conversation
            .begin_turn(Trigger::manual("one"), pipeline())
            .unwrap();

        let err = conversation
            .begin_turn(Trigger::manual("two"), pipeline())
            .unwrap_err();
        assert_eq!(err, ConversationError::TurnAlreadyActive(active.turn_id()));
    }

    #[test]
    fn finishing_releases_the_slot_and_records_interruptions() {
        let conversation = Conversation::new();
        let (active, mut turn) = conversation
            .begin_turn(Trigger::manual("one"), pipeline())
            .unwrap();
        let id = active.add_interruption("stt", InterruptionKind::Speech);
        active.add_interruption("api", InterruptionKind::Manual);
        assert!(active.resolve_interruption(id));
        assert!(!active.resolve_interruption(id + 1_000_000_000));

        turn.finalized = true;
        conversation.finish_turn(turn).unwrap();

        assert!(active.is_finalized());
        assert!(conversation.active_turn().is_none());
        let history = conversation.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].interruptions.len(), 2);
        assert_eq!(history[0].pending_interruptions().count(), 1);

        conversation
            .begin_turn(Trigger::manual("two"), pipeline())
            .unwrap();
    }

    #[test]
    fn finishing_a_stranger_turn_fails() {
        let conversation = Conversation::new();
        conversation
            .begin_turn(Trigger::manual("one"), pipeline())
            .unwrap();
        let stranger = Turn::new(Trigger::manual("x"));
        let id = stranger.id;
        assert_eq!(
            conversation.finish_turn(stranger),
            Err(ConversationError::NotActive(id))
        );
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_marks_the_record() {
        let conversation = Conversation::new();
        let (active, mut turn) = conversation
            .begin_turn(Trigger::manual("one"), pipeline())
            .unwrap();

        assert!(active.cancel().await);
        assert!(!active.cancel().await);
        assert!(active.pipeline().is_cancelled());

        turn.finalized = true;
        conversation.finish_turn(turn).unwrap();
        assert_eq!(conversation.history()[0].status(), TurnStatus::Cancelled);
    }

    #[test]
    fn resolve_pending_only_touches_matching_kind() {
        let conversation = Conversation::new();
        let (active, _) = conversation
            .begin_turn(Trigger::manual("one"), pipeline())
            .unwrap();
        active.add_interruption("vad", InterruptionKind::Speech);
        active.add_interruption("vad", InterruptionKind::Speech);
        active.add_interruption("api", InterruptionKind::Control);

        assert_eq!(active.resolve_pending(InterruptionKind::Speech), 2);
        assert_eq!(active.resolve_pending(InterruptionKind::Speech), 0);
        let pending: Vec<_> = active
            .interruptions()
            .into_iter()
            .filter(|i| !i.resolved)
            .collect();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, InterruptionKind::Control);
    }
}
