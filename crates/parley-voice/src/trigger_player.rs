//! Bounded single-consumer queue that admits turns one at a time.
//!
//! # Concurrency Model
//!
//! - One long-lived consumer task, started once
//! - `Notify` pairs for "item available" and "space available"; waiters
//!   re-check the queue under the lock after every wakeup
//! - `stop` closes the queue, drops pending triggers and cancels the turn in
//!   flight through the shutdown token

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::FutureExt;
use parley_core::{Trigger, VoiceSettings};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::QueueError;

/// Runs the turn for a dequeued trigger.
#[async_trait]
pub trait TurnRunner: Send + Sync {
    /// `cancel` fires when the queue stops or the trigger's own token fires.
    async fn run_turn(&self, trigger: Trigger, cancel: CancellationToken) -> anyhow::Result<()>;
}

struct QueuedTrigger {
    trigger: Trigger,
    cancel: CancellationToken,
}

struct Inner {
    queue: Mutex<VecDeque<QueuedTrigger>>,
    capacity: usize,
    items: Notify,
    space: Notify,
    closed: AtomicBool,
    started: AtomicBool,
    shutdown: CancellationToken,
    done: CancellationToken,
}

/// Turn admission queue. Clones share the same queue.
#[derive(Clone)]
pub struct TriggerPlayer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TriggerPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerPlayer")
            .field("capacity", &self.inner.capacity)
            .field("pending", &self.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn queue(&self) -> MutexGuard<'_, VecDeque<QueuedTrigger>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Next trigger, or `None` once the queue is closed.
    async fn next(&self) -> Option<QueuedTrigger> {
        loop {
            let mut notified = pin!(self.items.notified());
            notified.as_mut().enable();

            if self.is_closed() {
                return None;
            }
            let item = self.queue().pop_front();
            if let Some(item) = item {
                self.space.notify_one();
                return Some(item);
            }

            tokio::select! {
                () = notified => {}
                () = self.shutdown.cancelled() => {}
            }
        }
    }

    async fn consume(&self, runner: Arc<dyn TurnRunner>) {
        while let Some(QueuedTrigger { trigger, cancel }) = self.next().await {
            let trigger_id = trigger.id;
            if cancel.is_cancelled() {
                debug!(%trigger_id, "Trigger cancelled before its turn started");
                continue;
            }

            let turn_token = self.shutdown.child_token();
            let link = tokio::spawn({
                let turn_token = turn_token.clone();
                async move {
                    tokio::select! {
                        () = cancel.cancelled() => turn_token.cancel(),
                        () = turn_token.cancelled() => {}
                    }
                }
            });

            debug!(%trigger_id, kind = ?trigger.kind, "Starting turn");
            let run = runner.run_turn(trigger, turn_token.clone());
            match AssertUnwindSafe(run).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(%trigger_id, error = %e, "Turn could not be processed"),
                Err(_) => error!(%trigger_id, "Turn runner panicked"),
            }

            turn_token.cancel();
            link.abort();
        }
        debug!("Trigger queue consumer exited");
        self.done.cancel();
    }
}

impl TriggerPlayer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                capacity: capacity.max(1),
                items: Notify::new(),
                space: Notify::new(),
                closed: AtomicBool::new(false),
                started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                done: CancellationToken::new(),
            }),
        }
    }

    pub fn from_settings(settings: &VoiceSettings) -> Self {
        Self::new(settings.effective_queue_capacity())
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Triggers waiting for the consumer.
    pub fn len(&self) -> usize {
        self.inner.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Start the consumer task.
    ///
    /// # Errors
    ///
    /// [`QueueError::AlreadyStarted`] on every call after the first.
    pub fn start(&self, runner: Arc<dyn TurnRunner>) -> Result<(), QueueError> {
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(QueueError::AlreadyStarted);
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.consume(runner).await;
        });
        Ok(())
    }

    /// Enqueue a trigger, waiting for space while the queue is full.
    ///
    /// # Errors
    ///
    /// [`QueueError::Closed`] if the queue is (or becomes) closed first.
    pub async fn ingest(&self, trigger: Trigger) -> Result<(), QueueError> {
        self.ingest_with_token(trigger, CancellationToken::new())
            .await
    }

    /// Like [`ingest`](Self::ingest), with a token that cancels this
    /// trigger's turn independently of the queue.
    ///
    /// # Errors
    ///
    /// [`QueueError::Closed`] if the queue is (or becomes) closed first.
    pub async fn ingest_with_token(
        &self,
        trigger: Trigger,
        cancel: CancellationToken,
    ) -> Result<(), QueueError> {
        let inner = &self.inner;
        let mut item = Some(QueuedTrigger { trigger, cancel });
        loop {
            let mut space = pin!(inner.space.notified());
            space.as_mut().enable();

            if inner.is_closed() {
                return Err(QueueError::Closed);
            }
            {
                let mut queue = inner.queue();
                if queue.len() < inner.capacity {
                    if let Some(item) = item.take() {
                        debug!(trigger_id = %item.trigger.id, pending = queue.len(), "Trigger queued");
                        queue.push_back(item);
                    }
                    drop(queue);
                    inner.items.notify_one();
                    return Ok(());
                }
            }

            tokio::select! {
                () = space => {}
                () = inner.shutdown.cancelled() => {}
            }
        }
    }

    /// Drop pending triggers without running them; returns how many.
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut queue = self.inner.queue();
            let dropped = queue.len();
            queue.clear();
            dropped
        };
        if dropped > 0 {
            debug!(dropped, "Pending triggers cleared");
        }
        self.inner.space.notify_waiters();
        dropped
    }

    /// Close the queue. Pending triggers are dropped and the running turn
    /// is cancelled. Idempotent.
    pub fn stop(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = self.clear();
        debug!(dropped, "Trigger queue stopped");
        self.inner.shutdown.cancel();
        self.inner.items.notify_waiters();
    }

    /// Wait for the consumer to exit; returns at once if it never started.
    pub async fn await_done(&self) {
        if !self.inner.started.load(Ordering::Acquire) {
            return;
        }
        self.inner.done.cancelled().await;
    }
}
