//! Append-only text chunks with a completion signal.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_stream::stream;
use futures_util::Stream;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct TextState {
    chunks: Vec<String>,
    complete: bool,
    cleared: bool,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<TextState>,
    notify: Notify,
}

/// Ordered text chunks produced by the model and drained by one consumer.
///
/// Cloning is cheap; all clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct TextBuffer {
    inner: Arc<Inner>,
}

impl TextBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TextState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a chunk. Returns `false` if the buffer no longer accepts text.
    ///
    /// Empty chunks are accepted and dropped.
    pub fn add_chunk(&self, chunk: impl Into<String>) -> bool {
        let chunk = chunk.into();
        {
            let mut state = self.lock();
            if state.complete || state.cleared {
                return false;
            }
            if chunk.is_empty() {
                return true;
            }
            state.chunks.push(chunk);
        }
        self.inner.notify.notify_one();
        true
    }

    /// Signal that no more chunks will be added.
    pub fn complete(&self) {
        self.lock().complete = true;
        self.inner.notify.notify_one();
    }

    /// Drop all undrained chunks and end the stream.
    pub fn clear(&self) {
        {
            let mut state = self.lock();
            state.cleared = true;
            state.chunks.clear();
        }
        self.inner.notify.notify_waiters();
        self.inner.notify.notify_one();
    }

    pub fn is_complete(&self) -> bool {
        self.lock().complete
    }

    pub fn is_cleared(&self) -> bool {
        self.lock().cleared
    }

    /// Everything appended so far, concatenated.
    pub fn text(&self) -> String {
        self.lock().chunks.concat()
    }

    /// Lazily drain chunks in append order.
    ///
    /// Waits for new chunks until the buffer is completed (remaining chunks
    /// are still delivered) or cleared (the stream ends immediately).
    pub fn chunks(&self) -> impl Stream<Item = String> + Send + 'static {
        let buffer = self.clone();
        stream! {
            let mut cursor = 0;
            loop {
                let next = {
                    let state = buffer.lock();
                    if state.cleared {
                        break;
                    }
                    match state.chunks.get(cursor) {
                        Some(chunk) => Some(chunk.clone()),
                        None if state.complete => break,
                        None => None,
                    }
                };
                match next {
                    Some(chunk) => {
                        cursor += 1;
                        yield chunk;
                    }
                    None => buffer.inner.notify.notified().await,
                }
            }
        }
    }
}
