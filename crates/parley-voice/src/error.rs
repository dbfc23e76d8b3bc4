//! Voice turn error types.

use std::fmt;

/// Errors from the TTS and audio-output facades.
#[derive(Debug, thiserror::Error)]
pub enum FacadeError {
    /// The TTS session failed to open.
    #[error("Failed to open TTS session ({protocol}): {source}")]
    TtsInit {
        protocol: &'static str,
        source: anyhow::Error,
    },

    /// A call on an open TTS session failed.
    #[error("TTS {operation} failed: {source}")]
    Tts {
        operation: &'static str,
        source: anyhow::Error,
    },

    /// A call on the audio output failed.
    #[error("Audio output {operation} failed: {source}")]
    Output {
        operation: &'static str,
        source: anyhow::Error,
    },

    /// The TTS facade was closed; no further text is accepted.
    #[error("TTS session is closed")]
    Closed,

    /// The turn was cancelled while waiting for TTS initialisation.
    #[error("TTS initialisation cancelled")]
    Cancelled,
}

/// Errors surfaced by a response pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A worker returned an error.
    #[error("{worker} worker failed: {source}")]
    Worker {
        worker: &'static str,
        source: anyhow::Error,
    },

    /// A worker panicked; the panic was caught at the worker boundary.
    #[error("{worker} worker panicked: {message}")]
    WorkerPanicked {
        worker: &'static str,
        message: String,
    },

    /// The model kept requesting tools past the configured limit.
    #[error("Tool loop exceeded {0} iterations")]
    ToolLoopExhausted(u32),

    /// Releasing turn resources failed.
    #[error("Finalize failed: {0}")]
    Finalize(#[source] FacadeError),

    /// `run` was called on a pipeline that already ran.
    #[error("Response pipeline has already run")]
    AlreadyRan,

    /// Several of the above, in the order they were observed.
    #[error("{}", MultiDisplay(.0))]
    Multiple(Vec<PipelineError>),
}

impl PipelineError {
    /// Combine collected errors into one, or `None` if there are none.
    #[must_use]
    pub fn join(mut errors: Vec<Self>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple(errors)),
        }
    }

    /// Flatten into the individual errors.
    #[must_use]
    pub fn into_vec(self) -> Vec<Self> {
        match self {
            Self::Multiple(errors) => errors.into_iter().flat_map(Self::into_vec).collect(),
            other => vec![other],
        }
    }
}

struct MultiDisplay<'a>(&'a [PipelineError]);

impl fmt::Display for MultiDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

/// Errors from the conversation's active-turn slot.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConversationError {
    /// Another turn is already running.
    #[error("A turn is already active ({0})")]
    TurnAlreadyActive(uuid::Uuid),

    /// The turn being finished is not the active one.
    #[error("Turn {0} is not the active turn")]
    NotActive(uuid::Uuid),
}

/// Errors from the trigger admission queue.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue has been stopped.
    #[error("Trigger queue is closed")]
    Closed,

    /// `start` was called twice.
    #[error("Trigger queue consumer already started")]
    AlreadyStarted,
}

/// Errors from the voice session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Conversation(#[from] ConversationError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Invalid settings: {0}")]
    Settings(#[from] parley_core::SettingsError),
}
