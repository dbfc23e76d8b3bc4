//! Voice session settings and validation.
//!
//! All fields are optional so partial documents deserialize cleanly; the
//! `effective_*` accessors apply defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{AudioFormat, DEFAULT_SAMPLE_RATE, EncodingInfo};

/// Default capacity of the turn admission queue.
pub const DEFAULT_QUEUE_CAPACITY: u32 = 10;

/// Default segmentation boundaries used with callback-capable outputs.
pub const DEFAULT_SEGMENT_BOUNDARIES: &str = "?.!";

/// Default cap on model → tool → model rounds per turn.
pub const DEFAULT_MAX_TOOL_ITERATIONS: u32 = 25;

/// Lower clamp of the progress emitter poll interval.
pub const DEFAULT_PROGRESS_MIN_INTERVAL_MS: u64 = 10;

/// Upper clamp of the progress emitter poll interval.
pub const DEFAULT_PROGRESS_MAX_INTERVAL_MS: u64 = 250;

/// Voice session settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VoiceSettings {
    /// Capacity of the turn admission queue (1-100).
    pub queue_capacity: Option<u32>,

    /// Characters that close a spoken segment when the output supports
    /// callback marks.
    pub segment_boundaries: Option<String>,

    /// Maximum model calls per turn when the model keeps requesting tools.
    pub max_tool_iterations: Option<u32>,

    /// Lower clamp of the progress poll interval in milliseconds.
    pub progress_min_interval_ms: Option<u64>,

    /// Upper clamp of the progress poll interval in milliseconds.
    pub progress_max_interval_ms: Option<u64>,

    /// Cancel the active turn when a new transcript or prompt arrives.
    pub cancel_on_interrupt: Option<bool>,

    /// Pause playback while the user is speaking.
    pub pause_on_speech: Option<bool>,

    /// Encoding assumed when no output client is configured.
    pub default_sample_rate: Option<u32>,
    pub default_format: Option<AudioFormat>,

    /// System prompt prepended to every model call.
    pub system_prompt: Option<String>,
}

impl VoiceSettings {
    /// Create settings with every field populated by its default.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            queue_capacity: Some(DEFAULT_QUEUE_CAPACITY),
            segment_boundaries: Some(DEFAULT_SEGMENT_BOUNDARIES.to_string()),
            max_tool_iterations: Some(DEFAULT_MAX_TOOL_ITERATIONS),
            progress_min_interval_ms: Some(DEFAULT_PROGRESS_MIN_INTERVAL_MS),
            progress_max_interval_ms: Some(DEFAULT_PROGRESS_MAX_INTERVAL_MS),
            cancel_on_interrupt: Some(false),
            pause_on_speech: Some(true),
            default_sample_rate: Some(DEFAULT_SAMPLE_RATE),
            default_format: Some(AudioFormat::Linear16),
            system_prompt: None,
        }
    }

    #[must_use]
    pub fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY) as usize
    }

    #[must_use]
    pub fn effective_segment_boundaries(&self) -> Vec<char> {
        self.segment_boundaries
            .as_deref()
            .unwrap_or(DEFAULT_SEGMENT_BOUNDARIES)
            .chars()
            .collect()
    }

    #[must_use]
    pub fn effective_max_tool_iterations(&self) -> u32 {
        self.max_tool_iterations
            .unwrap_or(DEFAULT_MAX_TOOL_ITERATIONS)
    }

    /// Poll interval clamp for the progress emitter as `(min, max)`.
    #[must_use]
    pub fn effective_progress_clamp(&self) -> (Duration, Duration) {
        let min = self
            .progress_min_interval_ms
            .unwrap_or(DEFAULT_PROGRESS_MIN_INTERVAL_MS);
        let max = self
            .progress_max_interval_ms
            .unwrap_or(DEFAULT_PROGRESS_MAX_INTERVAL_MS);
        (Duration::from_millis(min), Duration::from_millis(max))
    }

    #[must_use]
    pub fn effective_cancel_on_interrupt(&self) -> bool {
        self.cancel_on_interrupt.unwrap_or(false)
    }

    #[must_use]
    pub fn effective_pause_on_speech(&self) -> bool {
        self.pause_on_speech.unwrap_or(true)
    }

    #[must_use]
    pub fn effective_default_encoding(&self) -> EncodingInfo {
        EncodingInfo::new(
            self.default_sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE),
            self.default_format.unwrap_or_default(),
        )
    }

    /// Merge another settings into this one, only updating fields that are Some.
    pub fn merge(&mut self, other: &VoiceSettingsUpdate) {
        if let Some(ref capacity) = other.queue_capacity {
            self.queue_capacity = *capacity;
        }
        if let Some(ref boundaries) = other.segment_boundaries {
            self.segment_boundaries.clone_from(boundaries);
        }
        if let Some(ref iters) = other.max_tool_iterations {
            self.max_tool_iterations = *iters;
        }
        if let Some(ref min) = other.progress_min_interval_ms {
            self.progress_min_interval_ms = *min;
        }
        if let Some(ref max) = other.progress_max_interval_ms {
            self.progress_max_interval_ms = *max;
        }
        if let Some(ref cancel) = other.cancel_on_interrupt {
            self.cancel_on_interrupt = *cancel;
        }
        if let Some(ref pause) = other.pause_on_speech {
            self.pause_on_speech = *pause;
        }
        if let Some(ref rate) = other.default_sample_rate {
            self.default_sample_rate = *rate;
        }
        if let Some(ref format) = other.default_format {
            self.default_format = *format;
        }
        if let Some(ref prompt) = other.system_prompt {
            self.system_prompt.clone_from(prompt);
        }
    }
}

/// Partial settings update.
///
/// Each field is `Option<Option<T>>`:
/// - `None` = don't change this field
/// - `Some(None)` = reset field to its default
/// - `Some(Some(value))` = set field to value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceSettingsUpdate {
    pub queue_capacity: Option<Option<u32>>,
    pub segment_boundaries: Option<Option<String>>,
    pub max_tool_iterations: Option<Option<u32>>,
    pub progress_min_interval_ms: Option<Option<u64>>,
    pub progress_max_interval_ms: Option<Option<u64>>,
    pub cancel_on_interrupt: Option<Option<bool>>,
    pub pause_on_speech: Option<Option<bool>>,
    pub default_sample_rate: Option<Option<u32>>,
    pub default_format: Option<Option<AudioFormat>>,
    pub system_prompt: Option<Option<String>>,
}

/// Settings validation error.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Queue capacity must be between 1 and 100, got {0}")]
    InvalidQueueCapacity(u32),

    #[error("Max tool iterations must be between 1 and 100, got {0}")]
    InvalidToolIterations(u32),

    #[error("Progress interval clamp is invalid: min {min}ms, max {max}ms")]
    InvalidProgressClamp { min: u64, max: u64 },

    #[error("Sample rate must be between 8000 and 192000 Hz, got {0}")]
    InvalidSampleRate(u32),

    #[error("Segment boundaries must not contain whitespace")]
    WhitespaceBoundary,
}

/// Validate settings values.
pub fn validate_settings(settings: &VoiceSettings) -> Result<(), SettingsError> {
    if let Some(capacity) = settings.queue_capacity {
        if !(1..=100).contains(&capacity) {
            return Err(SettingsError::InvalidQueueCapacity(capacity));
        }
    }

    if let Some(iters) = settings.max_tool_iterations {
        if !(1..=100).contains(&iters) {
            return Err(SettingsError::InvalidToolIterations(iters));
        }
    }

    let (min, max) = settings.effective_progress_clamp();
    if min.is_zero() || min > max {
        return Err(SettingsError::InvalidProgressClamp {
            min: settings
                .progress_min_interval_ms
                .unwrap_or(DEFAULT_PROGRESS_MIN_INTERVAL_MS),
            max: settings
                .progress_max_interval_ms
                .unwrap_or(DEFAULT_PROGRESS_MAX_INTERVAL_MS),
        });
    }

    if let Some(rate) = settings.default_sample_rate {
        if !(8_000..=192_000).contains(&rate) {
            return Err(SettingsError::InvalidSampleRate(rate));
        }
    }

    if settings
        .segment_boundaries
        .as_ref()
        .is_some_and(|b| b.chars().any(char::is_whitespace))
    {
        return Err(SettingsError::WhitespaceBoundary);
    }

    Ok(())
}
