//! Audio encoding descriptor shared by TTS, output and input collaborators.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default sample rate used when no output client reports one.
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Sample format of a raw audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    /// Signed 16-bit little-endian PCM.
    #[default]
    Linear16,
    /// G.711 μ-law.
    Mulaw,
    /// G.711 A-law.
    Alaw,
}

impl AudioFormat {
    /// Number of bytes occupied by one sample.
    #[must_use]
    pub const fn bytes_per_sample(self) -> u32 {
        match self {
            Self::Linear16 => 2,
            Self::Mulaw | Self::Alaw => 1,
        }
    }

    /// Byte value that encodes silence in this format.
    #[must_use]
    pub const fn silence_byte(self) -> u8 {
        match self {
            Self::Linear16 => 0x00,
            Self::Mulaw => 0xFF,
            Self::Alaw => 0xD5,
        }
    }
}

/// Sample rate and format of an audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingInfo {
    /// Samples per second.
    pub sample_rate: u32,
    /// Sample format.
    pub format: AudioFormat,
}

impl EncodingInfo {
    #[must_use]
    pub const fn new(sample_rate: u32, format: AudioFormat) -> Self {
        Self {
            sample_rate,
            format,
        }
    }

    /// Bytes of audio produced per second of playback.
    #[must_use]
    pub const fn bytes_per_second(&self) -> u64 {
        self.sample_rate as u64 * self.format.bytes_per_sample() as u64
    }

    /// Number of bytes that `elapsed` of playback consumes.
    ///
    /// Fractional bytes are truncated.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn bytes_for(&self, elapsed: Duration) -> u64 {
        (elapsed.as_secs_f64() * self.bytes_per_second() as f64) as u64
    }

    /// Playback duration of `bytes` of audio.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_of(&self, bytes: u64) -> Duration {
        let per_second = self.bytes_per_second();
        if per_second == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(bytes as f64 / per_second as f64)
    }

    /// Synthetic filler audio of the given duration.
    #[must_use]
    pub fn silence(&self, duration: Duration) -> Vec<u8> {
        let len = usize::try_from(self.bytes_for(duration)).unwrap_or(0);
        // Keep linear16 output aligned on whole samples.
        let len = len - len % self.format.bytes_per_sample() as usize;
        vec![self.format.silence_byte(); len]
    }
}

impl Default for EncodingInfo {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, AudioFormat::Linear16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_per_sample_by_format() {
        assert_eq!(AudioFormat::Linear16.bytes_per_sample(), 2);
        assert_eq!(AudioFormat::Mulaw.bytes_per_sample(), 1);
        assert_eq!(AudioFormat::Alaw.bytes_per_sample(), 1);
    }

    #[test]
    fn bytes_for_elapsed_time() {
        let enc = EncodingInfo::new(10, AudioFormat::Linear16);
        assert_eq!(enc.bytes_for(Duration::from_secs(1)), 20);
        assert_eq!(enc.bytes_for(Duration::from_millis(250)), 5);
    }

    #[test]
    fn silence_uses_format_byte() {
        let enc = EncodingInfo::new(8_000, AudioFormat::Mulaw);
        let filler = enc.silence(Duration::from_millis(10));
        assert_eq!(filler.len(), 80);
        assert!(filler.iter().all(|&b| b == 0xFF));

        let alaw = EncodingInfo::new(8_000, AudioFormat::Alaw);
        assert!(alaw.silence(Duration::from_millis(1)).iter().all(|&b| b == 0xD5));
    }

    #[test]
    fn duration_of_round_trips_whole_seconds() {
        let enc = EncodingInfo::new(16_000, AudioFormat::Linear16);
        assert_eq!(enc.duration_of(32_000), Duration::from_secs(1));
    }

    #[test]
    fn format_serializes_snake_case() {
        let json = serde_json::to_string(&AudioFormat::Linear16).unwrap();
        assert_eq!(json, "\"linear16\"");
    }
}
