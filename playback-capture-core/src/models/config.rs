use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Codec profile requested from the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecProfile {
    /// Opus, the perceptual codec of the bundled software encoder.
    #[default]
    Opus,
    /// AAC low complexity; needs a platform encoder.
    AacLc,
}

/// What happens to encoder output drained before the container has started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupPolicy {
    /// Drop it.
    #[default]
    Discard,
    /// Keep up to `max_chunks` units and write them once the track exists.
    Replay { max_chunks: usize },
}

/// Upper bound on the final drain after a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainLimit {
    pub max_polls: usize,
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
}

impl Default for DrainLimit {
    fn default() -> Self {
        Self {
            max_polls: 2000,
            timeout: Duration::from_millis(2000),
        }
    }
}

/// Configuration for one capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capture sample rate in Hz (default: 44100).
    pub sample_rate: u32,

    /// Interleaved channel count (default: 2).
    pub channels: u16,

    /// Requested encoder bit rate in bits per second (default: 128000).
    pub bit_rate: u32,

    pub profile: CodecProfile,

    /// How long `submit` may wait for a free input slot (default: 10 ms).
    #[serde(rename = "input_wait_ms", with = "millis")]
    pub input_wait: Duration,

    /// Bytes requested from the source per pull (default: 4096).
    pub read_buffer_size: usize,

    /// Pause after a pull that returned no data (default: 5 ms).
    #[serde(rename = "idle_backoff_ms", with = "millis")]
    pub idle_backoff: Duration,

    pub drain: DrainLimit,

    pub warmup: WarmupPolicy,

    /// Scratch directory for the container file.
    pub output_directory: PathBuf,

    /// Container file name inside `output_directory`.
    pub file_name: String,

    /// Write a `.metadata.json` sidecar next to the finished file.
    pub write_metadata: bool,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(8_000..=192_000).contains(&self.sample_rate) {
            return Err(format!("unsupported sample rate: {}", self.sample_rate));
        }
        if ![1, 2].contains(&self.channels) {
            return Err(format!("unsupported channel count: {}", self.channels));
        }
        if self.bit_rate == 0 {
            return Err("bit rate must be positive".into());
        }
        let frame_bytes = self.channels as usize * 2;
        if self.read_buffer_size < frame_bytes {
            return Err(format!(
                "read buffer of {} bytes cannot hold one frame",
                self.read_buffer_size
            ));
        }
        if self.drain.max_polls == 0 {
            return Err("drain.max_polls must be at least 1".into());
        }
        if self.file_name.is_empty() {
            return Err("file name must not be empty".into());
        }
        Ok(())
    }

    /// Full path of the scratch container file.
    pub fn output_path(&self) -> PathBuf {
        self.output_directory.join(&self.file_name)
    }

    pub fn encoder_settings(&self) -> EncoderSettings {
        EncoderSettings {
            sample_rate: self.sample_rate,
            channels: self.channels,
            bit_rate: self.bit_rate,
            profile: self.profile,
            input_wait: self.input_wait,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, String> {
        serde_json::from_str(json).map_err(|e| format!("invalid pipeline config: {}", e))
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let json = fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        Self::from_json_str(&json)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            bit_rate: 128_000,
            profile: CodecProfile::default(),
            input_wait: Duration::from_millis(10),
            read_buffer_size: 4096,
            idle_backoff: Duration::from_millis(5),
            drain: DrainLimit::default(),
            warmup: WarmupPolicy::default(),
            output_directory: std::env::temp_dir().join("playback-capture"),
            file_name: "playback_audio.m4a".into(),
            write_metadata: true,
        }
    }
}

/// The subset of the configuration an encoder needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSettings {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_rate: u32,
    pub profile: CodecProfile,
    pub input_wait: Duration,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        PipelineConfig::default().encoder_settings()
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_capture_format() {
        let config = PipelineConfig::default();
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.channels, 2);
        assert_eq!(config.bit_rate, 128_000);
        assert_eq!(config.input_wait, Duration::from_millis(10));
        assert_eq!(config.warmup, WarmupPolicy::Discard);
        assert!(config.validate().is_ok());
        assert_eq!(config.profile, CodecProfile::Opus);
        assert!(config.output_path().ends_with("playback_audio.m4a"));
    }

    #[test]
    fn rejects_bad_channel_count() {
        let config = PipelineConfig {
            channels: 6,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("channel"));
    }

    #[test]
    fn rejects_tiny_read_buffer() {
        let config = PipelineConfig {
            read_buffer_size: 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{ "sample_rate": 48000, "input_wait_ms": 25, "warmup": { "replay": { "max_chunks": 8 } } }"#,
        )
        .unwrap();
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.input_wait, Duration::from_millis(25));
        assert_eq!(config.warmup, WarmupPolicy::Replay { max_chunks: 8 });
        assert_eq!(config.channels, 2);
        assert_eq!(config.drain, DrainLimit::default());
    }

    #[test]
    fn profile_names_are_snake_case() {
        let config = PipelineConfig::from_json_str(r#"{ "profile": "aac_lc" }"#).unwrap();
        assert_eq!(config.profile, CodecProfile::AacLc);
    }

    #[test]
    fn json_round_trip_preserves_durations() {
        let config = PipelineConfig {
            idle_backoff: Duration::from_millis(7),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"idle_backoff_ms\":7"));
        assert_eq!(PipelineConfig::from_json_str(&json).unwrap(), config);
    }
}
