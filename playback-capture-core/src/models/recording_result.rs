use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::audio_models::TrackFormat;
use super::error::PipelineError;

/// A finished container file.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub file_path: PathBuf,
    pub duration_secs: f64,
    pub metadata: RecordingMetadata,
    pub checksum: String,
}

/// Metadata stored alongside a recording.
///
/// Serializable for the JSON sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    pub duration_secs: f64,
    pub file_path: String,
    pub checksum: String,
    pub created_at: String,
    pub codec: String,
    pub frames: u64,
    pub format: TrackFormat,
}

impl RecordingMetadata {
    pub fn new(format: TrackFormat, frames: u64, file_path: &str, checksum: &str) -> Self {
        let duration_secs = if format.sample_rate > 0 {
            frames as f64 / format.sample_rate as f64
        } else {
            0.0
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            duration_secs,
            file_path: file_path.to_string(),
            checksum: checksum.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            codec: format.codec.as_str().to_string(),
            frames,
            format,
        }
    }
}

/// Counters collected over one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub chunks_read: u64,
    pub empty_reads: u64,
    pub chunks_submitted: u64,
    pub bytes_submitted: u64,
    pub backpressure_drops: u64,
    pub format_ready_events: u64,
    pub duplicate_format_events: u64,
    pub codec_config_chunks: u64,
    pub warmup_discarded: u64,
    pub warmup_replayed: u64,
    pub chunks_written: u64,
    pub bytes_written: u64,
    pub frames_written: u64,
    pub drain_truncated: bool,
}

/// Outcome of a session returned by `PipelineController::stop`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionReport {
    /// `None` when the container never started (no format was ever announced).
    pub recording: Option<RecordingResult>,
    pub stats: PipelineStats,
    /// Set when the device failed mid-session. Whatever was captured before
    /// the failure is still drained and finalized into `recording`.
    pub source_error: Option<PipelineError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audio_models::CodecId;

    fn format() -> TrackFormat {
        TrackFormat {
            codec: CodecId::Opus,
            sample_rate: 48_000,
            channels: 2,
            bit_rate: 128_000,
            block_align: 0,
            codec_config: b"OpusHead".to_vec(),
        }
    }

    #[test]
    fn metadata_duration_from_frames() {
        let metadata = RecordingMetadata::new(format(), 96_000, "/tmp/a.m4a", "abc");
        assert!((metadata.duration_secs - 2.0).abs() < 1e-9);
        assert_eq!(metadata.codec, "audio/opus");
        assert!(!metadata.id.is_empty());
    }

    #[test]
    fn metadata_serializes_format() {
        let metadata = RecordingMetadata::new(format(), 0, "/tmp/a.m4a", "abc");
        let json = serde_json::to_string(&metadata).unwrap();
        assert!(json.contains("\"codec\":\"opus\""));
        let back: RecordingMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, metadata);
    }
}
