use std::path::Path;

use crate::models::audio_models::{ChunkInfo, TrackFormat};
use crate::models::error::ContainerError;

/// What a sink reports once the container is finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub bytes_written: u64,
    pub records: u64,
    pub frames: u64,
    /// SHA-256 hex digest of the finished file, when the sink can compute one.
    pub checksum: Option<String>,
}

/// Format-specific backend driven by [`Muxer`](crate::storage::muxer::Muxer).
///
/// The muxer enforces call order; a sink only has to lay out bytes.
pub trait ContainerSink: Send {
    /// Create the output file. No header is written yet.
    fn open(&mut self, path: &Path) -> Result<(), ContainerError>;

    /// Write the global header for the single track.
    fn begin(&mut self, track: &TrackFormat) -> Result<(), ContainerError>;

    /// Append one encoded unit as a container record.
    fn append(&mut self, payload: &[u8], info: &ChunkInfo) -> Result<(), ContainerError>;

    /// Patch header/index structures and flush. Only called after `begin`.
    fn finalize(&mut self) -> Result<ContainerSummary, ContainerError>;

    /// Release a container that never started.
    fn abandon(&mut self);

    /// Path given to `open`, if any.
    fn path(&self) -> Option<&Path>;
}
