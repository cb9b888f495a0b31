use std::marker::PhantomData;
use std::path::Path;

use crate::models::audio_models::{CompressedChunk, TrackFormat, TrackHandle};
use crate::models::error::ContainerError;
use crate::traits::container_sink::{ContainerSink, ContainerSummary};

/// Muxer that has not written its header yet. Tracks may still be added.
#[derive(Debug)]
pub struct Unopened;

/// Muxer whose header is written. Only this state can `write` and `stop`.
#[derive(Debug)]
pub struct Started;

/// Single-track container writer.
///
/// The lifecycle is carried in the type:
/// ```text
/// Muxer<K, Unopened> ──open/add_track──> start() ──> Muxer<K, Started> ──write*──> stop()
///        └──────────────────────────────> release()
/// ```
/// `stop` does not exist on an unstarted muxer, so the teardown path cannot
/// finalize a container that never got a header.
pub struct Muxer<K: ContainerSink, S> {
    sink: K,
    opened: bool,
    track: Option<TrackFormat>,
    last_pts: Option<i64>,
    _state: PhantomData<S>,
}

const TRACK_INDEX: u32 = 0;

impl<K: ContainerSink> Muxer<K, Unopened> {
    pub fn new(sink: K) -> Self {
        Self {
            sink,
            opened: false,
            track: None,
            last_pts: None,
            _state: PhantomData,
        }
    }

    /// Create the output file. Nothing is written until `start`.
    pub fn open(&mut self, path: &Path) -> Result<(), ContainerError> {
        if self.opened {
            return Err(ContainerError::AlreadyOpen);
        }
        self.sink.open(path)?;
        self.opened = true;
        log::debug!("container opened at {}", path.display());
        Ok(())
    }

    /// Register the only track. A second registration is rejected.
    pub fn add_track(&mut self, format: &TrackFormat) -> Result<TrackHandle, ContainerError> {
        if !self.opened {
            return Err(ContainerError::NotOpen);
        }
        if self.track.is_some() {
            return Err(ContainerError::TrackAlreadyAdded);
        }
        self.track = Some(format.clone());
        Ok(TrackHandle(TRACK_INDEX))
    }

    /// Write the header. On failure the file is abandoned.
    pub fn start(mut self) -> Result<Muxer<K, Started>, ContainerError> {
        let begun = match &self.track {
            Some(track) => self.sink.begin(track),
            None if self.opened => Err(ContainerError::NoTrack),
            None => Err(ContainerError::NotOpen),
        };
        if let Err(e) = begun {
            self.sink.abandon();
            return Err(e);
        }
        Ok(Muxer {
            sink: self.sink,
            opened: true,
            track: self.track,
            last_pts: None,
            _state: PhantomData,
        })
    }

    /// Drop a container that never started.
    pub fn release(mut self) {
        if self.opened {
            self.sink.abandon();
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }

    pub fn has_track(&self) -> bool {
        self.track.is_some()
    }
}

impl<K: ContainerSink> Muxer<K, Started> {
    /// Append one encoded unit.
    ///
    /// Codec-config units are carried in the header and skipped here.
    pub fn write(&mut self, track: TrackHandle, chunk: &CompressedChunk) -> Result<(), ContainerError> {
        if track.index() != TRACK_INDEX {
            return Err(ContainerError::UnknownTrack(track.index()));
        }
        if chunk.flags().is_codec_config() {
            return Ok(());
        }
        let pts = chunk.pts_us();
        if let Some(previous) = self.last_pts {
            if pts < previous {
                return Err(ContainerError::NonMonotonicTimestamp { previous, got: pts });
            }
        }
        self.sink.append(chunk.payload(), &chunk.info())?;
        self.last_pts = Some(pts);
        Ok(())
    }

    /// Finalize the container.
    pub fn stop(mut self) -> Result<ContainerSummary, ContainerError> {
        let summary = self.sink.finalize()?;
        log::debug!(
            "container finalized: {} records, {} bytes",
            summary.records,
            summary.bytes_written
        );
        Ok(summary)
    }

    pub fn format(&self) -> Option<&TrackFormat> {
        self.track.as_ref()
    }

    pub fn last_pts(&self) -> Option<i64> {
        self.last_pts
    }
}

impl<K: ContainerSink, S> Muxer<K, S> {
    pub fn path(&self) -> Option<&Path> {
        self.sink.path()
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }
}
