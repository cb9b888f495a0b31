use std::fs::{self, File};
use std::io::{BufWriter, Read};
use std::path::{Path, PathBuf};

use muxide::api::{AudioCodec, Metadata, Muxer as Mp4Muxer, MuxerBuilder};
use sha2::{Digest, Sha256};

use crate::models::audio_models::{ChunkInfo, CodecId, TrackFormat};
use crate::models::error::ContainerError;
use crate::traits::container_sink::{ContainerSink, ContainerSummary};

/// Audio-only MP4 writer backed by muxide.
///
/// `open` only creates the file; the muxer is built in `begin` once the
/// encoder's format is known. Output is fast-start (`moov` ahead of `mdat`),
/// so the file plays and seeks without a post-processing pass. Timestamps are
/// rebased so the first unit sits at zero.
pub struct Mp4Sink {
    path: Option<PathBuf>,
    file: Option<File>,
    muxer: Option<Mp4Muxer<BufWriter<File>>>,
    /// Second handle on the file, used to sync after the muxer is consumed.
    sync_handle: Option<File>,
    first_pts: Option<i64>,
    payload_bytes: u64,
    frames: u64,
    records: u64,
}

impl Mp4Sink {
    pub fn new() -> Self {
        Self {
            path: None,
            file: None,
            muxer: None,
            sync_handle: None,
            first_pts: None,
            payload_bytes: 0,
            frames: 0,
            records: 0,
        }
    }

    /// Encoded payload bytes appended so far.
    pub fn payload_bytes(&self) -> u64 {
        self.payload_bytes
    }
}

impl Default for Mp4Sink {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerSink for Mp4Sink {
    fn open(&mut self, path: &Path) -> Result<(), ContainerError> {
        if self.file.is_some() || self.muxer.is_some() {
            return Err(ContainerError::AlreadyOpen);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ContainerError::Io(format!("failed to create directory: {}", e)))?;
        }
        let file = File::create(path).map_err(|e| ContainerError::Io(format!("failed to create file: {}", e)))?;

        self.file = Some(file);
        self.path = Some(path.to_path_buf());
        self.first_pts = None;
        self.payload_bytes = 0;
        self.frames = 0;
        self.records = 0;
        Ok(())
    }

    fn begin(&mut self, track: &TrackFormat) -> Result<(), ContainerError> {
        if track.codec != CodecId::Opus {
            return Err(ContainerError::UnsupportedCodec(track.codec.as_str().into()));
        }
        let file = self.file.take().ok_or(ContainerError::NotOpen)?;
        let sync_handle = file.try_clone()?;

        let muxer = MuxerBuilder::new(BufWriter::new(file))
            .audio(AudioCodec::Opus, track.sample_rate, track.channels)
            .with_fast_start(true)
            .with_metadata(Metadata::new().with_current_time())
            .build()
            .map_err(|e| ContainerError::Io(format!("failed to start mp4 muxer: {}", e)))?;

        log::debug!(
            "mp4 audio track: opus {} Hz {} ch, {} bps",
            track.sample_rate,
            track.channels,
            track.bit_rate
        );
        self.muxer = Some(muxer);
        self.sync_handle = Some(sync_handle);
        Ok(())
    }

    fn append(&mut self, payload: &[u8], info: &ChunkInfo) -> Result<(), ContainerError> {
        let muxer = self.muxer.as_mut().ok_or(ContainerError::NoTrack)?;
        let first = *self.first_pts.get_or_insert(info.pts_us);
        let pts_secs = (info.pts_us - first) as f64 / 1_000_000.0;

        muxer
            .write_audio(pts_secs, payload)
            .map_err(|e| ContainerError::Io(format!("failed to write audio unit: {}", e)))?;
        self.payload_bytes += payload.len() as u64;
        self.frames += info.frames as u64;
        self.records += 1;
        Ok(())
    }

    fn finalize(&mut self) -> Result<ContainerSummary, ContainerError> {
        let muxer = self.muxer.take().ok_or(ContainerError::NoTrack)?;
        let stats = muxer
            .finish_with_stats()
            .map_err(|e| ContainerError::Io(format!("failed to finalize mp4: {}", e)))?;
        if let Some(handle) = self.sync_handle.take() {
            handle.sync_all()?;
        }
        log::debug!(
            "mp4 finalized: {} audio frames, {:.2} s, {} bytes",
            stats.audio_frames,
            stats.duration_secs,
            stats.bytes_written
        );

        let checksum = match &self.path {
            Some(path) => Some(sha256_file(path)?),
            None => None,
        };
        Ok(ContainerSummary {
            bytes_written: stats.bytes_written,
            records: self.records,
            frames: self.frames,
            checksum,
        })
    }

    fn abandon(&mut self) {
        self.muxer = None;
        self.file = None;
        self.sync_handle = None;
        if let Some(path) = &self.path {
            match fs::remove_file(path) {
                Ok(()) => log::debug!("removed unstarted container {}", path.display()),
                Err(e) => log::warn!("failed to remove unstarted container {}: {}", path.display(), e),
            }
        }
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// SHA-256 hex digest of a file.
pub fn sha256_file(path: &Path) -> Result<String, ContainerError> {
    let mut file =
        File::open(path).map_err(|e| ContainerError::Io(format!("failed to read file for checksum: {}", e)))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
