use std::collections::VecDeque;
use std::mem;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::pipeline::Shared;
use crate::models::audio_models::{CompressedChunk, RawAudioChunk, TrackFormat, TrackHandle};
use crate::models::config::{DrainLimit, PipelineConfig, WarmupPolicy};
use crate::models::error::{EncoderError, PipelineError, SourceError};
use crate::models::recording_result::{RecordingMetadata, RecordingResult, SessionReport};
use crate::models::state::PipelineState;
use crate::processing::clock::PtsClock;
use crate::storage::metadata;
use crate::storage::muxer::{Muxer, Started, Unopened};
use crate::traits::container_sink::{ContainerSink, ContainerSummary};
use crate::traits::encoder::{AudioEncoder, EncoderEvent};
use crate::traits::sample_source::SampleSource;

/// Pause between polls while waiting for the final end-of-stream.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Caps how many times one pump may poll the encoder, and for how long.
///
/// Every `poll_output` call spends one poll, including the empty ones.
struct PollBudget {
    polls_left: usize,
    used: usize,
    deadline: Instant,
}

impl PollBudget {
    fn new(limit: DrainLimit) -> Self {
        Self {
            polls_left: limit.max_polls,
            used: 0,
            deadline: Instant::now() + limit.timeout,
        }
    }

    fn take(&mut self) -> bool {
        if self.is_exhausted() {
            return false;
        }
        self.polls_left -= 1;
        self.used += 1;
        true
    }

    fn is_exhausted(&self) -> bool {
        self.polls_left == 0 || Instant::now() >= self.deadline
    }
}

/// Where the container is in its lifecycle, as seen by the worker.
enum MuxerSlot<K: ContainerSink> {
    Unopened(Muxer<K, Unopened>),
    Started(Muxer<K, Started>, TrackHandle),
    Gone,
}

/// The capture → submit → drain loop. Sole owner of the codec and container.
pub(crate) struct CaptureWorker<S, E, K: ContainerSink> {
    source: S,
    encoder: E,
    muxer: MuxerSlot<K>,
    config: PipelineConfig,
    shared: Arc<Shared>,
    clock: PtsClock,
    read_buf: Vec<u8>,
    format: Option<TrackFormat>,
    output_path: Option<PathBuf>,
    /// Pre-format units kept under `WarmupPolicy::Replay`.
    replay: VecDeque<CompressedChunk>,
    /// Device failure that ended capture early.
    source_error: Option<PipelineError>,
}

impl<S, E, K> CaptureWorker<S, E, K>
where
    S: SampleSource,
    E: AudioEncoder,
    K: ContainerSink,
{
    pub fn new(source: S, encoder: E, muxer: Muxer<K, Unopened>, config: PipelineConfig, shared: Arc<Shared>) -> Self {
        let output_path = muxer.path().map(PathBuf::from);
        Self {
            source,
            encoder,
            muxer: MuxerSlot::Unopened(muxer),
            read_buf: vec![0u8; config.read_buffer_size],
            config,
            shared,
            clock: PtsClock::new(),
            format: None,
            output_path,
            replay: VecDeque::new(),
            source_error: None,
        }
    }

    pub fn run(mut self) -> Result<SessionReport, PipelineError> {
        log::debug!("capture worker running");
        let outcome = self.capture().and_then(|()| self.drain_final());
        match outcome {
            Ok(()) => Ok(self.finish()),
            Err(e) => Err(self.fail(e)),
        }
    }

    // --- Capturing ---

    fn capture(&mut self) -> Result<(), PipelineError> {
        while self.shared.running.load(Ordering::SeqCst) {
            match self.source.read(&mut self.read_buf) {
                Ok(0) => {
                    self.shared.counters.empty_reads.fetch_add(1, Ordering::Relaxed);
                    self.pump_capture_output()?;
                    thread::sleep(self.config.idle_backoff);
                }
                Ok(n) => {
                    self.shared.counters.chunks_read.fetch_add(1, Ordering::Relaxed);
                    let n = n.min(self.read_buf.len());
                    let pts_us = self.clock.now_us();
                    self.submit(n, pts_us)?;
                    self.pump_capture_output()?;
                }
                Err(SourceError::Closed) => {
                    log::info!("sample source closed; draining");
                    break;
                }
                Err(e @ SourceError::Device(_)) => {
                    log::error!("{}; finalizing what was captured", e);
                    self.source_error = Some(e.into());
                    break;
                }
            }
        }
        Ok(())
    }

    fn submit(&mut self, len: usize, pts_us: i64) -> Result<(), PipelineError> {
        let counters = &self.shared.counters;
        match self.encoder.submit(RawAudioChunk::new(&self.read_buf[..len], pts_us)) {
            Ok(()) => {
                counters.chunks_submitted.fetch_add(1, Ordering::Relaxed);
                counters.bytes_submitted.fetch_add(len as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(EncoderError::WouldBlock) => {
                counters.backpressure_drops.fetch_add(1, Ordering::Relaxed);
                log::trace!("input slot busy; dropped {} bytes at {}us", len, pts_us);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn pump_capture_output(&mut self) -> Result<(), PipelineError> {
        let mut budget = PollBudget::new(self.config.drain);
        self.pump_output(&mut budget)?;
        if budget.is_exhausted() {
            log::trace!("encoder still had output after {} polls; continuing capture", budget.used);
        }
        Ok(())
    }

    /// Handle encoder output one event at a time until the codec reports
    /// nothing ready or the budget runs out. Returns `true` once
    /// end-of-stream has been seen.
    fn pump_output(&mut self, budget: &mut PollBudget) -> Result<bool, PipelineError> {
        while budget.take() {
            let Some(event) = self.encoder.poll_output()? else {
                return Ok(false);
            };
            match event {
                EncoderEvent::FormatReady(format) => self.on_format_ready(format)?,
                EncoderEvent::Chunk(chunk) => self.on_chunk(chunk)?,
                EncoderEvent::EndOfStream => return Ok(true),
            }
        }
        Ok(false)
    }

    fn on_format_ready(&mut self, format: TrackFormat) -> Result<(), PipelineError> {
        let counters = &self.shared.counters;
        let mut muxer = match mem::replace(&mut self.muxer, MuxerSlot::Gone) {
            MuxerSlot::Unopened(muxer) => muxer,
            other => {
                self.muxer = other;
                counters.duplicate_format_events.fetch_add(1, Ordering::Relaxed);
                log::warn!("encoder announced its format again; ignoring");
                return Ok(());
            }
        };
        counters.format_ready_events.fetch_add(1, Ordering::Relaxed);

        let track = match muxer.add_track(&format) {
            Ok(track) => track,
            Err(e) => {
                self.muxer = MuxerSlot::Unopened(muxer);
                return Err(e.into());
            }
        };
        let started = muxer.start()?;
        self.muxer = MuxerSlot::Started(started, track);
        self.shared.muxer_ready.store(true, Ordering::SeqCst);

        log::info!(
            "container started: {} {} Hz {} ch, {} bps",
            format.codec.as_str(),
            format.sample_rate,
            format.channels,
            format.bit_rate
        );
        if let Some(delegate) = &self.shared.delegate {
            delegate.on_format_ready(&format);
        }
        self.format = Some(format);
        self.flush_replay()
    }

    fn on_chunk(&mut self, chunk: CompressedChunk) -> Result<(), PipelineError> {
        let counters = &self.shared.counters;
        if chunk.flags().is_codec_config() {
            counters.codec_config_chunks.fetch_add(1, Ordering::Relaxed);
            self.encoder.release(chunk);
            return Ok(());
        }

        if !self.shared.muxer_ready.load(Ordering::SeqCst) {
            match self.config.warmup {
                WarmupPolicy::Replay { max_chunks } if self.replay.len() < max_chunks => {
                    self.replay
                        .push_back(CompressedChunk::detached(chunk.payload().to_vec(), chunk.info()));
                }
                _ => {
                    counters.warmup_discarded.fetch_add(1, Ordering::Relaxed);
                    log::debug!("discarding warm-up unit at {}us", chunk.pts_us());
                }
            }
            self.encoder.release(chunk);
            return Ok(());
        }

        let written = self.write_chunk(&chunk);
        self.encoder.release(chunk);
        written
    }

    fn write_chunk(&mut self, chunk: &CompressedChunk) -> Result<(), PipelineError> {
        let MuxerSlot::Started(muxer, track) = &mut self.muxer else {
            return Err(PipelineError::InvalidState("write before container start".into()));
        };
        muxer.write(*track, chunk)?;

        let counters = &self.shared.counters;
        counters.chunks_written.fetch_add(1, Ordering::Relaxed);
        counters.bytes_written.fetch_add(chunk.size() as u64, Ordering::Relaxed);
        counters.frames_written.fetch_add(chunk.info().frames as u64, Ordering::Relaxed);
        Ok(())
    }

    fn flush_replay(&mut self) -> Result<(), PipelineError> {
        if !self.replay.is_empty() {
            log::debug!("replaying {} warm-up units", self.replay.len());
        }
        while let Some(chunk) = self.replay.pop_front() {
            self.write_chunk(&chunk)?;
            self.shared.counters.warmup_replayed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    // --- Draining ---

    /// Flush the codec under a bounded deadline.
    fn drain_final(&mut self) -> Result<(), PipelineError> {
        self.shared.set_state(PipelineState::Draining);
        self.source.stop();

        let mut budget = PollBudget::new(self.config.drain);

        loop {
            match self.encoder.submit_end_of_stream() {
                Ok(()) => break,
                Err(EncoderError::WouldBlock) => {
                    self.pump_output(&mut budget)?;
                    if budget.is_exhausted() {
                        self.mark_truncated(budget.used);
                        return Ok(());
                    }
                    thread::sleep(DRAIN_POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }

        while !budget.is_exhausted() {
            if self.pump_output(&mut budget)? {
                log::debug!("encoder flushed after {} polls", budget.used);
                return Ok(());
            }
            thread::sleep(DRAIN_POLL_INTERVAL);
        }
        self.mark_truncated(budget.used);
        Ok(())
    }

    fn mark_truncated(&self, polls: usize) {
        self.shared.counters.drain_truncated.store(true, Ordering::Relaxed);
        log::warn!("final drain hit its bound after {} polls; remaining output dropped", polls);
    }

    // --- Teardown ---

    fn finish(mut self) -> SessionReport {
        let summary = self.teardown();
        let recording = match (summary, self.format.take(), self.output_path.take()) {
            (Some(summary), Some(format), Some(path)) => Some(self.describe(summary, format, path)),
            _ => None,
        };

        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.set_state(PipelineState::Stopped);

        let report = SessionReport {
            recording,
            stats: self.shared.counters.snapshot(),
            source_error: self.source_error.take(),
        };
        log::info!(
            "capture stopped: {} units written, {} frames, {} backpressure drops",
            report.stats.chunks_written,
            report.stats.frames_written,
            report.stats.backpressure_drops
        );
        if let Some(delegate) = &self.shared.delegate {
            if let Some(error) = &report.source_error {
                delegate.on_error(error);
            }
            delegate.on_session_finished(&report);
        }
        report
    }

    fn fail(mut self, error: PipelineError) -> PipelineError {
        log::error!("capture failed: {}", error);
        self.source.stop();
        self.teardown();
        self.shared.fail(&error);
        error
    }

    /// Best-effort release of codec and container. Never fails.
    ///
    /// Only a started container is finalized; an unstarted one is released.
    fn teardown(&mut self) -> Option<ContainerSummary> {
        self.encoder.shutdown();
        self.replay.clear();

        match mem::replace(&mut self.muxer, MuxerSlot::Gone) {
            MuxerSlot::Started(muxer, _) => match muxer.stop() {
                Ok(summary) => Some(summary),
                Err(e) => {
                    log::warn!("container stop failed during teardown: {}", e);
                    None
                }
            },
            MuxerSlot::Unopened(muxer) => {
                log::info!("encoder never announced a format; no recording produced");
                muxer.release();
                None
            }
            MuxerSlot::Gone => None,
        }
    }

    fn describe(&self, summary: ContainerSummary, format: TrackFormat, path: PathBuf) -> RecordingResult {
        let checksum = summary.checksum.unwrap_or_default();
        let metadata = RecordingMetadata::new(format, summary.frames, &path.to_string_lossy(), &checksum);

        if self.config.write_metadata {
            if let Err(e) = metadata::write_metadata(&metadata, &path) {
                log::warn!("failed to write metadata sidecar: {}", e);
            }
        }

        RecordingResult {
            file_path: path,
            duration_secs: metadata.duration_secs,
            metadata,
            checksum,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_counts_every_poll() {
        let mut budget = PollBudget::new(DrainLimit {
            max_polls: 3,
            timeout: Duration::from_secs(60),
        });
        assert!(budget.take());
        assert!(budget.take());
        assert!(budget.take());
        assert!(!budget.take());
        assert_eq!(budget.used, 3);
        assert!(budget.is_exhausted());
    }

    #[test]
    fn budget_expires_at_the_deadline() {
        let mut budget = PollBudget::new(DrainLimit {
            max_polls: usize::MAX,
            timeout: Duration::from_millis(5),
        });
        assert!(budget.take());
        thread::sleep(Duration::from_millis(10));
        assert!(budget.is_exhausted());
        assert!(!budget.take());
        assert_eq!(budget.used, 1);
    }
}
