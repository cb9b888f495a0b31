//! Test doubles for driving a pipeline without devices or disk.
//!
//! Shared counters (`Arc`-backed) let a test keep observing a component after
//! the controller has moved it onto the worker thread.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::audio_models::{ChunkFlags, ChunkInfo, CodecId, CompressedChunk, RawAudioChunk, TrackFormat};
use crate::models::config::EncoderSettings;
use crate::models::error::{ContainerError, EncoderError, PipelineError, SourceError};
use crate::models::recording_result::SessionReport;
use crate::models::state::PipelineState;
use crate::traits::container_sink::{ContainerSink, ContainerSummary};
use crate::traits::encoder::{AudioEncoder, EncoderEvent};
use crate::traits::pipeline_delegate::PipelineDelegate;
use crate::traits::session_collaborators::{CaptureAuthorizer, CaptureGrant, VideoRecorder};
use crate::traits::sample_source::SampleSource;

// ---------------------------------------------------------------------------
// SyntheticSource
// ---------------------------------------------------------------------------

/// Counters shared between a [`SyntheticSource`] and the test holding it.
#[derive(Debug, Default)]
pub struct SourceCounters {
    reads: AtomicU64,
    empty_reads: AtomicU64,
    bytes: AtomicU64,
    stopped: AtomicBool,
}

impl SourceCounters {
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn empty_reads(&self) -> u64 {
        self.empty_reads.load(Ordering::SeqCst)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Sine-wave PCM generator.
pub struct SyntheticSource {
    sample_rate: u32,
    channels: u16,
    frequency: f64,
    amplitude: f64,
    chunk_bytes: usize,
    empty_polls: usize,
    chunk_limit: Option<usize>,
    close_when_exhausted: bool,
    device_error_after: Option<usize>,
    paced: bool,
    produced: usize,
    frame_index: u64,
    stopped: bool,
    counters: Arc<SourceCounters>,
}

impl SyntheticSource {
    /// 440 Hz tone, 4096-byte chunks, unbounded, unpaced.
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            frequency: 440.0,
            amplitude: 0.5,
            chunk_bytes: 4096,
            empty_polls: 0,
            chunk_limit: None,
            close_when_exhausted: true,
            device_error_after: None,
            paced: false,
            produced: 0,
            frame_index: 0,
            stopped: false,
            counters: Arc::new(SourceCounters::default()),
        }
    }

    pub fn chunk_bytes(mut self, bytes: usize) -> Self {
        self.chunk_bytes = bytes;
        self
    }

    /// Return `Ok(0)` for the first `polls` reads.
    pub fn empty_polls(mut self, polls: usize) -> Self {
        self.empty_polls = polls;
        self
    }

    /// Produce `chunks` chunks, then report `Closed`.
    pub fn chunk_limit(mut self, chunks: usize) -> Self {
        self.chunk_limit = Some(chunks);
        self
    }

    /// After the chunk limit, keep returning `Ok(0)` instead of closing.
    pub fn keep_open(mut self) -> Self {
        self.close_when_exhausted = false;
        self
    }

    /// Produce `chunks` chunks, then fail every read with a device error.
    pub fn device_error_after(mut self, chunks: usize) -> Self {
        self.device_error_after = Some(chunks);
        self
    }

    /// Sleep for each chunk's real-time duration.
    pub fn paced(mut self) -> Self {
        self.paced = true;
        self
    }

    pub fn frequency(mut self, hz: f64) -> Self {
        self.frequency = hz;
        self
    }

    pub fn counters(&self) -> Arc<SourceCounters> {
        Arc::clone(&self.counters)
    }

    fn empty_read(&mut self) -> Result<usize, SourceError> {
        self.counters.empty_reads.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }
}

impl SampleSource for SyntheticSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        if self.stopped {
            return Err(SourceError::Closed);
        }
        self.counters.reads.fetch_add(1, Ordering::SeqCst);

        if self.empty_polls > 0 {
            self.empty_polls -= 1;
            return self.empty_read();
        }
        if self.device_error_after.is_some_and(|limit| self.produced >= limit) {
            return Err(SourceError::Device("scripted device loss".into()));
        }
        if self.chunk_limit.is_some_and(|limit| self.produced >= limit) {
            if self.close_when_exhausted {
                return Err(SourceError::Closed);
            }
            thread::sleep(Duration::from_millis(1));
            return self.empty_read();
        }

        let frame_bytes = self.channels as usize * 2;
        let len = buf.len().min(self.chunk_bytes) / frame_bytes * frame_bytes;
        if len == 0 {
            return self.empty_read();
        }

        let step = std::f64::consts::TAU * self.frequency / self.sample_rate as f64;
        for frame in buf[..len].chunks_exact_mut(frame_bytes) {
            let value = ((self.frame_index as f64 * step).sin() * self.amplitude * i16::MAX as f64) as i16;
            for sample in frame.chunks_exact_mut(2) {
                sample.copy_from_slice(&value.to_le_bytes());
            }
            self.frame_index += 1;
        }

        if self.paced {
            let frames = (len / frame_bytes) as u64;
            thread::sleep(Duration::from_micros(frames * 1_000_000 / self.sample_rate as u64));
        }

        self.produced += 1;
        self.counters.bytes.fetch_add(len as u64, Ordering::SeqCst);
        Ok(len)
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.counters.stopped.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

/// One call observed by a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Open,
    Begin,
    Append { pts_us: i64, frames: u32, len: usize },
    Finalize,
    Abandon,
}

#[derive(Debug, Default)]
struct SinkLog {
    events: Vec<SinkEvent>,
    format: Option<TrackFormat>,
    fail_append_after: Option<usize>,
    fail_begin: bool,
}

/// In-memory [`ContainerSink`] that records every call.
///
/// Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
    path: Option<PathBuf>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every append after the first `appends` succeed.
    pub fn fail_append_after(self, appends: usize) -> Self {
        self.log.lock().fail_append_after = Some(appends);
        self
    }

    pub fn fail_begin(self) -> Self {
        self.log.lock().fail_begin = true;
        self
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.log.lock().events.clone()
    }

    pub fn appended_pts(&self) -> Vec<i64> {
        self.log
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Append { pts_us, .. } => Some(*pts_us),
                _ => None,
            })
            .collect()
    }

    pub fn appended_frames(&self) -> u64 {
        self.log
            .lock()
            .events
            .iter()
            .map(|e| match e {
                SinkEvent::Append { frames, .. } => *frames as u64,
                _ => 0,
            })
            .sum()
    }

    pub fn count(&self, wanted: &SinkEvent) -> usize {
        let log = self.log.lock();
        log.events
            .iter()
            .filter(|e| std::mem::discriminant(*e) == std::mem::discriminant(wanted))
            .count()
    }

    pub fn format(&self) -> Option<TrackFormat> {
        self.log.lock().format.clone()
    }
}

impl ContainerSink for RecordingSink {
    fn open(&mut self, path: &Path) -> Result<(), ContainerError> {
        self.log.lock().events.push(SinkEvent::Open);
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    fn begin(&mut self, track: &TrackFormat) -> Result<(), ContainerError> {
        let mut log = self.log.lock();
        if log.fail_begin {
            return Err(ContainerError::Io("scripted begin failure".into()));
        }
        log.events.push(SinkEvent::Begin);
        log.format = Some(track.clone());
        Ok(())
    }

    fn append(&mut self, payload: &[u8], info: &ChunkInfo) -> Result<(), ContainerError> {
        let mut log = self.log.lock();
        if let Some(limit) = log.fail_append_after {
            let appended = log.events.iter().filter(|e| matches!(e, SinkEvent::Append { .. })).count();
            if appended >= limit {
                return Err(ContainerError::Io("scripted disk full".into()));
            }
        }
        log.events.push(SinkEvent::Append {
            pts_us: info.pts_us,
            frames: info.frames,
            len: payload.len(),
        });
        Ok(())
    }

    fn finalize(&mut self) -> Result<ContainerSummary, ContainerError> {
        let mut log = self.log.lock();
        log.events.push(SinkEvent::Finalize);
        let (mut bytes, mut records, mut frames) = (0u64, 0u64, 0u64);
        for event in &log.events {
            if let SinkEvent::Append { frames: f, len, .. } = event {
                bytes += *len as u64;
                records += 1;
                frames += *f as u64;
            }
        }
        Ok(ContainerSummary {
            bytes_written: bytes,
            records,
            frames,
            checksum: None,
        })
    }

    fn abandon(&mut self) {
        self.log.lock().events.push(SinkEvent::Abandon);
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

// ---------------------------------------------------------------------------
// ScriptedEncoder
// ---------------------------------------------------------------------------

/// Counters shared between a [`ScriptedEncoder`] and the test holding it.
#[derive(Debug, Default)]
pub struct EncoderCounters {
    submitted: AtomicU64,
    released: AtomicU64,
    formats_emitted: AtomicU64,
    shutdowns: AtomicU64,
}

impl EncoderCounters {
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    pub fn formats_emitted(&self) -> u64 {
        self.formats_emitted.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> u64 {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

/// Encoder double with a deterministic output script.
///
/// Every submitted chunk comes back as one data unit carrying the input's
/// timestamp. `FormatReady` is emitted after `warmup` units.
pub struct ScriptedEncoder {
    warmup: usize,
    duplicate_format: bool,
    endless_output: bool,
    withhold_end_of_stream: bool,
    last_pts: i64,
    configure_error: Option<EncoderError>,
    block_every: Option<u64>,
    channels: u16,
    sample_rate: u32,
    queue: VecDeque<EncoderEvent>,
    configured: bool,
    format_sent: bool,
    units: usize,
    counters: Arc<EncoderCounters>,
}

impl ScriptedEncoder {
    pub fn new() -> Self {
        Self {
            warmup: 0,
            duplicate_format: false,
            endless_output: false,
            withhold_end_of_stream: false,
            last_pts: 0,
            configure_error: None,
            block_every: None,
            channels: 2,
            sample_rate: 44_100,
            queue: VecDeque::new(),
            configured: false,
            format_sent: false,
            units: 0,
            counters: Arc::new(EncoderCounters::default()),
        }
    }

    /// Emit this many data units before the format.
    pub fn warmup(mut self, units: usize) -> Self {
        self.warmup = units;
        self
    }

    /// Announce the format a second time right after the first.
    pub fn duplicate_format(mut self) -> Self {
        self.duplicate_format = true;
        self
    }

    /// Once the format is out, never report an empty output queue and never
    /// deliver end-of-stream.
    pub fn endless_output(mut self) -> Self {
        self.endless_output = true;
        self.withhold_end_of_stream = true;
        self
    }

    /// Accept end-of-stream but never report it.
    pub fn withhold_end_of_stream(mut self) -> Self {
        self.withhold_end_of_stream = true;
        self
    }

    pub fn fail_configure(mut self, err: EncoderError) -> Self {
        self.configure_error = Some(err);
        self
    }

    /// Reject every `n`th submission with `WouldBlock`.
    pub fn block_every(mut self, n: u64) -> Self {
        self.block_every = Some(n.max(1));
        self
    }

    pub fn counters(&self) -> Arc<EncoderCounters> {
        Arc::clone(&self.counters)
    }

    fn format(&self) -> TrackFormat {
        TrackFormat {
            codec: CodecId::Opus,
            sample_rate: self.sample_rate,
            channels: self.channels,
            bit_rate: 0,
            block_align: 0,
            codec_config: vec![0x01],
        }
    }

    /// Repeats the newest input timestamp so later input stays in order.
    fn filler(&self) -> EncoderEvent {
        EncoderEvent::Chunk(CompressedChunk::detached(
            vec![0; 4],
            ChunkInfo {
                pts_us: self.last_pts,
                frames: 1,
                flags: ChunkFlags::NONE,
            },
        ))
    }

    fn announce(&mut self) {
        let format = self.format();
        self.queue.push_back(EncoderEvent::FormatReady(format.clone()));
        self.counters.formats_emitted.fetch_add(1, Ordering::SeqCst);
        if self.duplicate_format {
            self.queue.push_back(EncoderEvent::FormatReady(format));
            self.counters.formats_emitted.fetch_add(1, Ordering::SeqCst);
        }
        self.format_sent = true;
    }
}

impl Default for ScriptedEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioEncoder for ScriptedEncoder {
    fn configure(&mut self, settings: &EncoderSettings) -> Result<(), EncoderError> {
        if let Some(err) = self.configure_error.clone() {
            return Err(err);
        }
        if self.configured {
            return Err(EncoderError::AlreadyConfigured);
        }
        self.channels = settings.channels;
        self.sample_rate = settings.sample_rate;
        self.configured = true;
        Ok(())
    }

    fn submit(&mut self, chunk: RawAudioChunk<'_>) -> Result<(), EncoderError> {
        if !self.configured {
            return Err(EncoderError::NotConfigured);
        }
        if chunk.is_empty() {
            return Err(EncoderError::InvalidInput("empty chunk".into()));
        }
        let attempt = self.counters.submitted() + 1;
        if self.block_every.is_some_and(|n| attempt % n == 0) {
            // Count the attempt so the next one goes through.
            self.counters.submitted.fetch_add(1, Ordering::SeqCst);
            return Err(EncoderError::WouldBlock);
        }
        self.counters.submitted.fetch_add(1, Ordering::SeqCst);

        if !self.format_sent && self.units >= self.warmup {
            self.announce();
        }
        let frames = (chunk.len() / (self.channels.max(1) as usize * 2)) as u32;
        self.last_pts = self.last_pts.max(chunk.pts_us);
        self.queue.push_back(EncoderEvent::Chunk(CompressedChunk::detached(
            chunk.data.to_vec(),
            ChunkInfo {
                pts_us: chunk.pts_us,
                frames,
                flags: ChunkFlags::NONE,
            },
        )));
        self.units += 1;
        Ok(())
    }

    fn submit_end_of_stream(&mut self) -> Result<(), EncoderError> {
        if !self.configured {
            return Err(EncoderError::NotConfigured);
        }
        if !self.withhold_end_of_stream {
            self.queue.push_back(EncoderEvent::EndOfStream);
        }
        Ok(())
    }

    fn poll_output(&mut self) -> Result<Option<EncoderEvent>, EncoderError> {
        if !self.configured {
            return Err(EncoderError::NotConfigured);
        }
        match self.queue.pop_front() {
            Some(event) => Ok(Some(event)),
            None if self.endless_output && self.format_sent => Ok(Some(self.filler())),
            None => Ok(None),
        }
    }

    fn release(&mut self, chunk: CompressedChunk) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        drop(chunk);
    }

    fn shutdown(&mut self) {
        if self.configured {
            self.configured = false;
            self.queue.clear();
            self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ---------------------------------------------------------------------------
// Session collaborators
// ---------------------------------------------------------------------------

/// Authorizer with a fixed answer.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthorizer {
    deny: bool,
    revoked: Arc<AtomicU64>,
}

impl StaticAuthorizer {
    pub fn allow() -> Self {
        Self::default()
    }

    pub fn deny() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    pub fn revoked(&self) -> u64 {
        self.revoked.load(Ordering::SeqCst)
    }
}

impl CaptureAuthorizer for StaticAuthorizer {
    fn authorize(&mut self) -> Result<CaptureGrant, PipelineError> {
        if self.deny {
            return Err(PipelineError::PermissionDenied("capture not authorized".into()));
        }
        Ok(CaptureGrant::new())
    }

    fn revoke(&mut self, _grant: CaptureGrant) {
        self.revoked.fetch_add(1, Ordering::SeqCst);
    }
}

/// Video recorder double that logs `start`/`stop` calls.
#[derive(Debug, Clone, Default)]
pub struct StubVideo {
    calls: Arc<Mutex<Vec<&'static str>>>,
    fail_start: bool,
    path: Option<PathBuf>,
}

impl StubVideo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }
}

impl VideoRecorder for StubVideo {
    fn start(&mut self) -> Result<(), PipelineError> {
        self.calls.lock().push("start");
        if self.fail_start {
            return Err(PipelineError::Video("scripted start failure".into()));
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), PipelineError> {
        self.calls.lock().push("stop");
        Ok(())
    }

    fn output_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Delegate that keeps every callback for later inspection.
#[derive(Debug, Default)]
pub struct CollectingDelegate {
    states: Mutex<Vec<PipelineState>>,
    errors: Mutex<Vec<PipelineError>>,
    formats: Mutex<Vec<TrackFormat>>,
    finished: Mutex<Vec<SessionReport>>,
}

impl CollectingDelegate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn states(&self) -> Vec<PipelineState> {
        self.states.lock().clone()
    }

    pub fn errors(&self) -> Vec<PipelineError> {
        self.errors.lock().clone()
    }

    pub fn formats(&self) -> Vec<TrackFormat> {
        self.formats.lock().clone()
    }

    pub fn finished(&self) -> Vec<SessionReport> {
        self.finished.lock().clone()
    }
}

impl PipelineDelegate for CollectingDelegate {
    fn on_state_changed(&self, state: &PipelineState) {
        self.states.lock().push(state.clone());
    }

    fn on_format_ready(&self, format: &TrackFormat) {
        self.formats.lock().push(format.clone());
    }

    fn on_error(&self, error: &PipelineError) {
        self.errors.lock().push(error.clone());
    }

    fn on_session_finished(&self, report: &SessionReport) {
        self.finished.lock().push(report.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_source_empty_polls_then_data_then_close() {
        let mut source = SyntheticSource::new(44_100, 2).empty_polls(2).chunk_limit(1);
        let counters = source.counters();
        let mut buf = [0u8; 4096];

        assert_eq!(source.read(&mut buf).unwrap(), 0);
        assert_eq!(source.read(&mut buf).unwrap(), 0);
        assert_eq!(source.read(&mut buf).unwrap(), 4096);
        assert_eq!(source.read(&mut buf).unwrap_err(), SourceError::Closed);
        assert_eq!(counters.empty_reads(), 2);
        assert_eq!(counters.bytes(), 4096);
    }

    #[test]
    fn synthetic_source_reads_whole_frames() {
        let mut source = SyntheticSource::new(44_100, 2);
        let mut buf = [0u8; 4099];
        assert_eq!(source.read(&mut buf).unwrap(), 4096);
    }

    #[test]
    fn stopped_source_reports_closed() {
        let mut source = SyntheticSource::new(44_100, 2);
        source.stop();
        assert_eq!(source.read(&mut [0u8; 8]).unwrap_err(), SourceError::Closed);
    }

    #[test]
    fn recording_sink_clones_share_log() {
        let sink = RecordingSink::new();
        let mut writer = sink.clone();
        writer.open(Path::new("x.m4a")).unwrap();
        writer.abandon();
        assert_eq!(sink.events(), vec![SinkEvent::Open, SinkEvent::Abandon]);
    }

    #[test]
    fn device_error_follows_the_scripted_chunks() {
        let mut source = SyntheticSource::new(44_100, 2).device_error_after(1);
        let mut buf = [0u8; 64];
        assert_eq!(source.read(&mut buf).unwrap(), 64);
        assert!(matches!(source.read(&mut buf), Err(SourceError::Device(_))));
    }

    #[test]
    fn endless_encoder_never_runs_dry() {
        let mut encoder = ScriptedEncoder::new().endless_output();
        encoder.configure(&EncoderSettings::default()).unwrap();
        assert!(encoder.poll_output().unwrap().is_none());

        encoder.submit(RawAudioChunk::new(&[0; 8], 10)).unwrap();
        encoder.submit_end_of_stream().unwrap();
        let mut last_pts = i64::MIN;
        for _ in 0..100 {
            match encoder.poll_output().unwrap() {
                Some(EncoderEvent::Chunk(chunk)) => {
                    assert!(chunk.pts_us() >= last_pts);
                    last_pts = chunk.pts_us();
                }
                Some(EncoderEvent::FormatReady(_)) => {}
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn withheld_end_of_stream_leaves_the_queue_empty() {
        let mut encoder = ScriptedEncoder::new().withhold_end_of_stream();
        encoder.configure(&EncoderSettings::default()).unwrap();
        encoder.submit_end_of_stream().unwrap();
        assert!(encoder.poll_output().unwrap().is_none());
    }

    #[test]
    fn scripted_encoder_warmup_then_format() {
        let mut encoder = ScriptedEncoder::new().warmup(2);
        encoder.configure(&EncoderSettings::default()).unwrap();
        for pts in 0..3 {
            encoder.submit(RawAudioChunk::new(&[0; 8], pts)).unwrap();
        }
        let kinds: Vec<_> = encoder
            .drain()
            .map(|e| match e.unwrap() {
                EncoderEvent::Chunk(_) => "chunk",
                EncoderEvent::FormatReady(_) => "format",
                EncoderEvent::EndOfStream => "eos",
            })
            .collect();
        assert_eq!(kinds, vec!["chunk", "chunk", "format", "chunk"]);
    }
}
