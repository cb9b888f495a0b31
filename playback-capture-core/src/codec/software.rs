use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError};

use super::opus::{self, OpusCodec, FRAME_SAMPLES, MAX_PACKET_BYTES, OPUS_SAMPLE_RATE};
use crate::models::audio_models::{ChunkFlags, ChunkInfo, CodecId, CompressedChunk, RawAudioChunk, TrackFormat};
use crate::models::config::{CodecProfile, EncoderSettings};
use crate::models::error::EncoderError;
use crate::processing::pcm;
use crate::processing::resample::StreamResampler;
use crate::traits::encoder::{AudioEncoder, EncoderEvent};

const DEFAULT_INPUT_SLOTS: usize = 4;
const DEFAULT_OUTPUT_BUFFERS: usize = 8;

/// How often the codec thread re-checks the shutdown flag while idle.
const CODEC_POLL: Duration = Duration::from_millis(20);

enum CodecInput {
    Pcm { data: Vec<u8>, pts_us: i64 },
    EndOfStream,
}

type CodecOutput = Result<EncoderEvent, EncoderError>;

/// Handles to a configured codec thread.
struct Running {
    input_tx: Sender<CodecInput>,
    output_rx: Receiver<CodecOutput>,
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    input_wait: Duration,
    eos_submitted: bool,
    finished: bool,
}

/// Opus encoder (libopus) running on its own codec thread.
///
/// Input at any supported capture rate is resampled to 48 kHz and cut into
/// 20 ms frames. Mirrors a hardware codec's queue model:
/// ```text
/// submit() → [input slots (bounded)] → codec thread → [output queue] → poll_output()
///                                          ↑                               │
///                                          └──── output buffer pool ←── release()
/// ```
/// The codec stalls when every output buffer is held by the caller, which in
/// turn fills the input slots and makes `submit` return `WouldBlock`.
pub struct SoftwareOpusEncoder {
    input_slots: usize,
    output_buffers: usize,
    running: Option<Running>,
    released: u64,
}

impl SoftwareOpusEncoder {
    pub fn new() -> Self {
        Self::with_slots(DEFAULT_INPUT_SLOTS, DEFAULT_OUTPUT_BUFFERS)
    }

    /// Custom queue depths. Both are clamped to at least 1.
    pub fn with_slots(input_slots: usize, output_buffers: usize) -> Self {
        Self {
            input_slots: input_slots.max(1),
            output_buffers: output_buffers.max(1),
            running: None,
            released: 0,
        }
    }

    /// Number of output units handed back through `release`.
    pub fn released_count(&self) -> u64 {
        self.released
    }

    pub fn is_configured(&self) -> bool {
        self.running.is_some()
    }

    fn running_mut(&mut self) -> Result<&mut Running, EncoderError> {
        self.running.as_mut().ok_or(EncoderError::NotConfigured)
    }
}

impl Default for SoftwareOpusEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioEncoder for SoftwareOpusEncoder {
    fn configure(&mut self, settings: &EncoderSettings) -> Result<(), EncoderError> {
        if self.running.is_some() {
            return Err(EncoderError::AlreadyConfigured);
        }
        if settings.profile != CodecProfile::Opus {
            return Err(EncoderError::Unsupported(format!(
                "profile {:?} is not provided by the software encoder",
                settings.profile
            )));
        }
        if !(8_000..=192_000).contains(&settings.sample_rate) {
            return Err(EncoderError::Unsupported(format!("{} Hz", settings.sample_rate)));
        }

        let mut codec = OpusCodec::new(settings.channels, settings.bit_rate)?;
        let bit_rate = codec.bit_rate()?;
        let pre_skip = codec.lookahead()?;
        let resampler =
            StreamResampler::new(settings.sample_rate, OPUS_SAMPLE_RATE, settings.channels).map_err(EncoderError::Codec)?;

        let format = TrackFormat {
            codec: CodecId::Opus,
            sample_rate: OPUS_SAMPLE_RATE,
            channels: settings.channels,
            bit_rate,
            block_align: 0,
            codec_config: opus::identification_header(settings.channels, pre_skip, settings.sample_rate),
        };

        let (input_tx, input_rx) = bounded(self.input_slots);
        let (output_tx, output_rx) = unbounded();
        let (pool_tx, pool_rx) = bounded(self.output_buffers);
        for _ in 0..self.output_buffers {
            let _ = pool_tx.try_send(Vec::with_capacity(MAX_PACKET_BYTES));
        }
        let shutdown = Arc::new(AtomicBool::new(false));

        let codec = CodecThread {
            codec,
            resampler,
            format,
            input_rx,
            output_tx,
            pool_rx,
            pool_tx,
            shutdown: Arc::clone(&shutdown),
            pending_bytes: Vec::new(),
            samples: Vec::new(),
            base_pts: None,
            frames_emitted: 0,
            announced: false,
        };

        let handle = thread::Builder::new()
            .name("opus-codec".into())
            .spawn(move || codec.run())
            .map_err(|e| EncoderError::Codec(format!("failed to spawn codec thread: {}", e)))?;

        log::debug!(
            "Opus encoder configured: {} Hz in, {} ch, {} bps, pre-skip {}",
            settings.sample_rate,
            settings.channels,
            bit_rate,
            pre_skip
        );

        self.running = Some(Running {
            input_tx,
            output_rx,
            shutdown,
            handle: Some(handle),
            input_wait: settings.input_wait,
            eos_submitted: false,
            finished: false,
        });
        Ok(())
    }

    fn submit(&mut self, chunk: RawAudioChunk<'_>) -> Result<(), EncoderError> {
        let running = self.running_mut()?;
        if running.eos_submitted {
            return Err(EncoderError::EndOfStreamSubmitted);
        }
        if chunk.is_empty() {
            return Err(EncoderError::InvalidInput("empty chunk".into()));
        }

        let input = CodecInput::Pcm {
            data: chunk.data.to_vec(),
            pts_us: chunk.pts_us,
        };
        match running.input_tx.send_timeout(input, running.input_wait) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(EncoderError::WouldBlock),
            Err(SendTimeoutError::Disconnected(_)) => Err(EncoderError::Codec("codec thread stopped".into())),
        }
    }

    fn submit_end_of_stream(&mut self) -> Result<(), EncoderError> {
        let running = self.running_mut()?;
        if running.eos_submitted {
            return Ok(());
        }
        match running.input_tx.send_timeout(CodecInput::EndOfStream, running.input_wait) {
            Ok(()) => {
                running.eos_submitted = true;
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => Err(EncoderError::WouldBlock),
            Err(SendTimeoutError::Disconnected(_)) => Err(EncoderError::Codec("codec thread stopped".into())),
        }
    }

    fn poll_output(&mut self) -> Result<Option<EncoderEvent>, EncoderError> {
        let running = self.running_mut()?;
        match running.output_rx.try_recv() {
            Ok(Ok(event)) => {
                if matches!(event, EncoderEvent::EndOfStream) {
                    running.finished = true;
                }
                Ok(Some(event))
            }
            Ok(Err(e)) => Err(e),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) if running.finished => Ok(None),
            Err(TryRecvError::Disconnected) => Err(EncoderError::Codec("codec thread exited unexpectedly".into())),
        }
    }

    fn release(&mut self, chunk: CompressedChunk) {
        self.released += 1;
        drop(chunk);
    }

    fn shutdown(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let Running {
            input_tx,
            output_rx,
            shutdown,
            handle,
            ..
        } = running;

        shutdown.store(true, Ordering::SeqCst);
        drop(input_tx);
        drop(output_rx);

        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::warn!("Opus codec thread panicked; continuing shutdown");
            }
        }
        log::debug!("Opus encoder shut down");
    }
}

impl Drop for SoftwareOpusEncoder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State owned by the codec thread.
struct CodecThread {
    codec: OpusCodec,
    resampler: StreamResampler,
    format: TrackFormat,
    input_rx: Receiver<CodecInput>,
    output_tx: Sender<CodecOutput>,
    pool_rx: Receiver<Vec<u8>>,
    pool_tx: Sender<Vec<u8>>,
    shutdown: Arc<AtomicBool>,
    /// Trailing odd byte from an input that split a sample.
    pending_bytes: Vec<u8>,
    /// Interleaved 48 kHz samples not yet encoded.
    samples: Vec<f32>,
    base_pts: Option<i64>,
    /// 48 kHz frames handed out so far.
    frames_emitted: u64,
    announced: bool,
}

impl CodecThread {
    fn run(mut self) {
        loop {
            match self.input_rx.recv_timeout(CODEC_POLL) {
                Ok(CodecInput::Pcm { data, pts_us }) => {
                    if !self.accept(&data, pts_us) || !self.encode_full_frames() {
                        break;
                    }
                }
                Ok(CodecInput::EndOfStream) => {
                    if self.flush_tail() {
                        let _ = self.output_tx.send(Ok(EncoderEvent::EndOfStream));
                    }
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Convert to float and resample. Returns `false` if the thread should exit.
    fn accept(&mut self, data: &[u8], pts_us: i64) -> bool {
        self.base_pts.get_or_insert(pts_us);
        self.pending_bytes.extend_from_slice(data);
        let whole = self.pending_bytes.len() / 2 * 2;
        let input: Vec<f32> = self.pending_bytes[..whole]
            .chunks_exact(2)
            .map(|b| pcm::i16_to_f32(i16::from_le_bytes([b[0], b[1]])))
            .collect();
        self.pending_bytes.drain(..whole);

        match self.resampler.process(&input, &mut self.samples) {
            Ok(()) => true,
            Err(e) => self.report(EncoderError::Codec(e)),
        }
    }

    fn frame_len(&self) -> usize {
        FRAME_SAMPLES * self.format.channels as usize
    }

    fn encode_full_frames(&mut self) -> bool {
        while self.samples.len() >= self.frame_len() {
            if !self.emit_frame(FRAME_SAMPLES as u32) {
                return false;
            }
        }
        true
    }

    /// Encode whatever is left, padding the final frame with silence.
    fn flush_tail(&mut self) -> bool {
        if let Err(e) = self.resampler.flush(&mut self.samples) {
            return self.report(EncoderError::Codec(e));
        }
        if !self.encode_full_frames() {
            return false;
        }
        if self.samples.is_empty() {
            return true;
        }
        let channels = self.format.channels as usize;
        let frames = (self.samples.len() / channels) as u32;
        self.samples.resize(self.frame_len(), 0.0);
        self.emit_frame(frames)
    }

    /// Encode one 20 ms frame; `frames` is how many of them carry signal.
    fn emit_frame(&mut self, frames: u32) -> bool {
        if !self.announced && !self.announce() {
            return false;
        }
        let Some(mut buffer) = self.acquire_buffer() else {
            return false;
        };

        let frame_len = self.frame_len();
        buffer.resize(MAX_PACKET_BYTES, 0);
        let encoded = self.codec.encode(&self.samples[..frame_len], &mut buffer);
        self.samples.drain(..frame_len);
        let size = match encoded {
            Ok(size) => size,
            Err(e) => return self.report(e),
        };
        buffer.truncate(size);

        let info = ChunkInfo {
            pts_us: self.next_pts(),
            frames,
            flags: ChunkFlags::NONE,
        };
        self.frames_emitted += frames as u64;

        let chunk = CompressedChunk::pooled(buffer, 0, size, info, self.pool_tx.clone());
        self.output_tx.send(Ok(EncoderEvent::Chunk(chunk))).is_ok()
    }

    /// Emit the codec-config unit followed by the format descriptor.
    fn announce(&mut self) -> bool {
        let Some(mut buffer) = self.acquire_buffer() else {
            return false;
        };
        buffer.clear();
        buffer.extend_from_slice(&self.format.codec_config);

        let info = ChunkInfo {
            pts_us: self.next_pts(),
            frames: 0,
            flags: ChunkFlags::CODEC_CONFIG,
        };
        let size = buffer.len();
        let config = CompressedChunk::pooled(buffer, 0, size, info, self.pool_tx.clone());

        self.announced = true;
        self.output_tx.send(Ok(EncoderEvent::Chunk(config))).is_ok()
            && self.output_tx.send(Ok(EncoderEvent::FormatReady(self.format.clone()))).is_ok()
    }

    /// Hand a codec failure to the caller. Always `false`: the thread exits.
    fn report(&self, error: EncoderError) -> bool {
        log::error!("Opus codec thread stopping: {}", error);
        let _ = self.output_tx.send(Err(error));
        false
    }

    fn next_pts(&self) -> i64 {
        let base = self.base_pts.unwrap_or(0);
        base + (self.frames_emitted as i64 * 1_000_000) / OPUS_SAMPLE_RATE as i64
    }

    /// Wait for a free output buffer, giving up on shutdown.
    fn acquire_buffer(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.pool_rx.recv_timeout(CODEC_POLL) {
                Ok(buffer) => return Some(buffer),
                Err(RecvTimeoutError::Timeout) => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        return None;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn settings() -> EncoderSettings {
        EncoderSettings::default()
    }

    fn pcm(frames: usize) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(frames * 4);
        for n in 0..frames {
            let v = ((n as f64 * 0.05).sin() * 8000.0) as i16;
            bytes.extend_from_slice(&v.to_le_bytes());
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes
    }

    fn submit_all(encoder: &mut SoftwareOpusEncoder, bytes: &[u8], out: &mut Vec<EncoderEvent>) {
        for (i, piece) in bytes.chunks(4096).enumerate() {
            loop {
                match encoder.submit(RawAudioChunk::new(piece, i as i64 * 23_000)) {
                    Ok(()) => break,
                    Err(EncoderError::WouldBlock) => collect(encoder, out),
                    Err(e) => panic!("submit failed: {}", e),
                }
            }
            collect(encoder, out);
        }
    }

    fn collect(encoder: &mut SoftwareOpusEncoder, out: &mut Vec<EncoderEvent>) {
        while let Some(event) = encoder.poll_output().unwrap() {
            match event {
                EncoderEvent::Chunk(chunk) => {
                    let copy = CompressedChunk::detached(chunk.payload().to_vec(), chunk.info());
                    encoder.release(chunk);
                    out.push(EncoderEvent::Chunk(copy));
                }
                other => out.push(other),
            }
        }
    }

    fn drain_to_end(encoder: &mut SoftwareOpusEncoder, out: &mut Vec<EncoderEvent>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !out.iter().any(|e| matches!(e, EncoderEvent::EndOfStream)) {
            assert!(Instant::now() < deadline, "codec never reported end of stream");
            collect(encoder, out);
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn encode_all(encoder: &mut SoftwareOpusEncoder, frames: usize) -> Vec<EncoderEvent> {
        let mut events = Vec::new();
        submit_all(encoder, &pcm(frames), &mut events);
        while encoder.submit_end_of_stream() == Err(EncoderError::WouldBlock) {
            collect(encoder, &mut events);
        }
        drain_to_end(encoder, &mut events);
        events
    }

    fn data_units(events: &[EncoderEvent]) -> Vec<ChunkInfo> {
        events
            .iter()
            .filter_map(|e| match e {
                EncoderEvent::Chunk(c) if !c.flags().is_codec_config() => Some(c.info()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn rejects_aac_profile() {
        let mut encoder = SoftwareOpusEncoder::new();
        let err = encoder
            .configure(&EncoderSettings {
                profile: CodecProfile::AacLc,
                ..settings()
            })
            .unwrap_err();
        assert!(matches!(err, EncoderError::Unsupported(_)));
        assert!(!encoder.is_configured());
    }

    #[test]
    fn rejects_bit_rate_outside_opus_range() {
        let mut encoder = SoftwareOpusEncoder::new();
        let err = encoder
            .configure(&EncoderSettings {
                bit_rate: 1_000,
                ..settings()
            })
            .unwrap_err();
        assert!(matches!(err, EncoderError::Unsupported(_)));
    }

    #[test]
    fn operations_before_configure_fail() {
        let mut encoder = SoftwareOpusEncoder::new();
        assert_eq!(
            encoder.submit(RawAudioChunk::new(&[0, 0, 0, 0], 0)).unwrap_err(),
            EncoderError::NotConfigured
        );
        assert_eq!(encoder.poll_output().unwrap_err(), EncoderError::NotConfigured);
    }

    #[test]
    fn configure_twice_is_rejected() {
        let mut encoder = SoftwareOpusEncoder::new();
        encoder.configure(&settings()).unwrap();
        assert_eq!(encoder.configure(&settings()).unwrap_err(), EncoderError::AlreadyConfigured);
        encoder.shutdown();
    }

    #[test]
    fn format_reports_the_requested_bit_rate() {
        let mut encoder = SoftwareOpusEncoder::new();
        encoder
            .configure(&EncoderSettings {
                bit_rate: 96_000,
                ..settings()
            })
            .unwrap();
        let events = encode_all(&mut encoder, 4_410);
        encoder.shutdown();

        let format = events
            .iter()
            .find_map(|e| match e {
                EncoderEvent::FormatReady(format) => Some(format.clone()),
                _ => None,
            })
            .expect("format announced");
        assert_eq!(format.codec, CodecId::Opus);
        assert_eq!(format.bit_rate, 96_000);
        assert_eq!(format.sample_rate, OPUS_SAMPLE_RATE);
        assert_eq!(&format.codec_config[..8], b"OpusHead");
    }

    #[test]
    fn config_then_format_then_data() {
        let mut encoder = SoftwareOpusEncoder::new();
        encoder.configure(&settings()).unwrap();

        // One second at 44.1 kHz becomes 48000 frames, fifty 20 ms packets.
        let events = encode_all(&mut encoder, 44_100);
        encoder.shutdown();

        match &events[0] {
            EncoderEvent::Chunk(chunk) => assert!(chunk.flags().is_codec_config()),
            other => panic!("expected codec config first, got {:?}", other),
        }
        assert!(matches!(events[1], EncoderEvent::FormatReady(_)));
        let formats = events.iter().filter(|e| matches!(e, EncoderEvent::FormatReady(_))).count();
        assert_eq!(formats, 1);

        let data = data_units(&events);
        assert_eq!(data.len(), 50);
        assert_eq!(data.iter().map(|i| i.frames as usize).sum::<usize>(), 48_000);
        assert!(data.windows(2).all(|w| w[0].pts_us < w[1].pts_us));
        assert_eq!(data[1].pts_us - data[0].pts_us, 20_000);
    }

    #[test]
    fn unreleased_output_causes_backpressure() {
        let mut encoder = SoftwareOpusEncoder::with_slots(1, 1);
        encoder.configure(&settings()).unwrap();

        let piece = pcm(1024);
        let mut saw_would_block = false;
        for i in 0..50 {
            if encoder.submit(RawAudioChunk::new(&piece, i)) == Err(EncoderError::WouldBlock) {
                saw_would_block = true;
                break;
            }
        }
        assert!(saw_would_block);

        let started = Instant::now();
        encoder.shutdown();
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let mut encoder = SoftwareOpusEncoder::new();
        encoder.configure(&settings()).unwrap();
        encoder.shutdown();
        encoder.shutdown();
        assert_eq!(encoder.poll_output().unwrap_err(), EncoderError::NotConfigured);
    }

    #[test]
    fn odd_byte_split_is_carried_over() {
        let mut encoder = SoftwareOpusEncoder::new();
        encoder.configure(&settings()).unwrap();

        let bytes = pcm(4_410);
        let (a, b) = bytes.split_at(4095);
        let mut events = Vec::new();
        encoder.submit(RawAudioChunk::new(a, 0)).unwrap();
        encoder.submit(RawAudioChunk::new(b, 1000)).unwrap();
        encoder.submit_end_of_stream().unwrap();
        drain_to_end(&mut encoder, &mut events);

        let frames: u32 = data_units(&events).iter().map(|i| i.frames).sum();
        assert_eq!(frames, 4_800);
    }

    #[test]
    fn native_rate_input_is_not_resampled() {
        let mut encoder = SoftwareOpusEncoder::new();
        encoder
            .configure(&EncoderSettings {
                sample_rate: 48_000,
                ..settings()
            })
            .unwrap();
        let events = encode_all(&mut encoder, 1_000);
        encoder.shutdown();

        let data = data_units(&events);
        assert_eq!(data.len(), 2);
        assert_eq!(data[1].frames, 40);
    }
}
