//! cpal-backed [`SampleSource`].
//!
//! The cpal `Stream` is not `Send` on every host, so it is created, played
//! and dropped on a dedicated `cpal-capture` thread. The device callback
//! converts whatever the device delivers (f32, i16 or u16) into the target
//! interleaved i16 layout and pushes it into a drop-oldest ring. `read` takes
//! from that ring, waiting briefly on a condvar when it is empty.
//!
//! Loopback capture opens a render endpoint as an input stream. WASAPI
//! supports this directly; on other hosts building the stream fails and
//! `start` reports the error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};

use playback_capture_core::models::config::PipelineConfig;
use playback_capture_core::models::error::SourceError;
use playback_capture_core::processing::pcm;
use playback_capture_core::processing::resample::StreamResampler;
use playback_capture_core::processing::ring_buffer::RingBuffer;
use playback_capture_core::traits::sample_source::SampleSource;

use crate::devices;
use crate::error::{BackendError, DeviceDirection};

/// How long `start` waits for the stream thread to report back.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for a [`CpalSampleSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpalSourceOptions {
    /// Exact device name; the host default when `None`.
    pub device: Option<String>,
    /// `Output` captures a render endpoint through loopback.
    pub direction: DeviceDirection,
    /// Rate delivered to the pipeline.
    pub sample_rate: u32,
    /// Channel count delivered to the pipeline.
    pub channels: u16,
    /// Audio kept in the ring before the oldest samples are overwritten.
    pub buffer_duration: Duration,
    /// Longest a single `read` waits for samples.
    pub read_wait: Duration,
}

impl CpalSourceOptions {
    /// Capture from the default input at the pipeline's rate and layout.
    pub fn for_config(config: &PipelineConfig) -> Self {
        Self {
            device: None,
            direction: DeviceDirection::Input,
            sample_rate: config.sample_rate,
            channels: config.channels,
            buffer_duration: Duration::from_secs(2),
            read_wait: Duration::from_millis(10),
        }
    }

    pub fn loopback(mut self) -> Self {
        self.direction = DeviceDirection::Output;
        self
    }

    pub fn device(mut self, name: impl Into<String>) -> Self {
        self.device = Some(name.into());
        self
    }

    /// Ring capacity in samples, always a whole number of frames.
    fn ring_capacity(&self) -> usize {
        let channels = self.channels.max(1) as usize;
        let frames = (self.sample_rate as f64 * self.buffer_duration.as_secs_f64()).ceil() as usize;
        frames.max(1) * channels
    }
}

impl Default for CpalSourceOptions {
    fn default() -> Self {
        Self::for_config(&PipelineConfig::default())
    }
}

/// Samples shared between the device callback and the reader.
struct CaptureBuffer {
    ring: Mutex<RingBuffer<i16>>,
    ready: Condvar,
    closed: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl CaptureBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(RingBuffer::new(capacity)),
            ready: Condvar::new(),
            closed: AtomicBool::new(false),
            failure: Mutex::new(None),
        }
    }

    fn push(&self, samples: &[i16]) {
        if samples.is_empty() {
            return;
        }
        self.ring.lock().write(samples);
        self.ready.notify_one();
    }

    /// Copy up to `out.len()` samples, waiting up to `wait` if none are buffered.
    fn take(&self, out: &mut [i16], wait: Duration) -> usize {
        let mut ring = self.ring.lock();
        if ring.is_empty() && !self.is_closed() {
            let _ = self.ready.wait_for(&mut ring, wait);
        }
        ring.read_into(out)
    }

    fn close(&self, failure: Option<String>) {
        if let Some(message) = failure {
            self.failure.lock().get_or_insert(message);
        }
        self.closed.store(true, Ordering::SeqCst);
        let _guard = self.ring.lock();
        self.ready.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn dropped(&self) -> u64 {
        self.ring.lock().dropped()
    }
}

/// Converts device-native buffers into the target layout.
///
/// The resampler lives as long as the stream, so its phase and filter
/// history carry from one callback to the next.
struct Ingest {
    buffer: Arc<CaptureBuffer>,
    device_channels: u16,
    target_channels: u16,
    resampler: StreamResampler,
    scratch: Vec<i16>,
    float_in: Vec<f32>,
    float_out: Vec<f32>,
    resample_failed: bool,
}

impl Ingest {
    fn new(
        buffer: Arc<CaptureBuffer>,
        device_rate: u32,
        device_channels: u16,
        options: &CpalSourceOptions,
    ) -> Result<Self, BackendError> {
        let resampler = StreamResampler::new(device_rate, options.sample_rate, options.channels)
            .map_err(BackendError::Configuration)?;
        Ok(Self {
            buffer,
            device_channels,
            target_channels: options.channels,
            resampler,
            scratch: Vec::new(),
            float_in: Vec::new(),
            float_out: Vec::new(),
            resample_failed: false,
        })
    }

    fn push<T: Copy>(&mut self, data: &[T], convert: fn(T) -> i16) {
        self.scratch.clear();
        self.scratch.extend(data.iter().map(|&s| convert(s)));

        let remapped = pcm::remap_channels(&self.scratch, self.device_channels, self.target_channels);
        if self.resampler.is_passthrough() {
            self.buffer.push(&remapped);
            return;
        }

        self.float_in.clear();
        self.float_in.extend(remapped.iter().map(|&s| pcm::i16_to_f32(s)));
        self.float_out.clear();
        if let Err(e) = self.resampler.process(&self.float_in, &mut self.float_out) {
            if !self.resample_failed {
                log::error!("dropping captured audio: {}", e);
                self.resample_failed = true;
            }
            return;
        }
        let converted = pcm::f32_slice_to_i16(&self.float_out);
        self.buffer.push(&converted);
    }
}

fn u16_to_i16(sample: u16) -> i16 {
    (sample as i32 - 32_768) as i16
}

/// What the stream thread opened.
#[derive(Debug, Clone)]
struct StreamShape {
    device_name: String,
    sample_rate: u32,
    channels: u16,
    sample_format: String,
}

struct StreamThread {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Pulls playback or microphone audio from a cpal device.
pub struct CpalSampleSource {
    options: CpalSourceOptions,
    buffer: Arc<CaptureBuffer>,
    stream: Option<StreamThread>,
    scratch: Vec<i16>,
}

impl CpalSampleSource {
    pub fn new(options: CpalSourceOptions) -> Self {
        let buffer = Arc::new(CaptureBuffer::new(options.ring_capacity()));
        Self {
            options,
            buffer,
            stream: None,
            scratch: Vec::new(),
        }
    }

    pub fn options(&self) -> &CpalSourceOptions {
        &self.options
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some() && !self.buffer.is_closed()
    }

    /// The stream error that closed the source, if any.
    pub fn last_error(&self) -> Option<String> {
        self.buffer.failure.lock().clone()
    }

    /// Samples overwritten because the reader fell behind.
    pub fn dropped_samples(&self) -> u64 {
        self.buffer.dropped()
    }

    fn spawn_stream(&mut self) -> Result<(), BackendError> {
        let (ready_tx, ready_rx) = bounded::<Result<StreamShape, BackendError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let options = self.options.clone();
        let buffer = Arc::clone(&self.buffer);

        let handle = thread::Builder::new()
            .name("cpal-capture".into())
            .spawn(move || run_stream(options, buffer, ready_tx, stop_rx))
            .map_err(|e| BackendError::Stream(format!("failed to spawn capture thread: {}", e)))?;

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(shape)) => {
                log::info!(
                    "capturing from {} device '{}' ({} Hz, {} ch, {}) as {} Hz, {} ch",
                    self.options.direction,
                    shape.device_name,
                    shape.sample_rate,
                    shape.channels,
                    shape.sample_format,
                    self.options.sample_rate,
                    self.options.channels
                );
                self.stream = Some(StreamThread { stop_tx, handle });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => {
                drop(stop_tx);
                self.buffer.close(None);
                Err(BackendError::Stream("capture stream did not start in time".into()))
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                Err(BackendError::Stream("capture thread exited during startup".into()))
            }
        }
    }
}

impl SampleSource for CpalSampleSource {
    fn start(&mut self) -> Result<(), SourceError> {
        if self.stream.is_some() {
            return Err(SourceError::Device("capture already started".into()));
        }
        if self.options.sample_rate == 0 || self.options.channels == 0 {
            return Err(BackendError::Configuration("target rate and channels must be non-zero".into()).into());
        }
        self.buffer = Arc::new(CaptureBuffer::new(self.options.ring_capacity()));
        self.spawn_stream().map_err(SourceError::from)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        let channels = self.options.channels.max(1) as usize;
        let wanted = (buf.len() / 2) / channels * channels;
        if wanted == 0 {
            return Ok(0);
        }

        self.scratch.resize(wanted, 0);
        let taken = self.buffer.take(&mut self.scratch[..wanted], self.options.read_wait);
        if taken == 0 {
            return if self.buffer.is_closed() {
                Err(SourceError::Closed)
            } else {
                Ok(0)
            };
        }

        for (bytes, sample) in buf.chunks_exact_mut(2).zip(&self.scratch[..taken]) {
            bytes.copy_from_slice(&sample.to_le_bytes());
        }
        Ok(taken * 2)
    }

    fn stop(&mut self) {
        self.buffer.close(None);
        if let Some(stream) = self.stream.take() {
            drop(stream.stop_tx);
            if stream.handle.join().is_err() {
                log::warn!("cpal capture thread panicked");
            }
            let dropped = self.buffer.dropped();
            if dropped > 0 {
                log::warn!("capture ring overwrote {} samples", dropped);
            }
            log::info!("cpal capture stopped");
        }
    }
}

impl Drop for CpalSampleSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Body of the `cpal-capture` thread. Owns the stream for its whole life.
fn run_stream(
    options: CpalSourceOptions,
    buffer: Arc<CaptureBuffer>,
    ready_tx: Sender<Result<StreamShape, BackendError>>,
    stop_rx: Receiver<()>,
) {
    let (stream, shape) = match open_stream(&options, &buffer) {
        Ok(opened) => opened,
        Err(e) => {
            log::error!("failed to open capture stream: {}", e);
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(BackendError::Stream(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(shape));

    // Parks until the sender is dropped by `stop`.
    let _ = stop_rx.recv();
    drop(stream);
}

fn open_stream(
    options: &CpalSourceOptions,
    buffer: &Arc<CaptureBuffer>,
) -> Result<(cpal::Stream, StreamShape), BackendError> {
    let device = devices::find_device(options.direction, options.device.as_deref())?;
    let supported = devices::default_config(&device, options.direction)?;
    let config = supported.config();

    let shape = StreamShape {
        device_name: device.name().unwrap_or_else(|_| "unknown".into()),
        sample_rate: config.sample_rate.0,
        channels: config.channels,
        sample_format: format!("{:?}", supported.sample_format()),
    };

    let ingest = Ingest::new(Arc::clone(buffer), config.sample_rate.0, config.channels, options)?;

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, ingest, pcm::f32_to_i16),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, ingest, |s| s),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, ingest, u16_to_i16),
        other => Err(BackendError::UnsupportedFormat(format!("{:?}", other))),
    }?;

    Ok((stream, shape))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut ingest: Ingest,
    convert: fn(T) -> i16,
) -> Result<cpal::Stream, BackendError>
where
    T: cpal::SizedSample + Send + 'static,
{
    let failures = Arc::clone(&ingest.buffer);
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| ingest.push(data, convert),
            move |err| {
                log::error!("capture stream error: {}", err);
                failures.close(Some(err.to_string()));
            },
            None,
        )
        .map_err(|e| BackendError::Stream(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn options(sample_rate: u32, channels: u16) -> CpalSourceOptions {
        CpalSourceOptions {
            sample_rate,
            channels,
            ..CpalSourceOptions::default()
        }
    }

    fn source(channels: u16) -> CpalSampleSource {
        let mut options = CpalSourceOptions::default();
        options.channels = channels;
        options.read_wait = Duration::from_millis(5);
        CpalSampleSource::new(options)
    }

    #[test]
    fn options_follow_pipeline_config() {
        let config = PipelineConfig {
            sample_rate: 48_000,
            channels: 1,
            ..PipelineConfig::default()
        };
        let options = CpalSourceOptions::for_config(&config).loopback().device("Speakers");
        assert_eq!(options.sample_rate, 48_000);
        assert_eq!(options.channels, 1);
        assert_eq!(options.direction, DeviceDirection::Output);
        assert_eq!(options.device.as_deref(), Some("Speakers"));
    }

    #[test]
    fn ring_capacity_is_whole_frames() {
        let options = CpalSourceOptions {
            sample_rate: 44_100,
            channels: 2,
            buffer_duration: Duration::from_millis(10),
            ..CpalSourceOptions::default()
        };
        let capacity = options.ring_capacity();
        assert_eq!(capacity % 2, 0);
        assert_eq!(capacity, 441 * 2);
    }

    #[test]
    fn read_returns_zero_when_nothing_arrived() {
        let mut src = source(2);
        let mut buf = [0u8; 64];
        let started = Instant::now();
        assert_eq!(src.read(&mut buf).unwrap(), 0);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn read_yields_little_endian_frames() {
        let mut src = source(2);
        src.buffer.push(&[1, -2, 0x1234, -32_768]);

        let mut buf = [0u8; 16];
        let n = src.read(&mut buf).unwrap();
        assert_eq!(n, 8);
        assert_eq!(&buf[..8], &[0x01, 0x00, 0xFE, 0xFF, 0x34, 0x12, 0x00, 0x80]);
    }

    #[test]
    fn read_never_splits_a_frame() {
        let mut src = source(2);
        src.buffer.push(&[1, 2, 3, 4, 5, 6]);

        // Room for 2.5 stereo frames rounds down to 2.
        let mut buf = [0u8; 10];
        assert_eq!(src.read(&mut buf).unwrap(), 8);
        let mut rest = [0u8; 16];
        assert_eq!(src.read(&mut rest).unwrap(), 4);
    }

    #[test]
    fn closed_after_buffered_samples_are_read() {
        let mut src = source(1);
        src.buffer.push(&[7, 8]);
        src.stop();

        let mut buf = [0u8; 16];
        assert_eq!(src.read(&mut buf).unwrap(), 4);
        assert_eq!(src.read(&mut buf), Err(SourceError::Closed));
    }

    #[test]
    fn stream_error_closes_and_is_kept() {
        let mut src = source(1);
        src.buffer.close(Some("device unplugged".into()));
        src.buffer.close(Some("second".into()));

        let mut buf = [0u8; 4];
        assert_eq!(src.read(&mut buf), Err(SourceError::Closed));
        assert_eq!(src.last_error().as_deref(), Some("device unplugged"));
        assert!(!src.is_streaming());
    }

    #[test]
    fn take_wakes_when_samples_are_pushed() {
        let buffer = Arc::new(CaptureBuffer::new(64));
        let producer = Arc::clone(&buffer);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(&[42; 4]);
        });

        let mut out = [0i16; 4];
        let mut taken = 0;
        let deadline = Instant::now() + Duration::from_secs(2);
        while taken == 0 && Instant::now() < deadline {
            taken = buffer.take(&mut out, Duration::from_millis(500));
        }
        handle.join().unwrap();
        assert_eq!(taken, 4);
        assert_eq!(out, [42; 4]);
    }

    #[test]
    fn ingest_converts_float_mono_to_stereo() {
        let buffer = Arc::new(CaptureBuffer::new(64));
        let mut ingest = Ingest::new(Arc::clone(&buffer), 48_000, 1, &options(48_000, 2)).unwrap();
        ingest.push(&[0.5f32, -1.0], pcm::f32_to_i16);

        let mut out = [0i16; 8];
        let n = buffer.take(&mut out, Duration::ZERO);
        assert_eq!(n, 4);
        assert_eq!(out[0], out[1]);
        assert_eq!(out[2], out[3]);
        assert!(out[0] > 16_000);
        assert!(out[2] < -32_000);
    }

    #[test]
    fn ingest_resamples_to_target_rate() {
        let buffer = Arc::new(CaptureBuffer::new(48_000 * 2));
        let mut ingest = Ingest::new(Arc::clone(&buffer), 48_000, 2, &options(24_000, 2)).unwrap();
        for _ in 0..10 {
            ingest.push(&[1_000i16; 480 * 2], |s| s);
        }

        let mut out = vec![0i16; 48_000 * 2];
        let n = buffer.take(&mut out, Duration::ZERO);
        assert_eq!(n % 2, 0);
        // 4800 frames in; at most one partial chunk is still held.
        assert!(n / 2 <= 2_400 && n / 2 >= 2_400 - 512, "{} frames", n / 2);
        let steady = &out[200..n - 200];
        assert!(steady.iter().all(|&s| (990..=1_010).contains(&s)));
    }

    #[test]
    fn small_callbacks_lose_no_frames() {
        let buffer = Arc::new(CaptureBuffer::new(96_000 * 2));
        let mut ingest = Ingest::new(Arc::clone(&buffer), 44_100, 2, &options(48_000, 2)).unwrap();
        let step = std::f32::consts::TAU * 440.0 / 44_100.0;
        let mut n = 0usize;
        for _ in 0..100 {
            let block: Vec<f32> = (n..n + 441)
                .flat_map(|i| {
                    let v = (i as f32 * step).sin() * 0.5;
                    [v, v]
                })
                .collect();
            n += 441;
            ingest.push(&block, pcm::f32_to_i16);
        }

        let mut out = vec![0i16; 96_000 * 2];
        let taken = buffer.take(&mut out, Duration::ZERO) / 2;
        // One second in; only the frames still waiting for a full chunk are missing.
        assert!(taken <= 48_000 && taken > 48_000 - 1_200, "{} frames", taken);
        let largest_step = out[400..taken * 2 - 400]
            .chunks_exact(2)
            .map(|f| f[0])
            .collect::<Vec<_>>()
            .windows(2)
            .map(|w| (w[1] as i32 - w[0] as i32).abs())
            .max()
            .unwrap_or(0);
        // 440 Hz at half scale moves at most ~950 per sample at 48 kHz.
        assert!(largest_step < 1_300, "step of {}", largest_step);
    }

    #[test]
    fn zero_device_rate_is_rejected() {
        let buffer = Arc::new(CaptureBuffer::new(16));
        assert!(matches!(
            Ingest::new(buffer, 0, 2, &options(48_000, 2)),
            Err(BackendError::Configuration(_))
        ));
    }

    #[test]
    fn unsigned_samples_center_on_zero() {
        assert_eq!(u16_to_i16(32_768), 0);
        assert_eq!(u16_to_i16(0), -32_768);
        assert_eq!(u16_to_i16(65_535), 32_767);
    }
}
