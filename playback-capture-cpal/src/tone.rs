//! Generated sine tone delivered in real time.
//!
//! Used by `record-playback --synthetic` to exercise the whole pipeline on
//! machines without a capture device.

use std::thread;
use std::time::{Duration, Instant};

use playback_capture_core::models::error::SourceError;
use playback_capture_core::traits::sample_source::SampleSource;

/// Audio handed out per `read`, at most.
const BLOCK: Duration = Duration::from_millis(10);

/// Interleaved i16 sine tone, paced against the wall clock.
pub struct ToneSource {
    sample_rate: u32,
    channels: u16,
    frequency: f64,
    amplitude: f64,
    frame_index: u64,
    started_at: Option<Instant>,
    stopped: bool,
}

impl ToneSource {
    /// 440 Hz at half scale.
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
            frequency: 440.0,
            amplitude: 0.5,
            frame_index: 0,
            started_at: None,
            stopped: false,
        }
    }

    pub fn frequency(mut self, hz: f64) -> Self {
        self.frequency = hz;
        self
    }

    /// Linear gain in `[0.0, 1.0]`.
    pub fn amplitude(mut self, gain: f64) -> Self {
        self.amplitude = gain.clamp(0.0, 1.0);
        self
    }

    /// Frames generated so far.
    pub fn frames_generated(&self) -> u64 {
        self.frame_index
    }

    /// Frames the wall clock says should exist by now.
    fn frames_due(&self, started_at: Instant) -> u64 {
        (started_at.elapsed().as_secs_f64() * self.sample_rate as f64) as u64
    }
}

impl SampleSource for ToneSource {
    fn start(&mut self) -> Result<(), SourceError> {
        if self.sample_rate == 0 {
            return Err(SourceError::Device("tone needs a non-zero sample rate".into()));
        }
        self.started_at = Some(Instant::now());
        self.stopped = false;
        log::info!("generating {} Hz tone at {} Hz, {} ch", self.frequency, self.sample_rate, self.channels);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        if self.stopped {
            return Err(SourceError::Closed);
        }
        let started_at = *self.started_at.get_or_insert_with(Instant::now);

        let mut due = self.frames_due(started_at).saturating_sub(self.frame_index);
        if due == 0 {
            thread::sleep(Duration::from_millis(1));
            due = self.frames_due(started_at).saturating_sub(self.frame_index);
            if due == 0 {
                return Ok(0);
            }
        }

        let frame_bytes = self.channels as usize * 2;
        let block_frames = (self.sample_rate as u64 * BLOCK.as_millis() as u64 / 1000).max(1);
        let frames = (buf.len() / frame_bytes).min(due.min(block_frames) as usize);
        if frames == 0 {
            return Ok(0);
        }

        let step = std::f64::consts::TAU * self.frequency / self.sample_rate as f64;
        for frame in buf[..frames * frame_bytes].chunks_exact_mut(frame_bytes) {
            let value = ((self.frame_index as f64 * step).sin() * self.amplitude * i16::MAX as f64) as i16;
            for sample in frame.chunks_exact_mut(2) {
                sample.copy_from_slice(&value.to_le_bytes());
            }
            self.frame_index += 1;
        }
        Ok(frames * frame_bytes)
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}
