//! Streaming sample-rate conversion.
//!
//! Device callbacks and encoder input arrive in arbitrary buffer sizes. The
//! sinc resampler only accepts fixed input chunks, so input is held until a
//! full chunk is available and the filter state carries across buffers:
//! no fractional frame is lost and no buffer edge restarts the interpolation.

use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

/// Input frames handed to the sinc resampler per call.
const CHUNK_FRAMES: usize = 1024;

/// Zero-padded chunks tried at end of stream before giving up on the tail.
const MAX_FLUSH_CHUNKS: usize = 8;

/// Interleaved `f32` resampler that keeps its phase between calls.
pub struct StreamResampler {
    inner: Option<SincFixedIn<f32>>,
    channels: usize,
    ratio: f64,
    /// Planar input not yet consumed by the sinc filter.
    pending: Vec<Vec<f32>>,
    /// Leading output frames that are filter latency, not signal.
    delay_left: usize,
    frames_in: u64,
    frames_out: u64,
}

impl StreamResampler {
    /// A resampler from `source_rate` to `target_rate`. Equal rates pass
    /// samples through untouched.
    pub fn new(source_rate: u32, target_rate: u32, channels: u16) -> Result<Self, String> {
        if source_rate == 0 || target_rate == 0 {
            return Err(format!("invalid resampling {} Hz → {} Hz", source_rate, target_rate));
        }
        let channels = channels.max(1) as usize;
        let ratio = target_rate as f64 / source_rate as f64;

        let inner = if source_rate == target_rate {
            None
        } else {
            let params = SincInterpolationParameters {
                sinc_len: 128,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            };
            let resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, CHUNK_FRAMES, channels)
                .map_err(|e| format!("failed to build resampler: {}", e))?;
            log::debug!(
                "resampling {} Hz → {} Hz, {} ch, {} frames latency",
                source_rate,
                target_rate,
                channels,
                resampler.output_delay()
            );
            Some(resampler)
        };

        let delay_left = inner.as_ref().map_or(0, |r| r.output_delay());
        Ok(Self {
            inner,
            channels,
            ratio,
            pending: vec![Vec::with_capacity(CHUNK_FRAMES * 2); channels],
            delay_left,
            frames_in: 0,
            frames_out: 0,
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Output frames per input frame.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Input frames held back until the next full chunk.
    pub fn pending_frames(&self) -> usize {
        self.pending[0].len()
    }

    /// Feed interleaved samples and append every completed output frame,
    /// interleaved, to `out`. A trailing partial frame in `input` is ignored.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<(), String> {
        let frames = input.len() / self.channels;
        self.frames_in += frames as u64;

        if self.inner.is_none() {
            out.extend_from_slice(&input[..frames * self.channels]);
            self.frames_out += frames as u64;
            return Ok(());
        }

        for frame in input.chunks_exact(self.channels) {
            for (channel, &sample) in self.pending.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
        while self.pending_frames() >= CHUNK_FRAMES {
            self.run_chunk(out, None)?;
        }
        Ok(())
    }

    /// Push out held input, padded with silence, and trim the result so the
    /// total output matches the total input scaled by the rate ratio.
    pub fn flush(&mut self, out: &mut Vec<f32>) -> Result<(), String> {
        if self.inner.is_none() {
            return Ok(());
        }
        let expected = (self.frames_in as f64 * self.ratio).round() as u64;
        let mut chunks = 0;
        while self.frames_out < expected && chunks < MAX_FLUSH_CHUNKS {
            let missing = (expected - self.frames_out) as usize;
            let padding = CHUNK_FRAMES - self.pending_frames().min(CHUNK_FRAMES);
            for channel in &mut self.pending {
                channel.resize(channel.len() + padding, 0.0);
            }
            self.run_chunk(out, Some(missing))?;
            chunks += 1;
        }
        for channel in &mut self.pending {
            channel.clear();
        }
        Ok(())
    }

    /// Resample one chunk from `pending`, emitting at most `limit` frames.
    fn run_chunk(&mut self, out: &mut Vec<f32>, limit: Option<usize>) -> Result<(), String> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(());
        };
        let input: Vec<&[f32]> = self.pending.iter().map(|c| &c[..CHUNK_FRAMES]).collect();
        let planar = resampler
            .process(&input, None)
            .map_err(|e| format!("resampling failed: {}", e))?;
        for channel in &mut self.pending {
            channel.drain(..CHUNK_FRAMES);
        }

        let produced = planar.first().map_or(0, Vec::len);
        let skip = self.delay_left.min(produced);
        self.delay_left -= skip;
        let mut emit = produced - skip;
        if let Some(limit) = limit {
            emit = emit.min(limit);
        }

        out.reserve(emit * self.channels);
        for i in skip..skip + emit {
            for channel in &planar {
                out.push(channel[i]);
            }
        }
        self.frames_out += emit as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frames: usize, rate: u32, hz: f32, channels: usize) -> Vec<f32> {
        let step = std::f32::consts::TAU * hz / rate as f32;
        (0..frames)
            .flat_map(|n| std::iter::repeat((n as f32 * step).sin() * 0.5).take(channels))
            .collect()
    }

    #[test]
    fn equal_rates_pass_through() {
        let mut resampler = StreamResampler::new(44_100, 44_100, 2).unwrap();
        assert!(resampler.is_passthrough());
        let input = vec![0.25, -0.25, 0.5, -0.5];
        let mut out = Vec::new();
        resampler.process(&input, &mut out).unwrap();
        resampler.flush(&mut out).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn one_second_in_small_buffers_keeps_every_frame() {
        let mut resampler = StreamResampler::new(48_000, 44_100, 2).unwrap();
        let input = sine(48_000, 48_000, 440.0, 2);
        let mut out = Vec::new();
        for piece in input.chunks(512 * 2) {
            resampler.process(piece, &mut out).unwrap();
        }
        resampler.flush(&mut out).unwrap();

        assert_eq!(out.len(), 44_100 * 2);
        assert_eq!(resampler.pending_frames(), 0);
    }

    #[test]
    fn buffer_edges_do_not_click() {
        let mut resampler = StreamResampler::new(48_000, 44_100, 1).unwrap();
        let input = sine(24_000, 48_000, 440.0, 1);
        let mut out = Vec::new();
        for piece in input.chunks(480) {
            resampler.process(piece, &mut out).unwrap();
        }
        resampler.flush(&mut out).unwrap();

        // A 440 Hz tone at half scale moves at most ~0.031 per output sample.
        let steady = &out[100..out.len() - 100];
        let largest_step = steady.windows(2).map(|w| (w[1] - w[0]).abs()).fold(0.0f32, f32::max);
        assert!(largest_step < 0.05, "step of {}", largest_step);
    }

    #[test]
    fn upsampling_totals_match_the_ratio() {
        let mut resampler = StreamResampler::new(44_100, 48_000, 1).unwrap();
        let mut out = Vec::new();
        for _ in 0..10 {
            resampler.process(&vec![0.1; 4_410], &mut out).unwrap();
        }
        resampler.flush(&mut out).unwrap();
        assert_eq!(out.len(), 48_000);
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(StreamResampler::new(0, 48_000, 2).is_err());
    }
}
