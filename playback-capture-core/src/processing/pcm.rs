//! Sample-format helpers for the capture boundary.
//!
//! Devices hand us `f32` or `i16` frames at their own rate and channel count;
//! the encoder wants interleaved 16-bit little-endian PCM at the configured
//! rate and channel count. Rate conversion lives in
//! [`resample`](super::resample) because it has to keep state across buffers.

/// Convert one `f32` sample in `[-1.0, 1.0]` to `i16`, clamping out-of-range values.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Convert one `i16` sample to `f32` in `[-1.0, 1.0)`.
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32_768.0
}

pub fn f32_slice_to_i16(samples: &[f32]) -> Vec<i16> {
    samples.iter().copied().map(f32_to_i16).collect()
}

/// Append `samples` to `out` as little-endian bytes.
pub fn extend_le_bytes(samples: &[i16], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
}

/// Map interleaved frames from `from` channels to `to` channels.
///
/// Mono is duplicated into stereo; wider layouts are averaged down to mono,
/// or truncated to their first `to` channels otherwise.
pub fn remap_channels(samples: &[i16], from: u16, to: u16) -> Vec<i16> {
    let (from, to) = (from.max(1) as usize, to.max(1) as usize);
    if from == to {
        return samples.to_vec();
    }

    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        if from == 1 {
            out.extend(std::iter::repeat(frame[0]).take(to));
        } else if to == 1 {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            out.push((sum / from as i32) as i16);
        } else {
            out.extend_from_slice(&frame[..to.min(from)]);
            out.extend(std::iter::repeat(0).take(to.saturating_sub(from)));
        }
    }
    out
}

/// Peak absolute level in `[0.0, 1.0]`.
pub fn peak_level(samples: &[i16]) -> f32 {
    samples
        .iter()
        .map(|&s| (s as i32).unsigned_abs())
        .max()
        .map_or(0.0, |peak| (peak as f32 / i16::MAX as f32).min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_full_scale_and_clamps() {
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(-1.0), -i16::MAX);
        assert_eq!(f32_to_i16(3.5), i16::MAX);
        assert_eq!(f32_to_i16(-7.0), -i16::MAX);
    }

    #[test]
    fn i16_to_f32_spans_unit_range() {
        assert_eq!(i16_to_f32(0), 0.0);
        assert_eq!(i16_to_f32(i16::MIN), -1.0);
        assert!(i16_to_f32(i16::MAX) < 1.0);
        assert_eq!(f32_to_i16(i16_to_f32(-12_345)), -12_344);
    }

    #[test]
    fn le_bytes_layout() {
        let mut out = Vec::new();
        extend_le_bytes(&[0x0102, -1], &mut out);
        assert_eq!(out, vec![0x02, 0x01, 0xff, 0xff]);
    }

    #[test]
    fn mono_to_stereo_duplicates() {
        assert_eq!(remap_channels(&[1, 2, 3], 1, 2), vec![1, 1, 2, 2, 3, 3]);
    }

    #[test]
    fn stereo_to_mono_averages() {
        assert_eq!(remap_channels(&[100, 300, -50, 50], 2, 1), vec![200, 0]);
    }

    #[test]
    fn surround_to_stereo_keeps_front_pair() {
        let six = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        assert_eq!(remap_channels(&six, 6, 2), vec![1, 2, 7, 8]);
    }

    #[test]
    fn peak_level_of_silence_and_full_scale() {
        assert_eq!(peak_level(&[]), 0.0);
        assert_eq!(peak_level(&[0, 0]), 0.0);
        assert_eq!(peak_level(&[0, i16::MIN]), 1.0);
    }
}
