//! Thin owner of a libopus encoder instance.

use std::ptr::NonNull;

use crate::models::error::EncoderError;

/// libopus codes at 48 kHz; other capture rates are resampled first.
pub const OPUS_SAMPLE_RATE: u32 = 48_000;

/// 20 ms at 48 kHz, per channel.
pub const FRAME_SAMPLES: usize = 960;

/// Largest packet libopus will produce for one frame.
pub const MAX_PACKET_BYTES: usize = 4000;

/// Bit rates libopus accepts through `OPUS_SET_BITRATE`.
pub const BIT_RATE_RANGE: std::ops::RangeInclusive<u32> = 6_000..=510_000;

/// OPUS_APPLICATION_AUDIO: tuned for music and mixed content.
const OPUS_APPLICATION_AUDIO: i32 = 2049;

const OPUS_OK: i32 = 0;

/// A configured libopus encoder.
pub struct OpusCodec {
    raw: NonNull<libopus_sys::OpusEncoder>,
    channels: u16,
}

// SAFETY: the encoder state is heap memory owned by libopus and is only
// reached through `&mut self`. The type is not `Sync`, so no two threads can
// use it at once.
unsafe impl Send for OpusCodec {}

impl OpusCodec {
    pub fn new(channels: u16, bit_rate: u32) -> Result<Self, EncoderError> {
        if channels != 1 && channels != 2 {
            return Err(EncoderError::Unsupported(format!("opus with {} channels", channels)));
        }
        if !BIT_RATE_RANGE.contains(&bit_rate) {
            return Err(EncoderError::Unsupported(format!("opus at {} bps", bit_rate)));
        }

        let mut error: i32 = 0;
        // SAFETY: rate and channel count are valid for libopus and `error`
        // outlives the call.
        let raw = unsafe {
            libopus_sys::opus_encoder_create(
                OPUS_SAMPLE_RATE as i32,
                channels as i32,
                OPUS_APPLICATION_AUDIO,
                &mut error,
            )
        };
        let raw = NonNull::new(raw)
            .ok_or_else(|| EncoderError::Codec(format!("opus_encoder_create failed: error code {}", error)))?;
        let codec = Self { raw, channels };
        if error != OPUS_OK {
            return Err(EncoderError::Codec(format!("opus_encoder_create failed: error code {}", error)));
        }

        // SAFETY: `raw` is a live encoder; the request takes one opus_int32.
        let result = unsafe {
            libopus_sys::opus_encoder_ctl(
                codec.raw.as_ptr(),
                libopus_sys::OPUS_SET_BITRATE_REQUEST as i32,
                bit_rate as i32,
            )
        };
        if result != OPUS_OK {
            return Err(EncoderError::Codec(format!("failed to set bit rate: error code {}", result)));
        }
        Ok(codec)
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Target bit rate as libopus reports it.
    pub fn bit_rate(&mut self) -> Result<u32, EncoderError> {
        self.get(libopus_sys::OPUS_GET_BITRATE_REQUEST as i32).map(|v| v as u32)
    }

    /// Encoder lookahead in 48 kHz samples; the decoder pre-skip.
    pub fn lookahead(&mut self) -> Result<u16, EncoderError> {
        self.get(libopus_sys::OPUS_GET_LOOKAHEAD_REQUEST as i32)
            .map(|v| u16::try_from(v).unwrap_or(u16::MAX))
    }

    /// Encode exactly one frame of interleaved samples into `out`, returning
    /// the packet length.
    pub fn encode(&mut self, frame: &[f32], out: &mut [u8]) -> Result<usize, EncoderError> {
        if frame.len() != FRAME_SAMPLES * self.channels as usize {
            return Err(EncoderError::InvalidInput(format!(
                "opus frame of {} samples, expected {}",
                frame.len(),
                FRAME_SAMPLES * self.channels as usize
            )));
        }
        // SAFETY: `frame` holds exactly FRAME_SAMPLES frames and `out` is
        // writable for the length passed.
        let len = unsafe {
            libopus_sys::opus_encode_float(
                self.raw.as_ptr(),
                frame.as_ptr(),
                FRAME_SAMPLES as i32,
                out.as_mut_ptr(),
                out.len().min(i32::MAX as usize) as i32,
            )
        };
        if len < 0 {
            return Err(EncoderError::Codec(format!("opus encoding failed: error code {}", len)));
        }
        Ok(len as usize)
    }

    fn get(&mut self, request: i32) -> Result<i32, EncoderError> {
        let mut value: i32 = 0;
        // SAFETY: GET requests write a single opus_int32 through the pointer.
        let result = unsafe { libopus_sys::opus_encoder_ctl(self.raw.as_ptr(), request, &mut value as *mut i32) };
        if result != OPUS_OK {
            return Err(EncoderError::Codec(format!("opus ctl {} failed: error code {}", request, result)));
        }
        Ok(value)
    }
}

impl Drop for OpusCodec {
    fn drop(&mut self) {
        // SAFETY: `raw` came from opus_encoder_create and is destroyed once.
        unsafe { libopus_sys::opus_encoder_destroy(self.raw.as_ptr()) };
    }
}

/// RFC 7845 identification header, carried as the codec-config unit.
pub fn identification_header(channels: u16, pre_skip: u16, input_rate: u32) -> Vec<u8> {
    let mut head = Vec::with_capacity(19);
    head.extend_from_slice(b"OpusHead");
    head.push(1);
    head.push(channels as u8);
    head.extend_from_slice(&pre_skip.to_le_bytes());
    head.extend_from_slice(&input_rate.to_le_bytes());
    head.extend_from_slice(&0i16.to_le_bytes());
    // Channel mapping family 0: mono or stereo, no table.
    head.push(0);
    head
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_rate_is_applied() {
        let mut codec = OpusCodec::new(2, 128_000).unwrap();
        assert_eq!(codec.bit_rate().unwrap(), 128_000);
        assert!(codec.lookahead().unwrap() > 0);
    }

    #[test]
    fn rejects_out_of_range_settings() {
        assert!(matches!(OpusCodec::new(6, 128_000), Err(EncoderError::Unsupported(_))));
        assert!(matches!(OpusCodec::new(2, 1_000), Err(EncoderError::Unsupported(_))));
    }

    #[test]
    fn encodes_one_frame_into_a_packet() {
        let mut codec = OpusCodec::new(1, 64_000).unwrap();
        let frame: Vec<f32> = (0..FRAME_SAMPLES).map(|n| (n as f32 * 0.06).sin() * 0.4).collect();
        let mut packet = vec![0u8; MAX_PACKET_BYTES];
        let len = codec.encode(&frame, &mut packet).unwrap();
        assert!(len > 1 && len < MAX_PACKET_BYTES);
    }

    #[test]
    fn short_frame_is_invalid_input() {
        let mut codec = OpusCodec::new(2, 128_000).unwrap();
        let mut packet = vec![0u8; MAX_PACKET_BYTES];
        let err = codec.encode(&[0.0; 10], &mut packet).unwrap_err();
        assert!(matches!(err, EncoderError::InvalidInput(_)));
    }

    #[test]
    fn identification_header_layout() {
        let head = identification_header(2, 312, 44_100);
        assert_eq!(head.len(), 19);
        assert_eq!(&head[..8], b"OpusHead");
        assert_eq!(head[9], 2);
        assert_eq!(u16::from_le_bytes([head[10], head[11]]), 312);
        assert_eq!(u32::from_le_bytes([head[12], head[13], head[14], head[15]]), 44_100);
    }
}
