use std::fmt;

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

/// A borrowed run of interleaved 16-bit little-endian PCM.
///
/// Lives for one iteration of the capture loop; encoders copy the bytes into
/// their own input slot.
#[derive(Debug, Clone, Copy)]
pub struct RawAudioChunk<'a> {
    pub data: &'a [u8],
    pub pts_us: i64,
}

impl<'a> RawAudioChunk<'a> {
    pub fn new(data: &'a [u8], pts_us: i64) -> Self {
        Self { data, pts_us }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Bit flags attached to an encoder output unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ChunkFlags(u32);

impl ChunkFlags {
    pub const NONE: ChunkFlags = ChunkFlags(0);
    /// Codec-specific configuration, not media data.
    pub const CODEC_CONFIG: ChunkFlags = ChunkFlags(1 << 1);
    pub const END_OF_STREAM: ChunkFlags = ChunkFlags(1 << 2);

    pub fn contains(self, other: ChunkFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_codec_config(self) -> bool {
        self.contains(Self::CODEC_CONFIG)
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for ChunkFlags {
    type Output = ChunkFlags;

    fn bitor(self, rhs: ChunkFlags) -> ChunkFlags {
        ChunkFlags(self.0 | rhs.0)
    }
}

/// Timing and framing metadata carried with every compressed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkInfo {
    /// Presentation timestamp in microseconds.
    pub pts_us: i64,
    /// PCM frames this unit decodes to.
    pub frames: u32,
    pub flags: ChunkFlags,
}

/// One access unit produced by an encoder.
///
/// The payload lives in a buffer borrowed from the encoder's output pool.
/// Hand it back with `AudioEncoder::release` once the container has consumed
/// it; a chunk that is simply dropped is recycled as well.
pub struct CompressedChunk {
    buffer: Option<Vec<u8>>,
    offset: usize,
    size: usize,
    info: ChunkInfo,
    recycle: Option<Sender<Vec<u8>>>,
}

impl CompressedChunk {
    /// A chunk whose buffer returns to `recycle` when released.
    pub fn pooled(buffer: Vec<u8>, offset: usize, size: usize, info: ChunkInfo, recycle: Sender<Vec<u8>>) -> Self {
        let size = size.min(buffer.len().saturating_sub(offset));
        Self {
            buffer: Some(buffer),
            offset,
            size,
            info,
            recycle: Some(recycle),
        }
    }

    /// A chunk that owns its bytes outright.
    pub fn detached(data: Vec<u8>, info: ChunkInfo) -> Self {
        let size = data.len();
        Self {
            buffer: Some(data),
            offset: 0,
            size,
            info,
            recycle: None,
        }
    }

    /// The encoded bytes, `[offset, offset + size)` of the backing buffer.
    pub fn payload(&self) -> &[u8] {
        match &self.buffer {
            Some(buffer) => &buffer[self.offset..self.offset + self.size],
            None => &[],
        }
    }

    pub fn info(&self) -> ChunkInfo {
        self.info
    }

    pub fn pts_us(&self) -> i64 {
        self.info.pts_us
    }

    pub fn flags(&self) -> ChunkFlags {
        self.info.flags
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for CompressedChunk {
    fn drop(&mut self) {
        if let (Some(buffer), Some(recycle)) = (self.buffer.take(), self.recycle.take()) {
            // The pool may already be gone during shutdown.
            let _ = recycle.try_send(buffer);
        }
    }
}

impl fmt::Debug for CompressedChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressedChunk")
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("info", &self.info)
            .field("pooled", &self.recycle.is_some())
            .finish()
    }
}

/// Compressed audio codecs known to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecId {
    Opus,
    Aac,
}

impl CodecId {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodecId::Opus => "audio/opus",
            CodecId::Aac => "audio/mp4a-latm",
        }
    }
}

/// Output format announced once by the encoder and used to allocate the
/// container track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackFormat {
    pub codec: CodecId,
    pub sample_rate: u32,
    pub channels: u16,
    /// Average encoded bit rate in bits per second.
    pub bit_rate: u32,
    /// Size in bytes of one encoded access unit; 0 when units vary in size.
    pub block_align: u16,
    /// Codec-specific configuration bytes.
    pub codec_config: Vec<u8>,
}

/// Identifies a registered container track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackHandle(pub(crate) u32);

impl TrackHandle {
    pub fn index(&self) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine() {
        let flags = ChunkFlags::CODEC_CONFIG | ChunkFlags::END_OF_STREAM;
        assert!(flags.is_codec_config());
        assert!(flags.contains(ChunkFlags::END_OF_STREAM));
        assert!(!ChunkFlags::NONE.is_codec_config());
    }

    #[test]
    fn payload_respects_range() {
        let (tx, _rx) = crossbeam_channel::bounded(1);
        let chunk = CompressedChunk::pooled(vec![1, 2, 3, 4, 5], 1, 3, ChunkInfo::default(), tx);
        assert_eq!(chunk.payload(), &[2, 3, 4]);
    }

    #[test]
    fn dropped_chunk_returns_buffer_to_pool() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let chunk = CompressedChunk::pooled(vec![0u8; 16], 0, 16, ChunkInfo::default(), tx);
        drop(chunk);
        let recycled = rx.try_recv().unwrap();
        assert_eq!(recycled.len(), 16);
    }

    #[test]
    fn oversized_range_is_clamped() {
        let (tx, _rx) = crossbeam_channel::bounded(1);
        let chunk = CompressedChunk::pooled(vec![0u8; 4], 2, 10, ChunkInfo::default(), tx);
        assert_eq!(chunk.size(), 2);
    }
}
