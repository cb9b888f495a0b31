//! # playback-capture-core
//!
//! Platform-agnostic capture → encode → mux pipeline for playback audio.
//!
//! A [`SampleSource`] supplies raw 16-bit PCM, an [`AudioEncoder`] compresses
//! it asynchronously, and a [`Muxer`] writes the compressed units into a
//! container once the encoder has announced its format. The
//! [`PipelineController`] runs that loop on its own worker thread with
//! drain-on-stop semantics; the [`SessionSupervisor`] drives it in lockstep
//! with an external video recorder. Platform backends (cpal) implement
//! `SampleSource` and plug into the generic controller.
//!
//! ## Architecture
//!
//! ```text
//! playback-capture-core (this crate)
//! ├── traits/       ← SampleSource, AudioEncoder, ContainerSink, PipelineDelegate, session collaborators
//! ├── models/       ← errors, PipelineState, PipelineConfig, chunks, TrackFormat, RecordingResult
//! ├── codec/        ← libopus wrapper, SoftwareOpusEncoder (codec thread)
//! ├── processing/   ← RingBuffer, PCM conversion, StreamResampler, PtsClock
//! ├── session/      ← PipelineController (worker), SessionSupervisor
//! ├── storage/      ← Muxer typestate, Mp4Sink, metadata sidecar, DirectoryArchiver
//! └── testing/      ← doubles behind the `testing` feature
//! ```

pub mod codec;
pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use codec::software::SoftwareOpusEncoder;
pub use models::audio_models::{ChunkFlags, ChunkInfo, CodecId, CompressedChunk, RawAudioChunk, TrackFormat, TrackHandle};
pub use models::config::{CodecProfile, DrainLimit, EncoderSettings, PipelineConfig, WarmupPolicy};
pub use models::error::{ContainerError, EncoderError, PipelineError, SourceError};
pub use models::recording_result::{PipelineStats, RecordingMetadata, RecordingResult, SessionReport};
pub use models::state::PipelineState;
pub use processing::clock::PtsClock;
pub use processing::resample::StreamResampler;
pub use processing::ring_buffer::RingBuffer;
pub use session::pipeline::{PipelineController, PipelineHandle};
pub use session::supervisor::{SessionSummary, SessionSupervisor, SupervisorHandle};
pub use storage::archive::DirectoryArchiver;
pub use storage::muxer::{Muxer, Started, Unopened};
pub use storage::mp4_container::Mp4Sink;
pub use traits::container_sink::{ContainerSink, ContainerSummary};
pub use traits::encoder::{AudioEncoder, EncoderEvent};
pub use traits::pipeline_delegate::PipelineDelegate;
pub use traits::sample_source::SampleSource;
pub use traits::session_collaborators::{
    CaptureAuthorizer, CaptureGrant, NoVideo, RecordingArchiver, Unrestricted, VideoRecorder,
};
