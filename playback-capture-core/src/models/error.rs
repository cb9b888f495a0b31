use thiserror::Error;

/// Errors reported by an [`AudioEncoder`](crate::traits::encoder::AudioEncoder).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncoderError {
    #[error("no encoder available: {0}")]
    Unsupported(String),

    #[error("encoder is not configured")]
    NotConfigured,

    #[error("encoder is already configured")]
    AlreadyConfigured,

    /// No input slot became free within the configured wait.
    #[error("no input slot available")]
    WouldBlock,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("end of stream already submitted")]
    EndOfStreamSubmitted,

    #[error("codec failure: {0}")]
    Codec(String),
}

/// Errors reported by the container writer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContainerError {
    #[error("container is already open")]
    AlreadyOpen,

    #[error("container is not open")]
    NotOpen,

    #[error("a track is already registered")]
    TrackAlreadyAdded,

    #[error("no track registered before start")]
    NoTrack,

    #[error("unknown track handle {0}")]
    UnknownTrack(u32),

    #[error("unsupported codec for this container: {0}")]
    UnsupportedCodec(String),

    #[error("timestamp went backwards: {got}us after {previous}us")]
    NonMonotonicTimestamp { previous: i64, got: i64 },

    #[error("i/o error: {0}")]
    Io(String),
}

/// Errors reported by a [`SampleSource`](crate::traits::sample_source::SampleSource).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("sample source closed")]
    Closed,

    #[error("sample source device error: {0}")]
    Device(String),
}

/// Errors surfaced by the pipeline and the session supervisor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("input slot not available within the wait window")]
    BackpressureTimeout,

    #[error("write error: {0}")]
    Write(String),

    #[error("shutdown error: {0}")]
    Shutdown(String),

    #[error("source error: {0}")]
    Source(String),

    #[error("encoder error: {0}")]
    Encoder(String),

    #[error("video recorder error: {0}")]
    Video(String),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl From<EncoderError> for PipelineError {
    fn from(err: EncoderError) -> Self {
        match err {
            EncoderError::WouldBlock => PipelineError::BackpressureTimeout,
            EncoderError::Unsupported(_) | EncoderError::NotConfigured | EncoderError::AlreadyConfigured => {
                PipelineError::Configuration(err.to_string())
            }
            other => PipelineError::Encoder(other.to_string()),
        }
    }
}

impl From<ContainerError> for PipelineError {
    fn from(err: ContainerError) -> Self {
        PipelineError::Write(err.to_string())
    }
}

impl From<SourceError> for PipelineError {
    fn from(err: SourceError) -> Self {
        PipelineError::Source(err.to_string())
    }
}

impl From<std::io::Error> for ContainerError {
    fn from(err: std::io::Error) -> Self {
        ContainerError::Io(err.to_string())
    }
}
