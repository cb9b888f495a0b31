use std::fmt;

use thiserror::Error;

use playback_capture_core::models::error::{PipelineError, SourceError};

/// Which side of the audio graph a device sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceDirection {
    /// Microphones and line inputs.
    Input,
    /// Render endpoints, captured through loopback.
    Output,
}

impl fmt::Display for DeviceDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// Errors raised by the cpal backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("no default {0} device")]
    NoDefaultDevice(DeviceDirection),

    #[error("{direction} device not found: {name}")]
    DeviceNotFound { direction: DeviceDirection, name: String },

    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    #[error("device configuration failed: {0}")]
    Configuration(String),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("stream error: {0}")]
    Stream(String),
}

impl From<BackendError> for SourceError {
    fn from(err: BackendError) -> Self {
        SourceError::Device(err.to_string())
    }
}

impl From<BackendError> for PipelineError {
    fn from(err: BackendError) -> Self {
        PipelineError::PermissionDenied(err.to_string())
    }
}
