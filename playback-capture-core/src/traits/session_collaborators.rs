use std::fmt;
use std::path::{Path, PathBuf};

use crate::models::error::PipelineError;
use crate::models::recording_result::RecordingResult;

/// Opaque proof that capture was authorized for one session.
#[derive(Clone, PartialEq, Eq)]
pub struct CaptureGrant {
    id: String,
}

impl CaptureGrant {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Default for CaptureGrant {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CaptureGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureGrant").field("id", &self.id).finish()
    }
}

/// Obtains consent to capture before a session starts.
pub trait CaptureAuthorizer: Send {
    /// Returns a grant, or `PipelineError::PermissionDenied`.
    fn authorize(&mut self) -> Result<CaptureGrant, PipelineError>;

    /// Give the grant back when the session ends.
    fn revoke(&mut self, _grant: CaptureGrant) {}
}

/// Grants every request. For sources that need no consent, such as a
/// generated tone.
#[derive(Debug, Default)]
pub struct Unrestricted;

impl CaptureAuthorizer for Unrestricted {
    fn authorize(&mut self) -> Result<CaptureGrant, PipelineError> {
        Ok(CaptureGrant::new())
    }
}

/// The video half of a recording session, driven in lockstep with audio.
pub trait VideoRecorder: Send {
    fn start(&mut self) -> Result<(), PipelineError>;

    fn stop(&mut self) -> Result<(), PipelineError>;

    /// Container file written by the recorder, once known.
    fn output_path(&self) -> Option<&Path>;
}

/// Audio-only sessions.
#[derive(Debug, Default)]
pub struct NoVideo;

impl VideoRecorder for NoVideo {
    fn start(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn output_path(&self) -> Option<&Path> {
        None
    }
}

/// Moves a finished scratch recording to its permanent home.
pub trait RecordingArchiver: Send {
    fn archive(&self, recording: &RecordingResult) -> Result<PathBuf, PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrestricted_issues_distinct_grants() {
        let mut authorizer = Unrestricted;
        let first = authorizer.authorize().unwrap();
        let second = authorizer.authorize().unwrap();
        assert_ne!(first, second);
        authorizer.revoke(first);
    }

    #[test]
    fn no_video_has_no_output() {
        let mut video = NoVideo;
        video.start().unwrap();
        video.stop().unwrap();
        assert!(video.output_path().is_none());
    }
}
