use std::fs;
use std::path::{Path, PathBuf};

use crate::models::error::PipelineError;
use crate::models::recording_result::RecordingResult;
use crate::storage::metadata::metadata_path;
use crate::traits::session_collaborators::RecordingArchiver;

/// Moves finished recordings out of the scratch directory.
///
/// Files land at `<destination>/audio_<unix millis>.<ext>`; the JSON sidecar,
/// if present, travels with them.
#[derive(Debug, Clone)]
pub struct DirectoryArchiver {
    destination: PathBuf,
}

impl DirectoryArchiver {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    fn target_for(&self, source: &Path) -> PathBuf {
        let ext = source.extension().and_then(|e| e.to_str()).unwrap_or("m4a");
        let stamp = chrono::Utc::now().timestamp_millis();
        let mut target = self.destination.join(format!("audio_{}.{}", stamp, ext));
        let mut n = 1;
        while target.exists() {
            target = self.destination.join(format!("audio_{}_{}.{}", stamp, n, ext));
            n += 1;
        }
        target
    }
}

impl RecordingArchiver for DirectoryArchiver {
    fn archive(&self, recording: &RecordingResult) -> Result<PathBuf, PipelineError> {
        let source = &recording.file_path;
        fs::create_dir_all(&self.destination)
            .map_err(|e| PipelineError::Write(format!("failed to create archive directory: {}", e)))?;

        let target = self.target_for(source);
        fs::copy(source, &target)
            .map_err(|e| PipelineError::Write(format!("failed to copy {}: {}", source.display(), e)))?;

        let sidecar = metadata_path(source);
        if sidecar.exists() {
            if let Err(e) = fs::copy(&sidecar, metadata_path(&target)) {
                log::warn!("failed to archive metadata sidecar: {}", e);
            }
            let _ = fs::remove_file(&sidecar);
        }
        if let Err(e) = fs::remove_file(source) {
            log::warn!("archived copy kept but scratch file {} remains: {}", source.display(), e);
        }

        log::info!("recording archived to {}", target.display());
        Ok(target)
    }
}
