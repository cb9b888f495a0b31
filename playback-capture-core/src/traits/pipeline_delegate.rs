use crate::models::audio_models::TrackFormat;
use crate::models::error::PipelineError;
use crate::models::recording_result::SessionReport;
use crate::models::state::PipelineState;

/// Status callbacks for a pipeline session.
///
/// Most calls arrive on the capture worker thread, not the caller's thread.
/// Implementations should return quickly.
pub trait PipelineDelegate: Send + Sync {
    fn on_state_changed(&self, state: &PipelineState);

    /// The encoder announced its format and the container started.
    fn on_format_ready(&self, _format: &TrackFormat) {}

    fn on_error(&self, error: &PipelineError);

    fn on_session_finished(&self, _report: &SessionReport) {}
}
