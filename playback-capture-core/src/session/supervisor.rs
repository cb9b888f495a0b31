use std::path::PathBuf;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use super::pipeline::{PipelineController, PipelineHandle};
use crate::models::config::PipelineConfig;
use crate::models::error::PipelineError;
use crate::models::recording_result::SessionReport;
use crate::traits::container_sink::ContainerSink;
use crate::traits::encoder::AudioEncoder;
use crate::traits::sample_source::SampleSource;
use crate::traits::session_collaborators::{
    CaptureAuthorizer, CaptureGrant, NoVideo, RecordingArchiver, VideoRecorder,
};

/// How often `run_until_stopped` checks whether the pipeline ended by itself.
const SUPERVISE_INTERVAL: Duration = Duration::from_millis(50);

/// What a finished recording session produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub audio: SessionReport,
    /// Final location of the audio file, when an archiver moved it.
    pub archived_audio: Option<PathBuf>,
    pub video_path: Option<PathBuf>,
}

/// Thread-safe stop trigger for a supervised session.
///
/// Platform revocation callbacks and signal handlers hold one of these.
#[derive(Clone)]
pub struct SupervisorHandle {
    pipeline: PipelineHandle,
    stop_tx: Sender<()>,
}

impl SupervisorHandle {
    /// Stop the session from any thread. The owning `run_until_stopped`
    /// performs the actual teardown.
    pub fn notify_external_stop(&self) {
        log::info!("external stop received");
        self.pipeline.request_stop();
        let _ = self.stop_tx.try_send(());
    }

    pub fn pipeline(&self) -> &PipelineHandle {
        &self.pipeline
    }
}

/// Runs the audio pipeline in lockstep with a video recorder.
///
/// ```text
/// start: authorize → video.start → pipeline.start
/// stop:  pipeline.stop (drain) → video.stop → archive audio
/// ```
pub struct SessionSupervisor<S, E, K>
where
    S: SampleSource + 'static,
    E: AudioEncoder + 'static,
    K: ContainerSink + 'static,
{
    pipeline: PipelineController<S, E, K>,
    authorizer: Box<dyn CaptureAuthorizer>,
    video: Box<dyn VideoRecorder>,
    archiver: Option<Box<dyn RecordingArchiver>>,
    grant: Option<CaptureGrant>,
    video_running: bool,
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
    summary: Option<Result<SessionSummary, PipelineError>>,
}

impl<S, E, K> SessionSupervisor<S, E, K>
where
    S: SampleSource + 'static,
    E: AudioEncoder + 'static,
    K: ContainerSink + 'static,
{
    /// Audio-only session without archiving.
    pub fn new(pipeline: PipelineController<S, E, K>, authorizer: impl CaptureAuthorizer + 'static) -> Self {
        let (stop_tx, stop_rx) = bounded(1);
        Self {
            pipeline,
            authorizer: Box::new(authorizer),
            video: Box::new(NoVideo),
            archiver: None,
            grant: None,
            video_running: false,
            stop_tx,
            stop_rx,
            summary: None,
        }
    }

    pub fn with_video(mut self, video: impl VideoRecorder + 'static) -> Self {
        self.video = Box::new(video);
        self
    }

    pub fn with_archiver(mut self, archiver: impl RecordingArchiver + 'static) -> Self {
        self.archiver = Some(Box::new(archiver));
        self
    }

    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            pipeline: self.pipeline.handle(),
            stop_tx: self.stop_tx.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.pipeline.is_running()
    }

    /// Authorize, then start video and audio.
    ///
    /// If audio fails to start, video is stopped again and the grant revoked.
    pub fn start(&mut self, config: PipelineConfig) -> Result<(), PipelineError> {
        if self.pipeline.is_running() {
            return Err(PipelineError::InvalidState("session already running".into()));
        }
        if self.summary.is_some() {
            return Err(PipelineError::InvalidState("session already finished".into()));
        }

        let grant = self.authorizer.authorize()?;
        log::debug!("capture authorized: {:?}", grant);

        if let Err(e) = self.video.start() {
            self.authorizer.revoke(grant);
            return Err(e);
        }

        if let Err(e) = self.pipeline.start(config) {
            if let Err(video_err) = self.video.stop() {
                log::warn!("video stop after failed audio start: {}", video_err);
            }
            self.authorizer.revoke(grant);
            return Err(e);
        }

        self.video_running = true;
        self.grant = Some(grant);
        log::info!("recording session started");
        Ok(())
    }

    /// Block until an external stop arrives or the pipeline ends on its own,
    /// then stop everything.
    pub fn run_until_stopped(&mut self) -> Result<SessionSummary, PipelineError> {
        loop {
            match self.stop_rx.recv_timeout(SUPERVISE_INTERVAL) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if !self.pipeline.is_running() {
                        log::info!("pipeline ended without a stop request");
                        break;
                    }
                }
            }
        }
        self.stop()
    }

    /// Stop audio (with drain), then video, then archive. Idempotent.
    pub fn stop(&mut self) -> Result<SessionSummary, PipelineError> {
        if let Some(summary) = &self.summary {
            return summary.clone();
        }

        let audio = self.pipeline.stop();

        if self.video_running {
            self.video_running = false;
            if let Err(e) = self.video.stop() {
                log::warn!("video recorder failed to stop cleanly: {}", e);
            }
        }
        if let Some(grant) = self.grant.take() {
            self.authorizer.revoke(grant);
        }

        let summary = audio.map(|report| {
            let archived_audio = match (&self.archiver, &report.recording) {
                (Some(archiver), Some(recording)) => match archiver.archive(recording) {
                    Ok(path) => Some(path),
                    Err(e) => {
                        log::error!("archiving failed, recording left at {}: {}", recording.file_path.display(), e);
                        None
                    }
                },
                _ => None,
            };
            SessionSummary {
                audio: report,
                archived_audio,
                video_path: self.video.output_path().map(PathBuf::from),
            }
        });

        self.summary = Some(summary.clone());
        summary
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::models::error::EncoderError;
    use crate::testing::{RecordingSink, ScriptedEncoder, StaticAuthorizer, StubVideo, SyntheticSource};

    fn config() -> PipelineConfig {
        PipelineConfig {
            idle_backoff: Duration::from_millis(1),
            write_metadata: false,
            ..PipelineConfig::default()
        }
    }

    fn pipeline(encoder: ScriptedEncoder) -> PipelineController<SyntheticSource, ScriptedEncoder, RecordingSink> {
        PipelineController::new(
            SyntheticSource::new(44_100, 2).keep_open().chunk_limit(10_000),
            encoder,
            RecordingSink::new(),
        )
    }

    #[test]
    fn denied_authorization_starts_nothing() {
        let video = StubVideo::new();
        let mut session =
            SessionSupervisor::new(pipeline(ScriptedEncoder::new()), StaticAuthorizer::deny()).with_video(video.clone());

        let err = session.start(config()).unwrap_err();
        assert!(matches!(err, PipelineError::PermissionDenied(_)));
        assert!(video.calls().is_empty());
        assert!(!session.is_running());
    }

    #[test]
    fn audio_start_failure_stops_video() {
        let video = StubVideo::new();
        let authorizer = StaticAuthorizer::allow();
        let encoder = ScriptedEncoder::new().fail_configure(EncoderError::Unsupported("aac".into()));
        let mut session = SessionSupervisor::new(pipeline(encoder), authorizer.clone()).with_video(video.clone());

        assert!(matches!(session.start(config()), Err(PipelineError::Configuration(_))));
        assert_eq!(video.calls(), vec!["start", "stop"]);
        assert_eq!(authorizer.revoked(), 1);
    }

    #[test]
    fn video_start_failure_keeps_audio_idle() {
        let video = StubVideo::failing_start();
        let mut session =
            SessionSupervisor::new(pipeline(ScriptedEncoder::new()), StaticAuthorizer::allow()).with_video(video);

        assert!(matches!(session.start(config()), Err(PipelineError::Video(_))));
        assert!(session.pipeline.state().is_idle());
    }

    #[test]
    fn external_stop_from_another_thread() {
        let video = StubVideo::new().with_output("/tmp/screen.mp4");
        let mut session =
            SessionSupervisor::new(pipeline(ScriptedEncoder::new()), StaticAuthorizer::allow()).with_video(video.clone());
        session.start(config()).unwrap();
        assert!(matches!(session.start(config()), Err(PipelineError::InvalidState(_))));

        let handle = session.handle();
        let notifier = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            handle.notify_external_stop();
        });

        let summary = session.run_until_stopped().unwrap();
        notifier.join().unwrap();

        assert!(summary.audio.recording.is_some());
        assert_eq!(summary.video_path, Some(PathBuf::from("/tmp/screen.mp4")));
        assert_eq!(video.calls(), vec!["start", "stop"]);
    }

    #[test]
    fn stop_is_idempotent() {
        let video = StubVideo::new();
        let mut session =
            SessionSupervisor::new(pipeline(ScriptedEncoder::new()), StaticAuthorizer::allow()).with_video(video.clone());
        session.start(config()).unwrap();

        let first = session.stop().unwrap();
        let second = session.stop().unwrap();
        assert_eq!(first, second);
        assert_eq!(video.calls(), vec!["start", "stop"]);
        assert!(matches!(session.start(config()), Err(PipelineError::InvalidState(_))));
    }
}
