use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use super::worker::CaptureWorker;
use crate::models::config::PipelineConfig;
use crate::models::error::PipelineError;
use crate::models::recording_result::{PipelineStats, SessionReport};
use crate::models::state::PipelineState;
use crate::storage::muxer::{Muxer, Unopened};
use crate::traits::container_sink::ContainerSink;
use crate::traits::encoder::AudioEncoder;
use crate::traits::pipeline_delegate::PipelineDelegate;
use crate::traits::sample_source::SampleSource;

/// Lock-free counters updated by the worker, read from anywhere.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub chunks_read: AtomicU64,
    pub empty_reads: AtomicU64,
    pub chunks_submitted: AtomicU64,
    pub bytes_submitted: AtomicU64,
    pub backpressure_drops: AtomicU64,
    pub format_ready_events: AtomicU64,
    pub duplicate_format_events: AtomicU64,
    pub codec_config_chunks: AtomicU64,
    pub warmup_discarded: AtomicU64,
    pub warmup_replayed: AtomicU64,
    pub chunks_written: AtomicU64,
    pub bytes_written: AtomicU64,
    pub frames_written: AtomicU64,
    pub drain_truncated: AtomicBool,
}

impl Counters {
    pub fn snapshot(&self) -> PipelineStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PipelineStats {
            chunks_read: get(&self.chunks_read),
            empty_reads: get(&self.empty_reads),
            chunks_submitted: get(&self.chunks_submitted),
            bytes_submitted: get(&self.bytes_submitted),
            backpressure_drops: get(&self.backpressure_drops),
            format_ready_events: get(&self.format_ready_events),
            duplicate_format_events: get(&self.duplicate_format_events),
            codec_config_chunks: get(&self.codec_config_chunks),
            warmup_discarded: get(&self.warmup_discarded),
            warmup_replayed: get(&self.warmup_replayed),
            chunks_written: get(&self.chunks_written),
            bytes_written: get(&self.bytes_written),
            frames_written: get(&self.frames_written),
            drain_truncated: self.drain_truncated.load(Ordering::Relaxed),
        }
    }
}

/// State touched by both the controller and the capture worker.
///
/// `running` and `muxer_ready` are the only flags the worker reads that other
/// threads write; codec and container handles never leave the worker.
pub(crate) struct Shared {
    pub running: AtomicBool,
    pub muxer_ready: AtomicBool,
    pub state: Mutex<PipelineState>,
    pub counters: Counters,
    pub delegate: Option<Arc<dyn PipelineDelegate>>,
}

impl Shared {
    fn new(delegate: Option<Arc<dyn PipelineDelegate>>) -> Self {
        Self {
            running: AtomicBool::new(false),
            muxer_ready: AtomicBool::new(false),
            state: Mutex::new(PipelineState::Idle),
            counters: Counters::default(),
            delegate,
        }
    }

    pub fn set_state(&self, new_state: PipelineState) {
        *self.state.lock() = new_state.clone();
        log::debug!("pipeline state → {}", new_state.name());
        if let Some(delegate) = &self.delegate {
            delegate.on_state_changed(&new_state);
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state.lock().clone()
    }

    /// Record a failure and tell the delegate.
    pub fn fail(&self, error: &PipelineError) {
        self.running.store(false, Ordering::SeqCst);
        self.set_state(PipelineState::Failed(error.clone()));
        if let Some(delegate) = &self.delegate {
            delegate.on_error(error);
        }
    }
}

/// Cloneable, thread-safe view of a running pipeline.
///
/// Handed to supervisors and signal handlers; it can ask the worker to stop
/// but never touches the codec or container.
#[derive(Clone)]
pub struct PipelineHandle {
    shared: Arc<Shared>,
}

impl PipelineHandle {
    /// Ask the worker to stop pulling and start draining.
    pub fn request_stop(&self) {
        if self.shared.running.swap(false, Ordering::SeqCst) {
            log::info!("stop requested");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.state().is_running()
    }

    pub fn is_muxer_ready(&self) -> bool {
        self.shared.muxer_ready.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.counters.snapshot()
    }
}

struct Parts<S, E, K> {
    source: S,
    encoder: E,
    sink: K,
}

type WorkerResult = Result<SessionReport, PipelineError>;

/// Owns one capture → encode → mux session.
///
/// Data flow (all on the `playback-capture` worker thread):
/// ```text
/// [SampleSource] → read → [AudioEncoder] → drain → [Muxer<K>] → container file
/// ```
/// State transitions:
/// ```text
/// idle → capturing → draining → stopped
///   ↓        ↓           ↓
///   └────────┴───────────┴──→ failed
/// ```
/// The source, encoder and sink are owned here until `start` moves them onto
/// the worker; after that the only shared state is the stop flag, the
/// muxer-ready flag, counters and the reported state.
pub struct PipelineController<S, E, K>
where
    S: SampleSource + 'static,
    E: AudioEncoder + 'static,
    K: ContainerSink + 'static,
{
    parts: Option<Parts<S, E, K>>,
    shared: Arc<Shared>,
    worker: Option<thread::JoinHandle<WorkerResult>>,
    outcome: Option<WorkerResult>,
}

impl<S, E, K> PipelineController<S, E, K>
where
    S: SampleSource + 'static,
    E: AudioEncoder + 'static,
    K: ContainerSink + 'static,
{
    pub fn new(source: S, encoder: E, sink: K) -> Self {
        Self::build(source, encoder, sink, None)
    }

    pub fn with_delegate(source: S, encoder: E, sink: K, delegate: Arc<dyn PipelineDelegate>) -> Self {
        Self::build(source, encoder, sink, Some(delegate))
    }

    fn build(source: S, encoder: E, sink: K, delegate: Option<Arc<dyn PipelineDelegate>>) -> Self {
        Self {
            parts: Some(Parts { source, encoder, sink }),
            shared: Arc::new(Shared::new(delegate)),
            worker: None,
            outcome: None,
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.counters.snapshot()
    }

    /// Capturing or draining.
    pub fn is_running(&self) -> bool {
        self.shared.state().is_running()
    }

    /// Configure the encoder, open the container and launch the worker.
    ///
    /// The container header is not written here; that waits for the
    /// encoder's format. Transitions: idle → capturing.
    pub fn start(&mut self, config: PipelineConfig) -> Result<(), PipelineError> {
        if !self.shared.state().is_idle() {
            return Err(PipelineError::InvalidState(format!(
                "can only start from idle, pipeline is {}",
                self.shared.state().name()
            )));
        }
        let Parts {
            source,
            mut encoder,
            sink,
        } = self
            .parts
            .take()
            .ok_or_else(|| PipelineError::InvalidState("pipeline parts already consumed".into()))?;

        match Self::prepare(source, &mut encoder, sink, &config) {
            Ok((source, muxer)) => {
                self.shared.running.store(true, Ordering::SeqCst);
                self.shared.set_state(PipelineState::Capturing);
                log::info!(
                    "capture started: {} Hz, {} ch, profile {:?} → {}",
                    config.sample_rate,
                    config.channels,
                    config.profile,
                    config.output_path().display()
                );

                let worker = CaptureWorker::new(source, encoder, muxer, config, Arc::clone(&self.shared));
                match thread::Builder::new()
                    .name("playback-capture".into())
                    .spawn(move || worker.run())
                {
                    Ok(handle) => {
                        self.worker = Some(handle);
                        Ok(())
                    }
                    Err(e) => {
                        let err = PipelineError::InvalidState(format!("failed to spawn capture worker: {}", e));
                        self.record_failure(err.clone());
                        Err(err)
                    }
                }
            }
            Err(err) => {
                encoder.shutdown();
                self.record_failure(err.clone());
                Err(err)
            }
        }
    }

    fn prepare(
        mut source: S,
        encoder: &mut E,
        sink: K,
        config: &PipelineConfig,
    ) -> Result<(S, Muxer<K, Unopened>), PipelineError> {
        config.validate().map_err(PipelineError::Configuration)?;
        encoder.configure(&config.encoder_settings())?;

        let mut muxer = Muxer::new(sink);
        muxer.open(&config.output_path())?;

        if let Err(e) = source.start() {
            muxer.release();
            return Err(e.into());
        }
        Ok((source, muxer))
    }

    fn record_failure(&mut self, err: PipelineError) {
        log::error!("failed to start capture: {}", err);
        self.shared.fail(&err);
        self.outcome = Some(Err(err));
    }

    /// Request a stop, drain, and release everything.
    ///
    /// Idempotent: later calls return the first outcome. From idle this only
    /// moves to stopped; nothing is opened or finalized.
    pub fn stop(&mut self) -> Result<SessionReport, PipelineError> {
        self.finish(true)
    }

    /// Wait for the worker to end on its own (source closed or failure).
    pub fn wait(&mut self) -> Result<SessionReport, PipelineError> {
        self.finish(false)
    }

    fn finish(&mut self, request_stop: bool) -> Result<SessionReport, PipelineError> {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }

        let outcome = match self.worker.take() {
            Some(worker) => {
                if request_stop {
                    self.handle().request_stop();
                }
                match worker.join() {
                    Ok(result) => result,
                    Err(_) => {
                        let err = PipelineError::Shutdown("capture worker panicked".into());
                        self.shared.fail(&err);
                        Err(err)
                    }
                }
            }
            None => {
                log::debug!("stop before start; nothing to release");
                self.parts = None;
                self.shared.set_state(PipelineState::Stopped);
                Ok(SessionReport {
                    recording: None,
                    stats: self.shared.counters.snapshot(),
                    source_error: None,
                })
            }
        };

        self.outcome = Some(outcome.clone());
        outcome
    }
}

impl<S, E, K> Drop for PipelineController<S, E, K>
where
    S: SampleSource + 'static,
    E: AudioEncoder + 'static,
    K: ContainerSink + 'static,
{
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.stop();
        }
    }
}
