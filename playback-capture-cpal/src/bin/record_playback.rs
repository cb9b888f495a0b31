//! Record system playback (or a microphone) into an Opus MP4 (.m4a) file.
//!
//! ```text
//! record-playback [--config file.json] [--seconds N] [--archive DIR]
//!                 [--device NAME] [--loopback] [--synthetic] [--list-devices]
//! ```
//!
//! Ctrl-C stops the session; the encoder is drained and the file finalized
//! before the process exits.

use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use clap::Parser;

use playback_capture_core::{
    CaptureAuthorizer, DirectoryArchiver, Mp4Sink, PipelineConfig, PipelineController, PipelineError, SampleSource,
    SessionSummary, SessionSupervisor, SoftwareOpusEncoder, Unrestricted,
};
use playback_capture_cpal::{
    list_input_devices, list_output_devices, AudioDevice, BackendError, CpalSampleSource, CpalSourceOptions,
    DeviceAuthorizer, ToneSource,
};

#[derive(Parser, Debug)]
#[command(name = "record-playback", about = "Capture playback audio to an Opus MP4 file", version)]
struct Cli {
    /// JSON pipeline configuration; defaults apply to missing fields.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop automatically after this many seconds.
    #[arg(short, long)]
    seconds: Option<u64>,

    /// Move the finished recording into this directory.
    #[arg(short, long)]
    archive: Option<PathBuf>,

    /// Capture from the device with this exact name.
    #[arg(short, long)]
    device: Option<String>,

    /// Capture an output device through loopback instead of an input.
    #[arg(long)]
    loopback: bool,

    /// Record a generated tone instead of a real device.
    #[arg(long, conflicts_with_all = ["device", "loopback"])]
    synthetic: bool,

    /// Print the available devices and exit.
    #[arg(long)]
    list_devices: bool,

    /// Enable debug-level logging.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    if cli.list_devices {
        return match print_devices() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                log::error!("{}", e);
                ExitCode::FAILURE
            }
        };
    }

    let config = match &cli.config {
        Some(path) => match PipelineConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        None => PipelineConfig::default(),
    };

    let result = if cli.synthetic {
        let source = ToneSource::new(config.sample_rate, config.channels);
        record(&cli, config, source, Unrestricted)
    } else {
        let mut options = CpalSourceOptions::for_config(&config);
        if cli.loopback {
            options = options.loopback();
        }
        if let Some(name) = &cli.device {
            options = options.device(name.clone());
        }
        let authorizer = DeviceAuthorizer::for_options(&options);
        record(&cli, config, CpalSampleSource::new(options), authorizer)
    };

    match result {
        Ok(summary) => {
            print_summary(&summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("recording failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn record<S>(
    cli: &Cli,
    config: PipelineConfig,
    source: S,
    authorizer: impl CaptureAuthorizer + 'static,
) -> Result<SessionSummary, PipelineError>
where
    S: SampleSource + 'static,
{
    let pipeline = PipelineController::new(source, SoftwareOpusEncoder::new(), Mp4Sink::new());
    let mut supervisor = SessionSupervisor::new(pipeline, authorizer);
    if let Some(dir) = &cli.archive {
        supervisor = supervisor.with_archiver(DirectoryArchiver::new(dir.clone()));
    }

    let handle = supervisor.handle();
    let signal_handle = handle.clone();
    if let Err(e) = ctrlc::set_handler(move || signal_handle.notify_external_stop()) {
        log::warn!("could not install Ctrl-C handler: {}", e);
    }

    supervisor.start(config)?;

    if let Some(seconds) = cli.seconds {
        let timer_handle = handle.clone();
        let spawned = thread::Builder::new().name("record-timer".into()).spawn(move || {
            thread::sleep(Duration::from_secs(seconds));
            log::info!("{} s elapsed", seconds);
            timer_handle.notify_external_stop();
        });
        if let Err(e) = spawned {
            log::warn!("could not start stop timer: {}", e);
        }
    }

    log::info!("recording; press Ctrl-C to stop");
    supervisor.run_until_stopped()
}

fn print_devices() -> Result<(), BackendError> {
    println!("Input devices:");
    print_device_list(&list_input_devices()?);
    println!("Output devices (loopback):");
    print_device_list(&list_output_devices()?);
    Ok(())
}

fn print_device_list(devices: &[AudioDevice]) {
    if devices.is_empty() {
        println!("  (none)");
    }
    for device in devices {
        let marker = if device.is_default { "*" } else { " " };
        println!(
            "  {} {} ({} Hz, {} ch)",
            marker, device.name, device.sample_rate, device.channels
        );
    }
}

fn print_summary(summary: &SessionSummary) {
    if let Some(error) = &summary.audio.source_error {
        println!("Capture ended early: {}", error);
    }
    if summary.audio.stats.drain_truncated {
        println!("Encoder drain hit its limit; the tail may be missing");
    }
    match &summary.audio.recording {
        Some(recording) => {
            println!("Recorded {:.2} s to {}", recording.duration_secs, recording.file_path.display());
            println!("SHA-256 {}", recording.checksum);
        }
        None => println!("No audio was recorded"),
    }
    if let Some(archived) = &summary.archived_audio {
        println!("Archived to {}", archived.display());
    }
    match serde_json::to_string_pretty(&summary.audio.stats) {
        Ok(stats) => println!("{}", stats),
        Err(e) => log::warn!("could not serialize stats: {}", e),
    }
}
