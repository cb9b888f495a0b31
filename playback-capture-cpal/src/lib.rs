//! # playback-capture-cpal
//!
//! cpal backend for playback-capture.
//!
//! Provides:
//! - `CpalSampleSource`: a `SampleSource` over a cpal input stream, or a
//!   render endpoint opened for loopback (WASAPI)
//! - `devices`: input and output device enumeration
//! - `DeviceAuthorizer`: grants capture when the device is usable
//! - `ToneSource`: a real-time generated tone for device-less runs
//! - the `record-playback` binary, which wires a source to the software
//!   Opus encoder and the MP4 container
//!
//! ## Usage
//! ```ignore
//! use playback_capture_core::{PipelineConfig, PipelineController, Mp4Sink, SoftwareOpusEncoder};
//! use playback_capture_cpal::{CpalSampleSource, CpalSourceOptions};
//!
//! let config = PipelineConfig::default();
//! let source = CpalSampleSource::new(CpalSourceOptions::for_config(&config).loopback());
//! let mut pipeline = PipelineController::new(source, SoftwareOpusEncoder::new(), Mp4Sink::new());
//! pipeline.start(config)?;
//! ```

pub mod capture;
pub mod devices;
pub mod error;
pub mod permissions;
pub mod tone;

pub use capture::{CpalSampleSource, CpalSourceOptions};
pub use devices::{find_device, list_input_devices, list_output_devices, AudioDevice};
pub use error::{BackendError, DeviceDirection};
pub use permissions::DeviceAuthorizer;
pub use tone::ToneSource;
