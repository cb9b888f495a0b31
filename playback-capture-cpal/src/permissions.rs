//! Capture authorization backed by device availability.
//!
//! Desktop hosts reached through cpal have no consent dialog of their own:
//! capture is allowed as soon as the endpoint can be opened. The authorizer
//! therefore grants when the requested device resolves and reports a usable
//! default configuration, and denies otherwise.

use playback_capture_core::models::error::PipelineError;
use playback_capture_core::traits::session_collaborators::{CaptureAuthorizer, CaptureGrant};

use crate::capture::CpalSourceOptions;
use crate::devices;
use crate::error::{BackendError, DeviceDirection};

/// Check that a device exists and can report a stream configuration.
pub fn check_capture_available(direction: DeviceDirection, device: Option<&str>) -> Result<(), BackendError> {
    let resolved = devices::find_device(direction, device)?;
    devices::default_config(&resolved, direction).map(|_| ())
}

/// [`CaptureAuthorizer`] that grants when the capture device is usable.
#[derive(Debug, Clone)]
pub struct DeviceAuthorizer {
    direction: DeviceDirection,
    device: Option<String>,
    active: Option<CaptureGrant>,
}

impl DeviceAuthorizer {
    pub fn new(direction: DeviceDirection, device: Option<String>) -> Self {
        Self {
            direction,
            device,
            active: None,
        }
    }

    /// Authorize the same device a [`CpalSampleSource`](crate::CpalSampleSource) will open.
    pub fn for_options(options: &CpalSourceOptions) -> Self {
        Self::new(options.direction, options.device.clone())
    }

    pub fn direction(&self) -> DeviceDirection {
        self.direction
    }

    pub fn is_granted(&self) -> bool {
        self.active.is_some()
    }
}

impl CaptureAuthorizer for DeviceAuthorizer {
    fn authorize(&mut self) -> Result<CaptureGrant, PipelineError> {
        match check_capture_available(self.direction, self.device.as_deref()) {
            Ok(()) => {
                let grant = CaptureGrant::new();
                log::info!("{} capture authorized (grant {})", self.direction, grant.id());
                self.active = Some(grant.clone());
                Ok(grant)
            }
            Err(e) => {
                log::warn!("{} capture denied: {}", self.direction, e);
                Err(e.into())
            }
        }
    }

    fn revoke(&mut self, grant: CaptureGrant) {
        if self.active.as_ref() == Some(&grant) {
            self.active = None;
            log::debug!("capture grant {} revoked", grant.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_source_options() {
        let options = CpalSourceOptions::default().loopback().device("Speakers");
        let authorizer = DeviceAuthorizer::for_options(&options);
        assert_eq!(authorizer.direction(), DeviceDirection::Output);
        assert_eq!(authorizer.device.as_deref(), Some("Speakers"));
        assert!(!authorizer.is_granted());
    }

    #[test]
    fn revoking_a_foreign_grant_is_ignored() {
        let mut authorizer = DeviceAuthorizer::new(DeviceDirection::Input, None);
        let ours = CaptureGrant::new();
        authorizer.active = Some(ours.clone());

        authorizer.revoke(CaptureGrant::new());
        assert!(authorizer.is_granted());

        authorizer.revoke(ours);
        assert!(!authorizer.is_granted());
    }

    #[test]
    fn missing_named_device_is_denied() {
        let mut authorizer = DeviceAuthorizer::new(DeviceDirection::Input, Some("no such device \u{1F3A4}".into()));
        match authorizer.authorize() {
            Err(PipelineError::PermissionDenied(_)) => {}
            other => panic!("expected denial, got {:?}", other),
        }
        assert!(!authorizer.is_granted());
    }
}
