use crate::gphoto2_sys::error_to_string;
use std::fmt;
use thiserror::Error;

/// A non-OK status returned by the camera driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverError {
    pub code: i32,
}

impl DriverError {
    pub fn new(code: i32) -> Self {
        Self { code }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "gphoto2 error: {} ({})", error_to_string(self.code), self.code)
    }
}

impl std::error::Error for DriverError {}

/// Failures while reading or changing the device settings tree.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("setting not found: {0}")]
    NotFound(String),
    #[error("setting '{0}' is not an enumerated choice list")]
    NotEnumerated(String),
    #[error("setting '{name}' does not accept a {given} value")]
    TypeMismatch { name: String, given: &'static str },
    #[error("'{value}' is not a valid choice for '{name}'")]
    InvalidChoice { name: String, value: String },
    #[error("setting '{0}' is read-only")]
    ReadOnly(String),
    #[error("choice index {index} out of range for '{name}' ({len} choices)")]
    IndexOutOfRange {
        name: String,
        index: usize,
        len: usize,
    },
    #[error("no camera connected")]
    NotConnected,
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Errors surfaced by a camera session.
///
/// Each variant names the step that failed; driver detail beyond the status
/// code is not propagated.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera library unavailable: {0}")]
    Library(String),
    #[error("camera session setup failed: {0}")]
    Initialization(DriverError),
    #[error("unable to connect: {0}")]
    Connection(DriverError),
    #[error("camera configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("no preview frame available")]
    PreviewUnavailable,
    #[error("unable to capture: {0}")]
    Capture(DriverError),
    #[error("unable to download: {0}")]
    Download(String),
    #[error("error while deleting from camera: {0}")]
    Delete(DriverError),
    #[error("camera lock poisoned")]
    LockPoisoned,
    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),
    #[error("camera task failed: {0}")]
    Task(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gphoto2_sys::{GP_ERROR_CAMERA_BUSY, GP_ERROR_IO_USB_FIND};

    #[test]
    fn driver_error_renders_status_text() {
        let err = DriverError::new(GP_ERROR_CAMERA_BUSY);
        assert_eq!(err.to_string(), "gphoto2 error: I/O in progress (-110)");
    }

    #[test]
    fn camera_error_names_failed_step() {
        let err = CameraError::Connection(DriverError::new(GP_ERROR_IO_USB_FIND));
        assert!(err.to_string().starts_with("unable to connect"));

        let err = CameraError::Download("disk full".to_string());
        assert_eq!(err.to_string(), "unable to download: disk full");
    }

    #[test]
    fn config_error_converts_into_camera_error() {
        let err: CameraError = ConfigError::NotFound("capturetarget".to_string()).into();
        assert!(matches!(err, CameraError::Config(ConfigError::NotFound(_))));
        assert!(err.to_string().contains("capturetarget"));
    }
}
