//! DSLR session control
//!
//! Drives a tethered camera through libgphoto2, which is loaded at runtime.
//! A `CameraSession` serializes every driver call behind one lock and offers
//! connect, live view preview and capture-and-download. `LiveView` runs the
//! preview poll on tokio for callers that stream frames.

pub mod config;
pub mod driver;
pub mod errors;
pub mod frame;
pub mod gphoto2_sys;
pub mod liveview;
pub mod session;
pub mod settings;
pub mod testing;

pub use config::SessionConfig;
pub use driver::{CameraDriver, CameraFilePath, CaptureKind, FileType};
#[cfg(unix)]
pub use driver::Gphoto2Driver;
pub use errors::{CameraError, ConfigError, DriverError};
pub use frame::{LiveViewFrame, PreviewFrame};
pub use liveview::{capture_async, LiveView};
pub use session::{CameraSession, CapturedImage, ConnectionState};
pub use settings::{Setting, SettingValue, SettingsNode, SettingsWalker, WidgetKind};
