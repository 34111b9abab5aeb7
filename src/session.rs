//! Camera session
//!
//! Owns the driver, the device handle and the reusable preview file behind a
//! single lock, so connect, disconnect, preview and capture never run against
//! the driver at the same time.
//!
//! - connect / disconnect (both idempotent)
//! - capture-mode and capture-target applied best-effort on connect
//! - preview: one live view frame per call, `None` when the camera has none
//! - capture: shoot, download into the incoming directory, remove from device
//!
//! Calls block for as long as the driver does. There is no timeout; a stuck
//! driver call keeps the lock until it returns.

use crate::config::SessionConfig;
use crate::driver::{CameraDriver, CameraFilePath, CaptureKind, FileType};
use crate::errors::{CameraError, ConfigError, DriverError};
use crate::frame::{extract_frame, PreviewFrame};
use crate::gphoto2_sys::GP_ERROR;
use crate::settings::SettingsWalker;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Result of a successful capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedImage {
    /// Where the full-resolution file was written.
    pub local_path: PathBuf,
    /// Where the camera stored it.
    pub device_path: CameraFilePath,
    /// False when deletion was disabled or the camera refused it.
    pub deleted_from_device: bool,
}

struct SessionInner<D: CameraDriver> {
    driver: D,
    /// Present iff connected.
    device: Option<D::Device>,
    /// Allocated with the session, released on drop.
    preview_file: Option<D::File>,
    liveview_enabled: bool,
}

pub struct CameraSession<D: CameraDriver> {
    inner: Mutex<SessionInner<D>>,
    config: SessionConfig,
}

#[cfg(unix)]
impl CameraSession<crate::driver::Gphoto2Driver> {
    /// Load libgphoto2 and create a disconnected session.
    pub fn open(config: SessionConfig) -> Result<Self, CameraError> {
        let driver = crate::driver::Gphoto2Driver::load(config.library_path.as_deref())?;
        Self::new(driver, config)
    }
}

impl<D: CameraDriver> CameraSession<D> {
    /// Create a disconnected session around `driver`.
    pub fn new(mut driver: D, config: SessionConfig) -> Result<Self, CameraError> {
        let preview_file = driver.file_new().map_err(|e| {
            error!("[Camera] Unable to allocate preview file: {}", e);
            CameraError::Initialization(e)
        })?;

        Ok(Self {
            inner: Mutex::new(SessionInner {
                driver,
                device: None,
                preview_file: Some(preview_file),
                liveview_enabled: false,
            }),
            config,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, SessionInner<D>>, CameraError> {
        self.inner.lock().map_err(|_| {
            error!("[Camera] Session lock poisoned");
            CameraError::LockPoisoned
        })
    }

    pub fn state(&self) -> ConnectionState {
        match self.lock() {
            Ok(inner) if inner.device.is_some() => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Connect to the camera. Does nothing when already connected.
    pub fn connect(&self) -> Result<(), CameraError> {
        self.lock()?.connect(&self.config)
    }

    /// End the camera session. Does nothing when already disconnected.
    pub fn disconnect(&self) -> Result<(), CameraError> {
        self.lock()?.disconnect();
        Ok(())
    }

    pub fn is_liveview_enabled(&self) -> bool {
        self.lock().map(|inner| inner.liveview_enabled).unwrap_or(false)
    }

    pub fn enable_liveview(&self) {
        if let Ok(mut inner) = self.lock() {
            inner.liveview_enabled = true;
        }
    }

    pub fn disable_liveview(&self) {
        if let Ok(mut inner) = self.lock() {
            inner.liveview_enabled = false;
        }
    }

    /// Grab one live view frame, connecting first if needed.
    pub fn try_preview(&self) -> Result<PreviewFrame, CameraError> {
        self.lock()?.preview(&self.config)
    }

    /// Polling form of `try_preview`: any failure is just "no frame yet".
    pub fn preview(&self) -> Option<PreviewFrame> {
        match self.try_preview() {
            Ok(frame) => Some(frame),
            Err(CameraError::PreviewUnavailable) => None,
            Err(e) => {
                debug!("[Camera] Preview skipped: {}", e);
                None
            }
        }
    }

    /// Take a still image and download it into the incoming directory.
    pub fn capture(&self) -> Result<CapturedImage, CameraError> {
        self.lock()?.capture(&self.config)
    }

    /// Run `f` against the settings tree of the connected camera.
    pub fn with_settings<R>(
        &self,
        f: impl FnOnce(&mut SettingsWalker<'_, D>) -> Result<R, ConfigError>,
    ) -> Result<R, CameraError> {
        let mut inner = self.lock()?;
        inner.connect(&self.config)?;
        let inner = &mut *inner;
        let mut walker = SettingsWalker::new(&mut inner.driver, inner.device.as_mut());
        Ok(f(&mut walker)?)
    }
}

// =============================================================================
// Locked operations
// =============================================================================

impl<D: CameraDriver> SessionInner<D> {
    fn connect(&mut self, config: &SessionConfig) -> Result<(), CameraError> {
        if self.device.is_some() {
            return Ok(());
        }

        let mut device = self.driver.device_new().map_err(|e| {
            error!("[Camera] Unable to connect: {}", e);
            CameraError::Connection(e)
        })?;

        if let Err(e) = self.driver.device_init(&mut device) {
            error!("[Camera] Unable to connect: {}", e);
            self.driver.device_unref(device);
            return Err(CameraError::Connection(e));
        }

        self.device = Some(device);
        info!("[Camera] Camera connected");

        let mut walker = SettingsWalker::new(&mut self.driver, self.device.as_mut());
        match enable_capture_mode(&mut walker, config) {
            Ok(()) => debug!(
                "[Camera] {} set to {}",
                config.capture_mode_setting, config.capture_mode_value
            ),
            Err(e) => warn!(
                "[Camera] Capture mode not applied ({}): {}",
                config.capture_mode_setting, e
            ),
        }
        match select_capture_target(&mut walker, config) {
            Ok(Some(target)) => {
                debug!("[Camera] {} set to {}", config.capture_target_setting, target)
            }
            Ok(None) => debug!(
                "[Camera] {} has no choice {}, left unchanged",
                config.capture_target_setting, config.capture_target_index
            ),
            Err(e) => warn!(
                "[Camera] Capture target not applied ({}): {}",
                config.capture_target_setting, e
            ),
        }

        Ok(())
    }

    fn disconnect(&mut self) {
        let Some(mut device) = self.device.take() else {
            return;
        };
        if let Err(e) = self.driver.device_exit(&mut device) {
            warn!("[Camera] Camera exit failed: {}", e);
        }
        self.driver.device_unref(device);
        info!("[Camera] Disconnected");
    }

    fn preview(&mut self, config: &SessionConfig) -> Result<PreviewFrame, CameraError> {
        self.connect(config)?;
        self.liveview_enabled = true;

        debug!("[Camera] Preview");
        let (Some(device), Some(file)) = (self.device.as_mut(), self.preview_file.as_mut()) else {
            return Err(CameraError::PreviewUnavailable);
        };

        if let Err(e) = self.driver.capture_preview(device, file) {
            debug!("[Camera] Preview capture error: {}", e);
            return Err(CameraError::PreviewUnavailable);
        }

        let region = match self.driver.file_data_and_size(file) {
            Ok(region) if !region.addr.is_null() => region,
            Ok(_) => {
                error!("[Camera] Preview fetch error: null frame");
                return Err(CameraError::PreviewUnavailable);
            }
            Err(e) => {
                error!("[Camera] Preview fetch error: {}", e);
                return Err(CameraError::PreviewUnavailable);
            }
        };
        debug!("[Camera] Preview frame at {:p}, length {}", region.addr, region.len);

        // The region belongs to `file` and stays valid until the next driver
        // call on it, which cannot happen while this lock is held.
        match unsafe { extract_frame(region) } {
            Some(frame) => Ok(frame),
            None => {
                warn!("[Camera] Preview frame empty (length {})", region.len);
                Err(CameraError::PreviewUnavailable)
            }
        }
    }

    fn capture(&mut self, config: &SessionConfig) -> Result<CapturedImage, CameraError> {
        self.connect(config)?;
        let Some(device) = self.device.as_mut() else {
            return Err(CameraError::Connection(DriverError::new(GP_ERROR)));
        };

        let device_path = self.driver.capture(device, CaptureKind::Image).map_err(|e| {
            error!("[Camera] Unable to capture: {}", e);
            CameraError::Capture(e)
        })?;
        debug!("[Camera] Capture OK");
        info!("[Camera] name = \"{}\"", device_path.name());
        info!("[Camera] folder = \"{}\"", device_path.folder());

        let local_path = incoming_path(&config.incoming_dir, &device_path)?;
        debug!("[Camera] Download to {}", local_path.display());

        let local_file = open_incoming(&local_path).map_err(|e| {
            error!("[Camera] Unable to download: {}", e);
            e
        })?;
        // The driver takes the descriptor; this second handle is for fsync.
        let sync_handle = local_file.try_clone().map_err(|e| {
            error!("[Camera] Unable to download: {}", e);
            CameraError::Download(format!("Failed to open {}: {}", local_path.display(), e))
        })?;
        let mut camera_file = self.driver.file_new_from_fd(local_file).map_err(|e| {
            error!("[Camera] Unable to download: {}", e);
            CameraError::Download(e.to_string())
        })?;

        let fetched = self
            .driver
            .file_get(device, &device_path, FileType::Normal, &mut camera_file);
        self.driver.file_unref(camera_file);
        let downloaded = fetched
            .map_err(|e| e.to_string())
            .and_then(|()| sync_handle.sync_all().map_err(|e| e.to_string()));
        if let Err(e) = downloaded {
            error!("[Camera] Unable to download: {}", e);
            return Err(CameraError::Download(e));
        }
        debug!("[Camera] Download complete");

        let mut deleted_from_device = false;
        if config.delete_after_download {
            debug!("[Camera] Delete file on camera");
            match self.driver.file_delete(device, &device_path) {
                Ok(()) => {
                    debug!("[Camera] Deletion from camera completed");
                    deleted_from_device = true;
                }
                Err(e) => error!("[Camera] {}", CameraError::Delete(e)),
            }
        }

        info!("[Camera] Captured {}", local_path.display());
        Ok(CapturedImage {
            local_path,
            device_path,
            deleted_from_device,
        })
    }
}

impl<D: CameraDriver> Drop for SessionInner<D> {
    fn drop(&mut self) {
        self.disconnect();
        if let Some(file) = self.preview_file.take() {
            self.driver.file_unref(file);
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn enable_capture_mode<D: CameraDriver>(
    walker: &mut SettingsWalker<'_, D>,
    config: &SessionConfig,
) -> Result<(), ConfigError> {
    let mut root = walker.get_root()?;
    root.setting_mut(&config.capture_mode_setting)?
        .set_value(config.capture_mode_value)?;
    walker.commit(&mut root)
}

/// Select the configured capture target. `Ok(None)` when the index is past
/// the end of the choice list; nothing is changed in that case.
fn select_capture_target<D: CameraDriver>(
    walker: &mut SettingsWalker<'_, D>,
    config: &SessionConfig,
) -> Result<Option<String>, ConfigError> {
    let mut root = walker.get_root()?;
    let setting = root.setting_mut(&config.capture_target_setting)?;
    let target = match setting.choice_at(config.capture_target_index) {
        Ok(choice) => choice.to_string(),
        Err(ConfigError::IndexOutOfRange { .. }) => return Ok(None),
        Err(e) => return Err(e),
    };
    setting.set_value(target.as_str())?;
    walker.commit(&mut root)?;
    Ok(Some(target))
}

/// Local destination: the incoming directory plus the device filename only.
fn incoming_path(
    incoming_dir: &Path,
    device_path: &CameraFilePath,
) -> Result<PathBuf, CameraError> {
    match device_path.local_name() {
        Some(name) => Ok(incoming_dir.join(name)),
        None => {
            error!("[Camera] Refusing device filename \"{}\"", device_path.name());
            Err(CameraError::Download(format!(
                "invalid device filename \"{}\"",
                device_path.name()
            )))
        }
    }
}

fn open_incoming(path: &Path) -> Result<File, CameraError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| {
            CameraError::Download(format!("Failed to create {}: {}", dir.display(), e))
        })?;
    }
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| CameraError::Download(format!("Failed to open {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incoming_path_uses_filename_only() {
        let path = CameraFilePath::new("/store_00010001/DCIM/100CANON", "IMG_0042.CR2");
        assert_eq!(
            incoming_path(Path::new("/srv/incoming"), &path).unwrap(),
            PathBuf::from("/srv/incoming/IMG_0042.CR2")
        );
    }

    #[test]
    fn incoming_path_refuses_traversal() {
        let path = CameraFilePath::new("/", "../../etc/passwd");
        assert!(matches!(
            incoming_path(Path::new("/srv/incoming"), &path),
            Err(CameraError::Download(_))
        ));
    }

    #[test]
    fn open_incoming_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("IMG.JPG");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"a much longer stale file").unwrap();

        {
            use std::io::Write;
            let mut file = open_incoming(&path).unwrap();
            file.write_all(b"new").unwrap();
        }
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }
}
