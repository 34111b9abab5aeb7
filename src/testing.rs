//! In-memory camera driver
//!
//! `FakeDriver` stands in for libgphoto2 so sessions can be exercised without
//! hardware. Clones share one state, which tests inspect and script through
//! `FakeDriver::state`. Every driver call is logged, and calls that overlap
//! in time are counted in `FakeState::overlapping_calls`.

use crate::driver::{CameraDriver, CameraFilePath, CaptureKind, FileType, RawRegion};
use crate::errors::DriverError;
use crate::gphoto2_sys::{
    GP_ERROR_FILE_NOT_FOUND, GP_ERROR_IO, GP_ERROR_IO_USB_FIND, GP_ERROR_NOT_SUPPORTED,
};
use crate::settings::{Setting, SettingsNode, WidgetKind};
use std::fs::File;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    DeviceNew,
    DeviceInit,
    DeviceExit,
    DeviceUnref,
    Capture,
    CapturePreview,
    FileNew,
    FileNewFromFd,
    FileDataAndSize,
    FileGet(String),
    FileDelete(String),
    FileUnref,
    ConfigGetRoot,
    /// Names of the settings pushed to the device.
    ConfigSet(Vec<String>),
}

/// Scriptable camera. Failure fields hold the status code to return.
#[derive(Debug)]
pub struct FakeState {
    pub calls: Vec<DriverCall>,
    pub fail_new: Option<i32>,
    pub fail_init: Option<i32>,
    pub fail_exit: Option<i32>,
    pub fail_capture: Option<i32>,
    pub fail_preview: Option<i32>,
    pub fail_file_get: Option<i32>,
    pub fail_delete: Option<i32>,
    pub fail_config_get: Option<i32>,
    pub fail_config_set: Option<i32>,
    /// Report a null data pointer for preview files.
    pub null_preview: bool,
    /// Driver-owned preview buffer, handed out by address.
    pub preview_buffer: Vec<u8>,
    pub settings: SettingsNode,
    /// Path returned by the next capture; sequential names otherwise.
    pub next_capture: Option<CameraFilePath>,
    pub capture_folder: String,
    pub captures_taken: u32,
    /// Files currently stored on the device.
    pub device_files: Vec<CameraFilePath>,
    /// Content written by every download.
    pub image_bytes: Vec<u8>,
    pub capture_delay: Duration,
    pub open_devices: usize,
    pub open_files: usize,
    /// Local descriptors handed over by `file_new_from_fd` and not yet closed.
    pub open_local_fds: usize,
    pub overlapping_calls: usize,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            fail_new: None,
            fail_init: None,
            fail_exit: None,
            fail_capture: None,
            fail_preview: None,
            fail_file_get: None,
            fail_delete: None,
            fail_config_get: None,
            fail_config_set: None,
            null_preview: false,
            preview_buffer: vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xFF, 0xD9],
            settings: default_settings(),
            next_capture: None,
            capture_folder: "/store_00010001/DCIM/100CANON".to_string(),
            captures_taken: 0,
            device_files: Vec::new(),
            image_bytes: b"full resolution image".to_vec(),
            capture_delay: Duration::ZERO,
            open_devices: 0,
            open_files: 0,
            open_local_fds: 0,
            overlapping_calls: 0,
        }
    }
}

impl FakeState {
    pub fn count(&self, call: &DriverCall) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }

    pub fn count_matching(&self, pred: impl Fn(&DriverCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }
}

/// Settings tree of a typical DSLR: remote capture off, storing to RAM.
pub fn default_settings() -> SettingsNode {
    SettingsNode::container(
        "main",
        vec![
            SettingsNode::container(
                "settings",
                vec![
                    SettingsNode::Leaf(
                        Setting::new("capture", WidgetKind::Toggle)
                            .with_label("Capture")
                            .with_value(0),
                    ),
                    SettingsNode::Leaf(
                        Setting::new("capturetarget", WidgetKind::Radio)
                            .with_label("Capture Target")
                            .with_value("Internal RAM")
                            .with_choices(["Internal RAM", "Memory card"]),
                    ),
                ],
            ),
            SettingsNode::container(
                "status",
                vec![SettingsNode::Leaf(
                    Setting::new("serialnumber", WidgetKind::Text)
                        .with_label("Serial Number")
                        .with_value("083021004518")
                        .read_only(),
                )],
            ),
        ],
    )
}

#[derive(Debug)]
pub struct FakeDevice {
    pub id: u32,
}

#[derive(Debug)]
pub struct FakeFile {
    pub id: u32,
    sink: Option<LocalSink>,
}

/// A descriptor owned by the fake, closed on `file_unref` like
/// `gp_file_free` does for fd-backed files.
#[derive(Debug)]
struct LocalSink {
    #[cfg(unix)]
    fd: std::os::unix::io::RawFd,
    #[cfg(not(unix))]
    file: File,
}

#[cfg(unix)]
impl LocalSink {
    fn adopt(file: File) -> Self {
        use std::os::unix::io::IntoRawFd;
        Self {
            fd: file.into_raw_fd(),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        use std::os::unix::io::FromRawFd;
        // Borrow the descriptor without taking ownership back.
        let mut file = std::mem::ManuallyDrop::new(unsafe { File::from_raw_fd(self.fd) });
        file.write_all(bytes)
    }

    fn close(self) {
        use std::os::unix::io::FromRawFd;
        drop(unsafe { File::from_raw_fd(self.fd) });
    }
}

#[cfg(not(unix))]
impl LocalSink {
    fn adopt(file: File) -> Self {
        Self { file }
    }

    fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.file.write_all(bytes)
    }

    fn close(self) {
        drop(self.file);
    }
}

#[derive(Clone, Default)]
pub struct FakeDriver {
    state: Arc<Mutex<FakeState>>,
    busy: Arc<AtomicBool>,
}

/// Marks the driver busy for the duration of one call.
struct CallGuard<'a> {
    busy: &'a AtomicBool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

fn status(code: Option<i32>) -> Result<(), DriverError> {
    match code {
        Some(code) => Err(DriverError::new(code)),
        None => Ok(()),
    }
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: FakeState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Inspect or script the shared state.
    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Overwrite the preview buffer in place, as the next preview would.
    pub fn scribble_preview(&self, byte: u8) {
        self.state().preview_buffer.iter_mut().for_each(|b| *b = byte);
    }

    /// Log `call` and hold the busy flag until the guard drops.
    fn enter(&self, call: DriverCall) -> (CallGuard<'_>, MutexGuard<'_, FakeState>) {
        let overlapped = self.busy.swap(true, Ordering::SeqCst);
        let mut state = self.state();
        if overlapped {
            state.overlapping_calls += 1;
        }
        state.calls.push(call);
        (CallGuard { busy: &self.busy }, state)
    }

    fn next_id(state: &FakeState) -> u32 {
        state.calls.len() as u32
    }
}

impl CameraDriver for FakeDriver {
    type Device = FakeDevice;
    type File = FakeFile;

    fn device_new(&mut self) -> Result<FakeDevice, DriverError> {
        let (_busy, mut state) = self.enter(DriverCall::DeviceNew);
        status(state.fail_new)?;
        state.open_devices += 1;
        Ok(FakeDevice {
            id: Self::next_id(&state),
        })
    }

    fn device_init(&mut self, _device: &mut FakeDevice) -> Result<(), DriverError> {
        let (_busy, state) = self.enter(DriverCall::DeviceInit);
        status(state.fail_init)
    }

    fn device_exit(&mut self, _device: &mut FakeDevice) -> Result<(), DriverError> {
        let (_busy, state) = self.enter(DriverCall::DeviceExit);
        status(state.fail_exit)
    }

    fn device_unref(&mut self, _device: FakeDevice) {
        let (_busy, mut state) = self.enter(DriverCall::DeviceUnref);
        state.open_devices -= 1;
    }

    fn capture(
        &mut self,
        _device: &mut FakeDevice,
        kind: CaptureKind,
    ) -> Result<CameraFilePath, DriverError> {
        let (_busy, mut state) = self.enter(DriverCall::Capture);
        status(state.fail_capture)?;
        if kind != CaptureKind::Image {
            return Err(DriverError::new(GP_ERROR_NOT_SUPPORTED));
        }

        let delay = state.capture_delay;
        if !delay.is_zero() {
            // Still busy, but the state is unlocked so tests can look in.
            drop(state);
            std::thread::sleep(delay);
            state = self.state();
        }

        state.captures_taken += 1;
        let path = match state.next_capture.take() {
            Some(path) => path,
            None => CameraFilePath::new(
                state.capture_folder.clone(),
                format!("IMG_{:04}.JPG", state.captures_taken),
            ),
        };
        state.device_files.push(path.clone());
        Ok(path)
    }

    fn capture_preview(
        &mut self,
        _device: &mut FakeDevice,
        _file: &mut FakeFile,
    ) -> Result<(), DriverError> {
        let (_busy, state) = self.enter(DriverCall::CapturePreview);
        status(state.fail_preview)
    }

    fn file_new(&mut self) -> Result<FakeFile, DriverError> {
        let (_busy, mut state) = self.enter(DriverCall::FileNew);
        state.open_files += 1;
        Ok(FakeFile {
            id: Self::next_id(&state),
            sink: None,
        })
    }

    fn file_new_from_fd(&mut self, local: File) -> Result<FakeFile, DriverError> {
        let (_busy, mut state) = self.enter(DriverCall::FileNewFromFd);
        state.open_files += 1;
        state.open_local_fds += 1;
        Ok(FakeFile {
            id: Self::next_id(&state),
            sink: Some(LocalSink::adopt(local)),
        })
    }

    fn file_data_and_size(&mut self, _file: &FakeFile) -> Result<RawRegion, DriverError> {
        let (_busy, state) = self.enter(DriverCall::FileDataAndSize);
        if state.null_preview {
            return Ok(RawRegion::null());
        }
        // The Vec's heap buffer outlives the guard; only its contents change.
        Ok(RawRegion {
            addr: state.preview_buffer.as_ptr(),
            len: state.preview_buffer.len() as u64,
        })
    }

    fn file_get(
        &mut self,
        _device: &mut FakeDevice,
        path: &CameraFilePath,
        _file_type: FileType,
        file: &mut FakeFile,
    ) -> Result<(), DriverError> {
        let (_busy, state) = self.enter(DriverCall::FileGet(path.name().to_string()));
        status(state.fail_file_get)?;
        if !state.device_files.contains(path) {
            return Err(DriverError::new(GP_ERROR_FILE_NOT_FOUND));
        }
        let sink = file.sink.as_mut().ok_or(DriverError::new(GP_ERROR_IO))?;
        sink.write_all(&state.image_bytes)
            .map_err(|_| DriverError::new(GP_ERROR_IO))
    }

    fn file_delete(
        &mut self,
        _device: &mut FakeDevice,
        path: &CameraFilePath,
    ) -> Result<(), DriverError> {
        let (_busy, mut state) = self.enter(DriverCall::FileDelete(path.name().to_string()));
        status(state.fail_delete)?;
        let before = state.device_files.len();
        state.device_files.retain(|f| f != path);
        if state.device_files.len() == before {
            return Err(DriverError::new(GP_ERROR_FILE_NOT_FOUND));
        }
        Ok(())
    }

    fn file_unref(&mut self, file: FakeFile) {
        let (_busy, mut state) = self.enter(DriverCall::FileUnref);
        state.open_files -= 1;
        if let Some(sink) = file.sink {
            sink.close();
            state.open_local_fds -= 1;
        }
    }

    fn config_get_root(&mut self, _device: &mut FakeDevice) -> Result<SettingsNode, DriverError> {
        let (_busy, state) = self.enter(DriverCall::ConfigGetRoot);
        status(state.fail_config_get)?;
        Ok(state.settings.clone())
    }

    fn config_set(
        &mut self,
        _device: &mut FakeDevice,
        root: &SettingsNode,
    ) -> Result<(), DriverError> {
        let names = root.changed().iter().map(|s| s.name.clone()).collect();
        let (_busy, mut state) = self.enter(DriverCall::ConfigSet(names));
        status(state.fail_config_set)?;
        let mut applied = root.clone();
        applied.clear_changed();
        state.settings = applied;
        Ok(())
    }
}

/// Driver whose camera is never found.
pub fn unplugged() -> FakeDriver {
    FakeDriver::with_state(FakeState {
        fail_init: Some(GP_ERROR_IO_USB_FIND),
        ..FakeState::default()
    })
}
