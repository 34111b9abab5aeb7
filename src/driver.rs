//! Camera driver boundary
//!
//! `CameraDriver` lists the primitive operations the session needs from the
//! camera library. Each call is treated as atomic; status codes are turned
//! into `DriverError` here and nowhere else.
//!
//! `Gphoto2Driver` implements the trait over the dynamically loaded
//! libgphoto2 bindings.

use crate::errors::DriverError;
use crate::gphoto2_sys::{self as sys, cstr_to_string, string_to_cstr};
use crate::settings::SettingsNode;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

/// Longest device filename, terminator excluded.
pub const MAX_NAME_LEN: usize = sys::GP_NAME_LEN - 1;
/// Longest device folder, terminator excluded.
pub const MAX_FOLDER_LEN: usize = sys::GP_FOLDER_LEN - 1;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureKind {
    Image,
    Movie,
    Sound,
}

impl CaptureKind {
    pub fn raw(self) -> sys::CameraCaptureType {
        match self {
            CaptureKind::Image => sys::GP_CAPTURE_IMAGE,
            CaptureKind::Movie => sys::GP_CAPTURE_MOVIE,
            CaptureKind::Sound => sys::GP_CAPTURE_SOUND,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Preview,
    Normal,
    Raw,
    Audio,
    Exif,
    Metadata,
}

impl FileType {
    pub fn raw(self) -> sys::CameraFileType {
        match self {
            FileType::Preview => sys::GP_FILE_TYPE_PREVIEW,
            FileType::Normal => sys::GP_FILE_TYPE_NORMAL,
            FileType::Raw => sys::GP_FILE_TYPE_RAW,
            FileType::Audio => sys::GP_FILE_TYPE_AUDIO,
            FileType::Exif => sys::GP_FILE_TYPE_EXIF,
            FileType::Metadata => sys::GP_FILE_TYPE_METADATA,
        }
    }
}

/// Location of a file on the device, as reported after a capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraFilePath {
    folder: String,
    name: String,
}

impl CameraFilePath {
    pub fn new(folder: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            name: name.into(),
        }
    }

    /// Decode the fixed-size FFI form. Never reads past either buffer.
    pub fn from_raw(raw: &sys::CameraFilePath) -> Self {
        Self {
            folder: cstr_to_string(&raw.folder),
            name: cstr_to_string(&raw.name),
        }
    }

    /// Encode into the fixed-size FFI form, `None` if either part is too long.
    pub fn to_raw(&self) -> Option<sys::CameraFilePath> {
        let mut raw = sys::CameraFilePath::default();
        if string_to_cstr(&self.name, &mut raw.name)
            && string_to_cstr(&self.folder, &mut raw.folder)
        {
            Some(raw)
        } else {
            None
        }
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The filename, if it is safe to use as a single local path component.
    pub fn local_name(&self) -> Option<&str> {
        let file_name = Path::new(&self.name).file_name()?.to_str()?;
        if file_name == self.name {
            Some(file_name)
        } else {
            None
        }
    }
}

/// A driver-owned memory region: start address and byte length.
///
/// Only valid until the next call on the file handle that produced it.
#[derive(Debug, Clone, Copy)]
pub struct RawRegion {
    pub addr: *const u8,
    pub len: u64,
}

impl RawRegion {
    pub fn null() -> Self {
        Self {
            addr: std::ptr::null(),
            len: 0,
        }
    }
}

// =============================================================================
// Driver Trait
// =============================================================================

/// Primitive camera operations, one method per library call.
///
/// The driver owns its library context for its whole lifetime.
pub trait CameraDriver: Send {
    type Device: Send;
    type File: Send;

    fn device_new(&mut self) -> Result<Self::Device, DriverError>;
    fn device_init(&mut self, device: &mut Self::Device) -> Result<(), DriverError>;
    fn device_exit(&mut self, device: &mut Self::Device) -> Result<(), DriverError>;
    fn device_unref(&mut self, device: Self::Device);

    fn capture(
        &mut self,
        device: &mut Self::Device,
        kind: CaptureKind,
    ) -> Result<CameraFilePath, DriverError>;
    fn capture_preview(
        &mut self,
        device: &mut Self::Device,
        file: &mut Self::File,
    ) -> Result<(), DriverError>;

    fn file_new(&mut self) -> Result<Self::File, DriverError>;
    /// Wrap an open local file. The returned handle owns the descriptor and
    /// closes it in `file_unref`; on error `local` is closed here.
    fn file_new_from_fd(&mut self, local: File) -> Result<Self::File, DriverError>;
    fn file_data_and_size(&mut self, file: &Self::File) -> Result<RawRegion, DriverError>;
    fn file_get(
        &mut self,
        device: &mut Self::Device,
        path: &CameraFilePath,
        file_type: FileType,
        file: &mut Self::File,
    ) -> Result<(), DriverError>;
    fn file_delete(
        &mut self,
        device: &mut Self::Device,
        path: &CameraFilePath,
    ) -> Result<(), DriverError>;
    fn file_unref(&mut self, file: Self::File);

    /// Snapshot of the full settings tree.
    fn config_get_root(&mut self, device: &mut Self::Device) -> Result<SettingsNode, DriverError>;
    /// Push every staged leaf of `root` to the device in one call.
    fn config_set(
        &mut self,
        device: &mut Self::Device,
        root: &SettingsNode,
    ) -> Result<(), DriverError>;
}

/// Translate a library status into a `Result`.
pub fn check_status(code: i32) -> Result<(), DriverError> {
    if code >= sys::GP_OK {
        Ok(())
    } else {
        Err(DriverError::new(code))
    }
}

#[cfg(unix)]
pub use native::{Gphoto2Driver, NativeDevice, NativeFile};

// =============================================================================
// libgphoto2 Implementation
// =============================================================================

#[cfg(unix)]
mod native {
    use super::*;
    use crate::errors::CameraError;
    use crate::gphoto2_sys::{load_gphoto2, ptr_to_string, Gphoto2Api};
    use crate::settings::{Setting, SettingValue, WidgetKind};
    use log::{debug, info, warn};
    use std::ffi::CString;
    use std::os::raw::{c_char, c_float, c_int, c_ulong, c_void};
    use std::os::unix::io::{AsRawFd, IntoRawFd};
    use std::ptr;

    pub struct NativeDevice(*mut sys::Camera);
    pub struct NativeFile(*mut sys::CameraFile);

    // Handles are only touched while the owning session's lock is held.
    unsafe impl Send for NativeDevice {}
    unsafe impl Send for NativeFile {}

    pub struct Gphoto2Driver {
        api: &'static Gphoto2Api,
        context: *mut sys::GPContext,
    }

    unsafe impl Send for Gphoto2Driver {}

    impl Gphoto2Driver {
        /// Load libgphoto2 and create a library context.
        pub fn load(library_path: Option<&Path>) -> Result<Self, CameraError> {
            let api = load_gphoto2(library_path).map_err(CameraError::Library)?;
            let context = unsafe { (api.gp_context_new)() };
            if context.is_null() {
                return Err(CameraError::Initialization(DriverError::new(
                    sys::GP_ERROR_NO_MEMORY,
                )));
            }
            info!("[gphoto2] Library loaded, context created");
            Ok(Self { api, context })
        }
    }

    impl Drop for Gphoto2Driver {
        fn drop(&mut self) {
            unsafe { (self.api.gp_context_unref)(self.context) };
        }
    }

    fn c_string(value: &str) -> Result<CString, DriverError> {
        CString::new(value).map_err(|_| DriverError::new(sys::GP_ERROR_BAD_PARAMETERS))
    }

    /// Owns a native widget tree and frees it on drop.
    struct WidgetTree<'a> {
        api: &'a Gphoto2Api,
        root: *mut sys::CameraWidget,
    }

    impl Drop for WidgetTree<'_> {
        fn drop(&mut self) {
            if !self.root.is_null() {
                unsafe { (self.api.gp_widget_free)(self.root) };
            }
        }
    }

    impl Gphoto2Driver {
        fn native_tree(
            &self,
            device: &mut NativeDevice,
        ) -> Result<WidgetTree<'static>, DriverError> {
            let mut root: *mut sys::CameraWidget = ptr::null_mut();
            let code =
                unsafe { (self.api.gp_camera_get_config)(device.0, &mut root, self.context) };
            let tree = WidgetTree { api: self.api, root };
            check_status(code)?;
            if tree.root.is_null() {
                return Err(DriverError::new(sys::GP_ERROR));
            }
            Ok(tree)
        }

        unsafe fn read_widget(
            &self,
            widget: *mut sys::CameraWidget,
        ) -> Result<SettingsNode, DriverError> {
            let api = self.api;

            let mut name_ptr: *const c_char = ptr::null();
            check_status((api.gp_widget_get_name)(widget, &mut name_ptr))?;
            let name = ptr_to_string(name_ptr).unwrap_or_default();

            let mut label_ptr: *const c_char = ptr::null();
            let label = if (api.gp_widget_get_label)(widget, &mut label_ptr) == sys::GP_OK {
                ptr_to_string(label_ptr).unwrap_or_default()
            } else {
                String::new()
            };

            let mut widget_type: sys::CameraWidgetType = 0;
            check_status((api.gp_widget_get_type)(widget, &mut widget_type))?;

            let kind = match widget_type {
                sys::GP_WIDGET_WINDOW | sys::GP_WIDGET_SECTION => {
                    let count = (api.gp_widget_count_children)(widget);
                    check_status(count)?;
                    let mut children = Vec::with_capacity(count as usize);
                    for i in 0..count {
                        let mut child: *mut sys::CameraWidget = ptr::null_mut();
                        check_status((api.gp_widget_get_child)(widget, i, &mut child))?;
                        if !child.is_null() {
                            children.push(self.read_widget(child)?);
                        }
                    }
                    return Ok(SettingsNode::Container {
                        name,
                        label,
                        children,
                    });
                }
                sys::GP_WIDGET_TEXT => WidgetKind::Text,
                sys::GP_WIDGET_RANGE => WidgetKind::Range,
                sys::GP_WIDGET_TOGGLE => WidgetKind::Toggle,
                sys::GP_WIDGET_RADIO => WidgetKind::Radio,
                sys::GP_WIDGET_MENU => WidgetKind::Menu,
                sys::GP_WIDGET_BUTTON => WidgetKind::Button,
                sys::GP_WIDGET_DATE => WidgetKind::Date,
                other => {
                    warn!("[gphoto2] Unknown widget type {} for '{}'", other, name);
                    WidgetKind::Button
                }
            };

            let mut readonly: c_int = 0;
            let _ = (api.gp_widget_get_readonly)(widget, &mut readonly);

            let value = match kind {
                WidgetKind::Text | WidgetKind::Radio | WidgetKind::Menu => {
                    let mut text: *const c_char = ptr::null();
                    let out = &mut text as *mut *const c_char as *mut c_void;
                    check_status((api.gp_widget_get_value)(widget, out))?;
                    ptr_to_string(text).map(SettingValue::Text)
                }
                WidgetKind::Range => {
                    let mut number: c_float = 0.0;
                    let out = &mut number as *mut c_float as *mut c_void;
                    check_status((api.gp_widget_get_value)(widget, out))?;
                    Some(SettingValue::Float(number))
                }
                WidgetKind::Toggle | WidgetKind::Date => {
                    let mut number: c_int = 0;
                    let out = &mut number as *mut c_int as *mut c_void;
                    check_status((api.gp_widget_get_value)(widget, out))?;
                    Some(SettingValue::Int(number))
                }
                WidgetKind::Button => None,
            };

            let mut setting = Setting::new(name, kind).with_label(label);
            if let Some(value) = value {
                setting = setting.with_value(value);
            }
            if readonly != 0 {
                setting = setting.read_only();
            }

            if matches!(kind, WidgetKind::Radio | WidgetKind::Menu) {
                let count = (api.gp_widget_count_choices)(widget);
                check_status(count)?;
                let mut choices = Vec::with_capacity(count as usize);
                for i in 0..count {
                    let mut choice: *const c_char = ptr::null();
                    check_status((api.gp_widget_get_choice)(widget, i, &mut choice))?;
                    choices.push(ptr_to_string(choice).unwrap_or_default());
                }
                setting = setting.with_choices(choices);
            }

            Ok(SettingsNode::Leaf(setting))
        }

        unsafe fn write_widget(
            &self,
            widget: *mut sys::CameraWidget,
            value: &SettingValue,
        ) -> Result<(), DriverError> {
            let set_value = self.api.gp_widget_set_value;
            let code = match value {
                SettingValue::Text(text) => {
                    let text = c_string(text)?;
                    set_value(widget, text.as_ptr() as *const c_void)
                }
                SettingValue::Float(number) => {
                    let number: c_float = *number;
                    set_value(widget, &number as *const _ as *const c_void)
                }
                SettingValue::Int(number) => {
                    let number: c_int = *number;
                    set_value(widget, &number as *const _ as *const c_void)
                }
            };
            check_status(code)
        }
    }

    impl CameraDriver for Gphoto2Driver {
        type Device = NativeDevice;
        type File = NativeFile;

        fn device_new(&mut self) -> Result<NativeDevice, DriverError> {
            let mut camera: *mut sys::Camera = ptr::null_mut();
            check_status(unsafe { (self.api.gp_camera_new)(&mut camera) })?;
            if camera.is_null() {
                return Err(DriverError::new(sys::GP_ERROR_NO_MEMORY));
            }
            Ok(NativeDevice(camera))
        }

        fn device_init(&mut self, device: &mut NativeDevice) -> Result<(), DriverError> {
            check_status(unsafe { (self.api.gp_camera_init)(device.0, self.context) })
        }

        fn device_exit(&mut self, device: &mut NativeDevice) -> Result<(), DriverError> {
            check_status(unsafe { (self.api.gp_camera_exit)(device.0, self.context) })
        }

        fn device_unref(&mut self, device: NativeDevice) {
            unsafe { (self.api.gp_camera_unref)(device.0) };
        }

        fn capture(
            &mut self,
            device: &mut NativeDevice,
            kind: CaptureKind,
        ) -> Result<CameraFilePath, DriverError> {
            let mut raw = sys::CameraFilePath::default();
            check_status(unsafe {
                (self.api.gp_camera_capture)(device.0, kind.raw(), &mut raw, self.context)
            })?;
            Ok(CameraFilePath::from_raw(&raw))
        }

        fn capture_preview(
            &mut self,
            device: &mut NativeDevice,
            file: &mut NativeFile,
        ) -> Result<(), DriverError> {
            check_status(unsafe {
                (self.api.gp_camera_capture_preview)(device.0, file.0, self.context)
            })
        }

        fn file_new(&mut self) -> Result<NativeFile, DriverError> {
            let mut file: *mut sys::CameraFile = ptr::null_mut();
            check_status(unsafe { (self.api.gp_file_new)(&mut file) })?;
            Ok(NativeFile(file))
        }

        fn file_new_from_fd(&mut self, local: File) -> Result<NativeFile, DriverError> {
            let mut file: *mut sys::CameraFile = ptr::null_mut();
            check_status(unsafe { (self.api.gp_file_new_from_fd)(&mut file, local.as_raw_fd()) })?;
            // gp_file_free closes the descriptor from here on.
            let _ = local.into_raw_fd();
            Ok(NativeFile(file))
        }

        fn file_data_and_size(&mut self, file: &NativeFile) -> Result<RawRegion, DriverError> {
            let mut data: *const c_char = ptr::null();
            let mut size: c_ulong = 0;
            check_status(unsafe {
                (self.api.gp_file_get_data_and_size)(file.0, &mut data, &mut size)
            })?;
            Ok(RawRegion {
                addr: data as *const u8,
                len: size as u64,
            })
        }

        fn file_get(
            &mut self,
            device: &mut NativeDevice,
            path: &CameraFilePath,
            file_type: FileType,
            file: &mut NativeFile,
        ) -> Result<(), DriverError> {
            let folder = c_string(path.folder())?;
            let name = c_string(path.name())?;
            check_status(unsafe {
                (self.api.gp_camera_file_get)(
                    device.0,
                    folder.as_ptr(),
                    name.as_ptr(),
                    file_type.raw(),
                    file.0,
                    self.context,
                )
            })
        }

        fn file_delete(
            &mut self,
            device: &mut NativeDevice,
            path: &CameraFilePath,
        ) -> Result<(), DriverError> {
            let folder = c_string(path.folder())?;
            let name = c_string(path.name())?;
            check_status(unsafe {
                (self.api.gp_camera_file_delete)(
                    device.0,
                    folder.as_ptr(),
                    name.as_ptr(),
                    self.context,
                )
            })
        }

        fn file_unref(&mut self, file: NativeFile) {
            if !file.0.is_null() {
                unsafe { (self.api.gp_file_unref)(file.0) };
            }
        }

        fn config_get_root(
            &mut self,
            device: &mut NativeDevice,
        ) -> Result<SettingsNode, DriverError> {
            let tree = self.native_tree(device)?;
            unsafe { self.read_widget(tree.root) }
        }

        fn config_set(
            &mut self,
            device: &mut NativeDevice,
            root: &SettingsNode,
        ) -> Result<(), DriverError> {
            let tree = self.native_tree(device)?;
            for setting in root.changed() {
                let Some(value) = setting.value() else {
                    continue;
                };
                let name = c_string(&setting.name)?;
                let mut widget: *mut sys::CameraWidget = ptr::null_mut();
                check_status(unsafe {
                    (self.api.gp_widget_get_child_by_name)(tree.root, name.as_ptr(), &mut widget)
                })?;
                unsafe { self.write_widget(widget, value)? };
                debug!("[gphoto2] Staged {} = {}", setting.name, value);
            }
            check_status(unsafe {
                (self.api.gp_camera_set_config)(device.0, tree.root, self.context)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_name_round_trips_through_raw_form() {
        let name = format!("{}.JPG", "A".repeat(MAX_NAME_LEN - 4));
        assert_eq!(name.len(), MAX_NAME_LEN);
        let path = CameraFilePath::new("/store_00010001/DCIM/100CANON", name.clone());

        let raw = path.to_raw().expect("fits");
        let decoded = CameraFilePath::from_raw(&raw);
        assert_eq!(decoded.name(), name);
        assert_eq!(decoded, path);
    }

    #[test]
    fn oversized_parts_do_not_encode() {
        let long_name = CameraFilePath::new("/", "B".repeat(MAX_NAME_LEN + 1));
        assert!(long_name.to_raw().is_none());

        let long_folder = CameraFilePath::new("/".repeat(MAX_FOLDER_LEN + 1), "x.jpg");
        assert!(long_folder.to_raw().is_none());
    }

    #[test]
    fn local_name_rejects_path_components() {
        assert_eq!(CameraFilePath::new("/a", "IMG_0001.JPG").local_name(), Some("IMG_0001.JPG"));
        assert_eq!(CameraFilePath::new("/a", "../evil.jpg").local_name(), None);
        assert_eq!(CameraFilePath::new("/a", "sub/IMG.JPG").local_name(), None);
        assert_eq!(CameraFilePath::new("/a", "..").local_name(), None);
        assert_eq!(CameraFilePath::new("/a", "").local_name(), None);
    }

    #[test]
    fn check_status_accepts_non_negative_codes() {
        assert!(check_status(0).is_ok());
        assert!(check_status(3).is_ok());
        assert_eq!(check_status(-7), Err(DriverError::new(-7)));
    }

    #[test]
    fn enum_codes_match_library_headers() {
        assert_eq!(CaptureKind::Image.raw(), 0);
        assert_eq!(FileType::Normal.raw(), 1);
        assert_eq!(FileType::Preview.raw(), 0);
    }
}
