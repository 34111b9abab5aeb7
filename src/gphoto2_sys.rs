//! libgphoto2 Raw FFI Bindings
//!
//! Low-level unsafe bindings to the libgphoto2 C API.
//! Loads libgphoto2 at runtime via `libloading` and caches the resolved
//! entry points for the lifetime of the process.

#![allow(non_camel_case_types)]
#![allow(dead_code)]

use libloading::Library;
use std::os::raw::{c_char, c_int, c_ulong, c_void};
use std::path::Path;
use std::sync::OnceLock;

// =============================================================================
// Reference Types (Opaque Handles)
// =============================================================================

#[repr(C)]
pub struct GPContext {
    _private: [u8; 0],
}

#[repr(C)]
pub struct Camera {
    _private: [u8; 0],
}

#[repr(C)]
pub struct CameraFile {
    _private: [u8; 0],
}

#[repr(C)]
pub struct CameraWidget {
    _private: [u8; 0],
}

// =============================================================================
// Constants - Result Codes (gphoto2-result.h, gphoto2-port-result.h)
// =============================================================================

pub const GP_OK: c_int = 0;
pub const GP_ERROR: c_int = -1;
pub const GP_ERROR_BAD_PARAMETERS: c_int = -2;
pub const GP_ERROR_NO_MEMORY: c_int = -3;
pub const GP_ERROR_LIBRARY: c_int = -4;
pub const GP_ERROR_UNKNOWN_PORT: c_int = -5;
pub const GP_ERROR_NOT_SUPPORTED: c_int = -6;
pub const GP_ERROR_IO: c_int = -7;
pub const GP_ERROR_FIXED_LIMIT_EXCEEDED: c_int = -8;
pub const GP_ERROR_TIMEOUT: c_int = -10;
pub const GP_ERROR_IO_SUPPORTED_SERIAL: c_int = -20;
pub const GP_ERROR_IO_SUPPORTED_USB: c_int = -21;
pub const GP_ERROR_IO_INIT: c_int = -31;
pub const GP_ERROR_IO_READ: c_int = -34;
pub const GP_ERROR_IO_WRITE: c_int = -35;
pub const GP_ERROR_IO_UPDATE: c_int = -37;
pub const GP_ERROR_IO_SERIAL_SPEED: c_int = -41;
pub const GP_ERROR_IO_USB_CLEAR_HALT: c_int = -51;
pub const GP_ERROR_IO_USB_FIND: c_int = -52;
pub const GP_ERROR_IO_USB_CLAIM: c_int = -53;
pub const GP_ERROR_IO_LOCK: c_int = -60;
pub const GP_ERROR_CORRUPTED_DATA: c_int = -102;
pub const GP_ERROR_FILE_EXISTS: c_int = -103;
pub const GP_ERROR_MODEL_NOT_FOUND: c_int = -105;
pub const GP_ERROR_DIRECTORY_NOT_FOUND: c_int = -107;
pub const GP_ERROR_FILE_NOT_FOUND: c_int = -108;
pub const GP_ERROR_CAMERA_BUSY: c_int = -110;
pub const GP_ERROR_PATH_NOT_ABSOLUTE: c_int = -111;
pub const GP_ERROR_CANCEL: c_int = -112;
pub const GP_ERROR_CAMERA_ERROR: c_int = -113;
pub const GP_ERROR_OS_FAILURE: c_int = -114;
pub const GP_ERROR_NO_SPACE: c_int = -115;

// =============================================================================
// Constants - Enums (gphoto2-camera.h, gphoto2-file.h, gphoto2-widget.h)
// =============================================================================

pub type CameraCaptureType = c_int;
pub const GP_CAPTURE_IMAGE: CameraCaptureType = 0;
pub const GP_CAPTURE_MOVIE: CameraCaptureType = 1;
pub const GP_CAPTURE_SOUND: CameraCaptureType = 2;

pub type CameraFileType = c_int;
pub const GP_FILE_TYPE_PREVIEW: CameraFileType = 0;
pub const GP_FILE_TYPE_NORMAL: CameraFileType = 1;
pub const GP_FILE_TYPE_RAW: CameraFileType = 2;
pub const GP_FILE_TYPE_AUDIO: CameraFileType = 3;
pub const GP_FILE_TYPE_EXIF: CameraFileType = 4;
pub const GP_FILE_TYPE_METADATA: CameraFileType = 5;

pub type CameraWidgetType = c_int;
pub const GP_WIDGET_WINDOW: CameraWidgetType = 0;
pub const GP_WIDGET_SECTION: CameraWidgetType = 1;
pub const GP_WIDGET_TEXT: CameraWidgetType = 2;
pub const GP_WIDGET_RANGE: CameraWidgetType = 3;
pub const GP_WIDGET_TOGGLE: CameraWidgetType = 4;
pub const GP_WIDGET_RADIO: CameraWidgetType = 5;
pub const GP_WIDGET_MENU: CameraWidgetType = 6;
pub const GP_WIDGET_BUTTON: CameraWidgetType = 7;
pub const GP_WIDGET_DATE: CameraWidgetType = 8;

// =============================================================================
// Structures
// =============================================================================

/// Size of `CameraFilePath::name`, terminator included.
pub const GP_NAME_LEN: usize = 128;
/// Size of `CameraFilePath::folder`, terminator included.
pub const GP_FOLDER_LEN: usize = 1024;

#[repr(C)]
#[derive(Clone)]
pub struct CameraFilePath {
    pub name: [c_char; GP_NAME_LEN],
    pub folder: [c_char; GP_FOLDER_LEN],
}

impl Default for CameraFilePath {
    fn default() -> Self {
        Self {
            name: [0; GP_NAME_LEN],
            folder: [0; GP_FOLDER_LEN],
        }
    }
}

// =============================================================================
// Function Table - Dynamic Loading
// =============================================================================

macro_rules! gphoto2_api {
    ($($field:ident: fn($($arg:ty),* $(,)?) -> $ret:ty;)*) => {
        /// Entry points resolved from the loaded libgphoto2.
        ///
        /// The function pointers stay valid for as long as `_library` is
        /// alive, which is the lifetime of the process once cached.
        pub struct Gphoto2Api {
            _library: Library,
            $(pub $field: unsafe extern "C" fn($($arg),*) -> $ret,)*
        }

        impl Gphoto2Api {
            unsafe fn open(path: &Path) -> Result<Self, String> {
                let library = Library::new(path)
                    .map_err(|e| format!("Failed to load '{}': {}", path.display(), e))?;
                $(
                    let $field = *library
                        .get::<unsafe extern "C" fn($($arg),*) -> $ret>(
                            concat!(stringify!($field), "\0").as_bytes(),
                        )
                        .map_err(|e| format!("Symbol error: {}", e))?;
                )*
                Ok(Self { _library: library, $($field,)* })
            }
        }
    };
}

gphoto2_api! {
    // Context
    gp_context_new: fn() -> *mut GPContext;
    gp_context_unref: fn(*mut GPContext) -> ();

    // Camera lifecycle
    gp_camera_new: fn(*mut *mut Camera) -> c_int;
    gp_camera_init: fn(*mut Camera, *mut GPContext) -> c_int;
    gp_camera_exit: fn(*mut Camera, *mut GPContext) -> c_int;
    gp_camera_unref: fn(*mut Camera) -> c_int;

    // Capture
    gp_camera_capture: fn(
        *mut Camera,
        CameraCaptureType,
        *mut CameraFilePath,
        *mut GPContext,
    ) -> c_int;
    gp_camera_capture_preview: fn(*mut Camera, *mut CameraFile, *mut GPContext) -> c_int;

    // Files
    gp_file_new: fn(*mut *mut CameraFile) -> c_int;
    gp_file_new_from_fd: fn(*mut *mut CameraFile, c_int) -> c_int;
    gp_file_unref: fn(*mut CameraFile) -> c_int;
    gp_file_get_data_and_size: fn(*mut CameraFile, *mut *const c_char, *mut c_ulong) -> c_int;
    gp_camera_file_get: fn(
        *mut Camera,
        *const c_char,
        *const c_char,
        CameraFileType,
        *mut CameraFile,
        *mut GPContext,
    ) -> c_int;
    gp_camera_file_delete: fn(*mut Camera, *const c_char, *const c_char, *mut GPContext) -> c_int;

    // Configuration
    gp_camera_get_config: fn(*mut Camera, *mut *mut CameraWidget, *mut GPContext) -> c_int;
    gp_camera_set_config: fn(*mut Camera, *mut CameraWidget, *mut GPContext) -> c_int;
    gp_widget_free: fn(*mut CameraWidget) -> c_int;
    gp_widget_get_name: fn(*mut CameraWidget, *mut *const c_char) -> c_int;
    gp_widget_get_label: fn(*mut CameraWidget, *mut *const c_char) -> c_int;
    gp_widget_get_type: fn(*mut CameraWidget, *mut CameraWidgetType) -> c_int;
    gp_widget_get_readonly: fn(*mut CameraWidget, *mut c_int) -> c_int;
    gp_widget_count_children: fn(*mut CameraWidget) -> c_int;
    gp_widget_get_child: fn(*mut CameraWidget, c_int, *mut *mut CameraWidget) -> c_int;
    gp_widget_get_child_by_name: fn(
        *mut CameraWidget,
        *const c_char,
        *mut *mut CameraWidget,
    ) -> c_int;
    gp_widget_get_value: fn(*mut CameraWidget, *mut c_void) -> c_int;
    gp_widget_set_value: fn(*mut CameraWidget, *const c_void) -> c_int;
    gp_widget_count_choices: fn(*mut CameraWidget) -> c_int;
    gp_widget_get_choice: fn(*mut CameraWidget, c_int, *mut *const c_char) -> c_int;
}

static GPHOTO2: OnceLock<Gphoto2Api> = OnceLock::new();

/// Library names tried when no explicit path is configured.
pub const DEFAULT_LIBRARY_NAMES: &[&str] = &[
    "libgphoto2.so.6",
    "libgphoto2.so",
    "libgphoto2.6.dylib",
    "libgphoto2.dylib",
];

/// Load libgphoto2, trying `preferred` first and then the default names.
///
/// The first successful load is cached; later calls return the cached table
/// regardless of the path they ask for.
pub fn load_gphoto2(preferred: Option<&Path>) -> Result<&'static Gphoto2Api, String> {
    if let Some(api) = GPHOTO2.get() {
        return Ok(api);
    }

    let mut candidates: Vec<&Path> = Vec::new();
    if let Some(path) = preferred {
        candidates.push(path);
    }
    candidates.extend(DEFAULT_LIBRARY_NAMES.iter().map(Path::new));

    let mut failures = Vec::new();
    for candidate in candidates {
        match unsafe { Gphoto2Api::open(candidate) } {
            Ok(api) => return Ok(GPHOTO2.get_or_init(|| api)),
            Err(e) => failures.push(e),
        }
    }

    Err(failures.join("; "))
}

/// Helper function to convert a result code to a string
pub fn error_to_string(code: c_int) -> &'static str {
    match code {
        GP_OK => "No error",
        GP_ERROR => "Unspecified error",
        GP_ERROR_BAD_PARAMETERS => "Bad parameters",
        GP_ERROR_NO_MEMORY => "Out of memory",
        GP_ERROR_LIBRARY => "Error in camera driver",
        GP_ERROR_UNKNOWN_PORT => "Unknown port",
        GP_ERROR_NOT_SUPPORTED => "Unsupported operation",
        GP_ERROR_IO => "I/O problem",
        GP_ERROR_FIXED_LIMIT_EXCEEDED => "Fixed limit exceeded",
        GP_ERROR_TIMEOUT => "Timeout reading from or writing to the port",
        GP_ERROR_IO_SUPPORTED_SERIAL => "Serial port not supported",
        GP_ERROR_IO_SUPPORTED_USB => "USB port not supported",
        GP_ERROR_IO_INIT => "Error initializing the port",
        GP_ERROR_IO_READ => "Error reading from the port",
        GP_ERROR_IO_WRITE => "Error writing to the port",
        GP_ERROR_IO_UPDATE => "Error updating the port settings",
        GP_ERROR_IO_SERIAL_SPEED => "Error setting the serial port speed",
        GP_ERROR_IO_USB_CLEAR_HALT => "Error clearing a halt condition on the USB port",
        GP_ERROR_IO_USB_FIND => "Could not find the requested device on the USB port",
        GP_ERROR_IO_USB_CLAIM => "Could not claim the USB device",
        GP_ERROR_IO_LOCK => "Could not lock the device",
        GP_ERROR_CORRUPTED_DATA => "Corrupted data",
        GP_ERROR_FILE_EXISTS => "File already exists",
        GP_ERROR_MODEL_NOT_FOUND => "Unknown model",
        GP_ERROR_DIRECTORY_NOT_FOUND => "Directory not found",
        GP_ERROR_FILE_NOT_FOUND => "File not found",
        GP_ERROR_CAMERA_BUSY => "I/O in progress",
        GP_ERROR_PATH_NOT_ABSOLUTE => "Path not absolute",
        GP_ERROR_CANCEL => "Cancelled",
        GP_ERROR_CAMERA_ERROR => "Camera reported an error",
        GP_ERROR_OS_FAILURE => "Operating system failure",
        GP_ERROR_NO_SPACE => "Not enough space",
        _ => "Unknown error",
    }
}

/// Convert a fixed-size C char array to a Rust String.
///
/// Stops at the first NUL or at the end of the slice, whichever comes first.
pub fn cstr_to_string(chars: &[c_char]) -> String {
    let bytes: Vec<u8> = chars
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).to_string()
}

/// Copy `value` into a fixed-size C char array, NUL-terminated.
///
/// Returns `false` (leaving `dest` untouched) when the value plus terminator
/// does not fit.
pub fn string_to_cstr(value: &str, dest: &mut [c_char]) -> bool {
    let bytes = value.as_bytes();
    if bytes.len() >= dest.len() || bytes.contains(&0) {
        return false;
    }
    for (slot, &b) in dest.iter_mut().zip(bytes) {
        *slot = b as c_char;
    }
    for slot in dest.iter_mut().skip(bytes.len()) {
        *slot = 0;
    }
    true
}

/// Read a C string pointer returned by the library, `None` for null.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string valid for the call.
pub unsafe fn ptr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(std::ffi::CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cstr_stops_at_terminator() {
        let mut raw = [0 as c_char; 8];
        raw[0] = b'a' as c_char;
        raw[1] = b'b' as c_char;
        raw[3] = b'z' as c_char;
        assert_eq!(cstr_to_string(&raw), "ab");
    }

    #[test]
    fn cstr_without_terminator_stays_in_bounds() {
        let raw = [b'x' as c_char; GP_NAME_LEN];
        assert_eq!(cstr_to_string(&raw).len(), GP_NAME_LEN);
    }

    #[test]
    fn string_to_cstr_respects_capacity() {
        let mut path = CameraFilePath::default();
        let longest = "n".repeat(GP_NAME_LEN - 1);
        assert!(string_to_cstr(&longest, &mut path.name));
        assert_eq!(cstr_to_string(&path.name), longest);

        let too_long = "n".repeat(GP_NAME_LEN);
        assert!(!string_to_cstr(&too_long, &mut path.name));
        assert_eq!(cstr_to_string(&path.name), longest);
    }

    #[test]
    fn known_codes_have_messages() {
        assert_eq!(error_to_string(GP_OK), "No error");
        assert_eq!(error_to_string(GP_ERROR_CAMERA_BUSY), "I/O in progress");
        assert_eq!(error_to_string(-9999), "Unknown error");
    }
}
