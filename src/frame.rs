//! Preview frame extraction
//!
//! The driver hands preview data back as a region of memory it owns and may
//! reuse on the next call. Frames are copied out before anything else runs.

use crate::driver::RawRegion;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// One live view frame, owned. Usually JPEG as produced by the camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewFrame {
    data: Vec<u8>,
}

/// A frame ready for transport to a UI (base64 encoded).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LiveViewFrame {
    pub data: String,
    pub length: usize,
}

impl PreviewFrame {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    pub fn to_live_view(&self) -> LiveViewFrame {
        LiveViewFrame {
            data: self.to_base64(),
            length: self.len(),
        }
    }
}

/// Copy a driver-owned region into an owned frame.
///
/// Returns `None` without reading anything when the address is null, the
/// length is zero, or the length cannot describe a valid slice.
///
/// # Safety
/// A non-null `region.addr` must be readable for `region.len` bytes for the
/// duration of this call.
pub unsafe fn extract_frame(region: RawRegion) -> Option<PreviewFrame> {
    if region.addr.is_null() || region.len == 0 {
        return None;
    }
    let len = usize::try_from(region.len)
        .ok()
        .filter(|&len| len <= isize::MAX as usize)?;

    let data = std::slice::from_raw_parts(region.addr, len).to_vec();
    Some(PreviewFrame { data })
}
