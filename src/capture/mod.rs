//! Camera capture module
//!
//! Frames arrive from a [`Camera`] on a camera-owned thread as borrowed
//! [`FrameBuffer`]s. The [`Viewfinder`] filters them, keeps the rolling frame
//! rate and forwards accepted frames to the encoder as pooled [`OwnedFrame`]s.

mod camera;
pub mod convert;
mod fps;
mod frame_pool;
mod synthetic;
mod viewfinder;

use serde::{Deserialize, Serialize};

pub use camera::{
    Camera, CameraGuard, CameraProvider, CameraUnit, FrameCallback, ViewfinderSettings,
};
pub use fps::{FpsReporter, FrameRateCounter, SECOND};
pub use frame_pool::FramePool;
pub use synthetic::{SyntheticCamera, SyntheticCameraProvider};
pub use viewfinder::Viewfinder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Y plane followed by an interleaved UV plane at half resolution.
    Nv12,
    /// Planar Y, U, V at 4:2:0.
    Yuv420p,
    Bgra,
}

impl PixelFormat {
    pub fn name(&self) -> &'static str {
        match self {
            PixelFormat::Nv12 => "nv12",
            PixelFormat::Yuv420p => "yuv420p",
            PixelFormat::Bgra => "bgra",
        }
    }

    /// Size in bytes of a tightly packed picture.
    ///
    /// Saturates at `usize::MAX`; use [`PixelFormat::checked_frame_size`]
    /// for dimensions that come from untrusted input.
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        self.checked_frame_size(width, height).unwrap_or(usize::MAX)
    }

    /// Size in bytes of a tightly packed picture, `None` on overflow.
    pub fn checked_frame_size(&self, width: u32, height: u32) -> Option<usize> {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelFormat::Nv12 | PixelFormat::Yuv420p => {
                let chroma = w.div_ceil(2).checked_mul(h.div_ceil(2))?.checked_mul(2)?;
                w.checked_mul(h)?.checked_add(chroma)
            }
            PixelFormat::Bgra => w.checked_mul(h)?.checked_mul(4),
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    pub data: &'a [u8],
    pub stride: usize,
}

/// A frame delivered by the camera.
///
/// The pixel data belongs to the camera and is only valid for the duration
/// of the callback that hands it out.
#[derive(Debug, Clone, Copy)]
pub struct FrameBuffer<'a> {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Capture time in microseconds.
    pub timestamp: i64,
    pub planes: &'a [Plane<'a>],
}

/// Tightly packed YUV420P copy of an accepted frame.
pub struct OwnedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pts: i64,
}

impl OwnedFrame {
    /// Borrow the Y, U and V planes.
    pub fn planes(&self) -> (&[u8], &[u8], &[u8]) {
        let (w, h) = (self.width as usize, self.height as usize);
        let y_size = w * h;
        let c_size = w.div_ceil(2) * h.div_ceil(2);
        let (y, rest) = self.data.split_at(y_size);
        let (u, v) = rest.split_at(c_size);
        (y, u, &v[..c_size])
    }
}

impl std::fmt::Debug for OwnedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pts", &self.pts)
            .field("size", &self.data.len())
            .finish()
    }
}
