//! Traits for camera implementations

use serde::{Deserialize, Serialize};

use super::{FrameBuffer, PixelFormat};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraUnit {
    Front,
    Rear,
}

impl std::fmt::Display for CameraUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraUnit::Front => write!(f, "front"),
            CameraUnit::Rear => write!(f, "rear"),
        }
    }
}

impl std::str::FromStr for CameraUnit {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "front" => Ok(CameraUnit::Front),
            "rear" => Ok(CameraUnit::Rear),
            other => Err(format!("unknown camera unit '{}'", other)),
        }
    }
}

/// Viewfinder configuration handed to the camera.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewfinderSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub format: PixelFormat,
    /// Window the camera renders its own preview into.
    pub window_group: String,
    pub window_id: String,
}

/// Called once per captured frame, synchronously, on the camera's thread.
pub type FrameCallback = Box<dyn FnMut(&FrameBuffer<'_>) + Send>;

/// An opened camera.
pub trait Camera: Send {
    fn unit(&self) -> CameraUnit;

    /// Start delivering frames to `callback`. Fails with `DeviceIo`.
    fn start_viewfinder(
        &mut self,
        settings: &ViewfinderSettings,
        callback: FrameCallback,
    ) -> Result<()>;

    /// Stop the viewfinder and release the device. Safe to call more than once.
    fn close(&mut self);
}

/// Platform camera service.
pub trait CameraProvider: Send + Sync {
    /// Open a camera unit. Fails with `DeviceIo`.
    fn open(&self, unit: CameraUnit) -> Result<Box<dyn Camera>>;
}

/// Owns an opened camera and closes it when dropped.
pub struct CameraGuard {
    camera: Box<dyn Camera>,
}

impl CameraGuard {
    pub fn new(camera: Box<dyn Camera>) -> Self {
        Self { camera }
    }

    pub fn unit(&self) -> CameraUnit {
        self.camera.unit()
    }

    pub fn start_viewfinder(
        &mut self,
        settings: &ViewfinderSettings,
        callback: FrameCallback,
    ) -> Result<()> {
        self.camera.start_viewfinder(settings, callback)
    }
}

impl Drop for CameraGuard {
    fn drop(&mut self) {
        log::info!("closing {} camera", self.camera.unit());
        self.camera.close();
    }
}
