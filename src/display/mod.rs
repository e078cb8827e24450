//! Rendering surfaces for decoded frames
//!
//! The decode session asks a [`SurfaceProvider`] for a surface bound to a
//! window group / window id pair and presents every decoded frame on it.
//! Layout and visibility belong to the host and are not modelled here.

use log::{debug, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::codec::DecodedFrame;
use crate::error::{PipelineError, Result};

/// Opaque identifier of a created surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u64);

pub trait RenderSurface: Send {
    fn handle(&self) -> SurfaceHandle;

    fn present(&mut self, frame: &DecodedFrame) -> Result<()>;
}

pub trait SurfaceProvider: Send + Sync {
    fn create_surface(&self, window_group: &str, window_id: &str)
    -> Result<Box<dyn RenderSurface>>;
}

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

fn next_handle() -> SurfaceHandle {
    SurfaceHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
}

/// Surfaces that only log what they would display.
#[derive(Debug, Default, Clone)]
pub struct LogSurfaceProvider {
    /// Log a progress line every this many frames.
    pub report_every: u64,
}

impl LogSurfaceProvider {
    pub fn new(report_every: u64) -> Self {
        Self { report_every }
    }
}

impl SurfaceProvider for LogSurfaceProvider {
    fn create_surface(
        &self,
        window_group: &str,
        window_id: &str,
    ) -> Result<Box<dyn RenderSurface>> {
        let handle = next_handle();
        info!(
            "created surface {:?} in window {}/{}",
            handle, window_group, window_id
        );
        Ok(Box::new(LogSurface {
            handle,
            window: format!("{}/{}", window_group, window_id),
            report_every: self.report_every.max(1),
            presented: 0,
        }))
    }
}

struct LogSurface {
    handle: SurfaceHandle,
    window: String,
    report_every: u64,
    presented: u64,
}

impl RenderSurface for LogSurface {
    fn handle(&self) -> SurfaceHandle {
        self.handle
    }

    fn present(&mut self, frame: &DecodedFrame) -> Result<()> {
        if self.presented == 0 {
            info!(
                "{}: first frame {}x{}",
                self.window, frame.width, frame.height
            );
        }
        self.presented += 1;
        if self.presented % self.report_every == 0 {
            debug!("{}: presented {} frames", self.window, self.presented);
        }
        Ok(())
    }
}

impl Drop for LogSurface {
    fn drop(&mut self) {
        info!(
            "{}: surface released after {} frames",
            self.window, self.presented
        );
    }
}

/// Surfaces that keep every presented frame in memory.
#[derive(Clone, Default)]
pub struct CollectingSurfaceProvider {
    frames: Arc<Mutex<Vec<DecodedFrame>>>,
    windows: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl CollectingSurfaceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider whose surfaces can never be created.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn frames(&self) -> Vec<DecodedFrame> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// `group/id` of every surface created so far.
    pub fn windows(&self) -> Vec<String> {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SurfaceProvider for CollectingSurfaceProvider {
    fn create_surface(
        &self,
        window_group: &str,
        window_id: &str,
    ) -> Result<Box<dyn RenderSurface>> {
        if self.fail {
            return Err(PipelineError::StartFailed(format!(
                "no window {}/{}",
                window_group, window_id
            )));
        }
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("{}/{}", window_group, window_id));
        Ok(Box::new(CollectingSurface {
            handle: next_handle(),
            frames: self.frames.clone(),
        }))
    }
}

struct CollectingSurface {
    handle: SurfaceHandle,
    frames: Arc<Mutex<Vec<DecodedFrame>>>,
}

impl RenderSurface for CollectingSurface {
    fn handle(&self) -> SurfaceHandle {
        self.handle
    }

    fn present(&mut self, frame: &DecodedFrame) -> Result<()> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> DecodedFrame {
        DecodedFrame {
            data: vec![0; 6],
            width: 2,
            height: 2,
            pts: 0,
        }
    }

    #[test]
    fn test_surfaces_get_distinct_handles() {
        let provider = LogSurfaceProvider::new(30);
        let a = provider.create_surface("group", "a").unwrap();
        let b = provider.create_surface("group", "b").unwrap();
        assert_ne!(a.handle(), b.handle());
    }

    #[test]
    fn test_collecting_surface_shares_frames() {
        let provider = CollectingSurfaceProvider::new();
        let mut surface = provider.create_surface("group", "preview").unwrap();
        surface.present(&frame()).unwrap();
        surface.present(&frame()).unwrap();
        assert_eq!(provider.frame_count(), 2);
        assert_eq!(provider.windows(), vec!["group/preview".to_string()]);
    }

    #[test]
    fn test_failing_provider() {
        let provider = CollectingSurfaceProvider::failing();
        assert!(matches!(
            provider.create_surface("group", "preview"),
            Err(PipelineError::StartFailed(_))
        ));
    }
}
