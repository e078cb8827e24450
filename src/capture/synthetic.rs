use log::{debug, info, warn};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::{
    Camera, CameraProvider, CameraUnit, FrameBuffer, FrameCallback, PixelFormat, Plane,
    ViewfinderSettings,
};
use crate::error::{PipelineError, Result};

/// Camera service that renders a moving test pattern.
///
/// Stands in for the platform camera on hosts without one.
#[derive(Debug, Clone)]
pub struct SyntheticCameraProvider {
    format: PixelFormat,
}

impl SyntheticCameraProvider {
    pub fn new() -> Self {
        Self {
            format: PixelFormat::Nv12,
        }
    }

    /// Emit frames in `format` regardless of what the viewfinder asks for.
    pub fn with_format(format: PixelFormat) -> Self {
        Self { format }
    }
}

impl Default for SyntheticCameraProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraProvider for SyntheticCameraProvider {
    fn open(&self, unit: CameraUnit) -> Result<Box<dyn Camera>> {
        info!("opening synthetic {} camera", unit);
        Ok(Box::new(SyntheticCamera::new(unit, self.format)))
    }
}

pub struct SyntheticCamera {
    unit: CameraUnit,
    format: PixelFormat,
    cancel_token: Option<CancellationToken>,
    worker: Option<JoinHandle<()>>,
}

impl SyntheticCamera {
    pub fn new(unit: CameraUnit, format: PixelFormat) -> Self {
        Self {
            unit,
            format,
            cancel_token: None,
            worker: None,
        }
    }
}

impl Camera for SyntheticCamera {
    fn unit(&self) -> CameraUnit {
        self.unit
    }

    fn start_viewfinder(
        &mut self,
        settings: &ViewfinderSettings,
        mut callback: FrameCallback,
    ) -> Result<()> {
        if self.worker.is_some() {
            return Err(PipelineError::DeviceIo("viewfinder already running".into()));
        }
        if settings.frame_rate == 0 || settings.width == 0 || settings.height == 0 {
            return Err(PipelineError::DeviceIo(format!(
                "unsupported viewfinder mode {}x{}@{}",
                settings.width, settings.height, settings.frame_rate
            )));
        }

        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let mut pattern = TestPattern::new(self.format, settings.width, settings.height);
        let period = Duration::from_secs(1) / settings.frame_rate;

        let worker = std::thread::Builder::new()
            .name("ffcamera-camera".into())
            .spawn(move || {
                let start = Instant::now();
                let mut index: u64 = 0;
                while !token.is_cancelled() {
                    let timestamp = start.elapsed().as_micros() as i64;
                    pattern.render(index, timestamp, &mut callback);
                    index += 1;

                    let wait = start
                        .checked_add(frame_offset(period, index))
                        .and_then(|next| next.checked_duration_since(Instant::now()));
                    if let Some(wait) = wait {
                        std::thread::sleep(wait);
                    }
                }
                debug!("synthetic camera stopped after {} frames", index);
            })
            .map_err(|e| PipelineError::DeviceIo(format!("failed to start viewfinder: {}", e)))?;

        self.cancel_token = Some(cancel_token);
        self.worker = Some(worker);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("synthetic camera thread panicked");
            }
        }
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reusable plane storage for the generated frames.
struct TestPattern {
    format: PixelFormat,
    width: u32,
    height: u32,
    luma: Vec<u8>,
    chroma: Vec<u8>,
}

impl TestPattern {
    fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        let (w, h) = (width as usize, height as usize);
        let (luma, chroma) = match format {
            PixelFormat::Bgra => (vec![0u8; w * h * 4], Vec::new()),
            _ => (vec![0u8; w * h], vec![128u8; 2 * w.div_ceil(2) * h.div_ceil(2)]),
        };
        Self {
            format,
            width,
            height,
            luma,
            chroma,
        }
    }

    fn render(&mut self, index: u64, timestamp: i64, callback: &mut FrameCallback) {
        let w = self.width as usize;
        let shift = (index as usize).wrapping_mul(4);

        match self.format {
            PixelFormat::Bgra => {
                for (i, px) in self.luma.chunks_exact_mut(4).enumerate() {
                    let v = ((i % w + shift) & 0xff) as u8;
                    px.copy_from_slice(&[v, v, v, 0xff]);
                }
                let planes = [Plane {
                    data: &self.luma,
                    stride: w * 4,
                }];
                callback(&self.frame(timestamp, &planes));
            }
            PixelFormat::Nv12 => {
                self.fill_luma(shift);
                let planes = [
                    Plane {
                        data: &self.luma,
                        stride: w,
                    },
                    Plane {
                        data: &self.chroma,
                        stride: w.div_ceil(2) * 2,
                    },
                ];
                callback(&self.frame(timestamp, &planes));
            }
            PixelFormat::Yuv420p => {
                self.fill_luma(shift);
                let (u, v) = self.chroma.split_at(self.chroma.len() / 2);
                let planes = [
                    Plane {
                        data: &self.luma,
                        stride: w,
                    },
                    Plane {
                        data: u,
                        stride: w.div_ceil(2),
                    },
                    Plane {
                        data: v,
                        stride: w.div_ceil(2),
                    },
                ];
                callback(&self.frame(timestamp, &planes));
            }
        }
    }

    fn fill_luma(&mut self, shift: usize) {
        let w = self.width as usize;
        for (r, row) in self.luma.chunks_exact_mut(w).enumerate() {
            for (c, px) in row.iter_mut().enumerate() {
                *px = ((c + r + shift) & 0xff) as u8;
            }
        }
    }

    fn frame<'a>(&self, timestamp: i64, planes: &'a [Plane<'a>]) -> FrameBuffer<'a> {
        FrameBuffer {
            format: self.format,
            width: self.width,
            height: self.height,
            timestamp,
            planes,
        }
    }
}

/// Time from the first frame to frame `index`.
fn frame_offset(period: Duration, index: u64) -> Duration {
    let nanos = period.as_nanos().saturating_mul(u128::from(index));
    let secs = u64::try_from(nanos / 1_000_000_000).unwrap_or(u64::MAX);
    Duration::new(secs, (nanos % 1_000_000_000) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings() -> ViewfinderSettings {
        ViewfinderSettings {
            width: 16,
            height: 8,
            frame_rate: 200,
            format: PixelFormat::Nv12,
            window_group: "group".into(),
            window_id: "vf".into(),
        }
    }

    #[test]
    fn test_frame_offset_keeps_growing_past_u32() {
        let period = Duration::from_secs(1) / 30;
        assert_eq!(frame_offset(period, 0), Duration::ZERO);
        assert_eq!(frame_offset(period, 30), period * 30);

        let last_u32 = frame_offset(period, u64::from(u32::MAX));
        let next = frame_offset(period, u64::from(u32::MAX) + 1);
        assert_eq!(next - last_u32, period);
        assert!(last_u32 > Duration::from_secs(100_000_000));
    }

    #[test]
    fn test_delivers_frames_until_closed() {
        let provider = SyntheticCameraProvider::new();
        let mut camera = provider.open(CameraUnit::Rear).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();

        camera
            .start_viewfinder(
                &settings(),
                Box::new(move |frame| {
                    assert_eq!(frame.format, PixelFormat::Nv12);
                    assert_eq!(frame.planes.len(), 2);
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        std::thread::sleep(Duration::from_millis(100));
        camera.close();
        let after_close = count.load(Ordering::SeqCst);
        assert!(after_close > 0);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), after_close);
    }

    #[test]
    fn test_second_start_is_rejected() {
        let mut camera = SyntheticCamera::new(CameraUnit::Front, PixelFormat::Nv12);
        camera.start_viewfinder(&settings(), Box::new(|_| {})).unwrap();
        let err = camera
            .start_viewfinder(&settings(), Box::new(|_| {}))
            .unwrap_err();
        assert!(matches!(err, PipelineError::DeviceIo(_)));
        camera.close();
        camera.close();
    }

    #[test]
    fn test_zero_rate_is_a_device_error() {
        let mut camera = SyntheticCamera::new(CameraUnit::Front, PixelFormat::Nv12);
        let mut bad = settings();
        bad.frame_rate = 0;
        assert!(matches!(
            camera.start_viewfinder(&bad, Box::new(|_| {})),
            Err(PipelineError::DeviceIo(_))
        ));
    }
}
