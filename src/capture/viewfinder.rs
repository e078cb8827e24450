//! Viewfinder frame producer
//!
//! Runs inside the camera callback: filters by pixel format, maintains the
//! rolling frame rate and hands accepted frames to the active encoder.

use log::{info, trace};
use std::sync::{Arc, Mutex, PoisonError};

use super::{FpsReporter, FrameBuffer, FrameRateCounter, PixelFormat};
use crate::pipeline::{EncodeInput, PipelineHealth};

struct RateState {
    counter: FrameRateCounter,
    reporter: FpsReporter,
}

pub struct Viewfinder {
    format: PixelFormat,
    rate: Mutex<RateState>,
    sink: Mutex<Option<EncodeInput>>,
    health: Arc<PipelineHealth>,
}

impl Viewfinder {
    pub fn new(format: PixelFormat) -> Self {
        Self {
            format,
            rate: Mutex::new(RateState {
                counter: FrameRateCounter::new(),
                reporter: FpsReporter::new(),
            }),
            sink: Mutex::new(None),
            health: Arc::new(PipelineHealth::new()),
        }
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Camera callback. Never blocks on I/O.
    ///
    /// Returns whether the frame was accepted.
    pub fn on_frame(&self, frame: &FrameBuffer<'_>) -> bool {
        if frame.format != self.format {
            trace!("dropping {} frame, expected {}", frame.format, self.format);
            self.health.record_frame_drop();
            return false;
        }

        {
            let mut rate = self.rate.lock().unwrap_or_else(PoisonError::into_inner);
            let fps = rate.counter.push(frame.timestamp);
            if rate.reporter.due(frame.timestamp) {
                info!("fps[{}]", fps);
            }
        }
        self.health.record_frame(0, false);

        if let Some(input) = self
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            input.submit(frame);
        }
        true
    }

    /// Route accepted frames to an encode session.
    pub fn attach(&self, input: EncodeInput) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(input);
    }

    pub fn detach(&self) -> Option<EncodeInput> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub fn is_attached(&self) -> bool {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Frames accepted during the last second.
    pub fn fps(&self) -> usize {
        self.rate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .counter
            .len()
    }

    pub fn reset(&self) {
        let mut rate = self.rate.lock().unwrap_or_else(PoisonError::into_inner);
        rate.counter.clear();
        rate.reporter = FpsReporter::new();
    }

    pub fn health(&self) -> &Arc<PipelineHealth> {
        &self.health
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FramePool, Plane, SECOND};
    use tokio::sync::mpsc;

    fn nv12(timestamp: i64, luma: &[u8], chroma: &[u8], f: impl FnOnce(&FrameBuffer<'_>)) {
        let planes = [
            Plane {
                data: luma,
                stride: 4,
            },
            Plane {
                data: chroma,
                stride: 4,
            },
        ];
        f(&FrameBuffer {
            format: PixelFormat::Nv12,
            width: 4,
            height: 2,
            timestamp,
            planes: &planes,
        });
    }

    #[test]
    fn test_rejects_other_formats_silently() {
        let viewfinder = Viewfinder::new(PixelFormat::Nv12);
        let data = [0u8; 32];
        let planes = [Plane {
            data: &data,
            stride: 16,
        }];
        let frame = FrameBuffer {
            format: PixelFormat::Bgra,
            width: 4,
            height: 2,
            timestamp: 0,
            planes: &planes,
        };

        assert!(!viewfinder.on_frame(&frame));
        assert_eq!(viewfinder.fps(), 0);
        assert_eq!(viewfinder.health().frame_drops(), 1);
    }

    #[test]
    fn test_counts_frames_in_rolling_window() {
        let viewfinder = Viewfinder::new(PixelFormat::Nv12);
        let (luma, chroma) = ([0u8; 8], [128u8; 4]);
        for i in 0..60 {
            nv12(i * SECOND / 20, &luma, &chroma, |frame| {
                assert!(viewfinder.on_frame(frame));
            });
        }
        // 20 fps: the newest frame plus the twenty before it within one second
        assert_eq!(viewfinder.fps(), 21);
    }

    #[test]
    fn test_forwards_to_attached_encoder() {
        let viewfinder = Viewfinder::new(PixelFormat::Nv12);
        let (tx, mut rx) = mpsc::channel(4);
        let pool = FramePool::new(PixelFormat::Yuv420p.frame_size(4, 2));
        let health = Arc::new(PipelineHealth::new());
        viewfinder.attach(EncodeInput::new(tx, pool, health, 4, 2));

        let luma = [1, 2, 3, 4, 5, 6, 7, 8];
        let chroma = [10, 20, 11, 21];
        nv12(1234, &luma, &chroma, |frame| {
            viewfinder.on_frame(frame);
        });

        let owned = rx.try_recv().unwrap();
        assert_eq!(owned.pts, 1234);
        assert_eq!(owned.data, vec![1, 2, 3, 4, 5, 6, 7, 8, 10, 11, 20, 21]);

        assert!(viewfinder.detach().is_some());
        nv12(2000, &luma, &chroma, |frame| {
            viewfinder.on_frame(frame);
        });
        assert!(rx.try_recv().is_err());
    }
}
