//! Per-session counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters of one pipeline side: the viewfinder, an encode session or a
/// decode session.
///
/// Written from the worker and camera threads, read from anywhere.
#[derive(Debug)]
pub struct PipelineHealth {
    created: Instant,
    /// Microseconds after `created` of the last counted frame.
    last_frame: AtomicU64,
    frames: AtomicU64,
    bytes: AtomicU64,
    keyframes: AtomicU64,
    drops: AtomicU64,
    decode_failures: AtomicU64,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self {
            created: Instant::now(),
            last_frame: AtomicU64::new(0),
            frames: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            keyframes: AtomicU64::new(0),
            drops: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
        }
    }

    /// A frame was accepted, encoded or presented.
    pub fn record_frame(&self, size: usize, keyframe: bool) {
        let now = self.created.elapsed().as_micros() as u64;
        self.last_frame.fetch_max(now, Ordering::Relaxed);
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(size as u64, Ordering::Relaxed);
        if keyframe {
            self.keyframes.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A frame was rejected, or the encoder queue was full.
    pub fn record_frame_drop(&self) {
        self.drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn frame_drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Time since the last counted frame, or since creation if there was none.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_micros(self.last_frame.load(Ordering::Relaxed));
        self.created.elapsed().saturating_sub(last)
    }

    pub fn is_stalled(&self, threshold: Duration) -> bool {
        self.idle_for() > threshold
    }

    pub fn summary(&self) -> HealthSummary {
        let frames = self.frames();
        let drops = self.frame_drops();
        HealthSummary {
            frames,
            bytes: self.bytes(),
            keyframes: self.keyframes.load(Ordering::Relaxed),
            drops,
            decode_failures: self.decode_failures(),
            drop_rate: match frames + drops {
                0 => 0.0,
                offered => drops as f64 * 100.0 / offered as f64,
            },
        }
    }
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthSummary {
    pub frames: u64,
    pub bytes: u64,
    pub keyframes: u64,
    pub drops: u64,
    pub decode_failures: u64,
    /// Percentage of offered frames that were dropped.
    pub drop_rate: f64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} frames, {} bytes, {} dropped ({:.1}%)",
            self.frames, self.bytes, self.drops, self.drop_rate
        )?;
        if self.decode_failures > 0 {
            write!(f, ", {} decode failures", self.decode_failures)?;
        }
        Ok(())
    }
}
