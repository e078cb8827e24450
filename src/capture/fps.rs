use std::collections::VecDeque;

/// One second in frame timestamp units (microseconds).
pub const SECOND: i64 = 1_000_000;

/// Rolling window of frame timestamps.
///
/// After every push the newest and oldest entries are at most one window
/// apart, so `len()` is the number of frames seen in the last second.
#[derive(Debug, Clone)]
pub struct FrameRateCounter {
    timestamps: VecDeque<i64>,
    window: i64,
}

impl FrameRateCounter {
    pub fn new() -> Self {
        Self::with_window(SECOND)
    }

    pub fn with_window(window: i64) -> Self {
        Self {
            timestamps: VecDeque::with_capacity(64),
            window,
        }
    }

    /// Record a frame timestamp and return the current window size.
    pub fn push(&mut self, timestamp: i64) -> usize {
        self.timestamps.push_back(timestamp);
        while let (Some(front), Some(back)) = (self.timestamps.front(), self.timestamps.back()) {
            if back - front <= self.window {
                break;
            }
            self.timestamps.pop_front();
        }
        self.timestamps.len()
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Time covered by the window, front to back.
    pub fn span(&self) -> i64 {
        match (self.timestamps.front(), self.timestamps.back()) {
            (Some(front), Some(back)) => back - front,
            _ => 0,
        }
    }

    pub fn clear(&mut self) {
        self.timestamps.clear();
    }
}

impl Default for FrameRateCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Rate limiter for the periodic `fps[N]` diagnostic line.
#[derive(Debug, Default, Clone)]
pub struct FpsReporter {
    last: Option<i64>,
}

impl FpsReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// True at most once per second of frame time.
    pub fn due(&mut self, timestamp: i64) -> bool {
        match self.last {
            Some(last) if timestamp - last < SECOND => false,
            _ => {
                self.last = Some(timestamp);
                true
            }
        }
    }
}
