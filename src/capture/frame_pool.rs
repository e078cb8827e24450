use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Pool of packed frame buffers shared by the camera thread and the encoder.
///
/// # Performance
/// - Pre-allocates buffers on creation to avoid runtime allocation
/// - Reuses buffers via put()/take() cycle
/// - Falls back to allocation if pool is exhausted
#[derive(Clone)]
pub struct FramePool {
    frames: Arc<Mutex<VecDeque<Vec<u8>>>>,
    frame_size: usize,
}

/// Initial number of buffers to pre-allocate in the pool
const INITIAL_POOL_SIZE: usize = 4;

impl FramePool {
    pub fn new(frame_size: usize) -> Self {
        let mut frames = VecDeque::with_capacity(INITIAL_POOL_SIZE * 2);
        for _ in 0..INITIAL_POOL_SIZE {
            frames.push_back(vec![0u8; frame_size]);
        }

        Self {
            frames: Arc::new(Mutex::new(frames)),
            frame_size,
        }
    }

    /// Put a given buffer back to the pool after it was used.
    pub fn put(&self, frame: Vec<u8>) {
        let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        // Only keep buffers if pool isn't too large (prevent unbounded growth)
        if frames.len() < INITIAL_POOL_SIZE * 2 {
            frames.push_back(frame);
        }
    }

    /// Take a buffer of `frame_size` bytes from the pool or allocate a new one.
    pub fn take(&self) -> Vec<u8> {
        let pooled = self
            .frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match pooled {
            Some(mut frame) => {
                frame.resize(self.frame_size, 0);
                frame
            }
            None => vec![0u8; self.frame_size],
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn available(&self) -> usize {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
