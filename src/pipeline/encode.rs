//! Encode session
//!
//! Frames arrive from the camera thread through [`EncodeInput::submit`],
//! are converted into pooled YUV420P buffers and queued on a bounded
//! channel. A dedicated worker thread encodes them and appends every chunk
//! to the output file, publishing on the [`ReadGate`] after each append.

use log::{debug, error, info, trace, warn};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::capture::{FrameBuffer, FramePool, OwnedFrame, PixelFormat, convert};
use crate::codec::{CodecRegistry, EncodedChunk, EncoderSettings, VideoEncoder};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::pipeline::gate::ReadGate;
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::state::{SessionState, StateCell};
use crate::pipeline::types::{CloseCallback, CloseReport, SessionKind, panic_message};

struct InputShared {
    tx: Mutex<Option<mpsc::Sender<OwnedFrame>>>,
    pool: FramePool,
    health: Arc<PipelineHealth>,
    width: u32,
    height: u32,
}

/// Submit handle of an encode session, safe to call from the camera thread.
#[derive(Clone)]
pub struct EncodeInput {
    shared: Arc<InputShared>,
}

impl EncodeInput {
    pub(crate) fn new(
        tx: mpsc::Sender<OwnedFrame>,
        pool: FramePool,
        health: Arc<PipelineHealth>,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            shared: Arc::new(InputShared {
                tx: Mutex::new(Some(tx)),
                pool,
                health,
                width,
                height,
            }),
        }
    }

    /// Copy `frame` and queue it for encoding. Never blocks.
    ///
    /// Returns false when the frame was dropped.
    pub fn submit(&self, frame: &FrameBuffer<'_>) -> bool {
        let shared = &*self.shared;
        let tx = shared.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = tx.as_ref() else {
            return false;
        };

        if frame.width != shared.width || frame.height != shared.height {
            trace!(
                "dropping {}x{} frame, encoder expects {}x{}",
                frame.width, frame.height, shared.width, shared.height
            );
            shared.health.record_frame_drop();
            return false;
        }

        let mut data = shared.pool.take();
        if let Err(e) = convert::to_yuv420p(frame, &mut data) {
            debug!("dropping frame: {}", e);
            shared.pool.put(data);
            shared.health.record_frame_drop();
            return false;
        }

        let owned = OwnedFrame {
            data,
            width: frame.width,
            height: frame.height,
            pts: frame.timestamp,
        };
        match tx.try_send(owned) {
            Ok(()) => true,
            Err(TrySendError::Full(owned)) | Err(TrySendError::Closed(owned)) => {
                trace!("encoder queue unavailable, dropping frame {}", owned.pts);
                shared.pool.put(owned.data);
                shared.health.record_frame_drop();
                false
            }
        }
    }

    /// Close the frame channel. The worker drains what is queued and exits.
    pub(crate) fn close(&self) {
        self.shared
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_closed(&self) -> bool {
        self.shared
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// Appends chunks to the output file and publishes them to the reader.
pub(crate) struct ChunkWriter {
    file: Option<File>,
    gate: ReadGate,
    bytes: u64,
}

impl ChunkWriter {
    /// Replace whatever is at `path` with an empty file.
    pub(crate) fn create(path: &Path, gate: ReadGate) -> Result<Self> {
        match fs::remove_file(path) {
            Ok(()) => debug!("removed previous recording {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PipelineError::file_open(path, e)),
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| PipelineError::file_open(path, e))?;

        Ok(Self {
            file: Some(file),
            gate,
            bytes: 0,
        })
    }

    pub(crate) fn append(&mut self, data: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or(PipelineError::InvalidState("writer already closed"))?;
        file.write_all(data)?;
        file.flush()?;
        self.bytes += data.len() as u64;
        self.gate.publish();
        Ok(())
    }

    pub(crate) fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Sync and close the file, then release the reader. Idempotent.
    pub(crate) fn close(&mut self) -> Result<()> {
        let synced = match self.file.take() {
            Some(file) => file.sync_all().map_err(PipelineError::from),
            None => Ok(()),
        };
        self.gate.close_writer();
        synced
    }
}

impl Drop for ChunkWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("failed to sync recording: {}", e);
        }
    }
}

/// State owned by the encode thread.
struct EncodeWorker {
    path: PathBuf,
    encoder: Box<dyn VideoEncoder>,
    writer: ChunkWriter,
    pool: FramePool,
    health: Arc<PipelineHealth>,
    state: StateCell,
    frames: u64,
}

impl EncodeWorker {
    fn run(mut self, mut rx: mpsc::Receiver<OwnedFrame>, input: EncodeInput, on_close: CloseCallback) {
        info!("encode session started on {}", self.path.display());

        let failure = match panic::catch_unwind(AssertUnwindSafe(|| self.pump(&mut rx))) {
            Ok(failure) => failure,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("encode worker on {} panicked: {}", self.path.display(), message);
                Some(format!("encode worker panicked: {}", message))
            }
        };

        // Ended on its own: refuse further frames.
        input.close();
        rx.close();
        while let Ok(frame) = rx.try_recv() {
            self.pool.put(frame.data);
        }
        drop(rx);

        let report = self.close(failure);
        on_close(report);
    }

    /// Encode queued frames until the input closes or encoding fails.
    fn pump(&mut self, rx: &mut mpsc::Receiver<OwnedFrame>) -> Option<String> {
        while let Some(frame) = rx.blocking_recv() {
            if let Err(e) = self.encode(frame) {
                error!("encode session failed: {}", e);
                return Some(e.to_string());
            }
        }
        None
    }

    fn encode(&mut self, frame: OwnedFrame) -> Result<()> {
        let pushed = self.encoder.push(&frame);
        self.pool.put(frame.data);
        pushed?;
        self.frames += 1;
        self.drain()
    }

    fn drain(&mut self) -> Result<()> {
        while let Some(chunk) = self.encoder.take()? {
            self.on_encoded_chunk(chunk)?;
        }
        Ok(())
    }

    fn on_encoded_chunk(&mut self, chunk: EncodedChunk) -> Result<()> {
        self.writer.append(&chunk.data)?;
        self.health.record_frame(chunk.data.len(), chunk.keyframe);
        Ok(())
    }

    /// Flush pending packets unless the loop failed, release codec and file,
    /// mark the session closed.
    fn close(mut self, mut failure: Option<String>) -> CloseReport {
        self.state.advance(SessionState::Stopping);

        if failure.is_none() {
            if let Err(e) = self.encoder.flush().and_then(|_| self.drain()) {
                warn!("failed to flush encoder: {}", e);
                failure = Some(e.to_string());
            }
        }

        let EncodeWorker {
            path,
            encoder,
            mut writer,
            state,
            frames,
            ..
        } = self;
        drop(encoder);

        if let Err(e) = writer.close() {
            warn!("failed to close {}: {}", path.display(), e);
            if failure.is_none() {
                failure = Some(e.to_string());
            }
        }
        let bytes = writer.bytes();
        drop(writer);

        state.advance(SessionState::Closed);
        info!(
            "encode session closed: {} frames, {} bytes written to {}",
            frames,
            bytes,
            path.display()
        );

        CloseReport {
            kind: SessionKind::Encode,
            path,
            frames,
            bytes,
            error: failure,
        }
    }
}

/// Camera frames in, encoded file out.
pub struct EncodeSession {
    path: PathBuf,
    state: StateCell,
    input: EncodeInput,
    health: Arc<PipelineHealth>,
    worker: Option<JoinHandle<()>>,
}

impl EncodeSession {
    /// Open the output file and the encoder, then spawn the encode loop.
    ///
    /// Fails with `FileOpenFailed`, `CodecUnavailable`, `CodecOpenFailed` or
    /// `StartFailed`. Anything opened before the failing step is released.
    pub fn start(
        config: &Config,
        registry: &CodecRegistry,
        gate: ReadGate,
        health: Arc<PipelineHealth>,
        on_close: CloseCallback,
    ) -> Result<EncodeSession> {
        let state = StateCell::new();
        state.advance(SessionState::Opening);

        let path = config.output_path.clone();
        let (writer, encoder) = match Self::open(config, registry, gate.clone()) {
            Ok(opened) => opened,
            Err(e) => {
                state.advance(SessionState::Idle);
                return Err(e);
            }
        };
        gate.open_writer();

        let (width, height) = (config.width, config.height);
        let (tx, rx) = mpsc::channel(config.encoder.queue_depth.max(1));
        let pool = FramePool::new(PixelFormat::Yuv420p.frame_size(width, height));
        let input = EncodeInput::new(tx, pool.clone(), health.clone(), width, height);

        let worker = EncodeWorker {
            path: path.clone(),
            encoder,
            writer,
            pool,
            health: health.clone(),
            state: state.clone(),
            frames: 0,
        };

        state.advance(SessionState::Running {
            started_at: Instant::now(),
        });
        let worker_input = input.clone();
        let handle = thread::Builder::new()
            .name("ffcamera-encode".into())
            .spawn(move || worker.run(rx, worker_input, on_close))
            .map_err(|e| {
                // The worker never ran; its file and codec went down with the closure.
                state.advance(SessionState::Stopping);
                state.advance(SessionState::Closed);
                PipelineError::StartFailed(format!("failed to spawn encode thread: {}", e))
            })?;

        Ok(EncodeSession {
            path,
            state,
            input,
            health,
            worker: Some(handle),
        })
    }

    fn open(
        config: &Config,
        registry: &CodecRegistry,
        gate: ReadGate,
    ) -> Result<(ChunkWriter, Box<dyn VideoEncoder>)> {
        let writer = ChunkWriter::create(&config.output_path, gate)?;

        let provider = registry.find(config.codec)?;
        let settings = EncoderSettings {
            pixel_format: PixelFormat::Yuv420p,
            width: config.width,
            height: config.height,
            bit_rate: config.encoder.bit_rate,
            frame_rate: config.frame_rate,
            gop_size: config.encoder.gop_size,
            thread_count: config.encoder.thread_count,
            color_space: config.encoder.color_space,
        };
        let encoder = provider.open_encoder(&settings)?;
        debug!("opened {} encoder {:?}", provider.id(), settings);

        Ok((writer, encoder))
    }

    /// Request the loop to finish. The close callback follows once the
    /// queued frames are encoded. Calling it again does nothing.
    pub fn stop(&self) {
        if self.state.advance(SessionState::Stopping) {
            info!("stopping encode session on {}", self.path.display());
        }
        self.input.close();
    }

    /// Join the encode thread.
    pub fn wait(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("encode thread panicked");
            }
        }
    }

    pub fn input(&self) -> EncodeInput {
        self.input.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn health(&self) -> &Arc<PipelineHealth> {
        &self.health
    }
}

impl Drop for EncodeSession {
    fn drop(&mut self) {
        self.stop();
        self.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Plane;
    use crate::codec::{Capabilities, CodecId, CodecProvider, DecoderSettings, VideoDecoder};
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    fn config(dir: &Path) -> Config {
        Config {
            output_path: dir.join("out.rvf"),
            width: 4,
            height: 2,
            codec: CodecId::RawVideo,
            ..Config::default()
        }
    }

    fn submit_nv12(input: &EncodeInput, timestamp: i64, value: u8) -> bool {
        let luma = [value; 8];
        let chroma = [value; 4];
        let planes = [
            Plane {
                data: &luma,
                stride: 4,
            },
            Plane {
                data: &chroma,
                stride: 4,
            },
        ];
        input.submit(&FrameBuffer {
            format: PixelFormat::Nv12,
            width: 4,
            height: 2,
            timestamp,
            planes: &planes,
        })
    }

    struct PanickingEncoder;

    impl VideoEncoder for PanickingEncoder {
        fn push(&mut self, _frame: &OwnedFrame) -> Result<()> {
            panic!("encoder state corrupted");
        }

        fn take(&mut self) -> Result<Option<EncodedChunk>> {
            Ok(None)
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct PanickingCodec;

    impl CodecProvider for PanickingCodec {
        fn id(&self) -> CodecId {
            CodecId::RawVideo
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities { truncated: true }
        }

        fn open_encoder(&self, _settings: &EncoderSettings) -> Result<Box<dyn VideoEncoder>> {
            Ok(Box::new(PanickingEncoder))
        }

        fn open_decoder(&self, _settings: &DecoderSettings) -> Result<Box<dyn VideoDecoder>> {
            Err(PipelineError::CodecUnavailable(CodecId::RawVideo))
        }
    }

    fn report_channel() -> (CloseCallback, std_mpsc::Receiver<CloseReport>) {
        let (tx, rx) = std_mpsc::channel();
        (
            Box::new(move |report| {
                let _ = tx.send(report);
            }),
            rx,
        )
    }

    #[test]
    fn test_chunk_writer_appends_in_order_and_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.bin");
        std::fs::write(&path, b"stale content").unwrap();

        let gate = ReadGate::new();
        gate.open_writer();
        let mut writer = ChunkWriter::create(&path, gate.clone()).unwrap();
        writer.append(b"b1").unwrap();
        writer.append(b"b2").unwrap();
        assert_eq!(gate.snapshot().generation, 2);
        assert_eq!(std::fs::read(&path).unwrap(), b"b1b2");

        writer.close().unwrap();
        writer.close().unwrap();
        assert!(!gate.snapshot().writer_open);
        assert!(writer.append(b"b3").is_err());
    }

    #[test]
    fn test_stop_twice_closes_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let registry = CodecRegistry::new();
        let gate = ReadGate::new();
        let (on_close, reports) = report_channel();

        let mut session = EncodeSession::start(
            &config,
            &registry,
            gate.clone(),
            Arc::new(PipelineHealth::new()),
            on_close,
        )
        .unwrap();
        assert!(session.state().is_running());
        assert!(gate.snapshot().writer_open);

        let input = session.input();
        assert!(submit_nv12(&input, 0, 16));
        assert!(submit_nv12(&input, 33_333, 32));

        session.stop();
        session.stop();
        session.wait();

        let report = reports.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(report.kind, SessionKind::Encode);
        assert_eq!(report.frames, 2);
        assert!(report.error.is_none());
        assert!(reports.try_recv().is_err());

        assert_eq!(session.state(), SessionState::Closed);
        assert!(!gate.snapshot().writer_open);
        assert_eq!(
            std::fs::metadata(&config.output_path).unwrap().len(),
            report.bytes
        );
        assert!(!submit_nv12(&input, 66_666, 48));

        drop(session);
        assert!(reports.try_recv().is_err());
    }

    #[test]
    fn test_unknown_codec_releases_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            codec: CodecId::H264,
            ..config(dir.path())
        };
        let registry = CodecRegistry::with_initializer(|_| {});
        let gate = ReadGate::new();
        let (on_close, reports) = report_channel();

        let result = EncodeSession::start(
            &config,
            &registry,
            gate.clone(),
            Arc::new(PipelineHealth::new()),
            on_close,
        );
        assert!(matches!(result, Err(PipelineError::CodecUnavailable(CodecId::H264))));
        assert!(!gate.snapshot().writer_open);
        assert!(reports.try_recv().is_err());
    }

    #[test]
    fn test_unwritable_path_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            output_path: dir.path().join("missing").join("out.rvf"),
            ..config(dir.path())
        };
        let (on_close, _reports) = report_channel();

        let result = EncodeSession::start(
            &config,
            &CodecRegistry::new(),
            ReadGate::new(),
            Arc::new(PipelineHealth::new()),
            on_close,
        );
        assert!(matches!(result, Err(PipelineError::FileOpenFailed { .. })));
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let health = Arc::new(PipelineHealth::new());
        let pool = FramePool::new(PixelFormat::Yuv420p.frame_size(4, 2));
        let input = EncodeInput::new(tx, pool, health.clone(), 4, 2);

        assert!(submit_nv12(&input, 0, 1));
        assert!(!submit_nv12(&input, 1, 2));
        assert_eq!(health.frame_drops(), 1);

        assert_eq!(rx.try_recv().unwrap().pts, 0);
        input.close();
        assert!(input.is_closed());
        assert!(!submit_nv12(&input, 2, 3));
    }

    #[test]
    fn test_panicking_encoder_still_closes_once() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CodecRegistry::with_initializer(|r| r.register(Arc::new(PanickingCodec)));
        let gate = ReadGate::new();
        let (on_close, reports) = report_channel();

        let mut session = EncodeSession::start(
            &config(dir.path()),
            &registry,
            gate.clone(),
            Arc::new(PipelineHealth::new()),
            on_close,
        )
        .unwrap();
        let input = session.input();
        assert!(submit_nv12(&input, 0, 16));

        let report = reports.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(report.frames, 0);
        assert!(report.error.unwrap().contains("encoder state corrupted"));

        session.wait();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!gate.snapshot().writer_open);
        assert!(!submit_nv12(&input, 33_333, 32));
        drop(session);
        assert!(reports.try_recv().is_err());
    }
}
