//! Decode session
//!
//! Pulls bytes from a file that may still be growing and presents decoded
//! frames on a rendering surface. When a read comes back empty while the
//! writer is attached, the worker blocks on the [`ReadGate`] instead of
//! polling.

use log::{debug, error, info, warn};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::capture::PixelFormat;
use crate::codec::{
    CodecRegistry, DecodedFrame, DecoderSettings, ElementaryStreamParser, VideoDecoder,
};
use crate::config::Config;
use crate::display::{RenderSurface, SurfaceProvider};
use crate::error::{PipelineError, Result};
use crate::pipeline::gate::{GateWait, ReadGate};
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::state::{SessionState, StateCell};
use crate::pipeline::types::{CloseCallback, CloseReport, SessionKind, panic_message};

/// Cursor over the shared file.
struct ChunkReader {
    file: File,
    offset: u64,
    gate: ReadGate,
    active: Arc<AtomicBool>,
    stall_timeout: Option<Duration>,
}

impl ChunkReader {
    /// Read up to `buf.len()` bytes at the saved offset, waiting on the gate
    /// while the file has nothing new and the writer is still attached.
    ///
    /// Returns 0 at end of stream or once the session is stopped.
    fn read_request(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            // A stop ends the stream even with unread bytes left in the file.
            if !self.active.load(Ordering::Acquire) {
                return Ok(0);
            }
            // Taken before the read so a publish racing with it is not missed.
            let seen = self.gate.snapshot();

            self.file.seek(SeekFrom::Start(self.offset))?;
            let read = self.file.read(buf)?;
            if read > 0 {
                self.offset += read as u64;
                return Ok(read);
            }

            if !self.active.load(Ordering::Acquire) || seen.reader_stopped || !seen.writer_open {
                return Ok(0);
            }

            match self.gate.wait(seen.generation, self.stall_timeout) {
                GateWait::Published | GateWait::WriterClosed | GateWait::Stopped => continue,
                GateWait::TimedOut => {
                    warn!(
                        "no new data after {:?}, ending read at offset {}",
                        self.stall_timeout.unwrap_or_default(),
                        self.offset
                    );
                    return Ok(0);
                }
            }
        }
    }
}

/// State owned by the decode thread.
struct DecodeWorker {
    path: PathBuf,
    reader: ChunkReader,
    decoder: Box<dyn VideoDecoder>,
    parser: Option<ElementaryStreamParser>,
    surface: Box<dyn RenderSurface>,
    health: Arc<PipelineHealth>,
    state: StateCell,
    read_chunk_size: usize,
    frames: u64,
}

impl DecodeWorker {
    fn run(mut self, on_close: CloseCallback) {
        info!(
            "decode session started on {} (surface {:?})",
            self.path.display(),
            self.surface.handle()
        );

        // A panicking decoder or surface still ends in Closed and one report.
        let report = match panic::catch_unwind(AssertUnwindSafe(|| self.pump())) {
            Ok(failure) => self.close(failure, true),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("decode worker on {} panicked: {}", self.path.display(), message);
                self.close(Some(format!("decode worker panicked: {}", message)), false)
            }
        };
        on_close(report);
    }

    /// Read and decode until end of stream, a stop or a read error.
    fn pump(&mut self) -> Option<String> {
        let mut buf = vec![0u8; self.read_chunk_size.max(1)];
        loop {
            match self.reader.read_request(&mut buf) {
                Ok(0) => return None,
                Ok(read) => self.feed(&buf[..read]),
                Err(e) => {
                    warn!("read from {} failed: {}", self.path.display(), e);
                    return Some(e.to_string());
                }
            }
        }
    }

    fn feed(&mut self, data: &[u8]) {
        match self.parser.as_mut() {
            Some(parser) => {
                parser.push(data);
                let mut units = Vec::new();
                while let Some(unit) = parser.next_unit() {
                    units.push(unit);
                }
                for unit in units {
                    self.decode(&unit);
                }
            }
            None => self.decode(data),
        }
    }

    fn decode(&mut self, data: &[u8]) {
        if let Err(e) = self.decoder.push(data) {
            debug!("decoder rejected {} bytes: {}", data.len(), e);
            self.health.record_decode_failure();
            return;
        }
        self.drain();
    }

    fn drain(&mut self) {
        loop {
            match self.decoder.take() {
                Ok(Some(frame)) => self.present(frame),
                Ok(None) => break,
                Err(e) => {
                    debug!("decode failed: {}", e);
                    self.health.record_decode_failure();
                    break;
                }
            }
        }
    }

    fn flush(&mut self) {
        if let Some(unit) = self.parser.as_mut().and_then(|p| p.finish()) {
            self.decode(&unit);
        }
        match self.decoder.flush() {
            Ok(()) => self.drain(),
            Err(e) => {
                debug!("decoder flush failed: {}", e);
                self.health.record_decode_failure();
            }
        }
    }

    fn present(&mut self, frame: DecodedFrame) {
        match self.surface.present(&frame) {
            Ok(()) => {
                self.frames += 1;
                self.health.record_frame(frame.data.len(), false);
            }
            Err(e) => {
                debug!("failed to present frame {}: {}", frame.pts, e);
                self.health.record_frame_drop();
            }
        }
    }

    /// Flush the decoder unless told otherwise, then release decoder, file
    /// and surface.
    fn close(mut self, failure: Option<String>, flush: bool) -> CloseReport {
        self.state.advance(SessionState::Stopping);

        if flush {
            self.flush();
        }

        let DecodeWorker {
            path,
            reader,
            decoder,
            surface,
            state,
            frames,
            ..
        } = self;
        let bytes = reader.offset;
        drop(decoder);
        drop(reader);
        drop(surface);

        state.advance(SessionState::Closed);
        info!(
            "decode session closed: {} frames presented, {} bytes read from {}",
            frames,
            bytes,
            path.display()
        );

        CloseReport {
            kind: SessionKind::Decode,
            path,
            frames,
            bytes,
            error: failure,
        }
    }
}

/// File in, frames on a surface out.
pub struct DecodeSession {
    path: PathBuf,
    state: StateCell,
    active: Arc<AtomicBool>,
    gate: ReadGate,
    health: Arc<PipelineHealth>,
    worker: Option<JoinHandle<()>>,
}

impl DecodeSession {
    /// Open `path`, the decoder and a surface, then spawn the decode loop.
    ///
    /// Fails with `FileNotFound`, `FileOpenFailed`, `CodecUnavailable`,
    /// `CodecOpenFailed` or `StartFailed`.
    pub fn start(
        path: &Path,
        config: &Config,
        registry: &CodecRegistry,
        gate: ReadGate,
        surfaces: &dyn SurfaceProvider,
        health: Arc<PipelineHealth>,
        on_close: CloseCallback,
    ) -> Result<DecodeSession> {
        let state = StateCell::new();
        state.advance(SessionState::Opening);

        let active = Arc::new(AtomicBool::new(true));
        let worker = match Self::open(path, config, registry, &gate, surfaces, &active) {
            Ok((reader, decoder, parser, surface)) => DecodeWorker {
                path: path.to_path_buf(),
                reader,
                decoder,
                parser,
                surface,
                health: health.clone(),
                state: state.clone(),
                read_chunk_size: config.decoder.read_chunk_size,
                frames: 0,
            },
            Err(e) => {
                state.advance(SessionState::Idle);
                return Err(e);
            }
        };

        state.advance(SessionState::Running {
            started_at: Instant::now(),
        });
        let handle = thread::Builder::new()
            .name("ffcamera-decode".into())
            .spawn(move || worker.run(on_close))
            .map_err(|e| {
                state.advance(SessionState::Stopping);
                state.advance(SessionState::Closed);
                PipelineError::StartFailed(format!("failed to spawn decode thread: {}", e))
            })?;

        Ok(DecodeSession {
            path: path.to_path_buf(),
            state,
            active,
            gate,
            health,
            worker: Some(handle),
        })
    }

    #[allow(clippy::type_complexity)]
    fn open(
        path: &Path,
        config: &Config,
        registry: &CodecRegistry,
        gate: &ReadGate,
        surfaces: &dyn SurfaceProvider,
        active: &Arc<AtomicBool>,
    ) -> Result<(
        ChunkReader,
        Box<dyn VideoDecoder>,
        Option<ElementaryStreamParser>,
        Box<dyn RenderSurface>,
    )> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PipelineError::FileNotFound(path.to_path_buf()),
            _ => PipelineError::file_open(path, e),
        })?;

        let provider = registry.find(config.codec)?;
        let capabilities = provider.capabilities();
        let settings = DecoderSettings {
            pixel_format: PixelFormat::Yuv420p,
            width: config.width,
            height: config.height,
            thread_count: config.decoder.thread_count,
            truncated: capabilities.truncated,
        };
        let decoder = provider.open_decoder(&settings)?;
        let parser = if capabilities.truncated {
            None
        } else {
            debug!("{} decoder needs whole access units, parsing input", provider.id());
            Some(ElementaryStreamParser::new(provider.id()))
        };

        let surface = surfaces
            .create_surface(&config.decoder.window_group, &config.decoder.window_id)
            .map_err(|e| match e {
                PipelineError::StartFailed(_) => e,
                other => PipelineError::StartFailed(other.to_string()),
            })?;

        let reader = ChunkReader {
            file,
            offset: 0,
            gate: gate.clone(),
            active: active.clone(),
            stall_timeout: config.decoder.stall_timeout(),
        };
        Ok((reader, decoder, parser, surface))
    }

    /// Unblock a pending read and let the loop finish. Idempotent.
    pub fn stop(&self) {
        self.active.store(false, Ordering::Release);
        self.gate.stop_reader();
        if self.state.advance(SessionState::Stopping) {
            info!("stopping decode session on {}", self.path.display());
        }
    }

    /// Join the decode thread.
    pub fn wait(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("decode thread panicked");
            }
        }
    }

    /// False once stopped or after reaching the end of a finished file.
    pub fn is_active(&self) -> bool {
        self.state.get().is_running()
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

impl Drop for DecodeSession {
    fn drop(&mut self) {
        self.stop();
        self.wait();
    }
}
