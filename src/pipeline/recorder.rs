//! Camera, recording and playback wired together
//!
//! The recorder owns at most one camera, one encode session and one decode
//! session. While recording, the decode session reads the file the encode
//! session is writing (live preview) and both share one [`ReadGate`].

use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::capture::{
    CameraGuard, CameraProvider, CameraUnit, ViewfinderSettings, Viewfinder,
};
use crate::codec::CodecRegistry;
use crate::config::Config;
use crate::display::SurfaceProvider;
use crate::error::{PipelineError, Result};
use crate::pipeline::decode::DecodeSession;
use crate::pipeline::encode::EncodeSession;
use crate::pipeline::gate::ReadGate;
use crate::pipeline::health::{HealthSummary, PipelineHealth};
use crate::pipeline::state::SessionState;
use crate::pipeline::types::{CloseCallback, CloseReport};

const STALL_THRESHOLD: Duration = Duration::from_secs(2);

/// Point-in-time view of the recorder.
#[derive(Debug, Clone)]
pub struct RecorderStatus {
    pub camera: Option<CameraUnit>,
    pub recording: Option<SessionState>,
    pub playback: Option<SessionState>,
    pub fps: usize,
    pub encode: Option<HealthSummary>,
    pub decode: Option<HealthSummary>,
    /// Recording, but nothing was encoded for a while.
    pub stalled: bool,
}

impl std::fmt::Display for RecorderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.camera {
            Some(unit) => write!(f, "camera {} at {} fps", unit, self.fps)?,
            None => write!(f, "camera closed")?,
        }
        if let (Some(state), Some(health)) = (&self.recording, &self.encode) {
            write!(f, "; recording {}: {}", state, health)?;
            if self.stalled {
                write!(f, " (stalled)")?;
            }
        }
        if let (Some(state), Some(health)) = (&self.playback, &self.decode) {
            write!(f, "; playback {}: {}", state, health)?;
        }
        Ok(())
    }
}

pub struct Recorder {
    config: Config,
    registry: Arc<CodecRegistry>,
    cameras: Arc<dyn CameraProvider>,
    surfaces: Arc<dyn SurfaceProvider>,
    viewfinder: Arc<Viewfinder>,
    camera: Option<CameraGuard>,
    encode: Option<EncodeSession>,
    decode: Option<DecodeSession>,
    reports: Arc<Mutex<Vec<CloseReport>>>,
}

fn device_io(e: PipelineError) -> PipelineError {
    match e {
        PipelineError::DeviceIo(_) => e,
        other => PipelineError::DeviceIo(other.to_string()),
    }
}

impl Recorder {
    pub fn new(
        config: Config,
        registry: Arc<CodecRegistry>,
        cameras: Arc<dyn CameraProvider>,
        surfaces: Arc<dyn SurfaceProvider>,
    ) -> Self {
        let viewfinder = Arc::new(Viewfinder::new(config.camera_format));
        Self {
            config,
            registry,
            cameras,
            surfaces,
            viewfinder,
            camera: None,
            encode: None,
            decode: None,
            reports: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open a camera and start its viewfinder.
    pub fn start_camera(&mut self, unit: CameraUnit) -> Result<()> {
        if let Some(camera) = &self.camera {
            warn!("{} camera already open", camera.unit());
            return Err(PipelineError::ResourceBusy("camera"));
        }

        let camera = self.cameras.open(unit).map_err(|e| {
            error!("failed to open {} camera: {}", unit, e);
            device_io(e)
        })?;
        let mut camera = CameraGuard::new(camera);

        let settings = ViewfinderSettings {
            width: self.config.width,
            height: self.config.height,
            frame_rate: self.config.frame_rate,
            format: self.config.camera_format,
            window_group: self.config.decoder.window_group.clone(),
            window_id: String::from("viewfinder"),
        };
        self.viewfinder.reset();
        let viewfinder = self.viewfinder.clone();
        camera
            .start_viewfinder(
                &settings,
                Box::new(move |frame| {
                    viewfinder.on_frame(frame);
                }),
            )
            .map_err(|e| {
                error!("failed to start {} viewfinder: {}", unit, e);
                device_io(e)
            })?;

        info!(
            "{} camera started ({}x{} {} @ {} fps)",
            unit, settings.width, settings.height, settings.format, settings.frame_rate
        );
        self.camera = Some(camera);
        Ok(())
    }

    /// Close the camera. Refused while recording.
    pub fn stop_camera(&mut self) -> Result<()> {
        if self.is_recording() {
            return Err(PipelineError::InvalidState(
                "stop recording before closing the camera",
            ));
        }
        if self.camera.take().is_none() {
            debug!("no camera to stop");
        }
        Ok(())
    }

    /// Record the viewfinder to the output file with a live preview.
    pub fn start_recording(&mut self) -> Result<()> {
        self.reap();
        if self.camera.is_none() {
            return Err(PipelineError::InvalidState("camera not open"));
        }
        if self.encode.is_some() {
            return Err(PipelineError::ResourceBusy("recording"));
        }

        // The encoder replaces the file playback is reading.
        self.stop_playback();

        let gate = ReadGate::new();
        let encode = EncodeSession::start(
            &self.config,
            &self.registry,
            gate.clone(),
            Arc::new(PipelineHealth::new()),
            self.close_callback(),
        )
        .inspect_err(|e| error!("failed to start recording: {}", e))?;
        self.viewfinder.attach(encode.input());
        self.encode = Some(encode);

        match DecodeSession::start(
            &self.config.output_path,
            &self.config,
            &self.registry,
            gate,
            &*self.surfaces,
            Arc::new(PipelineHealth::new()),
            self.close_callback(),
        ) {
            Ok(preview) => self.decode = Some(preview),
            Err(e) => warn!("recording without preview: {}", e),
        }

        info!("recording to {}", self.config.output_path.display());
        Ok(())
    }

    /// Stop recording. The preview drains the rest of the file and ends.
    pub fn stop_recording(&mut self) {
        self.viewfinder.detach();
        if let Some(mut encode) = self.encode.take() {
            encode.stop();
            encode.wait();
        }
    }

    /// Play the output file on its own; it ends at end of file.
    pub fn start_playback(&mut self) -> Result<()> {
        self.reap();
        if self.decode.is_some() {
            return Err(PipelineError::ResourceBusy("playback"));
        }

        let session = DecodeSession::start(
            &self.config.output_path,
            &self.config,
            &self.registry,
            ReadGate::new(),
            &*self.surfaces,
            Arc::new(PipelineHealth::new()),
            self.close_callback(),
        )
        .inspect_err(|e| error!("failed to start playback: {}", e))?;
        self.decode = Some(session);
        Ok(())
    }

    pub fn stop_playback(&mut self) {
        if let Some(mut decode) = self.decode.take() {
            decode.stop();
            decode.wait();
        }
    }

    /// Stop a running decode session or start playback. Returns whether
    /// playback is now running.
    pub fn toggle_playback(&mut self) -> Result<bool> {
        self.reap();
        if self.decode.is_some() {
            self.stop_playback();
            Ok(false)
        } else {
            self.start_playback()?;
            Ok(true)
        }
    }

    pub fn is_recording(&self) -> bool {
        self.encode
            .as_ref()
            .is_some_and(|session| session.state().is_active())
    }

    pub fn is_playing(&self) -> bool {
        self.decode
            .as_ref()
            .is_some_and(|session| session.state().is_active())
    }

    pub fn has_camera(&self) -> bool {
        self.camera.is_some()
    }

    /// Frames the viewfinder accepted during the last second.
    pub fn fps(&self) -> usize {
        self.viewfinder.fps()
    }

    pub fn status(&self) -> RecorderStatus {
        RecorderStatus {
            camera: self.camera.as_ref().map(CameraGuard::unit),
            recording: self.encode.as_ref().map(EncodeSession::state),
            playback: self.decode.as_ref().map(DecodeSession::state),
            fps: self.viewfinder.fps(),
            encode: self.encode.as_ref().map(|s| s.health().summary()),
            decode: self.decode.as_ref().map(|s| s.health().summary()),
            stalled: self.encode.as_ref().is_some_and(|s| {
                s.state().is_running() && s.health().is_stalled(STALL_THRESHOLD)
            }),
        }
    }

    /// Reports of every session closed so far, oldest first.
    pub fn close_reports(&self) -> Vec<CloseReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop everything and join all workers.
    pub fn shutdown(&mut self) {
        self.stop_recording();
        self.stop_playback();
        self.camera.take();
    }

    fn close_callback(&self) -> CloseCallback {
        let reports = self.reports.clone();
        Box::new(move |report| {
            match &report.error {
                Some(e) => warn!("{} session closed with error: {}", report.kind, e),
                None => debug!("{} session closed", report.kind),
            }
            reports
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(report);
        })
    }

    /// Drop sessions whose worker already finished.
    fn reap(&mut self) {
        if self.encode.as_ref().is_some_and(|s| s.state().is_closed()) {
            self.viewfinder.detach();
            self.encode = None;
        }
        if self.decode.as_ref().is_some_and(|s| s.state().is_closed()) {
            self.decode = None;
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{OwnedFrame, PixelFormat, SyntheticCameraProvider};
    use crate::codec::{CodecId, EncoderSettings};
    use crate::display::CollectingSurfaceProvider;
    use crate::pipeline::types::SessionKind;
    use std::io::{BufWriter, Write};
    use std::path::Path;
    use std::thread;
    use std::time::{Duration, Instant};

    fn config(dir: &Path) -> Config {
        Config {
            output_path: dir.join("VID_TEST.rvf"),
            width: 16,
            height: 8,
            frame_rate: 60,
            codec: CodecId::RawVideo,
            ..Config::default()
        }
    }

    fn recorder(config: Config, surfaces: &CollectingSurfaceProvider) -> Recorder {
        Recorder::new(
            config,
            Arc::new(CodecRegistry::new()),
            Arc::new(SyntheticCameraProvider::new()),
            Arc::new(surfaces.clone()),
        )
    }

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    /// Encode `frames` grey frames straight into the output file.
    fn write_recording(config: &Config, frames: u64) {
        let provider = CodecRegistry::new().find(config.codec).unwrap();
        let mut encoder = provider
            .open_encoder(&EncoderSettings {
                pixel_format: PixelFormat::Yuv420p,
                width: config.width,
                height: config.height,
                bit_rate: config.encoder.bit_rate,
                frame_rate: config.frame_rate,
                gop_size: config.encoder.gop_size,
                thread_count: config.encoder.thread_count,
                color_space: config.encoder.color_space,
            })
            .unwrap();
        let mut file = BufWriter::new(std::fs::File::create(&config.output_path).unwrap());
        let data = vec![0x80; PixelFormat::Yuv420p.frame_size(config.width, config.height)];
        for pts in 0..frames {
            let frame = OwnedFrame {
                data: data.clone(),
                width: config.width,
                height: config.height,
                pts: pts as i64 * 16_667,
            };
            encoder.push(&frame).unwrap();
            while let Some(chunk) = encoder.take().unwrap() {
                file.write_all(&chunk.data).unwrap();
            }
        }
        file.flush().unwrap();
    }

    fn report(recorder: &Recorder, kind: SessionKind) -> Vec<CloseReport> {
        recorder
            .close_reports()
            .into_iter()
            .filter(|r| r.kind == kind)
            .collect()
    }

    #[test]
    fn test_preview_sees_every_recorded_frame_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let surfaces = CollectingSurfaceProvider::new();
        let mut recorder = recorder(config(dir.path()), &surfaces);

        recorder.start_camera(CameraUnit::Rear).unwrap();
        recorder.start_recording().unwrap();
        assert!(recorder.is_recording());
        assert!(recorder.is_playing());

        assert!(wait_until(|| surfaces.frame_count() >= 5));
        recorder.stop_recording();
        assert!(wait_until(|| report(&recorder, SessionKind::Decode).len() == 1));

        let encoded = report(&recorder, SessionKind::Encode);
        let decoded = report(&recorder, SessionKind::Decode);
        assert_eq!(encoded.len(), 1);
        assert!(encoded[0].error.is_none());
        assert_eq!(decoded[0].bytes, encoded[0].bytes);
        assert_eq!(decoded[0].frames, encoded[0].frames);
        assert_eq!(
            std::fs::metadata(&recorder.config().output_path).unwrap().len(),
            encoded[0].bytes
        );

        let frames = surfaces.frames();
        assert_eq!(frames.len() as u64, encoded[0].frames);
        assert!(frames.windows(2).all(|w| w[0].pts < w[1].pts));
        assert!(frames.iter().all(|f| f.width == 16 && f.height == 8));
        assert!(!recorder.is_playing());
    }

    #[test]
    fn test_stop_recording_twice_reports_once() {
        let dir = tempfile::tempdir().unwrap();
        let surfaces = CollectingSurfaceProvider::new();
        let mut recorder = recorder(config(dir.path()), &surfaces);

        recorder.start_camera(CameraUnit::Front).unwrap();
        recorder.start_recording().unwrap();
        thread::sleep(Duration::from_millis(50));
        recorder.stop_recording();
        recorder.stop_recording();
        recorder.shutdown();

        assert_eq!(report(&recorder, SessionKind::Encode).len(), 1);
        assert_eq!(report(&recorder, SessionKind::Decode).len(), 1);
    }

    #[test]
    fn test_second_sessions_are_busy() {
        let dir = tempfile::tempdir().unwrap();
        let surfaces = CollectingSurfaceProvider::new();
        let mut recorder = recorder(config(dir.path()), &surfaces);

        recorder.start_camera(CameraUnit::Rear).unwrap();
        assert!(matches!(
            recorder.start_camera(CameraUnit::Front),
            Err(PipelineError::ResourceBusy("camera"))
        ));

        recorder.start_recording().unwrap();
        assert!(matches!(
            recorder.start_recording(),
            Err(PipelineError::ResourceBusy("recording"))
        ));
        assert!(matches!(
            recorder.start_playback(),
            Err(PipelineError::ResourceBusy("playback"))
        ));
        assert!(matches!(
            recorder.stop_camera(),
            Err(PipelineError::InvalidState(_))
        ));

        recorder.stop_recording();
        recorder.stop_camera().unwrap();
        assert!(!recorder.has_camera());
    }

    #[test]
    fn test_recording_requires_camera() {
        let dir = tempfile::tempdir().unwrap();
        let surfaces = CollectingSurfaceProvider::new();
        let mut recorder = recorder(config(dir.path()), &surfaces);

        assert!(matches!(
            recorder.start_recording(),
            Err(PipelineError::InvalidState(_))
        ));
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_playback_of_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let surfaces = CollectingSurfaceProvider::new();
        let mut recorder = recorder(config(dir.path()), &surfaces);

        assert!(matches!(
            recorder.toggle_playback(),
            Err(PipelineError::FileNotFound(_))
        ));
        assert!(!recorder.is_playing());
        assert!(surfaces.windows().is_empty());
    }

    #[test]
    fn test_toggle_playback_replays_recording() {
        let dir = tempfile::tempdir().unwrap();
        let surfaces = CollectingSurfaceProvider::new();
        let mut recorder = recorder(config(dir.path()), &surfaces);

        recorder.start_camera(CameraUnit::Rear).unwrap();
        recorder.start_recording().unwrap();
        assert!(wait_until(|| surfaces.frame_count() >= 3));

        // toggling during a recording stops the preview only
        assert!(!recorder.toggle_playback().unwrap());
        assert!(!recorder.is_playing());
        assert!(recorder.is_recording());

        recorder.stop_recording();
        let recorded = report(&recorder, SessionKind::Encode)[0].frames;
        let previewed = report(&recorder, SessionKind::Decode)[0].frames;
        assert!(previewed <= recorded);

        assert!(recorder.toggle_playback().unwrap());
        assert!(wait_until(|| report(&recorder, SessionKind::Decode).len() == 2));
        assert_eq!(report(&recorder, SessionKind::Decode)[1].frames, recorded);
        assert_eq!(surfaces.frame_count() as u64, previewed + recorded);
        assert_eq!(surfaces.windows().len(), 2);
    }

    #[test]
    fn test_toggle_playback_stops_long_recording_promptly() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.decoder.read_chunk_size = 1;
        let recorded = 20_000;
        write_recording(&config, recorded);
        let file_len = std::fs::metadata(&config.output_path).unwrap().len();

        let surfaces = CollectingSurfaceProvider::new();
        let mut recorder = recorder(config, &surfaces);
        assert!(recorder.toggle_playback().unwrap());
        thread::sleep(Duration::from_millis(20));

        let toggled = Instant::now();
        assert!(!recorder.toggle_playback().unwrap());
        assert!(toggled.elapsed() < Duration::from_secs(1));
        assert!(!recorder.is_playing());

        let played = report(&recorder, SessionKind::Decode);
        assert_eq!(played.len(), 1);
        assert!(played[0].frames < recorded);
        assert!(played[0].bytes < file_len);
        assert_eq!(surfaces.frame_count() as u64, played[0].frames);
    }

    #[test]
    fn test_failing_preview_keeps_recording() {
        let dir = tempfile::tempdir().unwrap();
        let surfaces = CollectingSurfaceProvider::failing();
        let mut recorder = recorder(config(dir.path()), &surfaces);

        recorder.start_camera(CameraUnit::Rear).unwrap();
        recorder.start_recording().unwrap();
        assert!(recorder.is_recording());
        assert!(!recorder.is_playing());

        assert!(wait_until(|| recorder
            .status()
            .encode
            .is_some_and(|h| h.frames > 0)));
        recorder.stop_recording();
        assert!(std::fs::metadata(&recorder.config().output_path).unwrap().len() > 0);
    }

    #[test]
    fn test_camera_failure_is_device_io() {
        let dir = tempfile::tempdir().unwrap();
        let surfaces = CollectingSurfaceProvider::new();
        let config = Config {
            frame_rate: 0,
            ..config(dir.path())
        };
        let mut recorder = recorder(config, &surfaces);

        assert!(matches!(
            recorder.start_camera(CameraUnit::Rear),
            Err(PipelineError::DeviceIo(_))
        ));
        assert!(!recorder.has_camera());
    }

    #[test]
    fn test_status_reports_camera_and_fps() {
        let dir = tempfile::tempdir().unwrap();
        let surfaces = CollectingSurfaceProvider::new();
        let mut recorder = recorder(config(dir.path()), &surfaces);

        recorder.start_camera(CameraUnit::Front).unwrap();
        assert!(wait_until(|| recorder.fps() > 5));
        let status = recorder.status();
        assert_eq!(status.camera, Some(CameraUnit::Front));
        assert!(status.recording.is_none());
        assert!(status.to_string().starts_with("camera front"));
    }
}
