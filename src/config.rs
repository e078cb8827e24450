use crate::capture::PixelFormat;
use crate::codec::{CodecId, ColorSpace};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const VIDEO_WIDTH: u32 = 288;
pub const VIDEO_HEIGHT: u32 = 512;
pub const FRAME_RATE: u32 = 30;

/// Recorder configuration.
///
/// Every field has a default, so a JSON file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// File shared by the encoder (writer) and the preview decoder (reader).
    pub output_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    /// Only frames of this format are accepted from the camera.
    pub camera_format: PixelFormat,
    pub codec: CodecId,
    pub encoder: EncoderConfig,
    pub decoder: DecoderConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub bit_rate: u64,
    pub gop_size: u32,
    pub thread_count: u32,
    pub color_space: ColorSpace,
    /// Frames buffered between the camera callback and the encode loop.
    pub queue_depth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub thread_count: u32,
    pub window_group: String,
    pub window_id: String,
    /// Upper bound of a single read request.
    pub read_chunk_size: usize,
    /// Give up waiting for the writer after this long. `None` waits until stopped.
    pub stall_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        let codec = CodecId::default_for_build();
        Config {
            output_path: std::env::temp_dir().join(format!("VID_TEST.{}", codec.extension())),
            width: VIDEO_WIDTH,
            height: VIDEO_HEIGHT,
            frame_rate: FRAME_RATE,
            camera_format: PixelFormat::Nv12,
            codec,
            encoder: EncoderConfig::default(),
            decoder: DecoderConfig::default(),
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        EncoderConfig {
            bit_rate: 400_000,
            gop_size: 15,
            thread_count: 2,
            color_space: ColorSpace::Smpte170m,
            queue_depth: 8,
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        DecoderConfig {
            thread_count: 2,
            window_group: format!("{}-group", app_name()),
            window_id: String::from("preview"),
            read_chunk_size: 64 * 1024,
            stall_timeout_ms: None,
        }
    }
}

impl Config {
    /// Load a configuration file, falling back to defaults for missing keys.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&raw)?;
        Ok(config)
    }
}

impl DecoderConfig {
    pub fn stall_timeout(&self) -> Option<Duration> {
        self.stall_timeout_ms.map(Duration::from_millis)
    }
}

/// Returns a version as specified in Cargo.toml
pub fn app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}
