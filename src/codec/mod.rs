//! Video codec providers
//!
//! Encoders are push based (frame in, chunks out) and decoders pull their
//! input through the decode session (bytes in, frames out). Providers are
//! resolved by [`CodecId`] through a [`CodecRegistry`].

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod parser;
pub mod raw;
mod registry;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::capture::{OwnedFrame, PixelFormat};
use crate::error::Result;

pub use parser::ElementaryStreamParser;
pub use registry::CodecRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecId {
    /// Framed, uncompressed YUV420P. Always available.
    RawVideo,
    Mpeg2Video,
    H264,
}

impl CodecId {
    /// Preferred codec for this build: MPEG-2 when FFmpeg is linked in.
    pub fn default_for_build() -> Self {
        if cfg!(feature = "ffmpeg") {
            CodecId::Mpeg2Video
        } else {
            CodecId::RawVideo
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CodecId::RawVideo => "rawvideo",
            CodecId::Mpeg2Video => "mpeg2video",
            CodecId::H264 => "h264",
        }
    }

    /// File extension of the elementary stream.
    pub fn extension(&self) -> &'static str {
        match self {
            CodecId::RawVideo => "rvf",
            CodecId::Mpeg2Video => "mpg",
            CodecId::H264 => "h264",
        }
    }
}

impl std::fmt::Display for CodecId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for CodecId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" | "rawvideo" => Ok(CodecId::RawVideo),
            "mpeg2" | "mpeg2video" => Ok(CodecId::Mpeg2Video),
            "h264" => Ok(CodecId::H264),
            other => Err(format!("unknown codec '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpace {
    Smpte170m,
    Bt709,
}

impl ColorSpace {
    pub fn name(&self) -> &'static str {
        match self {
            ColorSpace::Smpte170m => "smpte170m",
            ColorSpace::Bt709 => "bt709",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub bit_rate: u64,
    pub frame_rate: u32,
    pub gop_size: u32,
    pub thread_count: u32,
    pub color_space: ColorSpace,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecoderSettings {
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub thread_count: u32,
    /// Input may end in the middle of a frame.
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// The decoder accepts arbitrary byte ranges and reassembles frames itself.
    pub truncated: bool,
}

/// Bytes produced by an encoder.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub data: Bytes,
    pub keyframe: bool,
}

/// Packed YUV420P picture produced by a decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pts: i64,
}

pub trait VideoEncoder: Send {
    fn push(&mut self, frame: &OwnedFrame) -> Result<()>;

    /// Next encoded chunk, if one is ready.
    fn take(&mut self) -> Result<Option<EncodedChunk>>;

    /// Signal end of input so buffered frames come out of `take`.
    fn flush(&mut self) -> Result<()>;
}

pub trait VideoDecoder: Send {
    fn push(&mut self, data: &[u8]) -> Result<()>;

    /// Next decoded frame, if one is ready.
    fn take(&mut self) -> Result<Option<DecodedFrame>>;

    fn flush(&mut self) -> Result<()>;
}

pub trait CodecProvider: Send + Sync {
    fn id(&self) -> CodecId;

    /// Decoder capabilities.
    fn capabilities(&self) -> Capabilities;

    fn open_encoder(&self, settings: &EncoderSettings) -> Result<Box<dyn VideoEncoder>>;

    fn open_decoder(&self, settings: &DecoderSettings) -> Result<Box<dyn VideoDecoder>>;
}
