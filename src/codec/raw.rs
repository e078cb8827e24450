//! Uncompressed YUV420P codec
//!
//! Every frame becomes one self-describing chunk:
//!
//! ```text
//! "RVF1" | width u32 | height u32 | pts i64 | length u32 | YUV420P bytes
//! ```
//!
//! All integers are big endian. The decoder reassembles chunks from any
//! byte ranges, so it tolerates truncated input.

use bytes::{Buf, BufMut, BytesMut};
use log::{debug, warn};
use std::collections::VecDeque;

use super::{
    Capabilities, CodecId, CodecProvider, DecodedFrame, DecoderSettings, EncodedChunk,
    EncoderSettings, VideoDecoder, VideoEncoder,
};
use crate::capture::{OwnedFrame, PixelFormat};
use crate::error::{PipelineError, Result};

const MAGIC: &[u8; 4] = b"RVF1";
const HEADER_LEN: usize = 24;

pub struct RawVideoProvider;

impl CodecProvider for RawVideoProvider {
    fn id(&self) -> CodecId {
        CodecId::RawVideo
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { truncated: true }
    }

    fn open_encoder(&self, settings: &EncoderSettings) -> Result<Box<dyn VideoEncoder>> {
        if settings.pixel_format != PixelFormat::Yuv420p {
            return Err(PipelineError::CodecOpenFailed(format!(
                "rawvideo encodes yuv420p, not {}",
                settings.pixel_format
            )));
        }
        if settings.width == 0 || settings.height == 0 {
            return Err(PipelineError::CodecOpenFailed(format!(
                "invalid dimensions {}x{}",
                settings.width, settings.height
            )));
        }
        Ok(Box::new(RawVideoEncoder {
            width: settings.width,
            height: settings.height,
            pending: VecDeque::new(),
        }))
    }

    fn open_decoder(&self, settings: &DecoderSettings) -> Result<Box<dyn VideoDecoder>> {
        if settings.pixel_format != PixelFormat::Yuv420p {
            return Err(PipelineError::CodecOpenFailed(format!(
                "rawvideo decodes to yuv420p, not {}",
                settings.pixel_format
            )));
        }
        Ok(Box::new(RawVideoDecoder {
            buffer: BytesMut::new(),
        }))
    }
}

pub struct RawVideoEncoder {
    width: u32,
    height: u32,
    pending: VecDeque<EncodedChunk>,
}

impl VideoEncoder for RawVideoEncoder {
    fn push(&mut self, frame: &OwnedFrame) -> Result<()> {
        let expected = PixelFormat::Yuv420p.frame_size(self.width, self.height);
        if frame.width != self.width || frame.height != self.height || frame.data.len() != expected
        {
            return Err(PipelineError::InvalidFrame(format!(
                "expected {}x{} ({} bytes), got {}x{} ({} bytes)",
                self.width,
                self.height,
                expected,
                frame.width,
                frame.height,
                frame.data.len()
            )));
        }

        let mut chunk = BytesMut::with_capacity(HEADER_LEN + frame.data.len());
        chunk.put_slice(MAGIC);
        chunk.put_u32(frame.width);
        chunk.put_u32(frame.height);
        chunk.put_i64(frame.pts);
        chunk.put_u32(frame.data.len() as u32);
        chunk.put_slice(&frame.data);

        self.pending.push_back(EncodedChunk {
            data: chunk.freeze(),
            keyframe: true,
        });
        Ok(())
    }

    fn take(&mut self) -> Result<Option<EncodedChunk>> {
        Ok(self.pending.pop_front())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct RawVideoDecoder {
    buffer: BytesMut,
}

impl RawVideoDecoder {
    /// Drop bytes until the buffer starts with the magic, keeping a possible
    /// partial magic at the end.
    fn resync(&mut self) {
        let skip = self.buffer[1..]
            .windows(MAGIC.len())
            .position(|w| w == MAGIC)
            .map(|p| p + 1)
            .unwrap_or_else(|| self.buffer.len().saturating_sub(MAGIC.len() - 1));
        warn!("rawvideo: lost sync, skipping {} bytes", skip);
        self.buffer.advance(skip);
    }
}

impl VideoDecoder for RawVideoDecoder {
    fn push(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    fn take(&mut self) -> Result<Option<DecodedFrame>> {
        loop {
            if self.buffer.len() < MAGIC.len() {
                return Ok(None);
            }
            if &self.buffer[..MAGIC.len()] != MAGIC {
                self.resync();
                continue;
            }
            if self.buffer.len() < HEADER_LEN {
                return Ok(None);
            }

            let mut header = &self.buffer[MAGIC.len()..HEADER_LEN];
            let width = header.get_u32();
            let height = header.get_u32();
            let pts = header.get_i64();
            let len = header.get_u32() as usize;

            if PixelFormat::Yuv420p.checked_frame_size(width, height) != Some(len) {
                self.buffer.advance(MAGIC.len());
                return Err(PipelineError::Codec(format!(
                    "rawvideo: {} byte payload does not match {}x{}",
                    len, width, height
                )));
            }
            if self.buffer.len() < HEADER_LEN + len {
                return Ok(None);
            }

            self.buffer.advance(HEADER_LEN);
            let data = self.buffer.split_to(len).to_vec();
            return Ok(Some(DecodedFrame {
                data,
                width,
                height,
                pts,
            }));
        }
    }

    fn flush(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            debug!(
                "rawvideo: discarding {} trailing bytes of an incomplete frame",
                self.buffer.len()
            );
            self.buffer.clear();
        }
        Ok(())
    }
}
