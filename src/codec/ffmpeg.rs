//! FFmpeg backed MPEG-2 and H.264 codecs.

use ac_ffmpeg::codec::video::{self, VideoDecoder as AvDecoder, VideoEncoder as AvEncoder};
use ac_ffmpeg::codec::{Decoder, Encoder};
use ac_ffmpeg::packet::PacketMut;
use ac_ffmpeg::time::{TimeBase, Timestamp};
use bytes::Bytes;
use log::{debug, info};

use super::{
    Capabilities, CodecId, CodecProvider, DecodedFrame, DecoderSettings, EncodedChunk,
    EncoderSettings, VideoDecoder, VideoEncoder,
};
use crate::capture::OwnedFrame;
use crate::error::{PipelineError, Result};

/// Encoder fallback chain per codec: hardware first, then software.
const H264_ENCODERS: &[(&str, &[(&str, &str)])] = &[
    ("h264_nvenc", &[("preset", "p2"), ("tune", "ll"), ("zerolatency", "1")]),
    ("h264_qsv", &[("preset", "fast"), ("low_power", "0")]),
    (
        "libx264",
        &[("preset", "fast"), ("tune", "zerolatency"), ("bframes", "0")],
    ),
];

const MPEG2_ENCODERS: &[(&str, &[(&str, &str)])] = &[("mpeg2video", &[])];

fn codec_error(e: ac_ffmpeg::Error) -> PipelineError {
    PipelineError::Codec(e.to_string())
}

pub struct FfmpegProvider {
    id: CodecId,
}

impl FfmpegProvider {
    pub fn new(id: CodecId) -> Self {
        Self { id }
    }

    fn encoder_chain(&self) -> &'static [(&'static str, &'static [(&'static str, &'static str)])] {
        match self.id {
            CodecId::H264 => H264_ENCODERS,
            _ => MPEG2_ENCODERS,
        }
    }
}

impl CodecProvider for FfmpegProvider {
    fn id(&self) -> CodecId {
        self.id
    }

    /// Decoding goes through the elementary stream parser.
    fn capabilities(&self) -> Capabilities {
        Capabilities { truncated: false }
    }

    fn open_encoder(&self, settings: &EncoderSettings) -> Result<Box<dyn VideoEncoder>> {
        let time_base = TimeBase::new(1, settings.frame_rate.max(1) as i32);
        let pixel_format = video::frame::get_pixel_format(settings.pixel_format.name());
        let (w, h) = (settings.width as usize, settings.height as usize);

        let mut last_error = None;
        for (codec, options) in self.encoder_chain() {
            let mut builder = match AvEncoder::builder(codec) {
                Ok(b) => b,
                Err(e) => {
                    debug!("Encoder {} not available, skipping: {}", codec, e);
                    last_error = Some(e.to_string());
                    continue;
                }
            };
            builder = builder
                .pixel_format(pixel_format)
                .width(w)
                .height(h)
                .time_base(time_base)
                .set_option("b", settings.bit_rate)
                .set_option("g", settings.gop_size)
                .set_option("threads", settings.thread_count)
                .set_option("colorspace", settings.color_space.name());
            for (k, v) in *options {
                builder = builder.set_option(k, v);
            }
            match builder.build() {
                Ok(encoder) => {
                    info!("Using encoder: {}", codec);
                    return Ok(Box::new(FfmpegEncoder {
                        encoder,
                        pixel_format,
                        time_base,
                        w,
                        h,
                        frame_index: 0,
                    }));
                }
                Err(e) => {
                    debug!("Encoder {} failed to initialize: {}", codec, e);
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(PipelineError::CodecOpenFailed(last_error.unwrap_or_else(|| {
            format!("no encoder for {}", self.id)
        })))
    }

    fn open_decoder(&self, settings: &DecoderSettings) -> Result<Box<dyn VideoDecoder>> {
        let time_base = TimeBase::new(1, 90_000);
        let decoder = AvDecoder::builder(self.id.name())
            .and_then(|b| {
                b.time_base(time_base)
                    .set_option("threads", settings.thread_count)
                    .build()
            })
            .map_err(|e| PipelineError::CodecOpenFailed(e.to_string()))?;

        Ok(Box::new(FfmpegDecoder {
            decoder,
            time_base,
            packet_count: 0,
        }))
    }
}

pub struct FfmpegEncoder {
    encoder: AvEncoder,
    pixel_format: video::frame::PixelFormat,
    time_base: TimeBase,
    w: usize,
    h: usize,
    frame_index: i64,
}

unsafe impl Send for FfmpegEncoder {}

impl VideoEncoder for FfmpegEncoder {
    fn push(&mut self, frame: &OwnedFrame) -> Result<()> {
        if frame.width as usize != self.w || frame.height as usize != self.h {
            return Err(PipelineError::InvalidFrame(format!(
                "expected {}x{}, got {}x{}",
                self.w, self.h, frame.width, frame.height
            )));
        }

        let mut av_frame = video::VideoFrameMut::black(self.pixel_format, self.w, self.h)
            .with_time_base(self.time_base)
            .with_pts(Timestamp::new(self.frame_index, self.time_base));
        self.frame_index += 1;

        let (y, u, v) = frame.planes();
        let (cw, ch) = (self.w.div_ceil(2), self.h.div_ceil(2));
        {
            let mut planes = av_frame.planes_mut();
            write_plane(planes[0].data_mut(), y, self.w, self.h);
            write_plane(planes[1].data_mut(), u, cw, ch);
            write_plane(planes[2].data_mut(), v, cw, ch);
        }

        self.encoder.push(av_frame.freeze()).map_err(codec_error)
    }

    fn take(&mut self) -> Result<Option<EncodedChunk>> {
        Ok(self.encoder.take().map_err(codec_error)?.map(|packet| EncodedChunk {
            data: Bytes::copy_from_slice(packet.data()),
            keyframe: packet.is_key(),
        }))
    }

    fn flush(&mut self) -> Result<()> {
        self.encoder.flush().map_err(codec_error)
    }
}

/// Copy a packed plane into an FFmpeg plane whose rows may be padded.
fn write_plane(destination: &mut [u8], source: &[u8], width: usize, rows: usize) {
    if rows == 0 {
        return;
    }
    let line_size = destination.len() / rows;
    if line_size == width {
        destination[..width * rows].copy_from_slice(&source[..width * rows]);
        return;
    }
    for r in 0..rows {
        destination[r * line_size..r * line_size + width]
            .copy_from_slice(&source[r * width..(r + 1) * width]);
    }
}

pub struct FfmpegDecoder {
    decoder: AvDecoder,
    time_base: TimeBase,
    packet_count: i64,
}

unsafe impl Send for FfmpegDecoder {}

impl VideoDecoder for FfmpegDecoder {
    fn push(&mut self, data: &[u8]) -> Result<()> {
        self.packet_count += 1;
        let packet = PacketMut::from(data)
            .with_pts(Timestamp::new(self.packet_count, self.time_base))
            .freeze();
        self.decoder.push(packet).map_err(codec_error)
    }

    fn take(&mut self) -> Result<Option<DecodedFrame>> {
        let Some(frame) = self.decoder.take().map_err(codec_error)? else {
            return Ok(None);
        };

        let (w, h) = (frame.width(), frame.height());
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        let planes = frame.planes();
        let mut data = vec![0u8; w * h + 2 * cw * ch];
        {
            let (y_dst, chroma) = data.split_at_mut(w * h);
            let (u_dst, v_dst) = chroma.split_at_mut(cw * ch);
            extract_plane(y_dst, planes[0].data(), planes[0].line_size(), w, h);
            extract_plane(u_dst, planes[1].data(), planes[1].line_size(), cw, ch);
            extract_plane(v_dst, planes[2].data(), planes[2].line_size(), cw, ch);
        }

        Ok(Some(DecodedFrame {
            data,
            width: w as u32,
            height: h as u32,
            pts: frame.pts().timestamp(),
        }))
    }

    fn flush(&mut self) -> Result<()> {
        self.decoder.flush().map_err(codec_error)
    }
}

/// Extract a plane from padded source to contiguous destination.
fn extract_plane(dst: &mut [u8], src: &[u8], stride: usize, width: usize, height: usize) {
    // Fast path: No stride padding
    if stride == width && src.len() >= width * height {
        dst.copy_from_slice(&src[..width * height]);
        return;
    }

    for r in 0..height {
        let src_start = r * stride;
        let dst_start = r * width;
        if src_start + width > src.len() || dst_start + width > dst.len() {
            break;
        }
        dst[dst_start..dst_start + width].copy_from_slice(&src[src_start..src_start + width]);
    }
}
