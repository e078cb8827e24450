//! Pixel layout conversion into packed YUV420P.

use super::{FrameBuffer, PixelFormat, Plane};
use crate::error::{PipelineError, Result};

/// Pack `frame` into planar YUV 4:2:0 inside `dst`.
///
/// `dst` is resized to the packed size. NV12 chroma is de-interleaved,
/// YUV420P planes are copied with their stride padding stripped.
pub fn to_yuv420p(frame: &FrameBuffer<'_>, dst: &mut Vec<u8>) -> Result<()> {
    let w = frame.width as usize;
    let h = frame.height as usize;
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    let y_size = w * h;
    let c_size = cw * ch;
    dst.resize(y_size + 2 * c_size, 0);

    match (frame.format, frame.planes) {
        (PixelFormat::Nv12, [y, uv, ..]) => {
            let (y_dst, chroma) = dst.split_at_mut(y_size);
            let (u_dst, v_dst) = chroma.split_at_mut(c_size);
            copy_plane(y_dst, *y, w, h)?;
            split_uv(u_dst, v_dst, *uv, cw, ch)
        }
        (PixelFormat::Yuv420p, [y, u, v, ..]) => {
            let (y_dst, chroma) = dst.split_at_mut(y_size);
            let (u_dst, v_dst) = chroma.split_at_mut(c_size);
            copy_plane(y_dst, *y, w, h)?;
            copy_plane(u_dst, *u, cw, ch)?;
            copy_plane(v_dst, *v, cw, ch)
        }
        (format, planes) => Err(PipelineError::InvalidFrame(format!(
            "cannot convert {} with {} planes",
            format,
            planes.len()
        ))),
    }
}

fn plane_fits(plane: Plane<'_>, row_bytes: usize, rows: usize) -> bool {
    rows == 0 || (plane.stride >= row_bytes && plane.data.len() >= (rows - 1) * plane.stride + row_bytes)
}

/// Copy a plane from a padded source to a contiguous destination.
fn copy_plane(dst: &mut [u8], src: Plane<'_>, width: usize, height: usize) -> Result<()> {
    if !plane_fits(src, width, height) {
        return Err(PipelineError::InvalidFrame(format!(
            "plane of {} bytes (stride {}) too small for {}x{}",
            src.data.len(),
            src.stride,
            width,
            height
        )));
    }

    // Fast path: no stride padding
    if src.stride == width {
        dst.copy_from_slice(&src.data[..width * height]);
        return Ok(());
    }

    for (r, row) in dst.chunks_exact_mut(width).enumerate() {
        let start = r * src.stride;
        row.copy_from_slice(&src.data[start..start + width]);
    }
    Ok(())
}

fn split_uv(u: &mut [u8], v: &mut [u8], src: Plane<'_>, cw: usize, ch: usize) -> Result<()> {
    if !plane_fits(src, cw * 2, ch) {
        return Err(PipelineError::InvalidFrame(format!(
            "interleaved chroma plane of {} bytes too small for {}x{}",
            src.data.len(),
            cw,
            ch
        )));
    }

    for r in 0..ch {
        let row = &src.data[r * src.stride..r * src.stride + cw * 2];
        let out = r * cw;
        for (c, pair) in row.chunks_exact(2).enumerate() {
            u[out + c] = pair[0];
            v[out + c] = pair[1];
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nv12_is_deinterleaved() {
        // 4x2 picture, luma stride padded to 6
        let y = [1, 2, 3, 4, 0, 0, 5, 6, 7, 8, 0, 0];
        let uv = [10, 20, 11, 21];
        let planes = [
            Plane { data: &y, stride: 6 },
            Plane { data: &uv, stride: 4 },
        ];
        let frame = FrameBuffer {
            format: PixelFormat::Nv12,
            width: 4,
            height: 2,
            timestamp: 0,
            planes: &planes,
        };

        let mut out = Vec::new();
        to_yuv420p(&frame, &mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7, 8, 10, 11, 20, 21]);
    }

    #[test]
    fn test_yuv420p_strips_padding() {
        let y = [1, 2, 9, 3, 4, 9];
        let u = [5, 9];
        let v = [6, 9];
        let planes = [
            Plane { data: &y, stride: 3 },
            Plane { data: &u, stride: 2 },
            Plane { data: &v, stride: 2 },
        ];
        let frame = FrameBuffer {
            format: PixelFormat::Yuv420p,
            width: 2,
            height: 2,
            timestamp: 0,
            planes: &planes,
        };

        let mut out = vec![0xff; 32];
        to_yuv420p(&frame, &mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_short_plane_is_rejected() {
        let y = [0u8; 3];
        let uv = [0u8; 2];
        let planes = [
            Plane { data: &y, stride: 2 },
            Plane { data: &uv, stride: 2 },
        ];
        let frame = FrameBuffer {
            format: PixelFormat::Nv12,
            width: 2,
            height: 2,
            timestamp: 0,
            planes: &planes,
        };
        assert!(to_yuv420p(&frame, &mut Vec::new()).is_err());
    }

    #[test]
    fn test_bgra_is_not_convertible() {
        let data = [0u8; 16];
        let planes = [Plane { data: &data, stride: 8 }];
        let frame = FrameBuffer {
            format: PixelFormat::Bgra,
            width: 2,
            height: 2,
            timestamp: 0,
            planes: &planes,
        };
        assert!(to_yuv420p(&frame, &mut Vec::new()).is_err());
    }
}
