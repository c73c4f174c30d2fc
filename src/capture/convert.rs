//! Camera pixel formats to RGBA8

use image::RgbaImage;
use zune_jpeg::JpegDecoder;

use super::frame::{Frame, PixelFormat};
use crate::error::{Result, ScanError};

/// Convert a captured frame into an RGBA image of the frame's own size
pub fn to_rgba(frame: &Frame) -> Result<RgbaImage> {
    let width = frame.meta.width;
    let height = frame.meta.height;
    let data = &frame.data[..];

    let rgba = match frame.meta.format {
        PixelFormat::Mjpeg => return decode_mjpeg(data),
        PixelFormat::Rgb24 => packed_to_rgba(data, width, height, frame.meta.stride, 3, [0, 1, 2])?,
        PixelFormat::Bgr24 => packed_to_rgba(data, width, height, frame.meta.stride, 3, [2, 1, 0])?,
        PixelFormat::Rgba32 => packed_to_rgba(data, width, height, frame.meta.stride, 4, [0, 1, 2])?,
        PixelFormat::Yuyv4 => yuyv_to_rgba(data, width, height, frame.meta.stride)?,
        PixelFormat::Nv12 => nv12_to_rgba(data, width, height, frame.meta.stride)?,
    };

    RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| ScanError::Frame("pixel buffer does not match frame size".into()))
}

fn check_len(data: &[u8], needed: usize, format: &str) -> Result<()> {
    if data.len() < needed {
        return Err(ScanError::Frame(format!(
            "{format} frame too short: {} bytes, need {needed}",
            data.len()
        )));
    }
    Ok(())
}

fn packed_to_rgba(
    data: &[u8],
    width: u32,
    height: u32,
    stride: u32,
    bpp: usize,
    order: [usize; 3],
) -> Result<Vec<u8>> {
    let (w, h) = (width as usize, height as usize);
    let stride = (stride as usize).max(w * bpp);
    if h > 0 {
        check_len(data, stride * (h - 1) + w * bpp, "packed")?;
    }

    let mut rgba = Vec::with_capacity(w * h * 4);
    for row in data.chunks(stride).take(h) {
        for px in row[..w * bpp].chunks_exact(bpp) {
            rgba.extend_from_slice(&[px[order[0]], px[order[1]], px[order[2]], 255]);
        }
    }
    Ok(rgba)
}

/// BT.601 limited range, integer math
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}

fn yuyv_to_rgba(data: &[u8], width: u32, height: u32, stride: u32) -> Result<Vec<u8>> {
    let (w, h) = (width as usize, height as usize);
    let stride = (stride as usize).max(w * 2);
    if h > 0 {
        check_len(data, stride * (h - 1) + w * 2, "YUYV")?;
    }

    let mut rgba = Vec::with_capacity(w * h * 4);
    for row in data.chunks(stride).take(h) {
        // Y0 U Y1 V covers two pixels
        for (i, quad) in row[..w * 2].chunks(4).enumerate() {
            if quad.len() < 4 {
                // odd width: last pixel has no chroma pair
                let [r, g, b] = yuv_to_rgb(quad[0], 128, 128);
                rgba.extend_from_slice(&[r, g, b, 255]);
                continue;
            }
            let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
            let [r, g, b] = yuv_to_rgb(y0, u, v);
            rgba.extend_from_slice(&[r, g, b, 255]);
            if i * 2 + 1 < w {
                let [r, g, b] = yuv_to_rgb(y1, u, v);
                rgba.extend_from_slice(&[r, g, b, 255]);
            }
        }
    }
    Ok(rgba)
}

/// Luma plane then interleaved UV at half height. Rows are `stride` bytes
/// apart; odd widths round the chroma rows up to whole UV pairs.
fn nv12_to_rgba(data: &[u8], width: u32, height: u32, stride: u32) -> Result<Vec<u8>> {
    let (w, h) = (width as usize, height as usize);
    let chroma_w = w.div_ceil(2) * 2;
    let luma_stride = (stride as usize).max(w);
    let chroma_stride = (stride as usize).max(chroma_w);
    let chroma_h = h.div_ceil(2);
    let luma_len = luma_stride * h;
    if h > 0 {
        check_len(data, luma_len + chroma_stride * (chroma_h - 1) + chroma_w, "NV12")?;
    }

    let (luma, chroma) = data.split_at(luma_len.min(data.len()));
    let mut rgba = Vec::with_capacity(w * h * 4);
    for y in 0..h {
        for x in 0..w {
            let uv = (y / 2) * chroma_stride + (x / 2) * 2;
            let [r, g, b] = yuv_to_rgb(luma[y * luma_stride + x], chroma[uv], chroma[uv + 1]);
            rgba.extend_from_slice(&[r, g, b, 255]);
        }
    }
    Ok(rgba)
}

fn decode_mjpeg(data: &[u8]) -> Result<RgbaImage> {
    let mut decoder = JpegDecoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| ScanError::Frame(format!("MJPEG decode: {e:?}")))?;
    let (w, h) = decoder
        .dimensions()
        .ok_or_else(|| ScanError::Frame("MJPEG frame has no dimensions".into()))?;

    let count = w * h;
    let rgba = if pixels.len() == count * 4 {
        pixels
    } else if pixels.len() == count * 3 {
        let mut rgba = Vec::with_capacity(count * 4);
        for chunk in pixels.chunks_exact(3) {
            rgba.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 255]);
        }
        rgba
    } else if pixels.len() == count {
        pixels.iter().flat_map(|&l| [l, l, l, 255]).collect()
    } else {
        return Err(ScanError::Frame(format!(
            "MJPEG output of {} bytes for {w}x{h}",
            pixels.len()
        )));
    };

    RgbaImage::from_raw(w as u32, h as u32, rgba)
        .ok_or_else(|| ScanError::Frame("MJPEG output does not match dimensions".into()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use bytes::Bytes;

    use super::*;
    use crate::capture::frame::FrameMetadata;

    #[test]
    fn test_rgb24_to_rgba() {
        let frame = Frame::new(
            Bytes::from_static(&[10, 20, 30, 40, 50, 60]),
            2,
            1,
            PixelFormat::Rgb24,
            1,
        );
        let image = to_rgba(&frame).unwrap();
        assert_eq!(image.as_raw(), &[10, 20, 30, 255, 40, 50, 60, 255]);
    }

    #[test]
    fn test_bgr24_swaps_channels() {
        let frame = Frame::new(Bytes::from_static(&[1, 2, 3]), 1, 1, PixelFormat::Bgr24, 1);
        let image = to_rgba(&frame).unwrap();
        assert_eq!(image.as_raw(), &[3, 2, 1, 255]);
    }

    #[test]
    fn test_yuyv_grey() {
        // Y=235 with neutral chroma is white, Y=16 is black
        let frame = Frame::new(
            Bytes::from_static(&[235, 128, 16, 128]),
            2,
            1,
            PixelFormat::Yuyv4,
            1,
        );
        let image = to_rgba(&frame).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [255, 255, 255, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_nv12_grey() {
        // 2x2 luma plane plus one UV pair
        let frame = Frame::new(
            Bytes::from_static(&[16, 235, 235, 16, 128, 128]),
            2,
            2,
            PixelFormat::Nv12,
            1,
        );
        let image = to_rgba(&frame).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_nv12_padded_stride() {
        // 2x2 image in rows of 4 bytes; padding must not be read as pixels
        #[rustfmt::skip]
        let data = [
            16, 235, 99, 99,
            235, 16, 99, 99,
            128, 128, 99, 99,
        ];
        let frame = Frame {
            data: Bytes::copy_from_slice(&data),
            meta: Arc::new(FrameMetadata {
                sequence: 1,
                width: 2,
                height: 2,
                stride: 4,
                format: PixelFormat::Nv12,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
        };
        let image = to_rgba(&frame).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [255, 255, 255, 255]);
        assert_eq!(image.get_pixel(0, 1).0, [255, 255, 255, 255]);
        assert_eq!(image.get_pixel(1, 1).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_nv12_short_padded_frame_rejected() {
        let frame = Frame {
            data: Bytes::from_static(&[16; 9]),
            meta: Arc::new(FrameMetadata {
                sequence: 1,
                width: 2,
                height: 2,
                stride: 4,
                format: PixelFormat::Nv12,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
        };
        assert!(matches!(to_rgba(&frame), Err(ScanError::Frame(_))));
    }

    #[test]
    fn test_short_frame_rejected() {
        let frame = Frame::new(Bytes::from_static(&[0; 5]), 2, 1, PixelFormat::Rgb24, 1);
        assert!(matches!(to_rgba(&frame), Err(ScanError::Frame(_))));
    }

    #[test]
    fn test_corrupt_mjpeg_rejected() {
        let frame = Frame::new(Bytes::from_static(b"not a jpeg"), 4, 4, PixelFormat::Mjpeg, 1);
        assert!(matches!(to_rgba(&frame), Err(ScanError::Frame(_))));
    }
}
