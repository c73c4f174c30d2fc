//! QR decoding engine seam

use tracing::{debug, trace};

/// A decoded QR symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrCode {
    pub data: String,
}

/// `decode(rgba, width, height) -> {data} | nothing`
///
/// `None` means no code was found in the buffer. It is the normal outcome
/// for most frames, not an error.
pub trait QrDecoder: Send + Sync {
    fn decode(&self, rgba: &[u8], width: u32, height: u32) -> Option<QrCode>;
}

/// QR decoder on top of `rqrr`
#[derive(Debug, Default, Clone, Copy)]
pub struct RqrrDecoder;

impl RqrrDecoder {
    pub fn new() -> Self {
        Self
    }
}

/// Rec. 601 luma from an RGBA pixel
fn luma(px: &[u8]) -> u8 {
    ((px[0] as u32 * 299 + px[1] as u32 * 587 + px[2] as u32 * 114) / 1000) as u8
}

impl QrDecoder for RqrrDecoder {
    fn decode(&self, rgba: &[u8], width: u32, height: u32) -> Option<QrCode> {
        let (w, h) = (width as usize, height as usize);
        if w == 0 || h == 0 || rgba.len() != w * h * 4 {
            debug!(
                "Buffer of {} bytes does not match {}x{} RGBA",
                rgba.len(),
                width,
                height
            );
            return None;
        }

        let mut prepared =
            rqrr::PreparedImage::prepare_from_greyscale(w, h, |x, y| luma(&rgba[(y * w + x) * 4..]));
        let grids = prepared.detect_grids();
        trace!("{} candidate grids", grids.len());

        grids.iter().find_map(|grid| match grid.decode() {
            Ok((meta, content)) => {
                debug!("Decoded QR version {:?}, {} bytes", meta.version, content.len());
                Some(QrCode { data: content })
            }
            Err(e) => {
                trace!("Grid failed to decode: {:?}", e);
                None
            }
        })
    }
}
