//! One-shot decoding of an already captured image

use base64::Engine;
use image::RgbaImage;
use tracing::{debug, instrument, warn};

use crate::capture::Resolution;
use crate::decoder::QrDecoder;
use crate::error::{Result, ScanError};
use crate::surface::{Canvas, Surface};

/// Decode the QR code in a still image.
///
/// `source` is either a `data:` URL or a filesystem path. Resolves to the
/// payload, or `None` when there is no code or the image cannot be loaded.
/// Never fails.
#[instrument(skip(source, decoder), fields(source_len = source.len()))]
pub async fn decode_static_image<D: QrDecoder + ?Sized>(source: &str, decoder: &D) -> Option<String> {
    let image = match load_image(source).await {
        Ok(image) => image,
        Err(e) => {
            warn!("{}", e);
            return None;
        }
    };

    let mut canvas = Canvas::new(Resolution::new(image.width(), image.height()));
    canvas.draw_image(&image);
    let sample = canvas.pixels();

    match decoder.decode(sample.data, sample.width, sample.height) {
        Some(code) => Some(code.data),
        None => {
            debug!("No QR code in {}x{} image", sample.width, sample.height);
            None
        }
    }
}

async fn load_image(source: &str) -> Result<RgbaImage> {
    let bytes = if source.starts_with("data:") {
        parse_data_url(source)?
    } else {
        tokio::fs::read(source)
            .await
            .map_err(|e| ScanError::ImageLoadFailed(format!("{source}: {e}")))?
    };

    let image = image::load_from_memory(&bytes)
        .map_err(|e| ScanError::ImageLoadFailed(e.to_string()))?
        .to_rgba8();
    if image.width() == 0 || image.height() == 0 {
        return Err(ScanError::ImageLoadFailed("empty image".into()));
    }
    Ok(image)
}

/// `data:[<mediatype>][;base64],<data>`
fn parse_data_url(url: &str) -> Result<Vec<u8>> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| ScanError::ImageLoadFailed("not a data URL".into()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| ScanError::ImageLoadFailed("data URL without payload".into()))?;

    if header.split(';').any(|param| param.eq_ignore_ascii_case("base64")) {
        base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| ScanError::ImageLoadFailed(format!("base64: {e}")))
    } else {
        Ok(payload.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgba};

    use super::*;
    use crate::decoder::tests::render_qr;
    use crate::decoder::RqrrDecoder;
    use crate::session::tests::MarkerDecoder;

    fn png_bytes(marker: u8) -> Vec<u8> {
        encode_png(&RgbaImage::from_pixel(16, 12, Rgba([marker, marker, marker, 255])))
    }

    fn data_url(bytes: &[u8]) -> String {
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(bytes)
        )
    }

    #[tokio::test]
    async fn test_data_url_with_payload() {
        let decoder = MarkerDecoder::new(&[(42, "P")]);
        let result = decode_static_image(&data_url(&png_bytes(42)), &decoder).await;
        assert_eq!(result.as_deref(), Some("P"));
    }

    #[tokio::test]
    async fn test_file_with_payload() {
        let file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        std::fs::write(file.path(), png_bytes(9)).unwrap();

        let decoder = MarkerDecoder::new(&[(9, "from-file")]);
        let result = decode_static_image(file.path().to_str().unwrap(), &decoder).await;
        assert_eq!(result.as_deref(), Some("from-file"));
    }

    fn encode_png(image: &RgbaImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn test_real_code_in_data_url() {
        let png = encode_png(&render_qr("clase-101"));
        let result = decode_static_image(&data_url(&png), &RqrrDecoder::new()).await;
        assert_eq!(result.as_deref(), Some("clase-101"));
    }

    #[tokio::test]
    async fn test_real_code_in_file() {
        let file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        std::fs::write(file.path(), encode_png(&render_qr("HELLO"))).unwrap();

        let result = decode_static_image(file.path().to_str().unwrap(), &RqrrDecoder::new()).await;
        assert_eq!(result.as_deref(), Some("HELLO"));
    }

    #[tokio::test]
    async fn test_image_without_code() {
        let result = decode_static_image(&data_url(&png_bytes(255)), &RqrrDecoder::new()).await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_load_failures_resolve_to_none() {
        let decoder = MarkerDecoder::new(&[(0, "unreachable")]);
        for source in [
            "data:image/png;base64,!!!not-base64!!!",
            "data:image/png;base64",
            "data:text/plain,hello",
            "/nonexistent/qr.png",
        ] {
            assert_eq!(decode_static_image(source, &decoder).await, None, "{source}");
        }
        assert_eq!(decoder.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_parse_plain_data_url() {
        assert_eq!(parse_data_url("data:,abc").unwrap(), b"abc");
        assert!(parse_data_url("data:image/png").is_err());
    }
}
