pub mod anthropic;
pub mod gemini;
pub mod openai;

use base64::Engine;
use image::GenericImageView;

use crate::errors::{PilotError, PilotResult};

/// Downscale a base64 PNG to `max_width`, re-encoding in `format`. Vendors
/// cap request sizes differently, so each adapter picks its own bound.
/// Images already narrow enough are re-encoded only when the format changes.
pub(crate) fn condition_image(
    image_base64: &str,
    max_width: u32,
    format: image::ImageFormat,
) -> PilotResult<String> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(image_base64)
        .map_err(|e| PilotError::Upstream(format!("image payload not base64: {e}")))?;
    let img = image::load_from_memory(&bytes)
        .map_err(|e| PilotError::Upstream(format!("image payload not decodable: {e}")))?;

    let (w, h) = img.dimensions();
    if w <= max_width && format == image::ImageFormat::Png {
        return Ok(image_base64.to_string());
    }

    let scaled = if w > max_width {
        let new_h = (h as f64 * max_width as f64 / w as f64).round() as u32;
        img.resize_exact(max_width, new_h.max(1), image::imageops::FilterType::Triangle)
    } else {
        img
    };

    let mut out = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut out);
    match format {
        image::ImageFormat::Jpeg => {
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, 85);
            scaled
                .to_rgb8()
                .write_with_encoder(encoder)
                .map_err(|e| PilotError::Upstream(format!("JPEG encode: {e}")))?;
        }
        _ => {
            scaled
                .write_to(&mut cursor, image::ImageFormat::Png)
                .map_err(|e| PilotError::Upstream(format!("PNG encode: {e}")))?;
        }
    }
    Ok(base64::engine::general_purpose::STANDARD.encode(&out))
}
