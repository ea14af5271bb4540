//! Image encoding: `RgbaImage` → base64 PNG wrapped in [`ImageHandle`].
//!
//! PNG because rendered code must stay crisp: JPEG ringing around thin glyph
//! strokes is visible at any quality setting.

use crate::output::ImageHandle;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, RgbaImage};
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered card as a base64 PNG.
pub fn encode_png(img: RgbaImage) -> Result<ImageHandle, image::ImageError> {
    let (width, height) = img.dimensions();
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(img).write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let data = STANDARD.encode(&buf);
    debug!("Encoded {}x{} card → {} bytes base64", width, height, data.len());

    Ok(ImageHandle {
        mime_type: "image/png".to_string(),
        data,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn encode_small_image() {
        let img = RgbaImage::from_pixel(10, 6, Rgba([30, 30, 30, 255]));
        let handle = encode_png(img).expect("encode should succeed");
        assert_eq!(handle.mime_type, "image/png");
        assert_eq!((handle.width, handle.height), (10, 6));

        let bytes = handle.decode().expect("valid base64");
        let back = image::load_from_memory(&bytes).expect("valid png");
        assert_eq!(back.width(), 10);
        assert_eq!(back.height(), 6);
    }
}
