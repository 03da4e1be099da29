//! Image encoding for both directions of the pipeline.
//!
//! * Page bitmaps go to the model as base64 PNG [`ImageData`]. PNG keeps
//!   rendered text crisp; `detail: "high"` lets tiling providers see fine
//!   print instead of one downscaled overview tile.
//! * Extracted images go to disk as PNG, composited onto white first so that
//!   transparent figures stay readable on dark-themed Markdown viewers.

use crate::model::EmbeddedImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::{DynamicImage, Rgb, RgbImage};
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page for the vision request.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let buf = encode_png(img)?;
    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} page → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Wrap an already-encoded embedded image for a description request.
pub fn encode_embedded(image: &EmbeddedImage) -> ImageData {
    ImageData::new(STANDARD.encode(&image.data), image.format.mime_type())
}

/// PNG-encode an image.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Composite any alpha channel onto a white background.
///
/// Images without alpha are returned as RGB unchanged.
pub fn flatten_onto_white(img: &DynamicImage) -> DynamicImage {
    if !img.color().has_alpha() {
        return DynamicImage::ImageRgb8(img.to_rgb8());
    }

    let rgba = img.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, px) in rgba.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        out.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    DynamicImage::ImageRgb8(out)
}
