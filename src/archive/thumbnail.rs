//! Downscaled JPEG previews of page images.

use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;

use crate::error::{Error, Result};

/// Bounding box used for page thumbnails and chapter covers (width, height)
pub const DEFAULT_THUMBNAIL_SIZE: (u32, u32) = (300, 400);

/// JPEG quality of generated thumbnails
pub const THUMBNAIL_QUALITY: u8 = 85;

/// Decode `data` and re-encode it as a JPEG fitting inside `max_width` x
/// `max_height`, keeping the aspect ratio.
///
/// Images already inside the box keep their size. This is CPU-bound; async
/// callers should run it on the blocking pool.
///
/// # Errors
///
/// [`Error::InvalidImageData`] when `data` cannot be decoded as an image or
/// the result cannot be encoded.
pub fn make_thumbnail(data: &[u8], max_width: u32, max_height: u32) -> Result<Vec<u8>> {
    if max_width == 0 || max_height == 0 {
        return Err(Error::InvalidImageData(format!(
            "thumbnail box {max_width}x{max_height} is empty"
        )));
    }

    let img = image::load_from_memory(data)
        .map_err(|e| Error::InvalidImageData(format!("cannot decode image: {e}")))?;

    let img = if img.width() > max_width || img.height() > max_height {
        img.thumbnail(max_width, max_height)
    } else {
        img
    };

    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut out = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, THUMBNAIL_QUALITY))
        .map_err(|e| Error::InvalidImageData(format!("cannot encode thumbnail: {e}")))?;
    Ok(out)
}

/// [`make_thumbnail`] on tokio's blocking pool.
pub async fn make_thumbnail_blocking(
    data: Vec<u8>,
    max_width: u32,
    max_height: u32,
) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || make_thumbnail(&data, max_width, max_height))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}
