//! Image intake for uploaded report photos.
//!
//! Rejects payloads that are not images and produces the copy that goes to the
//! object store: resized to a max dimension and encoded as lossy WebP.

use anyhow::{Context, Result};
use image::{GenericImageView, ImageFormat};

use crate::config::ImagesConfig;

#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    #[error("image payload is empty")]
    Empty,

    #[error("payload is not a supported image ({0})")]
    NotAnImage(String),
}

/// Result of image compression operation
#[derive(Debug)]
pub struct CompressionResult {
    /// Compressed image data (WebP format)
    pub data: Vec<u8>,
    /// Original image dimensions (width, height)
    pub original_dimensions: (u32, u32),
    /// New dimensions after resize (width, height)
    pub new_dimensions: (u32, u32),
    /// Whether the image was resized
    pub was_resized: bool,
}

/// Check if data starts with WebP magic bytes (RIFF....WEBP)
pub fn is_webp(data: &[u8]) -> bool {
    data.len() >= 12 && data[0..4] == *b"RIFF" && data[8..12] == *b"WEBP"
}

/// Sniffs the payload and returns its format, or why it was refused.
///
/// Runs before any store is touched, so a refused upload leaves nothing behind.
pub fn sniff_image(data: &[u8]) -> std::result::Result<ImageFormat, ImageError> {
    if data.is_empty() {
        return Err(ImageError::Empty);
    }

    if !infer::is_image(data) {
        let kind = infer::get(data)
            .map(|kind| kind.mime_type().to_string())
            .unwrap_or_else(|| "unknown type".to_string());
        return Err(ImageError::NotAnImage(kind));
    }

    image::guess_format(data).map_err(|err| ImageError::NotAnImage(err.to_string()))
}

/// Determine if image should be processed based on current dimensions and format
///
/// Returns true if:
/// - Image is not already WebP, OR
/// - Image dimensions exceed max_dimension
pub fn should_process(data: &[u8], max_dimension: u32) -> bool {
    if !is_webp(data) {
        return true;
    }

    match image::load_from_memory(data) {
        Ok(img) => {
            let (w, h) = img.dimensions();
            w > max_dimension || h > max_dimension
        }
        Err(_) => true,
    }
}

/// Compress an image: resize if needed, convert to WebP lossy format
pub fn compress_image(data: &[u8], max_dimension: u32, quality: u8) -> Result<CompressionResult> {
    let img = image::load_from_memory(data).context("Failed to decode image")?;

    let (orig_w, orig_h) = img.dimensions();
    let original_dimensions = (orig_w, orig_h);

    let (new_w, new_h, was_resized) = if orig_w > max_dimension || orig_h > max_dimension {
        let scale = (max_dimension as f64) / (orig_w.max(orig_h) as f64);
        let new_w = ((orig_w as f64) * scale).round() as u32;
        let new_h = ((orig_h as f64) * scale).round() as u32;
        (new_w.max(1), new_h.max(1), true)
    } else {
        (orig_w, orig_h, false)
    };

    let processed = if was_resized {
        img.resize(new_w, new_h, image::imageops::FilterType::Lanczos3)
    } else {
        img
    };

    let rgba = processed.to_rgba8();
    let (width, height) = rgba.dimensions();

    let encoder = webp::Encoder::from_rgba(&rgba, width, height);
    let webp_data = encoder.encode(quality as f32);

    Ok(CompressionResult {
        data: webp_data.to_vec(),
        original_dimensions,
        new_dimensions: (new_w, new_h),
        was_resized,
    })
}

/// Produces the bytes that are handed to the object store.
///
/// Falls back to the original bytes if re-encoding fails; the payload already
/// passed [`sniff_image`], so the original is still a valid image.
pub fn prepare_for_storage(data: &[u8], opts: &ImagesConfig) -> Vec<u8> {
    if !opts.compress || !should_process(data, opts.max_dimension) {
        return data.to_vec();
    }

    match compress_image(data, opts.max_dimension, opts.quality) {
        Ok(result) => {
            log::debug!(
                "compressed upload {:?} -> {:?} ({} -> {} bytes)",
                result.original_dimensions,
                result.new_dimensions,
                data.len(),
                result.data.len()
            );
            result.data
        }
        Err(err) => {
            log::warn!("keeping original upload, compression failed: {err:?}");
            data.to_vec()
        }
    }
}

#[cfg(test)]
pub(crate) fn solid_png(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));

    let mut buf = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buf);
    img.write_to(&mut cursor, ImageFormat::Png).unwrap();
    buf
}
