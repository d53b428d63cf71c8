//! Upload decoding and size normalization applied to every image before inference.

use image::{DynamicImage, GenericImageView, RgbImage, imageops::FilterType};

use crate::error::DecodeError;

/// Decodes raw upload bytes, guessing the format from the magic bytes.
pub fn decode_image(bytes: &[u8], max_bytes: usize) -> Result<DynamicImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::EmptyData);
    }

    if bytes.len() > max_bytes {
        return Err(DecodeError::TooLarge {
            size: bytes.len(),
            max: max_bytes,
        });
    }

    Ok(image::load_from_memory(bytes)?)
}

/// Computes the output size for [`resize_image`].
///
/// The longer side is clamped to `max_size` and the shorter side follows proportionally,
/// truncating toward zero. Height controls when the sides are equal. Never upscales.
pub fn target_dimensions(width: u32, height: u32, max_size: u32) -> (u32, u32) {
    let scale = |side: u32, num: u32, den: u32| -> u32 {
        ((u64::from(side) * u64::from(num)) / u64::from(den)).max(1) as u32
    };

    if width > height {
        let new_width = width.min(max_size);
        (new_width, scale(height, new_width, width))
    } else {
        let new_height = height.min(max_size);
        (scale(width, new_height, height), new_height)
    }
}

/// Bounds the largest dimension of `image` by `max_size` using Lanczos resampling.
///
/// Returns the input untouched when it cannot be resized.
pub fn resize_image(image: DynamicImage, max_size: u32) -> DynamicImage {
    let (width, height) = image.dimensions();

    if width == 0 || height == 0 || max_size == 0 {
        log::error!("Error resizing image: cannot resize {width}x{height} to bound {max_size}");
        return image;
    }

    let (new_width, new_height) = target_dimensions(width, height, max_size);
    if (new_width, new_height) == (width, height) {
        log::debug!("Image {width}x{height} already within {max_size}");
        return image;
    }

    let resized = image.resize_exact(new_width, new_height, FilterType::Lanczos3);
    log::info!("Image resized from {width}x{height} to {new_width}x{new_height}");
    resized
}

/// Converts any colour mode to 8-bit RGB.
pub fn convert_to_rgb(image: DynamicImage) -> RgbImage {
    match image {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => {
            log::debug!("Converting image from {:?} to Rgb8", other.color());
            other.to_rgb8()
        }
    }
}

/// Resize then colour-convert: the per-request normalization path.
pub fn normalize(image: DynamicImage, max_size: u32) -> RgbImage {
    convert_to_rgb(resize_image(image, max_size))
}
