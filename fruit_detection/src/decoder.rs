use crate::error::DetectionError;
use image::{DynamicImage, ImageReader};
use std::io::Cursor;

/// Decodes an uploaded buffer into a 3-channel 8-bit RGB image.
///
/// The container format is whatever the codec recognises from the leading
/// bytes; alpha and extra channels are dropped.
pub fn decode_image(image_data: &[u8]) -> Result<DynamicImage, DetectionError> {
    if image_data.is_empty() {
        return Err(DetectionError::InvalidImage("zero-length buffer".to_string()));
    }

    let image_reader = ImageReader::new(Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| DetectionError::InvalidImage(e.to_string()))?;

    if image_reader.format().is_none() {
        return Err(DetectionError::InvalidImage("unrecognised image format".to_string()));
    }

    let image = image_reader
        .decode()
        .map_err(|e| DetectionError::InvalidImage(e.to_string()))?;

    if image.width() == 0 || image.height() == 0 {
        return Err(DetectionError::InvalidImage(format!(
            "empty pixel grid ({}x{})",
            image.width(),
            image.height()
        )));
    }

    Ok(DynamicImage::ImageRgb8(image.into_rgb8()))
}
