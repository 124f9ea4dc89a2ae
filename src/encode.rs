use image::codecs::jpeg::JpegEncoder;
use image::ColorType;

use crate::camera::Frame;
use crate::error::EncodeError;

/// Compresses an RGB frame to JPEG at `quality` (1-100).
pub fn jpeg_encode(frame: &Frame, quality: u8) -> Result<Vec<u8>, EncodeError> {
    let expected = Frame::rgb_len(frame.width, frame.height);
    if frame.rgb.len() != expected {
        return Err(EncodeError::BufferSize {
            width: frame.width,
            height: frame.height,
            expected,
            actual: frame.rgb.len(),
        });
    }

    let mut buf = Vec::with_capacity(expected / 8);
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)).encode(
        &frame.rgb,
        frame.width,
        frame.height,
        ColorType::Rgb8,
    )?;
    Ok(buf)
}
