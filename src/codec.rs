//! Image codec adapter.
//!
//! Inbound: base64 (optionally a `data:image/...;base64,` URL) into an RGB frame.
//! Outbound: RGB frame into JPEG, and JPEG into one multipart stream part.

use anyhow::{Context, Result};
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::error::DetectError;

/// Multipart boundary used by the MJPEG stream endpoints.
pub const MULTIPART_BOUNDARY: &str = "frame";

/// Decode a base64 image payload into an RGB frame.
pub fn decode_base64_image(payload: &str) -> Result<RgbImage, DetectError> {
    let encoded = strip_data_url(payload.trim());
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| DetectError::Decode(format!("base64: {}", e)))?;
    decode_image_bytes(&bytes)
}

/// Decode raw encoded image bytes (JPEG/PNG) into an RGB frame.
pub fn decode_image_bytes(bytes: &[u8]) -> Result<RgbImage, DetectError> {
    if bytes.is_empty() {
        return Err(DetectError::Decode("empty image payload".to_string()));
    }
    let image =
        image::load_from_memory(bytes).map_err(|e| DetectError::Decode(e.to_string()))?;
    Ok(image.to_rgb8())
}

fn strip_data_url(payload: &str) -> &str {
    if payload.starts_with("data:image") {
        if let Some((_, data)) = payload.split_once(',') {
            return data;
        }
    }
    payload
}

/// Encode a frame as JPEG with the given quality (1..=100).
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity((frame.width() * frame.height() / 4) as usize);
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode_image(frame)
        .context("encode jpeg frame")?;
    Ok(out)
}

/// Wrap a JPEG payload as one part of a `multipart/x-mixed-replace` stream.
pub fn multipart_chunk(jpeg: &[u8]) -> Vec<u8> {
    let mut chunk = Vec::with_capacity(jpeg.len() + 64);
    chunk.extend_from_slice(b"--");
    chunk.extend_from_slice(MULTIPART_BOUNDARY.as_bytes());
    chunk.extend_from_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n");
    chunk
}

/// Content type header value for the MJPEG stream.
pub fn multipart_content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={}", MULTIPART_BOUNDARY)
}
