//! JPEG encoding and multipart framing for the live stream.
//!
//! Each annotated frame becomes one self-delimited chunk:
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <n>\r\n
//! \r\n
//! <n bytes of JPEG>\r\n
//! ```

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::error::PipelineError;

pub const DEFAULT_BOUNDARY: &str = "frame";

#[derive(Clone, Debug)]
pub struct MultipartEncoder {
    boundary: String,
    jpeg_quality: u8,
}

impl MultipartEncoder {
    pub fn new(jpeg_quality: u8) -> Self {
        Self::with_boundary(DEFAULT_BOUNDARY, jpeg_quality)
    }

    pub fn with_boundary(boundary: impl Into<String>, jpeg_quality: u8) -> Self {
        Self {
            boundary: boundary.into(),
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the HTTP `Content-Type` header of the whole response.
    pub fn content_type(&self) -> String {
        format!("multipart/x-mixed-replace; boundary={}", self.boundary)
    }

    pub fn encode_jpeg(&self, image: &RgbImage) -> Result<Vec<u8>, PipelineError> {
        encode_jpeg(image, self.jpeg_quality)
    }

    /// Wrap one JPEG payload in its boundary and part headers.
    pub fn chunk(&self, jpeg: &[u8]) -> Vec<u8> {
        let header = format!(
            "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            self.boundary,
            jpeg.len()
        );
        let mut chunk = Vec::with_capacity(header.len() + jpeg.len() + 2);
        chunk.extend_from_slice(header.as_bytes());
        chunk.extend_from_slice(jpeg);
        chunk.extend_from_slice(b"\r\n");
        chunk
    }

    /// Encode and frame an annotated image.
    pub fn encode_frame(&self, image: &RgbImage) -> Result<Vec<u8>, PipelineError> {
        let jpeg = self.encode_jpeg(image)?;
        Ok(self.chunk(&jpeg))
    }
}

impl Default for MultipartEncoder {
    fn default() -> Self {
        Self::new(80)
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, PipelineError> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|err| PipelineError::Encoding(format!("JPEG encode failed: {err}")))?;
    Ok(buffer)
}

/// One part recovered from a multipart byte stream.
#[derive(Debug, PartialEq)]
pub struct Part<'a> {
    pub content_type: &'a str,
    pub declared_length: usize,
    pub payload: &'a [u8],
}

/// Split a byte stream produced by `MultipartEncoder::chunk` back into parts.
///
/// Uses the declared `Content-Length` to skip payloads, so binary data that
/// happens to contain the boundary does not confuse it.
pub fn split_parts<'a>(mut data: &'a [u8], boundary: &str) -> Result<Vec<Part<'a>>, PipelineError> {
    let marker = format!("--{boundary}\r\n");
    let mut parts = Vec::new();
    while !data.is_empty() {
        data = data
            .strip_prefix(marker.as_bytes())
            .ok_or_else(|| PipelineError::Encoding("missing part boundary".into()))?;
        let header_end = data
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .ok_or_else(|| PipelineError::Encoding("unterminated part headers".into()))?;
        let headers = std::str::from_utf8(&data[..header_end])
            .map_err(|_| PipelineError::Encoding("part headers are not utf-8".into()))?;

        let mut content_type = None;
        let mut declared_length = None;
        for line in headers.split("\r\n") {
            if let Some((key, value)) = line.split_once(':') {
                match key.trim().to_ascii_lowercase().as_str() {
                    "content-type" => content_type = Some(value.trim()),
                    "content-length" => declared_length = value.trim().parse::<usize>().ok(),
                    _ => {}
                }
            }
        }
        let declared_length = declared_length
            .ok_or_else(|| PipelineError::Encoding("part without Content-Length".into()))?;

        let body = &data[header_end + 4..];
        if body.len() < declared_length + 2 || &body[declared_length..declared_length + 2] != b"\r\n" {
            return Err(PipelineError::Encoding("truncated part payload".into()));
        }
        parts.push(Part {
            content_type: content_type.unwrap_or_default(),
            declared_length,
            payload: &body[..declared_length],
        });
        data = &body[declared_length + 2..];
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn chunk_layout() {
        let encoder = MultipartEncoder::default();
        let chunk = encoder.chunk(b"abc");
        assert_eq!(
            chunk,
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 3\r\n\r\nabc\r\n".to_vec()
        );
        assert_eq!(encoder.content_type(), "multipart/x-mixed-replace; boundary=frame");
    }

    #[test]
    fn k_frames_give_k_parts_in_order() {
        let encoder = MultipartEncoder::new(70);
        let mut stream = Vec::new();
        let mut payloads = Vec::new();
        for shade in [0u8, 90, 180, 255] {
            let image = RgbImage::from_pixel(16, 8, Rgb([shade, shade, shade]));
            let jpeg = encoder.encode_jpeg(&image).unwrap();
            stream.extend_from_slice(&encoder.chunk(&jpeg));
            payloads.push(jpeg);
        }

        let parts = split_parts(&stream, encoder.boundary()).unwrap();
        assert_eq!(parts.len(), 4);
        for (part, payload) in parts.iter().zip(&payloads) {
            assert_eq!(part.content_type, "image/jpeg");
            assert_eq!(part.declared_length, payload.len());
            assert_eq!(part.payload, payload.as_slice());
        }
    }

    #[test]
    fn payload_containing_boundary_is_not_split() {
        let encoder = MultipartEncoder::default();
        let payload = b"xx\r\n--frame\r\nyy";
        let stream = encoder.chunk(payload);
        let parts = split_parts(&stream, "frame").unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].payload, payload);
    }

    #[test]
    fn jpeg_output_has_soi_marker() {
        let jpeg = encode_jpeg(&RgbImage::new(8, 8), 90).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let encoder = MultipartEncoder::default();
        let chunk = encoder.chunk(b"abcdef");
        assert!(split_parts(&chunk[..chunk.len() - 3], "frame").is_err());
    }
}
