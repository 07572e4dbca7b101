use image::ImageReader;
use std::io::Cursor;

/// A camera frame with timestamp metadata.
///
/// Frames travel between the source, the estimator and the capture sink as
/// encoded JPEG bytes; decoding happens only where pixels are needed
/// (rendering, dimension probing).
#[derive(Debug, Clone)]
pub struct TimestampedFrame {
    pub jpeg: Vec<u8>,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl TimestampedFrame {
    pub fn new(jpeg: Vec<u8>, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            jpeg,
            captured_at_ms,
            seq,
        }
    }

    /// Returns the size of the JPEG payload in bytes.
    pub fn payload_size(&self) -> usize {
        self.jpeg.len()
    }

    /// Reads `(width, height)` from the JPEG header without decoding pixels.
    pub fn dimensions(&self) -> Result<(u32, u32), FrameError> {
        ImageReader::new(Cursor::new(&self.jpeg))
            .with_guessed_format()
            .map_err(|e| FrameError::Decode(e.to_string()))?
            .into_dimensions()
            .map_err(|e| FrameError::Decode(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("failed to read frame image: {0}")]
    Decode(String),
}
