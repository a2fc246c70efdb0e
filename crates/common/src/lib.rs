/// Common types shared by the capture, playback and CLI crates
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Capture errors
///
/// These never cross the public session API directly: the session logs them
/// through its sink and reports `false`/`None` to the caller.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("{step} {message}")]
    FFmpeg { step: &'static str, message: String },

    #[error("No video stream found")]
    NoVideoStream,

    #[error("Invalid time base: {num}/{den}")]
    InvalidTimeBase { num: i32, den: i32 },

    #[error("Invalid frame size: {width}x{height}")]
    InvalidFrameSize { width: i32, height: i32 },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("sws_scale() worked out unexpectedly: {got} rows (expected {expected})")]
    UnexpectedSliceHeight { got: i32, expected: i32 },

    #[error("Destination buffer too small: {got} bytes (need {needed})")]
    BufferTooSmall { got: usize, needed: usize },

    #[error("Video path must be opened first.")]
    NotOpened,
}

impl CaptureError {
    /// Build an `FFmpeg` error for the named call
    pub fn ffmpeg(step: &'static str, message: impl Into<String>) -> Self {
        CaptureError::FFmpeg {
            step,
            message: message.into(),
        }
    }
}

/// Result type for capture operations
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Requested or effective decode mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeSupport {
    /// Nothing selected yet (closed session)
    #[default]
    None,
    /// CPU decoding
    Software,
    /// Decoding on a hardware device, frames transferred back to system memory
    Hardware,
}

/// Log sink selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    /// Register for both info and error messages
    All,
    Info,
    Error,
}

/// Decoded frame: one packed BGR24 plane plus its presentation timestamp
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFrame {
    /// Packed pixel data, `width * height * 3` bytes
    pub data: Vec<u8>,
    /// Presentation timestamp in seconds
    pub pts: f64,
}

impl RawFrame {
    /// Create an empty frame; the buffer is sized on first read
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a frame with a zeroed buffer of `len` bytes
    #[must_use]
    pub fn with_len(len: usize) -> Self {
        Self {
            data: vec![0; len],
            pts: 0.0,
        }
    }
}

/// Metadata of the selected video stream, captured at open time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub stream_index: usize,
    pub codec: String,
    pub width: i32,
    pub height: i32,
    /// Average frame rate (frames per second), 0.0 when unknown
    pub fps: f64,
    /// Duration in seconds, 0.0 when unknown (live streams)
    pub duration: f64,
    /// Frame count reported by the container, if any
    pub frame_count: Option<i64>,
    /// Stream time base as (numerator, denominator)
    pub time_base: (i32, i32),
}

impl StreamInfo {
    /// Seconds per timestamp tick
    ///
    /// # Errors
    ///
    /// Returns `InvalidTimeBase` when either side of the rational is non-positive.
    pub fn timestamp_unit(&self) -> Result<f64> {
        let (num, den) = self.time_base;
        if num <= 0 || den <= 0 {
            return Err(CaptureError::InvalidTimeBase { num, den });
        }
        Ok(f64::from(num) / f64::from(den))
    }

    /// Container frame count, else `round(duration * fps)`
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn estimated_frame_count(&self) -> i64 {
        match self.frame_count {
            Some(count) if count > 0 => count,
            _ => (self.duration * self.fps).round() as i64,
        }
    }

    /// Size of one packed BGR24 frame
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn frame_size_in_bytes(&self) -> usize {
        self.width.max(0) as usize * self.height.max(0) as usize * 3
    }
}
