/// Video decode sessions on top of `FFmpeg`
///
/// Opens a file or stream URL, decodes its best video stream (optionally on a
/// hardware device, with automatic fallback to software) and delivers each
/// frame as one packed BGR24 plane with a timestamp in seconds.
///
/// Layers, bottom-up:
/// 1. `ffi`: RAII wrappers over the raw `FFmpeg` C API
/// 2. `hw`: platform-default hardware device selection
/// 3. `backend`: the [`MediaBackend`] seam and its `FFmpeg` implementation
/// 4. `session`: the [`VideoCapture`] state machine
pub mod backend;
pub mod config;
pub mod ffi;
pub mod hw;
pub mod logger;
pub mod session;

pub use backend::{FfmpegBackend, MediaBackend, PacketStatus, ReceiveStatus};
pub use config::{CaptureConfig, ScalingAlgorithm, THREADS_ENV_VAR};
pub use hw::HwAcceleration;
pub use logger::{LogCallback, Logger};
pub use session::VideoCapture;

pub use video_capture_common::{
    CaptureError, DecodeSupport, LogLevel, RawFrame, Result, StreamInfo,
};
