//! Session configuration

/// Environment variable overriding the decoder thread count
pub const THREADS_ENV_VAR: &str = "VIDEO_CAPTURE_THREADS";

/// Interpolation used by the color-conversion context
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScalingAlgorithm {
    Bilinear,
    #[default]
    Bicubic,
}

/// Capture configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Transport requested for RTSP sources
    pub rtsp_transport: String,
    /// Decoder threads, 0 = let `FFmpeg` pick
    pub thread_count: i32,
    /// Hardware device type name overriding the platform default (e.g. "cuda")
    pub hw_device: Option<String>,
    /// Color-conversion interpolation
    pub scaling: ScalingAlgorithm,
    /// Preallocate a hardware frames pool and hand it to the decoder
    pub hw_frames_pool: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            rtsp_transport: "tcp".to_string(),
            thread_count: thread_count_from_env(),
            hw_device: None,
            scaling: ScalingAlgorithm::default(),
            hw_frames_pool: false,
        }
    }
}

impl CaptureConfig {
    #[must_use]
    pub fn with_rtsp_transport(mut self, transport: impl Into<String>) -> Self {
        self.rtsp_transport = transport.into();
        self
    }

    #[must_use]
    pub fn with_thread_count(mut self, threads: i32) -> Self {
        self.thread_count = threads.max(0);
        self
    }

    #[must_use]
    pub fn with_hw_device(mut self, device: impl Into<String>) -> Self {
        self.hw_device = Some(device.into());
        self
    }

    #[must_use]
    pub fn with_scaling(mut self, scaling: ScalingAlgorithm) -> Self {
        self.scaling = scaling;
        self
    }

    #[must_use]
    pub fn with_hw_frames_pool(mut self, enabled: bool) -> Self {
        self.hw_frames_pool = enabled;
        self
    }
}

fn thread_count_from_env() -> i32 {
    parse_thread_count(std::env::var(THREADS_ENV_VAR).ok().as_deref())
}

fn parse_thread_count(value: Option<&str>) -> i32 {
    value
        .and_then(|s| s.trim().parse::<i32>().ok())
        .filter(|n| *n >= 0)
        .unwrap_or(0)
}
