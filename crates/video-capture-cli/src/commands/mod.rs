pub mod decode;
pub mod info;
pub mod play;

use anyhow::{bail, Result};
use clap::{Args, ValueEnum};
use video_capture::{CaptureConfig, DecodeSupport, ScalingAlgorithm, VideoCapture};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scaling {
    Bilinear,
    Bicubic,
}

impl From<Scaling> for ScalingAlgorithm {
    fn from(value: Scaling) -> Self {
        match value {
            Scaling::Bilinear => ScalingAlgorithm::Bilinear,
            Scaling::Bicubic => ScalingAlgorithm::Bicubic,
        }
    }
}

/// Options shared by every command that opens a source
#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// Input file path or stream URL
    #[arg(value_name = "FILE")]
    pub input: String,

    /// Try hardware decoding, falling back to software
    #[arg(long)]
    pub hw: bool,

    /// Hardware device type overriding the platform default (e.g. cuda, vaapi)
    #[arg(long, value_name = "TYPE", requires = "hw")]
    pub hw_device: Option<String>,

    /// Decoder threads, 0 = auto [default: $VIDEO_CAPTURE_THREADS or 0]
    #[arg(long)]
    pub threads: Option<i32>,

    /// RTSP transport
    #[arg(long, default_value = "tcp")]
    pub rtsp_transport: String,

    /// Color conversion interpolation
    #[arg(long, value_enum, default_value_t = Scaling::Bicubic)]
    pub scaling: Scaling,
}

impl CaptureArgs {
    pub fn config(&self) -> CaptureConfig {
        let mut config = CaptureConfig::default()
            .with_rtsp_transport(self.rtsp_transport.clone())
            .with_scaling(self.scaling.into());
        if let Some(threads) = self.threads {
            config = config.with_thread_count(threads);
        }
        if let Some(device) = &self.hw_device {
            config = config.with_hw_device(device.clone());
        }
        config
    }

    pub fn decode_support(&self) -> DecodeSupport {
        if self.hw {
            DecodeSupport::Hardware
        } else {
            DecodeSupport::Software
        }
    }

    /// Open the input, failing with the path in the error
    pub fn open(&self) -> Result<VideoCapture> {
        let mut capture = VideoCapture::with_config(self.config());
        if !capture.open(&self.input, self.decode_support()) {
            bail!("Failed to open {}", self.input);
        }
        Ok(capture)
    }
}
