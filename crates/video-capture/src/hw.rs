//! Hardware acceleration selector
//!
//! Picks one platform-default device type (the choice is per platform, not
//! per content), creates its device context and owns the frame that
//! hardware-resident pictures are downloaded into. Any failure degrades to
//! software decoding.

use ffmpeg_sys_next as ffi;
use std::ffi::{CStr, CString};
use std::os::raw::c_int;
use video_capture_common::{CaptureError, DecodeSupport, Result};

use crate::ffi::{BufferRef, Frame};
use crate::logger::Logger;

/// Software format of surfaces in a selector-created frames pool
const FRAMES_SW_FORMAT: ffi::AVPixelFormat = ffi::AVPixelFormat::AV_PIX_FMT_NV12;

/// Surfaces preallocated in a selector-created frames pool
const FRAMES_POOL_SIZE: c_int = 32;

/// Device type tried when the configuration names none
#[must_use]
pub fn platform_default_device() -> &'static str {
    if cfg!(target_os = "windows") {
        "dxva2"
    } else if cfg!(target_os = "macos") {
        "videotoolbox"
    } else if cfg!(target_os = "linux") {
        "vaapi"
    } else {
        ""
    }
}

/// Pixel format tagging frames that live in memory of the given device type
#[must_use]
pub fn hw_pixel_format_for(device_type: ffi::AVHWDeviceType) -> Option<ffi::AVPixelFormat> {
    use ffi::AVHWDeviceType as D;
    use ffi::AVPixelFormat as P;

    match device_type {
        D::AV_HWDEVICE_TYPE_VAAPI => Some(P::AV_PIX_FMT_VAAPI),
        D::AV_HWDEVICE_TYPE_DXVA2 => Some(P::AV_PIX_FMT_DXVA2_VLD),
        D::AV_HWDEVICE_TYPE_D3D11VA => Some(P::AV_PIX_FMT_D3D11),
        D::AV_HWDEVICE_TYPE_VDPAU => Some(P::AV_PIX_FMT_VDPAU),
        D::AV_HWDEVICE_TYPE_VIDEOTOOLBOX => Some(P::AV_PIX_FMT_VIDEOTOOLBOX),
        D::AV_HWDEVICE_TYPE_CUDA => Some(P::AV_PIX_FMT_CUDA),
        D::AV_HWDEVICE_TYPE_QSV => Some(P::AV_PIX_FMT_QSV),
        _ => None,
    }
}

/// Names of the device types compiled into the linked libavutil
#[must_use]
pub fn available_device_types() -> Vec<String> {
    let mut names = Vec::new();
    let mut device_type = ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_NONE;
    loop {
        device_type = unsafe { ffi::av_hwdevice_iterate_types(device_type) };
        if device_type == ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_NONE {
            break;
        }
        let name = unsafe { ffi::av_hwdevice_get_type_name(device_type) };
        if !name.is_null() {
            names.push(unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned());
        }
    }
    names
}

/// Look up a device type by its `FFmpeg` name
#[must_use]
pub fn find_device_type(name: &str) -> Option<ffi::AVHWDeviceType> {
    let name = CString::new(name).ok()?;
    let device_type = unsafe { ffi::av_hwdevice_find_type_by_name(name.as_ptr()) };
    (device_type != ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_NONE).then_some(device_type)
}

/// Hardware device, frames pool and transfer frame of one session
#[derive(Default)]
pub struct HwAcceleration {
    transfer_frame: Option<Frame>,
    frames_ctx: Option<BufferRef>,
    device_ctx: Option<BufferRef>,
    pixel_format: Option<ffi::AVPixelFormat>,
    device_name: Option<String>,
}

impl HwAcceleration {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Select a device and report the effective decode mode
    ///
    /// `preferred` overrides the platform default. Any prior selection is
    /// released first, so the selector can be reused across opens.
    pub fn init(&mut self, preferred: Option<&str>, logger: &Logger) -> DecodeSupport {
        self.release();

        logger.info(&format!(
            "Available devices for HW Acceleration: {}",
            available_device_types().join(" ")
        ));

        let name = preferred.unwrap_or_else(|| platform_default_device());
        let Some(device_type) = find_device_type(name) else {
            logger.info("HW decoder not available. Fall back to SW decoding");
            return DecodeSupport::Software;
        };

        match self.create(name, device_type) {
            Ok(()) => {
                logger.info(&format!("HW decoding enabled using {name}"));
                DecodeSupport::Hardware
            }
            Err(e) => {
                logger.error(&e.to_string());
                logger.info("HW decoder not available. Fall back to SW decoding");
                self.release();
                DecodeSupport::Software
            }
        }
    }

    fn create(&mut self, name: &str, device_type: ffi::AVHWDeviceType) -> Result<()> {
        let pixel_format = hw_pixel_format_for(device_type).ok_or_else(|| {
            CaptureError::ffmpeg("av_hwdevice_ctx_create", format!("unsupported device {name}"))
        })?;

        self.device_ctx = Some(BufferRef::hw_device(device_type)?);
        self.transfer_frame = Some(Frame::alloc()?);
        self.pixel_format = Some(pixel_format);
        self.device_name = Some(name.to_string());
        Ok(())
    }

    /// Create a frames pool of `width` x `height` NV12 surfaces on the device
    pub fn init_frames_context(&mut self, width: c_int, height: c_int) -> Result<()> {
        let (Some(device), Some(pixel_format)) = (&self.device_ctx, self.pixel_format) else {
            return Err(CaptureError::ffmpeg(
                "av_hwframe_ctx_alloc",
                "no hardware device selected",
            ));
        };
        let frames = device.hw_frames(
            pixel_format,
            FRAMES_SW_FORMAT,
            width,
            height,
            FRAMES_POOL_SIZE,
        )?;
        self.frames_ctx = Some(frames);
        Ok(())
    }

    /// Free the transfer frame, the frames pool and the device
    pub fn release(&mut self) {
        self.transfer_frame = None;
        self.frames_ctx = None;
        self.device_ctx = None;
        self.pixel_format = None;
        self.device_name = None;
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.device_ctx.is_some()
    }

    /// Pixel format of frames that still live in device memory
    #[must_use]
    pub fn hw_pixel_format(&self) -> Option<ffi::AVPixelFormat> {
        self.pixel_format
    }

    #[must_use]
    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    pub fn device_ctx(&self) -> Option<&BufferRef> {
        self.device_ctx.as_ref()
    }

    pub fn frames_ctx(&self) -> Option<&BufferRef> {
        self.frames_ctx.as_ref()
    }

    pub fn transfer_frame(&self) -> Option<&Frame> {
        self.transfer_frame.as_ref()
    }

    pub fn transfer_frame_mut(&mut self) -> Option<&mut Frame> {
        self.transfer_frame.as_mut()
    }
}
