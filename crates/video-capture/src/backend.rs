//! Decode library seam
//!
//! The session state machine drives a [`MediaBackend`] one pipeline stage at a
//! time; [`FfmpegBackend`] is the production implementation on top of the
//! `FFmpeg` wrappers in [`crate::ffi`].

use std::os::raw::c_int;
use tracing::debug;
use video_capture_common::{CaptureError, DecodeSupport, Result, StreamInfo};

use crate::config::{CaptureConfig, ScalingAlgorithm};
use crate::ffi::{
    self, CodecContext, Dictionary, FormatContext, Frame, Packet, ScaleContext, Status,
};
use crate::hw::HwAcceleration;
use crate::logger::Logger;

/// Result of reading one packet from the demuxer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketStatus {
    /// A packet of the selected video stream is ready to be sent
    Selected,
    /// A packet of another stream (or nothing yet) was read and discarded
    Skipped,
    /// The demuxer has no more packets
    EndOfFile,
}

/// Result of asking the decoder for a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveStatus {
    /// A decoded frame is held by the backend
    Frame,
    /// The decoder needs more input before it can output (transient)
    NeedsInput,
    /// The decoder has been fully drained
    EndOfStream,
}

/// One demux/decode/convert implementation behind a session
pub trait MediaBackend {
    /// Negotiate hardware decoding and return the effective mode
    fn init_hardware(&mut self, config: &CaptureConfig, logger: &Logger) -> DecodeSupport;

    /// Open `url`, select the best video stream and prepare its decoder
    fn open(
        &mut self,
        url: &str,
        support: DecodeSupport,
        config: &CaptureConfig,
        logger: &Logger,
    ) -> Result<StreamInfo>;

    fn read_packet(&mut self) -> Result<PacketStatus>;

    /// Send the packet returned by the last `Selected` read to the decoder
    fn send_packet(&mut self) -> Result<()>;

    /// Put the decoder in draining mode
    fn send_flush(&mut self) -> Result<()>;

    fn receive_frame(&mut self) -> Result<ReceiveStatus>;

    /// Make the received frame software-addressable
    fn transfer_frame(&mut self) -> Result<()>;

    /// Convert the current frame into packed BGR24 rows in `dst`
    ///
    /// Returns the frame's best-effort timestamp in stream ticks.
    fn convert(&mut self, dst: &mut [u8]) -> Result<Option<i64>>;

    /// Free every per-source resource, including the hardware device
    fn close(&mut self);
}

struct Pipeline {
    scaler: ScaleContext,
    src_frame: Frame,
    packet: Packet,
    codec: CodecContext,
    format: FormatContext,
    stream_index: c_int,
    width: c_int,
    height: c_int,
    scaling: ScalingAlgorithm,
    on_hardware: bool,
}

/// `FFmpeg` implementation of [`MediaBackend`]
#[derive(Default)]
pub struct FfmpegBackend {
    pipeline: Option<Pipeline>,
    hw: HwAcceleration,
}

impl FfmpegBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn pipeline_mut(&mut self) -> Result<&mut Pipeline> {
        self.pipeline.as_mut().ok_or(CaptureError::NotOpened)
    }
}

impl MediaBackend for FfmpegBackend {
    fn init_hardware(&mut self, config: &CaptureConfig, logger: &Logger) -> DecodeSupport {
        ffi::init();
        self.hw.init(config.hw_device.as_deref(), logger)
    }

    fn open(
        &mut self,
        url: &str,
        support: DecodeSupport,
        config: &CaptureConfig,
        logger: &Logger,
    ) -> Result<StreamInfo> {
        ffi::init();
        self.pipeline = None;

        let mut options = Dictionary::new();
        options.set("rtsp_transport", &config.rtsp_transport)?;

        let format = FormatContext::open(url, &mut options)?;
        let (stream_index, decoder) = format.find_video_stream()?;
        let codecpar = format.codecpar(stream_index);

        let hardware = support == DecodeSupport::Hardware && self.hw.is_active();
        if hardware && config.hw_frames_pool {
            let (width, height) = unsafe { ((*codecpar).width, (*codecpar).height) };
            if let Err(e) = self.hw.init_frames_context(width, height) {
                logger.error(&format!("Error initializing HW frame context: {e}"));
            }
        }

        let codec = unsafe {
            CodecContext::create(
                decoder,
                codecpar,
                config.thread_count,
                if hardware { self.hw.device_ctx() } else { None },
                if hardware { self.hw.frames_ctx() } else { None },
            )?
        };

        let packet = Packet::alloc()?;
        let src_frame = Frame::alloc()?;
        let info = format.stream_info(stream_index, &codec);

        debug!(
            "Opened {url}: stream {} ({}), {}x{}, {:.3} fps, hardware={hardware}",
            info.stream_index, info.codec, info.width, info.height, info.fps
        );

        self.pipeline = Some(Pipeline {
            scaler: ScaleContext::new(),
            src_frame,
            packet,
            codec,
            format,
            stream_index,
            width: info.width,
            height: info.height,
            scaling: config.scaling,
            on_hardware: false,
        });

        Ok(info)
    }

    fn read_packet(&mut self) -> Result<PacketStatus> {
        let p = self.pipeline_mut()?;
        p.packet.unref();
        let ret = p.format.read_packet(&mut p.packet);

        match ffi::classify("av_read_frame", ret)? {
            Status::Eof => Ok(PacketStatus::EndOfFile),
            Status::Again => Ok(PacketStatus::Skipped),
            Status::Ok if p.packet.stream_index() == p.stream_index => Ok(PacketStatus::Selected),
            Status::Ok => {
                p.packet.unref();
                Ok(PacketStatus::Skipped)
            }
        }
    }

    fn send_packet(&mut self) -> Result<()> {
        let p = self.pipeline_mut()?;
        let ret = p.codec.send_packet(&p.packet);
        p.packet.unref();
        ffi::classify("avcodec_send_packet", ret)?;
        Ok(())
    }

    fn send_flush(&mut self) -> Result<()> {
        let p = self.pipeline_mut()?;
        let ret = p.codec.send_flush();
        ffi::classify("avcodec_send_packet", ret)?;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<ReceiveStatus> {
        let p = self.pipeline_mut()?;
        let ret = p.codec.receive_frame(&mut p.src_frame);

        Ok(match ffi::classify("avcodec_receive_frame", ret)? {
            Status::Ok => ReceiveStatus::Frame,
            Status::Again => ReceiveStatus::NeedsInput,
            Status::Eof => ReceiveStatus::EndOfStream,
        })
    }

    fn transfer_frame(&mut self) -> Result<()> {
        let hw_format = self.hw.hw_pixel_format();
        let p = self.pipeline.as_mut().ok_or(CaptureError::NotOpened)?;
        p.on_hardware = false;

        if let Some(hw_format) = hw_format {
            if p.src_frame.format() == hw_format as c_int {
                let transfer = self.hw.transfer_frame_mut().ok_or_else(|| {
                    CaptureError::ffmpeg("av_hwframe_transfer_data", "no transfer frame")
                })?;
                transfer.transfer_from(&p.src_frame)?;
                p.on_hardware = true;
            }
        }

        Ok(())
    }

    fn convert(&mut self, dst: &mut [u8]) -> Result<Option<i64>> {
        let p = self.pipeline.as_mut().ok_or(CaptureError::NotOpened)?;

        let src = if p.on_hardware {
            self.hw.transfer_frame().ok_or_else(|| {
                CaptureError::ffmpeg("av_hwframe_transfer_data", "no transfer frame")
            })?
        } else {
            &p.src_frame
        };

        p.scaler
            .scale_to_packed(src, p.width, p.height, p.scaling, dst)?;
        Ok(src.best_effort_timestamp())
    }

    fn close(&mut self) {
        self.pipeline = None;
        self.hw.release();
    }
}
