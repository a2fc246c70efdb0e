//! RAII wrappers over the `FFmpeg` C API
//!
//! Each native object (format context, codec context, packet, frame, buffer
//! reference, scaling context, dictionary) is owned by exactly one wrapper and
//! released in its `Drop` impl, so every early return of an `open` sequence
//! frees what was acquired so far.
//!
//! # Safety
//!
//! This module uses `unsafe` extensively as it directly interfaces with C code.
//! Memory safety is ensured by:
//! - RAII wrappers with Drop implementations
//! - Exclusive ownership of every pointer (no wrapper is `Clone`)
//! - Validation of all `FFmpeg` return codes

use ffmpeg_sys_next as ffi;
use std::ffi::{CStr, CString};
use std::os::raw::c_int;
use std::ptr;
use std::sync::{Mutex, MutexGuard, Once, PoisonError};
use tracing::{debug, error};
use video_capture_common::{CaptureError, Result, StreamInfo};

use crate::config::ScalingAlgorithm;

/// Global mutex for `FFmpeg` initialization functions
///
/// `avformat_open_input()`, `avformat_find_stream_info()` and `avcodec_open2()`
/// are not thread-safe and must be serialized across all concurrent sessions.
/// The decode loop does not take this lock.
static FFMPEG_INIT_LOCK: Mutex<()> = Mutex::new(());

/// Bilinear interpolation for scaling (from libswscale/swscale.h)
const SWS_BILINEAR: c_int = 2;

/// Bicubic interpolation for scaling (from libswscale/swscale.h)
const SWS_BICUBIC: c_int = 4;

/// Decode more than one frame at once
const FF_THREAD_FRAME: c_int = 1;

/// Decode more than one part of a single frame at once
const FF_THREAD_SLICE: c_int = 2;

/// Packed 3-byte output format handed to consumers
pub const OUTPUT_PIXEL_FORMAT: ffi::AVPixelFormat = ffi::AVPixelFormat::AV_PIX_FMT_BGR24;

fn init_lock() -> MutexGuard<'static, ()> {
    FFMPEG_INIT_LOCK
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Initialize `FFmpeg` once per process and silence its own log output
pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        if let Err(e) = ffmpeg_next::init() {
            error!("Failed to initialize FFmpeg: {e}");
        }
        unsafe {
            ffi::avformat_network_init();
        }
        ffmpeg_next::util::log::set_level(ffmpeg_next::util::log::Level::Quiet);
        debug!("FFmpeg initialized");
    });
}

/// Human readable text for an `FFmpeg` error code
#[must_use]
pub fn err2str(code: c_int) -> String {
    ffmpeg_next::Error::from(code).to_string()
}

fn check(step: &'static str, ret: c_int) -> Result<c_int> {
    if ret < 0 {
        Err(CaptureError::ffmpeg(step, err2str(ret)))
    } else {
        Ok(ret)
    }
}

/// Outcome of a demuxer/decoder call whose negative codes are not all errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// `AVERROR(EAGAIN)`: output not available in the current state
    Again,
    /// `AVERROR_EOF`
    Eof,
}

/// Classify a return code, turning anything but EAGAIN/EOF into an error
pub fn classify(step: &'static str, ret: c_int) -> Result<Status> {
    if ret >= 0 {
        return Ok(Status::Ok);
    }
    if ret == ffi::AVERROR_EOF {
        return Ok(Status::Eof);
    }
    match ffmpeg_next::Error::from(ret) {
        ffmpeg_next::Error::Eof => Ok(Status::Eof),
        ffmpeg_next::Error::Other { errno } if errno == ffmpeg_next::error::EAGAIN => {
            Ok(Status::Again)
        }
        other => Err(CaptureError::ffmpeg(step, other.to_string())),
    }
}

fn alloc_failed(step: &'static str) -> CaptureError {
    CaptureError::ffmpeg(step, "allocation failed")
}

/// Reinterpret a raw `AVFrame::format` value
///
/// # Safety
///
/// `raw` must come from the linked libavutil, i.e. be a valid `AVPixelFormat`.
unsafe fn pixel_format_from_raw(raw: c_int) -> ffi::AVPixelFormat {
    std::mem::transmute::<c_int, ffi::AVPixelFormat>(raw)
}

fn rational_to_f64(r: ffi::AVRational) -> Option<f64> {
    (r.num > 0 && r.den > 0).then(|| f64::from(r.num) / f64::from(r.den))
}

/// RAII wrapper for `AVDictionary`
pub struct Dictionary {
    ptr: *mut ffi::AVDictionary,
}

impl Dictionary {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ptr: ptr::null_mut(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let key = CString::new(key).map_err(|e| CaptureError::ffmpeg("av_dict_set", e.to_string()))?;
        let value =
            CString::new(value).map_err(|e| CaptureError::ffmpeg("av_dict_set", e.to_string()))?;
        check("av_dict_set", unsafe {
            ffi::av_dict_set(&mut self.ptr, key.as_ptr(), value.as_ptr(), 0)
        })?;
        Ok(())
    }
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Dictionary {
    fn drop(&mut self) {
        unsafe {
            if !self.ptr.is_null() {
                ffi::av_dict_free(&mut self.ptr);
            }
        }
    }
}

/// RAII wrapper for `AVFormatContext`
/// Automatically closes the input when dropped
pub struct FormatContext {
    ptr: *mut ffi::AVFormatContext,
}

impl FormatContext {
    /// Allocate a demuxer, open `url` and probe its streams
    pub fn open(url: &str, options: &mut Dictionary) -> Result<Self> {
        let url_cstr = CString::new(url).map_err(|_| CaptureError::InvalidPath(url.to_string()))?;

        unsafe {
            let mut ptr = ffi::avformat_alloc_context();
            if ptr.is_null() {
                return Err(alloc_failed("avformat_alloc_context"));
            }

            let _lock = init_lock();

            // On failure the context is freed by FFmpeg and `ptr` is nulled
            check(
                "avformat_open_input",
                ffi::avformat_open_input(
                    &mut ptr,
                    url_cstr.as_ptr(),
                    ptr::null_mut(),
                    &mut options.ptr,
                ),
            )?;
            let ctx = FormatContext { ptr };

            check(
                "avformat_find_stream_info",
                ffi::avformat_find_stream_info(ctx.ptr, ptr::null_mut()),
            )?;

            Ok(ctx)
        }
    }

    /// Find the best video stream and return its index and decoder
    pub fn find_video_stream(&self) -> Result<(c_int, *const ffi::AVCodec)> {
        let mut decoder: *const ffi::AVCodec = ptr::null();
        let index = unsafe {
            ffi::av_find_best_stream(
                self.ptr,
                ffi::AVMediaType::AVMEDIA_TYPE_VIDEO,
                -1,
                -1,
                &mut decoder,
                0,
            )
        };

        if index < 0 {
            return match ffmpeg_next::Error::from(index) {
                ffmpeg_next::Error::StreamNotFound => Err(CaptureError::NoVideoStream),
                other => Err(CaptureError::ffmpeg("av_find_best_stream", other.to_string())),
            };
        }
        if decoder.is_null() {
            return Err(CaptureError::ffmpeg(
                "av_find_best_stream",
                "No decoder found for video stream",
            ));
        }

        Ok((index, decoder))
    }

    fn stream(&self, index: c_int) -> *mut ffi::AVStream {
        unsafe { *(*self.ptr).streams.add(index as usize) }
    }

    /// Codec parameters of a stream
    pub fn codecpar(&self, index: c_int) -> *mut ffi::AVCodecParameters {
        unsafe { (*self.stream(index)).codecpar }
    }

    /// Read the next packet of any stream into `packet`
    pub fn read_packet(&self, packet: &mut Packet) -> c_int {
        unsafe { ffi::av_read_frame(self.ptr, packet.ptr) }
    }

    /// Collect metadata for the selected stream
    #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
    pub fn stream_info(&self, index: c_int, codec: &CodecContext) -> StreamInfo {
        unsafe {
            let stream = self.stream(index);
            let time_base = (*stream).time_base;

            let fps = rational_to_f64((*stream).avg_frame_rate)
                .or_else(|| rational_to_f64((*stream).r_frame_rate))
                .unwrap_or(0.0);

            let stream_duration = (*stream).duration;
            let duration = if stream_duration != ffi::AV_NOPTS_VALUE && stream_duration > 0 {
                rational_to_f64(time_base).map_or(0.0, |unit| stream_duration as f64 * unit)
            } else if (*self.ptr).duration > 0 {
                (*self.ptr).duration as f64 / f64::from(ffi::AV_TIME_BASE)
            } else {
                0.0
            };

            let nb_frames = (*stream).nb_frames;
            let codec_name = CStr::from_ptr(ffi::avcodec_get_name((*(*stream).codecpar).codec_id))
                .to_string_lossy()
                .into_owned();

            StreamInfo {
                stream_index: index as usize,
                codec: codec_name,
                width: codec.width(),
                height: codec.height(),
                fps,
                duration,
                frame_count: (nb_frames > 0).then_some(nb_frames),
                time_base: (time_base.num, time_base.den),
            }
        }
    }
}

impl Drop for FormatContext {
    fn drop(&mut self) {
        unsafe {
            if !self.ptr.is_null() {
                ffi::avformat_close_input(&mut self.ptr);
            }
        }
    }
}

/// RAII wrapper for `AVCodecContext`
/// Automatically frees the codec context when dropped
pub struct CodecContext {
    ptr: *mut ffi::AVCodecContext,
}

impl CodecContext {
    /// Create and open a decoder for a stream
    ///
    /// When `hw_device` is given the decoder gets its own reference to the
    /// device (and frames) context, so the selector may be released later
    /// without invalidating the codec.
    ///
    /// # Safety
    /// - `codec` must be a valid pointer obtained from `av_find_best_stream`
    /// - `codecpar` must be a valid pointer to `AVCodecParameters` from an `AVStream`
    pub unsafe fn create(
        codec: *const ffi::AVCodec,
        codecpar: *const ffi::AVCodecParameters,
        thread_count: c_int,
        hw_device: Option<&BufferRef>,
        hw_frames: Option<&BufferRef>,
    ) -> Result<Self> {
        let ptr = ffi::avcodec_alloc_context3(codec);
        if ptr.is_null() {
            return Err(alloc_failed("avcodec_alloc_context3"));
        }
        let ctx = CodecContext { ptr };

        check(
            "avcodec_parameters_to_context",
            ffi::avcodec_parameters_to_context(ctx.ptr, codecpar),
        )?;

        (*ctx.ptr).thread_count = thread_count;
        (*ctx.ptr).thread_type = FF_THREAD_FRAME | FF_THREAD_SLICE;

        if let Some(device) = hw_device {
            (*ctx.ptr).hw_device_ctx = device.new_ref("av_buffer_ref")?;
        }
        if let Some(frames) = hw_frames {
            (*ctx.ptr).hw_frames_ctx = frames.new_ref("av_buffer_ref")?;
        }

        let _lock = init_lock();
        check(
            "avcodec_open2",
            ffi::avcodec_open2(ctx.ptr, codec, ptr::null_mut()),
        )?;

        Ok(ctx)
    }

    pub fn width(&self) -> c_int {
        unsafe { (*self.ptr).width }
    }

    pub fn height(&self) -> c_int {
        unsafe { (*self.ptr).height }
    }

    pub fn send_packet(&mut self, packet: &Packet) -> c_int {
        unsafe { ffi::avcodec_send_packet(self.ptr, packet.ptr) }
    }

    /// Enter draining mode (NULL packet)
    pub fn send_flush(&mut self) -> c_int {
        unsafe { ffi::avcodec_send_packet(self.ptr, ptr::null()) }
    }

    pub fn receive_frame(&mut self, frame: &mut Frame) -> c_int {
        unsafe { ffi::avcodec_receive_frame(self.ptr, frame.ptr) }
    }
}

impl Drop for CodecContext {
    fn drop(&mut self) {
        unsafe {
            if !self.ptr.is_null() {
                ffi::avcodec_free_context(&mut self.ptr);
            }
        }
    }
}

/// RAII wrapper for a reusable `AVPacket`
pub struct Packet {
    ptr: *mut ffi::AVPacket,
}

impl Packet {
    pub fn alloc() -> Result<Self> {
        let ptr = unsafe { ffi::av_packet_alloc() };
        if ptr.is_null() {
            return Err(alloc_failed("av_packet_alloc"));
        }
        Ok(Packet { ptr })
    }

    pub fn stream_index(&self) -> c_int {
        unsafe { (*self.ptr).stream_index }
    }

    pub fn unref(&mut self) {
        unsafe { ffi::av_packet_unref(self.ptr) }
    }
}

impl Drop for Packet {
    fn drop(&mut self) {
        unsafe {
            if !self.ptr.is_null() {
                ffi::av_packet_free(&mut self.ptr);
            }
        }
    }
}

/// RAII wrapper for a reusable `AVFrame`
pub struct Frame {
    ptr: *mut ffi::AVFrame,
}

impl Frame {
    pub fn alloc() -> Result<Self> {
        let ptr = unsafe { ffi::av_frame_alloc() };
        if ptr.is_null() {
            return Err(alloc_failed("av_frame_alloc"));
        }
        Ok(Frame { ptr })
    }

    /// Raw `AVPixelFormat` value of the frame
    pub fn format(&self) -> c_int {
        unsafe { (*self.ptr).format }
    }

    /// Best-effort presentation timestamp in stream ticks
    pub fn best_effort_timestamp(&self) -> Option<i64> {
        let ts = unsafe { (*self.ptr).best_effort_timestamp };
        (ts != ffi::AV_NOPTS_VALUE).then_some(ts)
    }

    /// Download a hardware-resident frame into this one, copying its metadata
    pub fn transfer_from(&mut self, src: &Frame) -> Result<()> {
        unsafe {
            ffi::av_frame_unref(self.ptr);
            check(
                "av_hwframe_transfer_data",
                ffi::av_hwframe_transfer_data(self.ptr, src.ptr, 0),
            )?;
            check("av_frame_copy_props", ffi::av_frame_copy_props(self.ptr, src.ptr))?;
        }
        Ok(())
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        unsafe {
            if !self.ptr.is_null() {
                ffi::av_frame_free(&mut self.ptr);
            }
        }
    }
}

/// RAII wrapper for one `AVBufferRef` reference
pub struct BufferRef {
    ptr: *mut ffi::AVBufferRef,
}

impl BufferRef {
    /// Create a hardware device context of the given type
    pub fn hw_device(device_type: ffi::AVHWDeviceType) -> Result<Self> {
        let mut ptr: *mut ffi::AVBufferRef = ptr::null_mut();
        check("av_hwdevice_ctx_create", unsafe {
            ffi::av_hwdevice_ctx_create(&mut ptr, device_type, ptr::null(), ptr::null_mut(), 0)
        })?;
        Ok(BufferRef { ptr })
    }

    /// Allocate and initialize a hardware frames context on this device
    pub fn hw_frames(
        &self,
        hw_format: ffi::AVPixelFormat,
        sw_format: ffi::AVPixelFormat,
        width: c_int,
        height: c_int,
        pool_size: c_int,
    ) -> Result<Self> {
        unsafe {
            let ptr = ffi::av_hwframe_ctx_alloc(self.ptr);
            if ptr.is_null() {
                return Err(alloc_failed("av_hwframe_ctx_alloc"));
            }
            let frames = BufferRef { ptr };

            let ctx = (*frames.ptr).data.cast::<ffi::AVHWFramesContext>();
            (*ctx).format = hw_format;
            (*ctx).sw_format = sw_format;
            (*ctx).width = width;
            (*ctx).height = height;
            (*ctx).initial_pool_size = pool_size;

            check("av_hwframe_ctx_init", ffi::av_hwframe_ctx_init(frames.ptr))?;
            Ok(frames)
        }
    }

    /// New reference to the same buffer, owned by the caller
    fn new_ref(&self, step: &'static str) -> Result<*mut ffi::AVBufferRef> {
        let ptr = unsafe { ffi::av_buffer_ref(self.ptr) };
        if ptr.is_null() {
            return Err(alloc_failed(step));
        }
        Ok(ptr)
    }
}

impl Drop for BufferRef {
    fn drop(&mut self) {
        unsafe {
            if !self.ptr.is_null() {
                ffi::av_buffer_unref(&mut self.ptr);
            }
        }
    }
}

/// Cached `SwsContext` converting decoded frames to packed BGR24
pub struct ScaleContext {
    ptr: *mut ffi::SwsContext,
}

impl ScaleContext {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ptr: ptr::null_mut(),
        }
    }

    /// Convert `src` into `dst` as tightly packed rows of `width * 3` bytes
    ///
    /// The context is created on first use and reused while the source
    /// format and dimensions stay the same.
    pub fn scale_to_packed(
        &mut self,
        src: &Frame,
        width: c_int,
        height: c_int,
        algorithm: ScalingAlgorithm,
        dst: &mut [u8],
    ) -> Result<()> {
        let row_bytes = width as usize * 3;
        let needed = row_bytes * height as usize;
        if dst.len() < needed {
            return Err(CaptureError::BufferTooSmall {
                got: dst.len(),
                needed,
            });
        }

        let flags = match algorithm {
            ScalingAlgorithm::Bilinear => SWS_BILINEAR,
            ScalingAlgorithm::Bicubic => SWS_BICUBIC,
        };

        unsafe {
            self.ptr = ffi::sws_getCachedContext(
                self.ptr,
                width,
                height,
                pixel_format_from_raw(src.format()),
                width,
                height,
                OUTPUT_PIXEL_FORMAT,
                flags,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null(),
            );
            if self.ptr.is_null() {
                return Err(CaptureError::ffmpeg(
                    "sws_getCachedContext",
                    "Couldn't initialize SwsContext",
                ));
            }

            let dst_data: [*mut u8; 4] = [
                dst.as_mut_ptr(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
            ];
            let dst_linesize: [c_int; 4] = [width * 3, 0, 0, 0];

            let rows = ffi::sws_scale(
                self.ptr,
                (*src.ptr).data.as_ptr() as *const *const u8,
                (*src.ptr).linesize.as_ptr(),
                0,
                height,
                dst_data.as_ptr(),
                dst_linesize.as_ptr(),
            );
            if rows != height {
                return Err(CaptureError::UnexpectedSliceHeight {
                    got: rows,
                    expected: height,
                });
            }
        }

        Ok(())
    }
}

impl Default for ScaleContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScaleContext {
    fn drop(&mut self) {
        unsafe {
            if !self.ptr.is_null() {
                ffi::sws_freeContext(self.ptr);
                self.ptr = ptr::null_mut();
            }
        }
    }
}

// Safety: every wrapper exclusively owns its native object and is only ever
// used through `&mut` by the one session that owns it.
unsafe impl Send for Dictionary {}
unsafe impl Send for FormatContext {}
unsafe impl Send for CodecContext {}
unsafe impl Send for Packet {}
unsafe impl Send for Frame {}
unsafe impl Send for BufferRef {}
unsafe impl Send for ScaleContext {}
