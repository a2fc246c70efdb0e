//! Decode session
//!
//! [`VideoCapture`] is a `Closed -> Open -> Closed` state machine over a
//! [`MediaBackend`]. Every internal step returns a [`Result`]; failures are
//! logged once here and surface as `false`/`None`.

use std::time::Duration;
use video_capture_common::{CaptureError, DecodeSupport, LogLevel, RawFrame, Result, StreamInfo};

use crate::backend::{FfmpegBackend, MediaBackend, PacketStatus, ReceiveStatus};
use crate::config::CaptureConfig;
use crate::logger::Logger;

const END_OF_STREAM: &str = "End of stream reached";

/// State that only exists while a source is open
#[derive(Debug)]
struct OpenSession {
    info: StreamInfo,
    support: DecodeSupport,
    timestamp_unit: f64,
    buffer: Vec<u8>,
    /// The decoder has been told no more packets follow
    flushed: bool,
    /// Terminal: every later read returns without touching the backend
    finished: bool,
    last_pts: Option<f64>,
}

/// Video decode session
///
/// Opens a file or stream URL, decodes the best video stream and hands out
/// frames as packed BGR24 with a timestamp in seconds.
///
/// ```no_run
/// use video_capture::{DecodeSupport, VideoCapture};
///
/// let mut capture = VideoCapture::new();
/// if capture.open("input.mp4", DecodeSupport::Software) {
///     while let Some(bgr) = capture.read() {
///         println!("{} bytes", bgr.len());
///     }
/// }
/// ```
pub struct VideoCapture<B: MediaBackend = FfmpegBackend> {
    backend: B,
    config: CaptureConfig,
    logger: Logger,
    session: Option<OpenSession>,
}

impl VideoCapture<FfmpegBackend> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CaptureConfig::default())
    }

    #[must_use]
    pub fn with_config(config: CaptureConfig) -> Self {
        Self::with_backend(FfmpegBackend::new(), config)
    }
}

impl Default for VideoCapture<FfmpegBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: MediaBackend> VideoCapture<B> {
    pub fn with_backend(backend: B, config: CaptureConfig) -> Self {
        Self {
            backend,
            config,
            logger: Logger::new(),
            session: None,
        }
    }

    /// Route this session's `level` messages to `sink`
    pub fn set_log_callback<F>(&mut self, sink: F, level: LogLevel)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.logger.set_callback(sink, level);
    }

    /// Open `path` and prepare its best video stream for decoding
    ///
    /// Any previously opened source is released first. `accel` is a
    /// preference: `Hardware` silently degrades to `Software` when no device
    /// is usable, anything else decodes in software.
    pub fn open(&mut self, path: &str, accel: DecodeSupport) -> bool {
        self.release();

        let support = if accel == DecodeSupport::Hardware {
            self.backend.init_hardware(&self.config, &self.logger)
        } else {
            DecodeSupport::Software
        };

        match self.try_open(path, support) {
            Ok(session) => {
                self.session = Some(session);
                self.logger.info("Video Capture is initialized");
                true
            }
            Err(e) => {
                self.logger.error(&e.to_string());
                self.backend.close();
                false
            }
        }
    }

    fn try_open(&mut self, path: &str, support: DecodeSupport) -> Result<OpenSession> {
        let info = self
            .backend
            .open(path, support, &self.config, &self.logger)?;

        if info.width <= 0 || info.height <= 0 {
            return Err(CaptureError::InvalidFrameSize {
                width: info.width,
                height: info.height,
            });
        }
        let timestamp_unit = info.timestamp_unit()?;
        let buffer = vec![0; info.frame_size_in_bytes()];

        Ok(OpenSession {
            info,
            support,
            timestamp_unit,
            buffer,
            flushed: false,
            finished: false,
            last_pts: None,
        })
    }

    /// Decode the next frame into the session's own buffer
    ///
    /// The slice stays valid until the next call that takes `&mut self`.
    pub fn read(&mut self) -> Option<&[u8]> {
        self.next_frame(None)?;
        self.session.as_ref().map(|s| s.buffer.as_slice())
    }

    /// Decode the next frame into `frame`, resizing its buffer when needed
    pub fn read_frame(&mut self, frame: &mut RawFrame) -> bool {
        let Some(size) = self.session.as_ref().map(|s| s.info.frame_size_in_bytes()) else {
            self.not_opened();
            return false;
        };
        frame.data.resize(size, 0);

        match self.next_frame(Some(frame.data.as_mut_slice())) {
            Some(pts) => {
                frame.pts = pts;
                true
            }
            None => false,
        }
    }

    /// grab, decode, retrieve; `None` means no frame for this call
    fn next_frame(&mut self, dst: Option<&mut [u8]>) -> Option<f64> {
        let Some(session) = self.session.as_mut() else {
            self.not_opened();
            return None;
        };
        if session.finished {
            return None;
        }

        match grab(&mut self.backend, session) {
            Ok(true) => {}
            Ok(false) => {
                session.finished = true;
                self.logger.info(END_OF_STREAM);
                return None;
            }
            Err(e) => {
                self.logger.error(&e.to_string());
                return None;
            }
        }

        let dst = match dst {
            Some(dst) => dst,
            None => session.buffer.as_mut_slice(),
        };
        match retrieve(&mut self.backend, dst) {
            Ok(ticks) => {
                #[allow(clippy::cast_precision_loss)]
                let pts = ticks.map_or(0.0, |t| t as f64 * session.timestamp_unit);
                session.last_pts = Some(pts);
                Some(pts)
            }
            Err(e) => {
                self.logger.error(&e.to_string());
                None
            }
        }
    }

    /// Close the source and free every decoder and device resource
    pub fn release(&mut self) {
        if self.session.take().is_some() {
            tracing::debug!("Releasing video capture session");
            self.backend.close();
        }
    }

    #[must_use]
    pub fn is_opened(&self) -> bool {
        self.session.is_some()
    }

    /// Effective decode mode, `DecodeSupport::None` while closed
    #[must_use]
    pub fn decode_support(&self) -> DecodeSupport {
        self.session
            .as_ref()
            .map_or(DecodeSupport::None, |s| s.support)
    }

    #[must_use]
    pub fn stream_info(&self) -> Option<&StreamInfo> {
        self.session.as_ref().map(|s| &s.info)
    }

    /// Timestamp of the most recently delivered frame
    #[must_use]
    pub fn last_pts(&self) -> Option<f64> {
        self.session.as_ref().and_then(|s| s.last_pts)
    }

    pub fn get_frame_size(&self) -> Option<(i32, i32)> {
        self.opened_info().map(|info| (info.width, info.height))
    }

    pub fn get_fps(&self) -> Option<f64> {
        self.opened_info().map(|info| info.fps)
    }

    pub fn get_duration(&self) -> Option<Duration> {
        self.opened_info()
            .map(|info| Duration::try_from_secs_f64(info.duration).unwrap_or_default())
    }

    /// Container frame count, else estimated from duration and frame rate
    pub fn get_frame_count(&self) -> Option<i64> {
        self.opened_info().map(StreamInfo::estimated_frame_count)
    }

    pub fn get_frame_size_in_bytes(&self) -> Option<usize> {
        self.opened_info().map(StreamInfo::frame_size_in_bytes)
    }

    fn opened_info(&self) -> Option<&StreamInfo> {
        let info = self.stream_info();
        if info.is_none() {
            self.not_opened();
        }
        info
    }

    fn not_opened(&self) {
        self.logger.error(&CaptureError::NotOpened.to_string());
    }
}

impl<B: MediaBackend> Drop for VideoCapture<B> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Pull one decoded frame, feeding the decoder as needed
///
/// `Ok(false)` is the terminal end of stream.
fn grab<B: MediaBackend>(backend: &mut B, session: &mut OpenSession) -> Result<bool> {
    loop {
        match backend.receive_frame()? {
            ReceiveStatus::Frame => return Ok(true),
            ReceiveStatus::EndOfStream => return Ok(false),
            ReceiveStatus::NeedsInput if session.flushed => return Ok(false),
            ReceiveStatus::NeedsInput => feed(backend, session)?,
        }
    }
}

/// Send the next packet of the selected stream, or flush at end of file
fn feed<B: MediaBackend>(backend: &mut B, session: &mut OpenSession) -> Result<()> {
    loop {
        match backend.read_packet()? {
            PacketStatus::Selected => return backend.send_packet(),
            PacketStatus::Skipped => {}
            PacketStatus::EndOfFile => {
                tracing::trace!("Demuxer reached end of file, draining decoder");
                backend.send_flush()?;
                session.flushed = true;
                return Ok(());
            }
        }
    }
}

fn retrieve<B: MediaBackend>(backend: &mut B, dst: &mut [u8]) -> Result<Option<i64>> {
    backend.transfer_frame()?;
    backend.convert(dst)
}
