/// Session state machine tests against a scripted in-memory backend
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use video_capture::{
    CaptureConfig, CaptureError, DecodeSupport, LogLevel, Logger, MediaBackend, PacketStatus,
    RawFrame, ReceiveStatus, Result, StreamInfo, VideoCapture,
};

#[derive(Debug, Clone, Copy)]
enum Pkt {
    Video(Option<i64>),
    Audio,
}

#[derive(Debug, Default)]
struct Calls {
    hw_inits: usize,
    opens: usize,
    closes: usize,
    read_packets: usize,
    receives: usize,
    flushes: usize,
    converts: usize,
}

/// Demuxer + decoder model: packets go in, frames come out `delay` packets later
struct ScriptedBackend {
    info: StreamInfo,
    script: Vec<Pkt>,
    delay: usize,
    hw_available: bool,
    failing_opens: usize,
    fail_convert_at: Option<usize>,
    fail_read_at: Option<usize>,
    fail_receive_at: Option<usize>,

    packets: VecDeque<Pkt>,
    pending: Option<Pkt>,
    decoder: VecDeque<Option<i64>>,
    flushed: bool,
    current: Option<Option<i64>>,
    calls: Arc<Mutex<Calls>>,
}

impl ScriptedBackend {
    fn new(script: Vec<Pkt>) -> Self {
        Self {
            info: StreamInfo {
                stream_index: 0,
                codec: "h264".to_string(),
                width: 4,
                height: 2,
                fps: 30.0,
                duration: 10.0,
                frame_count: None,
                time_base: (1, 90_000),
            },
            script,
            delay: 0,
            hw_available: false,
            failing_opens: 0,
            fail_convert_at: None,
            fail_read_at: None,
            fail_receive_at: None,
            packets: VecDeque::new(),
            pending: None,
            decoder: VecDeque::new(),
            flushed: false,
            current: None,
            calls: Arc::new(Mutex::new(Calls::default())),
        }
    }

    /// `count` video packets one tick of 30 fps apart in a 90 kHz time base
    fn video(count: i64) -> Self {
        Self::new((0..count).map(|i| Pkt::Video(Some(i * 3000))).collect())
    }

    fn calls(&self) -> Arc<Mutex<Calls>> {
        Arc::clone(&self.calls)
    }
}

impl MediaBackend for ScriptedBackend {
    fn init_hardware(&mut self, _config: &CaptureConfig, logger: &Logger) -> DecodeSupport {
        self.calls.lock().unwrap().hw_inits += 1;
        if self.hw_available {
            logger.info("HW decoding enabled using scripted");
            DecodeSupport::Hardware
        } else {
            logger.info("HW decoder not available. Fall back to SW decoding");
            DecodeSupport::Software
        }
    }

    fn open(
        &mut self,
        url: &str,
        _support: DecodeSupport,
        _config: &CaptureConfig,
        _logger: &Logger,
    ) -> Result<StreamInfo> {
        self.calls.lock().unwrap().opens += 1;
        if self.failing_opens > 0 {
            self.failing_opens -= 1;
            return Err(CaptureError::ffmpeg(
                "avformat_open_input",
                format!("No such file or directory: {url}"),
            ));
        }
        self.packets = self.script.iter().copied().collect();
        self.decoder.clear();
        self.flushed = false;
        Ok(self.info.clone())
    }

    fn read_packet(&mut self) -> Result<PacketStatus> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.read_packets += 1;
            calls.read_packets - 1
        };
        if self.fail_read_at == Some(index) {
            return Err(CaptureError::ffmpeg(
                "av_read_frame",
                "Invalid data found when processing input",
            ));
        }
        Ok(match self.packets.pop_front() {
            None => PacketStatus::EndOfFile,
            Some(Pkt::Audio) => PacketStatus::Skipped,
            Some(pkt) => {
                self.pending = Some(pkt);
                PacketStatus::Selected
            }
        })
    }

    fn send_packet(&mut self) -> Result<()> {
        if let Some(Pkt::Video(pts)) = self.pending.take() {
            self.decoder.push_back(pts);
        }
        Ok(())
    }

    fn send_flush(&mut self) -> Result<()> {
        self.calls.lock().unwrap().flushes += 1;
        self.flushed = true;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<ReceiveStatus> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.receives += 1;
            calls.receives - 1
        };
        if self.fail_receive_at == Some(index) {
            return Err(CaptureError::ffmpeg(
                "avcodec_receive_frame",
                "Invalid data found when processing input",
            ));
        }
        if self.decoder.len() > self.delay || (self.flushed && !self.decoder.is_empty()) {
            self.current = self.decoder.pop_front();
            Ok(ReceiveStatus::Frame)
        } else if self.flushed {
            Ok(ReceiveStatus::EndOfStream)
        } else {
            Ok(ReceiveStatus::NeedsInput)
        }
    }

    fn transfer_frame(&mut self) -> Result<()> {
        Ok(())
    }

    fn convert(&mut self, dst: &mut [u8]) -> Result<Option<i64>> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.converts += 1;
            calls.converts - 1
        };
        if self.fail_convert_at == Some(index) {
            return Err(CaptureError::UnexpectedSliceHeight {
                got: 0,
                expected: self.info.height,
            });
        }
        dst.fill(u8::try_from(index % 256).unwrap());
        Ok(self.current.take().flatten())
    }

    fn close(&mut self) {
        self.calls.lock().unwrap().closes += 1;
        self.packets.clear();
        self.decoder.clear();
    }
}

fn capture(backend: ScriptedBackend) -> VideoCapture<ScriptedBackend> {
    VideoCapture::with_backend(backend, CaptureConfig::default())
}

fn recorder(
    capture: &mut VideoCapture<ScriptedBackend>,
    level: LogLevel,
) -> Arc<Mutex<Vec<String>>> {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    capture.set_log_callback(move |s: &str| sink.lock().unwrap().push(s.to_string()), level);
    lines
}

#[test]
fn test_reads_every_frame_then_stops() {
    let mut backend = ScriptedBackend::new(vec![
        Pkt::Video(Some(0)),
        Pkt::Audio,
        Pkt::Video(Some(3000)),
        Pkt::Audio,
        Pkt::Audio,
        Pkt::Video(Some(6000)),
        Pkt::Video(Some(9000)),
        Pkt::Video(Some(12000)),
    ]);
    backend.delay = 2;
    let calls = backend.calls();
    let mut capture = capture(backend);

    assert!(capture.open("scripted.mkv", DecodeSupport::Software));

    let mut count = 0;
    while capture.read().is_some() {
        count += 1;
    }
    assert_eq!(count, 5, "frames buffered by the decoder must be drained");
    assert_eq!(calls.lock().unwrap().flushes, 1);

    // Terminal state: later reads never reach the backend
    let receives = calls.lock().unwrap().receives;
    for _ in 0..3 {
        assert!(capture.read().is_none());
        assert!(!capture.read_frame(&mut RawFrame::new()));
    }
    assert_eq!(calls.lock().unwrap().receives, receives);
    assert!(capture.is_opened());
}

#[test]
fn test_timestamps_follow_time_base() {
    let mut capture = capture(ScriptedBackend::video(30));
    assert!(capture.open("scripted.mkv", DecodeSupport::Software));

    let mut frame = RawFrame::new();
    let mut previous = -1.0;
    let mut index: i32 = 0;
    while capture.read_frame(&mut frame) {
        let expected = f64::from(index) / 30.0;
        assert!((frame.pts - expected).abs() < 1e-9, "frame {index}: {}", frame.pts);
        assert!(frame.pts >= previous);
        previous = frame.pts;
        index += 1;
    }
    assert_eq!(index, 30);
    assert!((capture.last_pts().unwrap() - 29.0 / 30.0).abs() < 1e-9);
}

#[test]
fn test_missing_timestamp_reads_as_zero() {
    let mut capture = capture(ScriptedBackend::new(vec![
        Pkt::Video(Some(90_000)),
        Pkt::Video(None),
    ]));
    assert!(capture.open("scripted.mkv", DecodeSupport::Software));

    let mut frame = RawFrame::new();
    assert!(capture.read_frame(&mut frame));
    assert!((frame.pts - 1.0).abs() < 1e-9);
    assert!(capture.read_frame(&mut frame));
    assert_eq!(frame.pts, 0.0);
}

#[test]
fn test_read_frame_sizes_caller_buffer() {
    let mut capture = capture(ScriptedBackend::video(2));
    assert!(capture.open("scripted.mkv", DecodeSupport::Software));

    let mut frame = RawFrame::with_len(3);
    assert!(capture.read_frame(&mut frame));
    assert_eq!(frame.data.len(), 4 * 2 * 3);
    assert!(frame.data.iter().all(|&b| b == 0));

    let bytes = capture.read().expect("second frame");
    assert_eq!(bytes.len(), 4 * 2 * 3);
    assert!(bytes.iter().all(|&b| b == 1));
}

#[test]
fn test_accessors_require_open_session() {
    let mut capture = capture(ScriptedBackend::video(1));
    let errors = recorder(&mut capture, LogLevel::Error);

    assert_eq!(capture.get_frame_size(), None);
    assert_eq!(capture.get_fps(), None);
    assert_eq!(capture.get_duration(), None);
    assert_eq!(capture.get_frame_count(), None);
    assert_eq!(capture.get_frame_size_in_bytes(), None);
    assert!(capture.read().is_none());
    assert_eq!(capture.decode_support(), DecodeSupport::None);
    assert!(!capture.is_opened());

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 6);
    assert!(errors.iter().all(|e| e == "Video path must be opened first."));
}

#[test]
fn test_accessors_while_open() {
    let mut capture = capture(ScriptedBackend::video(1));
    assert!(capture.open("scripted.mkv", DecodeSupport::Software));

    assert_eq!(capture.get_frame_size(), Some((4, 2)));
    assert_eq!(capture.get_fps(), Some(30.0));
    assert_eq!(capture.get_duration(), Some(std::time::Duration::from_secs(10)));
    assert_eq!(capture.get_frame_count(), Some(300));
    assert_eq!(capture.get_frame_size_in_bytes(), Some(24));
    assert_eq!(capture.stream_info().map(|i| i.codec.as_str()), Some("h264"));
}

#[test]
fn test_open_failure_then_success() {
    let mut backend = ScriptedBackend::video(3);
    backend.failing_opens = 1;
    let calls = backend.calls();
    let mut capture = capture(backend);
    let errors = recorder(&mut capture, LogLevel::Error);

    assert!(!capture.open("/nonexistent.mkv", DecodeSupport::Software));
    assert!(!capture.is_opened());
    assert_eq!(calls.lock().unwrap().closes, 1);
    assert!(errors.lock().unwrap()[0].starts_with("avformat_open_input "));

    assert!(capture.open("scripted.mkv", DecodeSupport::Software));
    assert!(capture.is_opened());
    assert_eq!(capture.get_frame_size(), Some((4, 2)));
    assert_eq!(calls.lock().unwrap().opens, 2);
}

#[test]
fn test_invalid_time_base_fails_open() {
    let mut backend = ScriptedBackend::video(3);
    backend.info.time_base = (0, 1);
    let calls = backend.calls();
    let mut capture = capture(backend);
    let errors = recorder(&mut capture, LogLevel::Error);

    assert!(!capture.open("scripted.mkv", DecodeSupport::Software));
    assert!(!capture.is_opened());
    assert_eq!(calls.lock().unwrap().closes, 1);
    assert_eq!(errors.lock().unwrap()[0], "Invalid time base: 0/1");
}

#[test]
fn test_invalid_frame_size_fails_open() {
    let mut backend = ScriptedBackend::video(3);
    backend.info.width = 0;
    let mut capture = capture(backend);

    assert!(!capture.open("scripted.mkv", DecodeSupport::Software));
    assert!(!capture.is_opened());
}

#[test]
fn test_hardware_preference() {
    let backend = ScriptedBackend::video(1);
    let calls = backend.calls();
    let mut capture = capture(backend);

    assert!(capture.open("scripted.mkv", DecodeSupport::Software));
    assert_eq!(capture.decode_support(), DecodeSupport::Software);
    assert!(capture.open("scripted.mkv", DecodeSupport::None));
    assert_eq!(capture.decode_support(), DecodeSupport::Software);
    assert_eq!(calls.lock().unwrap().hw_inits, 0);

    // No usable device: silent downgrade
    assert!(capture.open("scripted.mkv", DecodeSupport::Hardware));
    assert_eq!(capture.decode_support(), DecodeSupport::Software);
    assert_eq!(calls.lock().unwrap().hw_inits, 1);

    let mut backend = ScriptedBackend::video(1);
    backend.hw_available = true;
    let mut capture = VideoCapture::with_backend(backend, CaptureConfig::default());
    assert!(capture.open("scripted.mkv", DecodeSupport::Hardware));
    assert_eq!(capture.decode_support(), DecodeSupport::Hardware);
}

#[test]
fn test_pipeline_failure_keeps_session_open() {
    let mut backend = ScriptedBackend::video(3);
    backend.fail_convert_at = Some(1);
    let mut capture = capture(backend);
    let errors = recorder(&mut capture, LogLevel::Error);
    assert!(capture.open("scripted.mkv", DecodeSupport::Software));

    assert!(capture.read().is_some());
    assert!(capture.read().is_none());
    assert!(capture.is_opened());
    assert!(errors.lock().unwrap()[0].starts_with("sws_scale() worked out unexpectedly"));

    // The failed frame is lost, decoding continues with the next one
    assert!(capture.read().is_some());
    assert!(capture.read().is_none());
}

#[test]
fn test_decoder_error_is_not_terminal() {
    let mut backend = ScriptedBackend::video(3);
    backend.fail_receive_at = Some(0);
    let calls = backend.calls();
    let mut capture = capture(backend);
    let errors = recorder(&mut capture, LogLevel::Error);
    assert!(capture.open("scripted.mkv", DecodeSupport::Software));

    assert!(!capture.read_frame(&mut RawFrame::new()));
    assert!(capture.is_opened());
    assert_eq!(errors.lock().unwrap().len(), 1);
    assert!(errors.lock().unwrap()[0].starts_with("avcodec_receive_frame "));

    // The next read goes back to the decoder and nothing was lost
    let mut count = 0;
    while capture.read().is_some() {
        count += 1;
    }
    assert_eq!(count, 3);
    assert!(calls.lock().unwrap().receives > 1);
}

#[test]
fn test_demuxer_error_is_not_terminal() {
    let mut backend = ScriptedBackend::video(3);
    backend.fail_read_at = Some(1);
    let calls = backend.calls();
    let mut capture = capture(backend);
    let errors = recorder(&mut capture, LogLevel::Error);
    assert!(capture.open("scripted.mkv", DecodeSupport::Software));

    let mut frame = RawFrame::new();
    assert!(capture.read_frame(&mut frame));
    assert!(!capture.read_frame(&mut frame));
    assert!(capture.is_opened());
    assert!(errors.lock().unwrap()[0].starts_with("av_read_frame "));

    assert!(capture.read_frame(&mut frame));
    assert!((frame.pts - 1.0 / 30.0).abs() < 1e-9);
    assert!(capture.read_frame(&mut frame));
    assert!(!capture.read_frame(&mut frame));
    assert_eq!(calls.lock().unwrap().flushes, 1);
    assert_eq!(errors.lock().unwrap().len(), 1);
}

#[test]
fn test_release_is_idempotent() {
    let backend = ScriptedBackend::video(3);
    let calls = backend.calls();
    let mut capture = capture(backend);
    assert!(capture.open("scripted.mkv", DecodeSupport::Software));

    capture.release();
    capture.release();
    assert_eq!(calls.lock().unwrap().closes, 1);
    assert!(!capture.is_opened());
    assert_eq!(capture.decode_support(), DecodeSupport::None);
    assert!(capture.read().is_none());
}

#[test]
fn test_reopen_releases_previous_source() {
    let backend = ScriptedBackend::video(3);
    let calls = backend.calls();
    let mut capture = capture(backend);

    assert!(capture.open("first.mkv", DecodeSupport::Software));
    assert!(capture.read().is_some());
    assert!(capture.open("second.mkv", DecodeSupport::Software));
    assert_eq!(calls.lock().unwrap().closes, 1);

    let mut count = 0;
    while capture.read().is_some() {
        count += 1;
    }
    assert_eq!(count, 3);
}

#[test]
fn test_drop_releases_session() {
    let backend = ScriptedBackend::video(3);
    let calls = backend.calls();
    {
        let mut capture = capture(backend);
        assert!(capture.open("scripted.mkv", DecodeSupport::Software));
    }
    assert_eq!(calls.lock().unwrap().closes, 1);
}

#[test]
fn test_info_messages() {
    let mut capture = capture(ScriptedBackend::video(1));
    let infos = recorder(&mut capture, LogLevel::Info);

    assert!(capture.open("scripted.mkv", DecodeSupport::Hardware));
    assert!(capture.read().is_some());
    assert!(capture.read().is_none());
    assert!(capture.read().is_none());

    let infos = infos.lock().unwrap();
    assert_eq!(
        *infos,
        vec![
            "HW decoder not available. Fall back to SW decoding",
            "Video Capture is initialized",
            "End of stream reached",
        ]
    );
}

#[test]
fn test_empty_source_ends_immediately() {
    let backend = ScriptedBackend::new(vec![Pkt::Audio, Pkt::Audio]);
    let calls = backend.calls();
    let mut capture = capture(backend);
    assert!(capture.open("audio-only.mkv", DecodeSupport::Software));

    assert!(capture.read().is_none());
    let calls = calls.lock().unwrap();
    assert_eq!(calls.read_packets, 3);
    assert_eq!(calls.converts, 0);
}
