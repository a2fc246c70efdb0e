use anyhow::{bail, Context as _, Result};
use clap::Args;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use video_capture::RawFrame;
use video_capture_playback::{FrameQueue, FrameSync};

use super::CaptureArgs;

/// How long the display loop waits for a frame before rechecking the producer
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Args)]
pub struct PlayCommand {
    #[command(flatten)]
    capture: CaptureArgs,

    /// Frames buffered between the decode thread and the display loop
    #[arg(long, default_value = "16")]
    queue: usize,

    /// Playback speed multiplier
    #[arg(long, default_value = "1.0")]
    speed: f64,
}

#[derive(Debug, Default)]
struct PlaybackStats {
    decoded: u64,
    shown: u64,
    elapsed: Duration,
}

impl PlayCommand {
    pub fn execute(self) -> Result<()> {
        if !(self.speed.is_finite() && self.speed > 0.0) {
            bail!("--speed must be a positive number, got {}", self.speed);
        }

        let mut capture = self.capture.open()?;
        let fps = capture
            .get_fps()
            .context("Capture closed right after opening")?;
        let sync = FrameSync::from_fps(fps * self.speed)
            .with_context(|| format!("Stream reports no usable frame rate ({fps})"))?;
        info!(
            "Playing {} at {:.3} fps (x{}), queue of {}",
            self.capture.input,
            fps * self.speed,
            self.speed,
            self.queue
        );

        let queue = FrameQueue::with_capacity(self.queue);
        let stats = play(
            &queue,
            sync,
            |frame| capture.read_frame(frame),
            |frame| debug!("Showing frame at {:.3}s", frame.pts),
        );

        #[allow(clippy::cast_precision_loss)]
        let achieved = stats.shown as f64 / stats.elapsed.as_secs_f64().max(f64::EPSILON);
        info!(
            "Decoded {} frames, shown {} in {:.3}s ({achieved:.2} fps)",
            stats.decoded,
            stats.shown,
            stats.elapsed.as_secs_f64()
        );
        Ok(())
    }
}

/// Run `decode` on a worker thread feeding `queue` and `show` paced by `sync`
///
/// The display loop ends once the producer has finished, or panicked, and
/// the queue is drained.
fn play<D, S>(
    queue: &FrameQueue<RawFrame>,
    mut sync: FrameSync,
    mut decode: D,
    mut show: S,
) -> PlaybackStats
where
    D: FnMut(&mut RawFrame) -> bool + Send,
    S: FnMut(&RawFrame),
{
    let finished = AtomicBool::new(false);
    let start = Instant::now();

    thread::scope(|scope| {
        let producer = scope.spawn(|| {
            let mut decoded = 0;
            let mut frame = RawFrame::new();
            while decode(&mut frame) {
                queue.put(std::mem::take(&mut frame));
                decoded += 1;
            }
            finished.store(true, Ordering::Release);
            decoded
        });

        let mut shown = 0;
        sync.start();
        loop {
            match queue.get_timeout(POLL_INTERVAL) {
                Some(frame) => {
                    sync.update();
                    show(&frame);
                    shown += 1;
                }
                // A panicking producer never sets the flag
                None if (finished.load(Ordering::Acquire) || producer.is_finished())
                    && queue.is_empty() =>
                {
                    break
                }
                None => {}
            }
        }

        let decoded = producer.join().unwrap_or_default();
        PlaybackStats {
            decoded,
            shown,
            elapsed: start.elapsed(),
        }
    })
}
