//! Adaptive frame pacer
//!
//! Holds a loop to a fixed tick. The remaining time of each tick is slept
//! off in 1 ms steps while it exceeds the expected cost of one such step
//! (running mean plus one standard deviation of the measured oversleep),
//! and the residual is spun away.

use std::thread;
use std::time::{Duration, Instant};
use tracing::trace;

const SLEEP_QUANTUM: Duration = Duration::from_millis(1);

#[allow(clippy::cast_precision_loss)]
const INITIAL_MEAN_NS: f64 = SLEEP_QUANTUM.as_nanos() as f64;

/// Snapshot of the pacer's sleep statistics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SleepStats {
    /// Mean measured duration of one quantum sleep
    pub mean: Duration,
    pub stddev: Duration,
    /// Remaining time below which the pacer stops sleeping and spins
    pub estimate: Duration,
    /// Samples behind the statistics, including the seeded one
    pub samples: u64,
}

#[derive(Debug, Clone)]
pub struct FrameSync {
    tick: Duration,
    spin_limit: Duration,
    reference: Instant,
    mean_ns: f64,
    m2: f64,
    count: u64,
    estimate: Duration,
}

impl FrameSync {
    /// Pacer for a period of `tick`; the spin phase is bounded by one tick
    #[must_use]
    pub fn new(tick: Duration) -> Self {
        let mut sync = Self {
            tick,
            spin_limit: tick,
            reference: Instant::now(),
            mean_ns: 0.0,
            m2: 0.0,
            count: 0,
            estimate: Duration::ZERO,
        };
        sync.reset();
        sync
    }

    /// Pacer for a stream running at `fps` frames per second
    ///
    /// Returns `None` for a non-positive or non-finite rate.
    #[must_use]
    pub fn from_fps(fps: f64) -> Option<Self> {
        if !(fps.is_finite() && fps > 0.0) {
            return None;
        }
        Duration::try_from_secs_f64(1.0 / fps).ok().map(Self::new)
    }

    /// Upper bound on the busy-wait at the end of each tick
    #[must_use]
    pub fn with_spin_limit(mut self, limit: Duration) -> Self {
        self.spin_limit = limit;
        self
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Mark the beginning of the current tick
    pub fn start(&mut self) {
        self.reference = Instant::now();
    }

    /// Wait out the rest of the current tick and begin the next one
    pub fn update(&mut self) {
        let elapsed = self.reference.elapsed();
        if elapsed > self.tick {
            trace!("Frame late by {:?}", elapsed - self.tick);
        }
        self.wait(self.tick.saturating_sub(elapsed));
        self.reference = Instant::now();
    }

    /// Forget the sleep statistics and restart the current tick now
    pub fn reset(&mut self) {
        self.reference = Instant::now();
        self.mean_ns = INITIAL_MEAN_NS;
        self.m2 = 0.0;
        self.count = 1;
        self.estimate = SLEEP_QUANTUM;
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn stats(&self) -> SleepStats {
        SleepStats {
            mean: Duration::from_nanos(self.mean_ns.max(0.0) as u64),
            stddev: Duration::from_nanos(self.stddev_ns() as u64),
            estimate: self.estimate,
            samples: self.count,
        }
    }

    fn wait(&mut self, mut remaining: Duration) {
        while remaining > self.estimate {
            let start = Instant::now();
            thread::sleep(SLEEP_QUANTUM);
            let measured = start.elapsed();
            remaining = remaining.saturating_sub(measured);
            self.record(measured);
        }

        let spin = remaining.min(self.spin_limit);
        let start = Instant::now();
        while start.elapsed() < spin {
            std::hint::spin_loop();
        }
    }

    /// Welford update with one measured quantum sleep
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn record(&mut self, measured: Duration) {
        let x = measured.as_nanos() as f64;
        self.count += 1;
        let delta = x - self.mean_ns;
        self.mean_ns += delta / self.count as f64;
        self.m2 += delta * (x - self.mean_ns);

        let estimate_ns = (self.mean_ns + self.stddev_ns()).max(0.0);
        self.estimate = Duration::from_nanos(estimate_ns as u64);
    }

    #[allow(clippy::cast_precision_loss)]
    fn stddev_ns(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2.max(0.0) / (self.count - 1) as f64).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(d: Duration) -> f64 {
        d.as_secs_f64() * 1e3
    }

    #[test]
    fn test_initial_state() {
        let stats = FrameSync::new(Duration::from_millis(33)).stats();
        assert_eq!(stats.mean, Duration::from_millis(1));
        assert_eq!(stats.estimate, Duration::from_millis(1));
        assert_eq!(stats.stddev, Duration::ZERO);
        assert_eq!(stats.samples, 1);
    }

    #[test]
    fn test_welford_update() {
        let mut sync = FrameSync::new(Duration::from_millis(33));
        sync.record(Duration::from_millis(3));

        let stats = sync.stats();
        assert_eq!(stats.samples, 2);
        assert!((millis(stats.mean) - 2.0).abs() < 1e-6);
        assert!((millis(stats.stddev) - 2f64.sqrt()).abs() < 1e-3);
        assert!((millis(stats.estimate) - (2.0 + 2f64.sqrt())).abs() < 1e-3);

        sync.reset();
        assert_eq!(sync.stats(), FrameSync::new(Duration::from_millis(1)).stats());
    }

    #[test]
    fn test_constant_samples_have_no_spread() {
        let mut sync = FrameSync::new(Duration::from_millis(10));
        for _ in 0..50 {
            sync.record(Duration::from_millis(1));
        }
        let stats = sync.stats();
        assert_eq!(stats.mean, Duration::from_millis(1));
        assert_eq!(stats.stddev, Duration::ZERO);
        assert_eq!(stats.estimate, Duration::from_millis(1));
        assert_eq!(stats.samples, 51);
    }

    #[test]
    fn test_from_fps() {
        let sync = FrameSync::from_fps(4.0).unwrap();
        assert_eq!(sync.tick(), Duration::from_millis(250));
        assert!(FrameSync::from_fps(0.0).is_none());
        assert!(FrameSync::from_fps(-30.0).is_none());
        assert!(FrameSync::from_fps(f64::NAN).is_none());
    }

    #[test]
    fn test_late_frame_does_not_sleep() {
        let mut sync = FrameSync::new(Duration::from_millis(10));
        sync.start();
        thread::sleep(Duration::from_millis(20));

        let before = Instant::now();
        sync.update();
        assert!(before.elapsed() < Duration::from_millis(5));
        assert_eq!(sync.stats().samples, 1);
    }

    #[test]
    fn test_reset_restarts_reference() {
        let tick = Duration::from_millis(30);
        let mut sync = FrameSync::new(tick);
        sync.start();
        thread::sleep(Duration::from_millis(40));

        // Measured from the reset, not from the stale start
        sync.reset();
        let before = Instant::now();
        sync.update();
        assert!(before.elapsed() >= Duration::from_millis(25), "{:?}", before.elapsed());
    }

    #[test]
    fn test_average_period_converges() {
        let tick = Duration::from_millis(10);
        let iterations = 100;
        let mut sync = FrameSync::new(tick);

        let begin = Instant::now();
        sync.start();
        for _ in 0..iterations {
            sync.update();
        }
        let average = begin.elapsed() / iterations;

        assert!(
            (millis(average) - millis(tick)).abs() < 2.0,
            "average period {average:?}"
        );
        assert!(sync.stats().samples > 1);
    }
}
