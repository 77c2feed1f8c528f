//! Backoff durations of the supervisor loops and the shared shutdown flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Pause after stopping a control loop, before the first re-scan.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);
/// Interval between scans of a bus that does not answer.
pub const DEFAULT_SCAN_RETRY: Duration = Duration::from_millis(250);
/// Interval between two calibration attempts.
pub const DEFAULT_CALIBRATION_RETRY: Duration = Duration::from_millis(250);
/// Interval between hardware-version probes at start-up.
pub const DEFAULT_VERSION_RETRY: Duration = Duration::from_millis(250);
/// Supervisor tick period when no poll frequency is configured (2 Hz).
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_millis(500);

/// Longest uninterrupted sleep; bounds how late a shutdown is noticed.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Every wait used by the connection supervisors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorTiming {
    pub poll_period: Duration,
    pub settle_delay: Duration,
    pub scan_retry: Duration,
    pub calibration_retry: Duration,
    pub version_retry: Duration,
}

impl Default for SupervisorTiming {
    fn default() -> Self {
        Self {
            poll_period: DEFAULT_POLL_PERIOD,
            settle_delay: DEFAULT_SETTLE_DELAY,
            scan_retry: DEFAULT_SCAN_RETRY,
            calibration_retry: DEFAULT_CALIBRATION_RETRY,
            version_retry: DEFAULT_VERSION_RETRY,
        }
    }
}

impl SupervisorTiming {
    /// Default backoffs with the tick period derived from `hz`.  A
    /// non-positive or non-finite frequency keeps the default period.
    pub fn from_poll_frequency(hz: f64) -> Self {
        Self::default().with_poll_frequency(hz)
    }

    pub fn with_poll_frequency(mut self, hz: f64) -> Self {
        if hz.is_finite() && hz > 0.0 {
            self.poll_period = Duration::from_secs_f64(1.0 / hz);
        }
        self
    }
}

/// Process-wide stop signal for the supervisor threads.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early if shutdown is triggered.
    ///
    /// Returns `false` when the sleep was cut short by shutdown.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_triggered() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_bus_backoffs() {
        let timing = SupervisorTiming::default();
        assert_eq!(timing.settle_delay, Duration::from_millis(100));
        assert_eq!(timing.scan_retry, Duration::from_millis(250));
        assert_eq!(timing.calibration_retry, Duration::from_millis(250));
    }

    #[test]
    fn poll_frequency_sets_period() {
        let timing = SupervisorTiming::from_poll_frequency(4.0);
        assert_eq!(timing.poll_period, Duration::from_millis(250));
    }

    #[test]
    fn invalid_poll_frequency_keeps_default_period() {
        assert_eq!(
            SupervisorTiming::from_poll_frequency(0.0).poll_period,
            DEFAULT_POLL_PERIOD
        );
        assert_eq!(
            SupervisorTiming::from_poll_frequency(f64::NAN).poll_period,
            DEFAULT_POLL_PERIOD
        );
    }

    #[test]
    fn sleep_completes_without_shutdown() {
        let shutdown = Shutdown::new();
        let start = Instant::now();
        assert!(shutdown.sleep(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn shutdown_cuts_sleep_short() {
        let shutdown = Shutdown::new();
        let trigger = shutdown.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            trigger.trigger();
        });
        let start = Instant::now();
        assert!(!shutdown.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }
}
