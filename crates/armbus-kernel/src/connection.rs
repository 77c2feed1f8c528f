//! Shared flags between a bus's connection supervisor and its readers.
//!
//! Each [`ConnectionState`] is written only by the supervisor of its bus and
//! read lock-free by the hardware facade and by the other bus's supervisor.
//! A reader may see a flag one tick late; callers tolerate that.

use std::sync::atomic::{AtomicBool, Ordering};

/// Connection and mode flags of one bus.  All flags start `false`.
#[derive(Debug, Default)]
pub struct ConnectionState {
    connected: AtomicBool,
    limited_mode: AtomicBool,
    calibration_in_progress: AtomicBool,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// The bus's control loop runs in limited mode.  Only true while the
    /// counterpart bus is down or this bus's calibration is unfinished.
    pub fn is_limited_mode(&self) -> bool {
        self.limited_mode.load(Ordering::Acquire)
    }

    pub fn is_calibration_in_progress(&self) -> bool {
        self.calibration_in_progress.load(Ordering::Acquire)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub(crate) fn set_limited_mode(&self, limited: bool) {
        self.limited_mode.store(limited, Ordering::Release);
    }

    pub(crate) fn set_calibration_in_progress(&self, in_progress: bool) {
        self.calibration_in_progress
            .store(in_progress, Ordering::Release);
    }
}

/// Pending "calibrate again" request, consumed by the stepper supervisor.
///
/// Requests coalesce: asking twice before the supervisor's next tick still
/// triggers a single calibration cycle.
#[derive(Debug, Default)]
pub struct CalibrationRequest {
    pending: AtomicBool,
}

impl CalibrationRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a calibration as requested.  Returns `false` if one was already
    /// pending.
    pub fn request(&self) -> bool {
        !self.pending.swap(true, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Consume the request.  Read and clear happen in one atomic step, so a
    /// request arriving concurrently is either taken now or left pending.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn clear(&self) {
        self.pending.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn state_starts_all_false() {
        let state = ConnectionState::new();
        assert!(!state.is_connected());
        assert!(!state.is_limited_mode());
        assert!(!state.is_calibration_in_progress());
    }

    #[test]
    fn state_flags_are_independent() {
        let state = ConnectionState::new();
        state.set_connected(true);
        state.set_limited_mode(true);
        assert!(state.is_connected());
        assert!(state.is_limited_mode());
        assert!(!state.is_calibration_in_progress());
        state.set_limited_mode(false);
        assert!(state.is_connected());
        assert!(!state.is_limited_mode());
    }

    #[test]
    fn repeated_requests_coalesce() {
        let request = CalibrationRequest::new();
        assert!(request.request());
        assert!(!request.request());
        assert!(!request.request());
        assert!(request.is_pending());

        assert!(request.take());
        assert!(!request.take(), "a request is consumed exactly once");
        assert!(!request.is_pending());
    }

    #[test]
    fn clear_drops_pending_request() {
        let request = CalibrationRequest::new();
        request.request();
        request.clear();
        assert!(!request.take());
    }

    #[test]
    fn concurrent_requests_are_taken_once() {
        let request = Arc::new(CalibrationRequest::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let request = request.clone();
                thread::spawn(move || {
                    request.request();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(request.take());
        assert!(!request.take());
    }
}
