//! [`CalibrationCoordinator`] – the two-phase stepper calibration protocol.
//!
//! One attempt runs phase one on the stepper bus, homes the servos when the
//! calibration is automatic, then runs phase two.  The coordinator retries
//! attempts until the arm is calibrated or shutdown is triggered:
//!
//! ```text
//! SCANNING → LIMITED_CONTROL → PHASE_1 → (HOMING_SERVO)? → PHASE_2
//!                   ↑                                         │
//!                   └────────── RETRY / WAITING_USER_INPUT ───┴→ CALIBRATED
//! ```

use std::sync::Arc;

use armbus_hal::{BusSet, StepperBus};
use armbus_types::{CalibrationMode, CalibrationOutcome, CalibrationPhase};
use tracing::{info, warn};

use crate::connection::{CalibrationRequest, ConnectionState};
use crate::supervisor::scan_until_found;
use crate::timing::{Shutdown, SupervisorTiming};

/// Result of a single two-phase attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Calibrated,
    Failed,
    /// Phase one is waiting for the operator to confirm a manual calibration.
    WaitingUserInput,
}

pub struct CalibrationCoordinator {
    stepper: Arc<dyn StepperBus>,
    buses: BusSet,
    request: Arc<CalibrationRequest>,
    state: Arc<ConnectionState>,
    timing: SupervisorTiming,
    shutdown: Shutdown,
}

impl CalibrationCoordinator {
    pub fn new(
        stepper: Arc<dyn StepperBus>,
        buses: BusSet,
        request: Arc<CalibrationRequest>,
        state: Arc<ConnectionState>,
        timing: SupervisorTiming,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            stepper,
            buses,
            request,
            state,
            timing,
            shutdown,
        }
    }

    /// Run phase one, the optional servo homing, and phase two once.
    pub fn attempt(&self) -> AttemptOutcome {
        match self.stepper.calibrate(CalibrationPhase::One) {
            CalibrationOutcome::Ok => {}
            CalibrationOutcome::WaitingUserInput => return AttemptOutcome::WaitingUserInput,
            CalibrationOutcome::Fail => return AttemptOutcome::Failed,
        }

        if let Some(servo) = self.buses.servo() {
            if self.stepper.calibration_mode() == CalibrationMode::Auto {
                info!("asking servo motors to go home");
                servo.move_to_home();
            }
        }

        match self.stepper.calibrate(CalibrationPhase::Two) {
            CalibrationOutcome::Ok => AttemptOutcome::Calibrated,
            _ => AttemptOutcome::Failed,
        }
    }

    /// Retry [`attempt`](Self::attempt) until it succeeds.
    ///
    /// On success the pending request is cleared and both buses are put in
    /// learning mode.  Returns `false` if shutdown interrupted the protocol.
    pub fn run(&self) -> bool {
        self.state.set_calibration_in_progress(true);
        let calibrated = loop {
            let outcome = self.attempt();
            if outcome == AttemptOutcome::Calibrated {
                info!("stepper calibration completed");
                self.request.clear();
                self.buses.activate_learning_mode(true);
                break true;
            }
            if !self.prepare_retry(outcome) || !self.shutdown.sleep(self.timing.calibration_retry) {
                break false;
            }
        };
        self.state.set_calibration_in_progress(false);
        calibrated
    }

    /// Bring the stepper bus back to a state where another attempt makes
    /// sense.  Returns `false` on shutdown.
    fn prepare_retry(&self, outcome: AttemptOutcome) -> bool {
        warn!(?outcome, "stepper calibration not finished, retrying");
        if !self.stepper.is_connected()
            && !scan_until_found(self.stepper.as_ref(), &self.state, &self.timing, &self.shutdown)
        {
            return false;
        }
        if outcome == AttemptOutcome::Failed {
            // The driver stops its loop while calibrating.
            self.stepper.set_calibration_flag(true);
            self.stepper.start_control_loop(true);
            self.state.set_limited_mode(true);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armbus_hal::{BusHandle, SimServoBus, SimStepperBus};
    use armbus_types::HardwareVersion;
    use std::time::Duration;

    fn fast_timing() -> SupervisorTiming {
        SupervisorTiming {
            poll_period: Duration::from_millis(1),
            settle_delay: Duration::from_millis(1),
            scan_retry: Duration::from_millis(1),
            calibration_retry: Duration::from_millis(1),
            version_retry: Duration::from_millis(1),
        }
    }

    struct Fixture {
        stepper: Arc<SimStepperBus>,
        servo: Arc<SimServoBus>,
        request: Arc<CalibrationRequest>,
        state: Arc<ConnectionState>,
        coordinator: CalibrationCoordinator,
    }

    fn fixture(with_servo: bool) -> Fixture {
        let stepper = Arc::new(SimStepperBus::new(HardwareVersion::V2));
        let servo = Arc::new(SimServoBus::new(HardwareVersion::V2));
        stepper.scan().unwrap();
        servo.scan().unwrap();
        let servo_handle: Option<Arc<dyn armbus_hal::ServoBus>> = if with_servo {
            Some(servo.clone())
        } else {
            None
        };
        let buses = BusSet::new(Some(stepper.clone()), servo_handle);
        let request = Arc::new(CalibrationRequest::new());
        let state = Arc::new(ConnectionState::new());
        let coordinator = CalibrationCoordinator::new(
            stepper.clone(),
            buses,
            request.clone(),
            state.clone(),
            fast_timing(),
            Shutdown::new(),
        );
        Fixture {
            stepper,
            servo,
            request,
            state,
            coordinator,
        }
    }

    #[test]
    fn successful_attempt_runs_both_phases_and_homes_servos() {
        let f = fixture(true);
        assert_eq!(f.coordinator.attempt(), AttemptOutcome::Calibrated);
        assert_eq!(
            f.stepper.calibration_calls(),
            vec![CalibrationPhase::One, CalibrationPhase::Two]
        );
        assert_eq!(f.servo.home_moves(), 1);
    }

    #[test]
    fn phase_two_never_follows_failed_phase_one() {
        let f = fixture(true);
        f.stepper.script_calibration([CalibrationOutcome::Fail]);
        assert_eq!(f.coordinator.attempt(), AttemptOutcome::Failed);
        assert_eq!(f.stepper.calibration_calls(), vec![CalibrationPhase::One]);
        assert_eq!(f.servo.home_moves(), 0);
    }

    #[test]
    fn phase_two_never_follows_waiting_phase_one() {
        let f = fixture(true);
        f.stepper.set_calibration_mode(CalibrationMode::Manual);
        assert_eq!(f.coordinator.attempt(), AttemptOutcome::WaitingUserInput);
        assert_eq!(f.stepper.calibration_calls(), vec![CalibrationPhase::One]);
    }

    #[test]
    fn manual_calibration_does_not_home_servos() {
        let f = fixture(true);
        f.stepper.set_calibration_mode(CalibrationMode::Manual);
        f.stepper.validate_calibration_mode(CalibrationMode::Manual);
        assert_eq!(f.coordinator.attempt(), AttemptOutcome::Calibrated);
        assert_eq!(f.servo.home_moves(), 0);
    }

    #[test]
    fn failed_phase_two_is_a_failed_attempt() {
        let f = fixture(false);
        f.stepper
            .script_calibration([CalibrationOutcome::Ok, CalibrationOutcome::Fail]);
        assert_eq!(f.coordinator.attempt(), AttemptOutcome::Failed);
    }

    #[test]
    fn run_retries_after_failure_and_clears_request() {
        let f = fixture(true);
        f.request.request();
        f.stepper.script_calibration([CalibrationOutcome::Fail]);

        assert!(f.coordinator.run());
        assert_eq!(
            f.stepper.calibration_calls(),
            vec![
                CalibrationPhase::One,
                CalibrationPhase::One,
                CalibrationPhase::Two
            ]
        );
        assert!(!f.request.is_pending());
        assert!(!f.state.is_calibration_in_progress());
        assert!(!f.stepper.torque_on(), "learning mode after calibration");
        assert!(!f.servo.torque_on());
    }

    #[test]
    fn failure_reasserts_flag_and_limited_control() {
        let f = fixture(false);
        f.stepper.set_calibration_flag(false);
        assert!(f.coordinator.prepare_retry(AttemptOutcome::Failed));
        assert!(f.stepper.calibration_needed());
        assert_eq!(f.stepper.control_loop(), Some(true));
        assert!(f.state.is_limited_mode());
    }

    #[test]
    fn waiting_for_user_leaves_bus_untouched() {
        let f = fixture(false);
        f.stepper.set_calibration_flag(false);
        assert!(f.coordinator.prepare_retry(AttemptOutcome::WaitingUserInput));
        assert!(!f.stepper.calibration_needed());
        assert_eq!(f.stepper.control_loop(), None);
        assert!(!f.state.is_limited_mode());
    }

    #[test]
    fn dropped_connection_is_rescanned_before_retry() {
        let f = fixture(false);
        f.stepper.unplug();
        f.stepper.plug();
        let scans_before = f.stepper.scan_count();
        assert!(f.coordinator.prepare_retry(AttemptOutcome::Failed));
        assert!(f.stepper.is_connected());
        assert!(f.stepper.scan_count() > scans_before);
        assert!(f.state.is_connected());
    }
}
