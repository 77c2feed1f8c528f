//! End-to-end supervision: real supervisor threads against simulated buses,
//! observed only through the hardware interface.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use armbus_hal::{BusSet, SimServoBus, SimStepperBus};
use armbus_kernel::{SupervisorTiming, VersionCheck};
use armbus_runtime::{ArmHardware, HardwareInterface};
use armbus_types::{
    BusKind, CalibrationMode, CalibrationOutcome, CalibrationPhase, HardwareConfig,
    HardwareVersion,
};

fn fast_timing() -> SupervisorTiming {
    SupervisorTiming {
        poll_period: Duration::from_millis(2),
        settle_delay: Duration::from_millis(1),
        scan_retry: Duration::from_millis(1),
        calibration_retry: Duration::from_millis(1),
        version_retry: Duration::from_millis(1),
    }
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

struct Arm {
    stepper: Arc<SimStepperBus>,
    servo: Arc<SimServoBus>,
    hw: ArmHardware,
}

fn arm(configured: HardwareVersion, physical: HardwareVersion) -> Arm {
    let stepper = Arc::new(SimStepperBus::new(physical));
    let servo = Arc::new(SimServoBus::new(physical));
    let config = HardwareConfig {
        hardware_version: configured,
        ..HardwareConfig::default()
    };
    let buses = BusSet::new(Some(stepper.clone()), Some(servo.clone()));
    let hw = ArmHardware::with_timing(config, buses, fast_timing()).unwrap();
    hw.init().unwrap();
    Arm { stepper, servo, hw }
}

/// Connected, calibrated, and both control loops running in full mode.
fn healthy(arm: &Arm) -> bool {
    let status = arm.hw.status();
    status.connection_ok
        && !status.calibration_needed
        && !status.limited_mode
        && arm.stepper.control_loop() == Some(false)
        && arm.servo.control_loop() == Some(false)
}

#[test]
fn arm_comes_up_calibrated_and_in_learning_mode() {
    let arm = arm(HardwareVersion::V2, HardwareVersion::V2);
    arm.hw.start_supervision().unwrap();

    wait_until("healthy arm", || healthy(&arm));
    assert_eq!(arm.hw.version_check(), Some(VersionCheck::Matched));
    assert!(!arm.stepper.torque_on());
    assert!(!arm.servo.torque_on());
    assert_eq!(arm.servo.home_moves(), 1);
    assert!(!arm.hw.is_calibration_in_progress());
    arm.hw.shutdown();
}

#[test]
fn unplugged_servo_puts_stepper_in_limited_mode_and_back() {
    let arm = arm(HardwareVersion::V2, HardwareVersion::V2);
    arm.hw.start_supervision().unwrap();
    wait_until("healthy arm", || healthy(&arm));

    arm.servo.unplug();
    wait_until("limited mode", || {
        let status = arm.hw.status();
        !status.connection_ok && status.limited_mode
    });
    assert!(arm.hw.connection_state(BusKind::Stepper).is_limited_mode());
    assert_eq!(arm.stepper.control_loop(), Some(true));

    arm.servo.plug();
    wait_until("recovered arm", || healthy(&arm));
    arm.hw.shutdown();
}

#[test]
fn unplugged_stepper_is_recalibrated_after_replug() {
    let arm = arm(HardwareVersion::V2, HardwareVersion::V2);
    arm.hw.start_supervision().unwrap();
    wait_until("healthy arm", || healthy(&arm));
    let calls_before = arm.stepper.calibration_calls().len();

    arm.stepper.unplug();
    wait_until("servo limited mode", || {
        arm.hw.connection_state(BusKind::Servo).is_limited_mode()
    });
    arm.stepper.plug();
    wait_until("recovered arm", || {
        healthy(&arm) && arm.stepper.calibration_calls().len() >= calls_before + 2
    });
    arm.hw.shutdown();
}

#[test]
fn position_round_trip_once_supervised() {
    let arm = arm(HardwareVersion::V1, HardwareVersion::V1);
    arm.hw.start_supervision().unwrap();
    wait_until("healthy arm", || healthy(&arm));

    let cmd = [0.1, -0.2, 0.3, -0.4, 0.5, -0.6];
    arm.hw.send_position(&cmd);
    assert_eq!(arm.hw.position(), cmd);
    arm.hw.shutdown();
}

#[test]
fn repeated_requests_run_one_calibration_cycle() {
    let arm = arm(HardwareVersion::V2, HardwareVersion::V2);
    arm.hw.start_supervision().unwrap();
    wait_until("healthy arm", || healthy(&arm));
    assert_eq!(arm.stepper.calibration_calls().len(), 2);

    // A waiting manual calibration holds the supervisor inside the
    // protocol, so further requests cannot queue a second cycle.
    arm.stepper.set_calibration_mode(CalibrationMode::Manual);
    arm.hw.request_calibration();
    arm.hw.request_calibration();
    wait_until("calibration waiting for user", || {
        arm.hw.is_calibration_in_progress()
    });
    arm.hw.request_calibration();
    arm.hw.allow_calibration_start(CalibrationMode::Manual).unwrap();
    wait_until("calibration done", || {
        !arm.hw.is_calibration_in_progress() && healthy(&arm)
    });
    thread::sleep(Duration::from_millis(30));

    let phase_two_calls = arm
        .stepper
        .calibration_calls()
        .into_iter()
        .filter(|phase| *phase == CalibrationPhase::Two)
        .count();
    assert_eq!(phase_two_calls, 2);
    arm.hw.shutdown();
}

#[test]
fn failed_calibration_is_retried_until_success() {
    let arm = arm(HardwareVersion::V2, HardwareVersion::V2);
    arm.stepper.script_calibration([
        CalibrationOutcome::Fail,
        CalibrationOutcome::Ok,
        CalibrationOutcome::Fail,
    ]);
    arm.hw.start_supervision().unwrap();
    wait_until("healthy arm", || healthy(&arm));
    assert_eq!(
        arm.stepper.calibration_calls(),
        vec![
            CalibrationPhase::One,
            CalibrationPhase::One,
            CalibrationPhase::Two,
            CalibrationPhase::One,
            CalibrationPhase::Two,
        ]
    );
    arm.hw.shutdown();
}

#[test]
fn version_mismatch_is_reported_but_arm_keeps_running() {
    let arm = arm(HardwareVersion::V2, HardwareVersion::V1);
    arm.hw.start_supervision().unwrap();
    wait_until("version report", || arm.hw.version_check().is_some());
    assert!(matches!(
        arm.hw.version_check(),
        Some(VersionCheck::Mismatch { detected: 1, .. })
    ));
    wait_until("connected arm", || arm.hw.status().connection_ok);
    arm.hw.shutdown();
}

#[test]
fn shutdown_stops_supervisors_stuck_on_unplugged_bus() {
    let arm = arm(HardwareVersion::V2, HardwareVersion::V2);
    arm.stepper.unplug();
    arm.servo.unplug();
    arm.hw.start_supervision().unwrap();
    thread::sleep(Duration::from_millis(20));

    let started = Instant::now();
    arm.hw.shutdown();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!arm.hw.is_supervising());
}
