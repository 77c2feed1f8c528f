//! Capability set of a physical actuator bus.
//!
//! The stepper and servo drivers share [`BusHandle`] (connection, torque,
//! control loop, position, status) and each adds its own bus-specific
//! operations through [`StepperBus`] or [`ServoBus`].  Supervisors and the
//! hardware facade only ever talk to these traits, so a simulated driver and
//! a real one are interchangeable.
//!
//! No method may panic or block indefinitely: every failure is reported as a
//! return value and interpreted by the caller.

use armbus_types::{
    BusKind, BusStatus, CalibrationMode, CalibrationOutcome, CalibrationPhase, ConveyorFeedback,
    ConveyorStatus, GripperCommand, HwError, MotorFirmware, RegisterWrite, ToolStatus,
    VersionProbe,
};

/// Operations common to both buses.
pub trait BusHandle: Send + Sync {
    /// Which physical bus this driver controls.
    fn kind(&self) -> BusKind;

    /// One-off driver initialisation, called once before supervision starts.
    ///
    /// # Errors
    ///
    /// Returns [`HwError::Driver`] if the bus interface cannot be opened.
    fn init(&self) -> Result<(), HwError> {
        Ok(())
    }

    /// Look for every expected motor on the bus.
    ///
    /// # Errors
    ///
    /// Returns [`HwError::ScanFailed`] while motors are missing.  This is the
    /// normal state of an unplugged bus, not a fatal condition.
    fn scan(&self) -> Result<(), HwError>;

    /// `false` until a successful [`scan`](Self::scan), and again as soon as
    /// the driver loses contact with the motors.
    fn is_connected(&self) -> bool;

    /// `true` holds the motors in place, `false` lets them move freely.
    fn set_torque(&self, enabled: bool);

    /// (Re)start the driver's read/write loop.  In limited mode the loop
    /// refuses motion commands.
    fn start_control_loop(&self, limited: bool);

    fn stop_control_loop(&self);

    /// Current joint positions of this bus's share of the arm.
    fn position(&self) -> Vec<f64>;

    fn set_position(&self, target: &[f64]);

    fn status(&self) -> BusStatus;
}

/// The daisy-chained stepper bus, which owns the arm's calibration.
pub trait StepperBus: BusHandle {
    /// Mark the steppers as needing (or no longer needing) calibration.
    fn set_calibration_flag(&self, needed: bool);

    /// Run one calibration phase.  Phase two is only meaningful after phase
    /// one returned [`CalibrationOutcome::Ok`].
    fn calibrate(&self, phase: CalibrationPhase) -> CalibrationOutcome;

    fn calibration_mode(&self) -> CalibrationMode;

    fn is_calibration_in_progress(&self) -> bool;

    /// Whether the joints are in a pose where a manual calibration can start.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when they are not.
    fn can_process_manual_calibration(&self) -> Result<(), String>;

    /// Record the mode the operator confirmed, releasing a calibration that
    /// is waiting for user input.
    fn validate_calibration_mode(&self, mode: CalibrationMode);

    fn synchronize(&self, begin_trajectory: bool);

    fn firmware_versions(&self) -> Vec<MotorFirmware>;

    fn set_conveyor(&self, id: u8, activate: bool) -> ConveyorStatus;

    fn move_conveyor(&self, id: u8, activate: bool, speed: i16, direction: i8) -> ConveyorStatus;

    fn update_conveyor_id(&self, old_id: u8, new_id: u8) -> ConveyorStatus;

    fn conveyor_feedback(&self, id: u8) -> ConveyorFeedback;
}

/// The serial servo bus, which also carries the end-effector tools.
pub trait ServoBus: BusHandle {
    /// Infer the arm's hardware generation from the motors found on the bus.
    fn detect_version(&self) -> VersionProbe;

    fn move_to_home(&self);

    fn ping_tool(&self, id: u8, name: &str) -> ToolStatus;

    fn open_gripper(&self, id: u8, command: GripperCommand) -> ToolStatus;

    fn close_gripper(&self, id: u8, command: GripperCommand) -> ToolStatus;

    fn pull_air(&self, id: u8, position: u16, hold_torque: u16) -> ToolStatus;

    fn push_air(&self, id: u8, position: u16) -> ToolStatus;

    fn set_leds(&self, leds: [i32; 4]);

    fn write_register(&self, write: RegisterWrite);

    fn reboot_motors(&self);

    fn gripper_position(&self) -> f64;

    fn gripper_effort(&self) -> f64;
}
