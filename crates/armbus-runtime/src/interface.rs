//! [`HardwareInterface`] – the control surface exposed to the motion
//! controller.
//!
//! Two backends implement it: [`ArmHardware`][crate::ArmHardware], which
//! drives the real (or simulated) buses under connection supervision, and
//! [`FakeHardware`][crate::FakeHardware], which only echoes commands.  The
//! backend is chosen once at start-up; callers never branch on which one is
//! active.

use armbus_types::{
    CalibrationMode, ConveyorFeedback, ConveyorStatus, GripperCommand, HardwareStatus, HwError,
    MotorFirmware, PositionVector, RegisterWrite, ToolStatus,
};

pub trait HardwareInterface: Send + Sync {
    /// Initialise every enabled bus driver.
    ///
    /// # Errors
    ///
    /// Returns the first driver error; later buses are not initialised.
    fn init(&self) -> Result<(), HwError>;

    /// Start the background connection supervisors.
    ///
    /// # Errors
    ///
    /// Returns [`HwError::SupervisionAlreadyRunning`] on a second call.
    fn start_supervision(&self) -> Result<(), HwError>;

    /// Command all six joints.  Dropped while a calibration is in progress.
    fn send_position(&self, cmd: &PositionVector);

    fn position(&self) -> PositionVector;

    fn status(&self) -> HardwareStatus;

    fn is_connection_ok(&self) -> bool;

    /// Scan every enabled bus once, outside of supervision.
    ///
    /// # Errors
    ///
    /// Returns the first [`HwError::ScanFailed`]; every bus is scanned
    /// regardless.
    fn scan_and_check(&self) -> Result<(), HwError>;

    /// `true` turns torque off so the arm can be moved by hand.
    fn activate_learning_mode(&self, enable: bool);

    /// Ask for a new calibration.  Takes effect on the next supervisor tick.
    fn request_calibration(&self);

    /// Confirm the calibration mode chosen by the operator.
    ///
    /// # Errors
    ///
    /// Returns [`HwError::CalibrationRefused`] (status 400) when a manual
    /// calibration cannot start in the current pose.
    fn allow_calibration_start(&self, mode: CalibrationMode) -> Result<String, HwError>;

    fn is_calibration_in_progress(&self) -> bool;

    fn synchronize_motors(&self, begin_trajectory: bool);

    fn firmware_versions(&self) -> Vec<MotorFirmware>;

    /// # Errors
    ///
    /// Returns [`HwError::InvalidLedCount`] (status 400) unless exactly four
    /// values are given.
    fn set_leds(&self, leds: &[i32]) -> Result<String, HwError>;

    fn ping_tool(&self, id: u8, name: &str) -> ToolStatus;

    fn open_gripper(&self, id: u8, command: GripperCommand) -> ToolStatus;

    fn close_gripper(&self, id: u8, command: GripperCommand) -> ToolStatus;

    fn pull_air(&self, id: u8, position: u16, hold_torque: u16) -> ToolStatus;

    fn push_air(&self, id: u8, position: u16) -> ToolStatus;

    fn set_conveyor(&self, id: u8, activate: bool) -> ConveyorStatus;

    fn move_conveyor(&self, id: u8, activate: bool, speed: i16, direction: i8) -> ConveyorStatus;

    fn update_conveyor_id(&self, old_id: u8, new_id: u8) -> ConveyorStatus;

    fn conveyor_feedback(&self, id: u8) -> ConveyorFeedback;

    fn reboot_motors(&self);

    fn write_register(&self, write: RegisterWrite);

    fn gripper_position(&self) -> f64;

    fn gripper_effort(&self) -> f64;

    /// Stop the supervisors and wait for their threads.  Idempotent.
    fn shutdown(&self);
}
