//! [`FakeHardware`] – a whole-robot stand-in without any bus.
//!
//! Commanded positions are echoed back, the status is always healthy and
//! every tool command reports success.  Use it to run the motion stack on a
//! machine with no arm attached.

use armbus_types::{
    CalibrationMode, ConveyorFeedback, ConveyorStatus, GripperCommand, HardwareConfig,
    HardwareStatus, HwError, MotorFirmware, PositionVector, RegisterWrite, ToolStatus,
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::interface::HardwareInterface;

pub struct FakeHardware {
    echo: Mutex<PositionVector>,
    gripper_position: Mutex<f64>,
}

impl FakeHardware {
    /// Start at the configured home position.
    pub fn new(config: &HardwareConfig) -> Self {
        info!(
            version = %config.hardware_version,
            "starting fake hardware: commands are echoed into the current position"
        );
        Self {
            echo: Mutex::new(config.home_position),
            gripper_position: Mutex::new(0.0),
        }
    }
}

impl HardwareInterface for FakeHardware {
    fn init(&self) -> Result<(), HwError> {
        Ok(())
    }

    fn start_supervision(&self) -> Result<(), HwError> {
        debug!("fake hardware: no connection to supervise");
        Ok(())
    }

    fn send_position(&self, cmd: &PositionVector) {
        *self.echo.lock() = *cmd;
    }

    fn position(&self) -> PositionVector {
        *self.echo.lock()
    }

    fn status(&self) -> HardwareStatus {
        HardwareStatus::default()
    }

    fn is_connection_ok(&self) -> bool {
        true
    }

    fn scan_and_check(&self) -> Result<(), HwError> {
        Ok(())
    }

    fn activate_learning_mode(&self, enable: bool) {
        info!(enable, "fake hardware: learning mode");
    }

    fn request_calibration(&self) {}

    fn allow_calibration_start(&self, mode: CalibrationMode) -> Result<String, HwError> {
        info!(%mode, "fake hardware: motor calibration");
        Ok("Calibration is starting".to_string())
    }

    fn is_calibration_in_progress(&self) -> bool {
        false
    }

    fn synchronize_motors(&self, _begin_trajectory: bool) {}

    fn firmware_versions(&self) -> Vec<MotorFirmware> {
        Vec::new()
    }

    fn set_leds(&self, leds: &[i32]) -> Result<String, HwError> {
        info!(?leds, "fake hardware: set leds");
        Ok("Set LED ok".to_string())
    }

    fn ping_tool(&self, id: u8, name: &str) -> ToolStatus {
        info!(id, name, "fake hardware: ping tool");
        ToolStatus::PingOk
    }

    fn open_gripper(&self, id: u8, command: GripperCommand) -> ToolStatus {
        info!(id, "fake hardware: open gripper");
        *self.gripper_position.lock() = f64::from(command.position);
        ToolStatus::GripperOpen
    }

    fn close_gripper(&self, id: u8, command: GripperCommand) -> ToolStatus {
        info!(id, "fake hardware: close gripper");
        *self.gripper_position.lock() = f64::from(command.position);
        ToolStatus::GripperClosed
    }

    fn pull_air(&self, id: u8, _position: u16, _hold_torque: u16) -> ToolStatus {
        info!(id, "fake hardware: pull air on vacuum pump");
        ToolStatus::PumpPulled
    }

    fn push_air(&self, id: u8, _position: u16) -> ToolStatus {
        info!(id, "fake hardware: push air on vacuum pump");
        ToolStatus::PumpPushed
    }

    fn set_conveyor(&self, id: u8, activate: bool) -> ConveyorStatus {
        info!(id, activate, "fake hardware: set conveyor");
        ConveyorStatus::SetOk
    }

    fn move_conveyor(&self, id: u8, activate: bool, speed: i16, direction: i8) -> ConveyorStatus {
        info!(id, activate, speed, direction, "fake hardware: move conveyor");
        ConveyorStatus::ControlOk
    }

    fn update_conveyor_id(&self, old_id: u8, new_id: u8) -> ConveyorStatus {
        info!(old_id, new_id, "fake hardware: update conveyor id");
        ConveyorStatus::UpdateIdOk
    }

    fn conveyor_feedback(&self, _id: u8) -> ConveyorFeedback {
        ConveyorFeedback::default()
    }

    fn reboot_motors(&self) {
        info!("fake hardware: reboot motors");
    }

    fn write_register(&self, write: RegisterWrite) {
        info!(id = write.id, address = write.address, "fake hardware: register write");
    }

    fn gripper_position(&self) -> f64 {
        *self.gripper_position.lock()
    }

    fn gripper_effort(&self) -> f64 {
        0.0
    }

    fn shutdown(&self) {}
}
