//! [`ArmHardware`] – one control surface over the stepper and servo buses.
//!
//! Position vectors are split and merged according to the hardware
//! generation's [`JointLayout`].  Joints whose bus is disabled are served
//! from a shadow buffer holding the last commanded value, so the rest of the
//! system runs unchanged with a bus switched off for debugging.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use armbus_hal::{BusSet, SimServoBus, SimStepperBus};
//! use armbus_runtime::{ArmHardware, HardwareInterface};
//! use armbus_types::{HardwareConfig, HardwareVersion};
//!
//! let config = HardwareConfig {
//!     servo_bus_enabled: false,
//!     ..HardwareConfig::default()
//! };
//! let buses = BusSet::new(Some(Arc::new(SimStepperBus::new(HardwareVersion::V2))), None);
//! let arm = ArmHardware::new(config, buses).expect("consistent bus configuration");
//!
//! assert!(arm.set_leds(&[1, 2, 3]).is_err());
//! assert_eq!(arm.set_leds(&[1, 2, 3, 4]).unwrap(), "Set LED ok");
//! ```

use armbus_hal::BusSet;
use armbus_kernel::{
    ConnectionState, Supervision, SupervisionContext, SupervisorTiming, VersionCheck,
};
use armbus_types::{
    BusKind, CalibrationMode, ConveyorFeedback, ConveyorStatus, GripperCommand, HardwareConfig,
    HardwareStatus, HwError, JointLayout, MotorFirmware, PositionVector, RegisterWrite, ToolStatus,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::interface::HardwareInterface;

pub struct ArmHardware {
    config: HardwareConfig,
    layout: JointLayout,
    ctx: SupervisionContext,
    /// Last commanded value of joints whose bus is disabled.
    shadow: Mutex<PositionVector>,
    supervision: Mutex<Option<Supervision>>,
}

impl ArmHardware {
    /// Facade with supervisor timing derived from `config.poll_frequency_hz`.
    ///
    /// # Errors
    ///
    /// See [`with_timing`](Self::with_timing).
    pub fn new(config: HardwareConfig, buses: BusSet) -> Result<Self, HwError> {
        let timing = SupervisorTiming::from_poll_frequency(config.poll_frequency_hz);
        Self::with_timing(config, buses, timing)
    }

    /// # Errors
    ///
    /// Returns [`HwError::BusConfiguration`] when the enable flags of
    /// `config` disagree with the drivers present in `buses`, or when the
    /// poll frequency is not a positive number.
    pub fn with_timing(
        config: HardwareConfig,
        buses: BusSet,
        timing: SupervisorTiming,
    ) -> Result<Self, HwError> {
        if !(config.poll_frequency_hz.is_finite() && config.poll_frequency_hz > 0.0) {
            return Err(HwError::BusConfiguration(format!(
                "poll frequency must be positive, got {}",
                config.poll_frequency_hz
            )));
        }
        for (kind, enabled) in [
            (BusKind::Stepper, config.stepper_bus_enabled),
            (BusKind::Servo, config.servo_bus_enabled),
        ] {
            match (enabled, buses.is_enabled(kind)) {
                (true, false) => {
                    return Err(HwError::BusConfiguration(format!(
                        "{kind} bus is enabled but no driver was provided"
                    )));
                }
                (false, true) => {
                    return Err(HwError::BusConfiguration(format!(
                        "{kind} bus is disabled but a driver was provided"
                    )));
                }
                (false, false) => warn!(bus = %kind, "bus communication is disabled for debug purposes"),
                (true, true) => {}
            }
        }

        let ctx = SupervisionContext::new(buses, config.hardware_version, timing);
        Ok(Self {
            layout: config.layout(),
            shadow: Mutex::new(config.home_position),
            config,
            ctx,
            supervision: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &HardwareConfig {
        &self.config
    }

    /// Outcome of the start-up hardware version check, once the servo
    /// supervisor has run it.  Always `None` with the servo bus disabled.
    pub fn version_check(&self) -> Option<VersionCheck> {
        self.ctx.version_report.get().copied()
    }

    /// Connection flags maintained by `kind`'s supervisor.
    pub fn connection_state(&self, kind: BusKind) -> &ConnectionState {
        self.ctx.state(kind)
    }

    pub fn is_supervising(&self) -> bool {
        self.supervision.lock().is_some()
    }
}

impl HardwareInterface for ArmHardware {
    fn init(&self) -> Result<(), HwError> {
        if let Some(stepper) = self.ctx.buses.stepper() {
            stepper.init()?;
        }
        if let Some(servo) = self.ctx.buses.servo() {
            servo.init()?;
        }
        info!(version = %self.config.hardware_version, "hardware interface initialised");
        Ok(())
    }

    fn start_supervision(&self) -> Result<(), HwError> {
        let mut supervision = self.supervision.lock();
        if supervision.is_some() {
            return Err(HwError::SupervisionAlreadyRunning);
        }
        let started = Supervision::spawn(&self.ctx)?;
        info!(threads = started.thread_count(), "connection supervision started");
        *supervision = Some(started);
        Ok(())
    }

    fn send_position(&self, cmd: &PositionVector) {
        if self.is_calibration_in_progress() {
            debug!("calibration in progress, position command dropped");
            return;
        }
        let (stepper_part, servo_part) = self.layout.split(cmd);
        match self.ctx.buses.stepper() {
            Some(stepper) => stepper.set_position(stepper_part),
            None => self
                .layout
                .write_stepper(&mut self.shadow.lock(), stepper_part),
        }
        match self.ctx.buses.servo() {
            Some(servo) => servo.set_position(servo_part),
            None => self.layout.write_servo(&mut self.shadow.lock(), servo_part),
        }
    }

    fn position(&self) -> PositionVector {
        let mut position = *self.shadow.lock();
        if let Some(stepper) = self.ctx.buses.stepper() {
            self.layout.write_stepper(&mut position, &stepper.position());
        }
        if let Some(servo) = self.ctx.buses.servo() {
            self.layout.write_servo(&mut position, &servo.position());
        }
        position
    }

    fn status(&self) -> HardwareStatus {
        let mut status = HardwareStatus::default();
        let mut errors = Vec::new();
        let bus_statuses = [
            self.ctx.buses.stepper().map(|bus| bus.status()),
            self.ctx.buses.servo().map(|bus| bus.status()),
        ];
        for bus in bus_statuses.into_iter().flatten() {
            status.connection_ok &= bus.connection_ok;
            status.calibration_needed |= bus.calibration_needed;
            status.calibration_in_progress |= bus.calibration_in_progress;
            if !bus.error_message.is_empty() {
                errors.push(bus.error_message);
            }
            status.motors.extend(bus.motors);
        }
        status.error_message = errors.join("\n");
        status.limited_mode =
            self.ctx.stepper_state.is_limited_mode() || self.ctx.servo_state.is_limited_mode();
        status
    }

    fn is_connection_ok(&self) -> bool {
        let stepper_ok = self.ctx.buses.stepper().is_none_or(|bus| bus.is_connected());
        let servo_ok = self.ctx.buses.servo().is_none_or(|bus| bus.is_connected());
        stepper_ok && servo_ok
    }

    fn scan_and_check(&self) -> Result<(), HwError> {
        let stepper = self.ctx.buses.stepper().map(|bus| bus.scan());
        let servo = self.ctx.buses.servo().map(|bus| bus.scan());
        stepper.unwrap_or(Ok(()))?;
        servo.unwrap_or(Ok(()))
    }

    fn activate_learning_mode(&self, enable: bool) {
        self.ctx.buses.activate_learning_mode(enable);
    }

    fn request_calibration(&self) {
        if self.ctx.request.request() {
            info!("new calibration requested");
        } else {
            debug!("calibration already requested");
        }
    }

    fn allow_calibration_start(&self, mode: CalibrationMode) -> Result<String, HwError> {
        if let Some(stepper) = self.ctx.buses.stepper() {
            if mode == CalibrationMode::Manual {
                stepper
                    .can_process_manual_calibration()
                    .map_err(HwError::CalibrationRefused)?;
            }
            stepper.validate_calibration_mode(mode);
        }
        info!(%mode, "calibration allowed to start");
        Ok("Calibration is starting".to_string())
    }

    fn is_calibration_in_progress(&self) -> bool {
        self.ctx.buses.stepper().is_some_and(|stepper| {
            stepper.is_calibration_in_progress()
                || self.ctx.stepper_state.is_calibration_in_progress()
        })
    }

    fn synchronize_motors(&self, begin_trajectory: bool) {
        if let Some(stepper) = self.ctx.buses.stepper() {
            stepper.synchronize(begin_trajectory);
        }
    }

    fn firmware_versions(&self) -> Vec<MotorFirmware> {
        self.ctx
            .buses
            .stepper()
            .map(|stepper| stepper.firmware_versions())
            .unwrap_or_default()
    }

    fn set_leds(&self, leds: &[i32]) -> Result<String, HwError> {
        let leds: [i32; 4] = leds
            .try_into()
            .map_err(|_| HwError::InvalidLedCount(leds.len()))?;
        if let Some(servo) = self.ctx.buses.servo() {
            servo.set_leds(leds);
        }
        Ok("Set LED ok".to_string())
    }

    fn ping_tool(&self, id: u8, name: &str) -> ToolStatus {
        self.ctx
            .buses
            .servo()
            .map_or(ToolStatus::PingOk, |servo| servo.ping_tool(id, name))
    }

    fn open_gripper(&self, id: u8, command: GripperCommand) -> ToolStatus {
        self.ctx
            .buses
            .servo()
            .map_or(ToolStatus::GripperOpen, |servo| servo.open_gripper(id, command))
    }

    fn close_gripper(&self, id: u8, command: GripperCommand) -> ToolStatus {
        self.ctx
            .buses
            .servo()
            .map_or(ToolStatus::GripperClosed, |servo| servo.close_gripper(id, command))
    }

    fn pull_air(&self, id: u8, position: u16, hold_torque: u16) -> ToolStatus {
        self.ctx
            .buses
            .servo()
            .map_or(ToolStatus::PumpPulled, |servo| servo.pull_air(id, position, hold_torque))
    }

    fn push_air(&self, id: u8, position: u16) -> ToolStatus {
        self.ctx
            .buses
            .servo()
            .map_or(ToolStatus::PumpPushed, |servo| servo.push_air(id, position))
    }

    fn set_conveyor(&self, id: u8, activate: bool) -> ConveyorStatus {
        self.ctx
            .buses
            .stepper()
            .map_or(ConveyorStatus::SetOk, |stepper| stepper.set_conveyor(id, activate))
    }

    fn move_conveyor(&self, id: u8, activate: bool, speed: i16, direction: i8) -> ConveyorStatus {
        self.ctx
            .buses
            .stepper()
            .map_or(ConveyorStatus::ControlOk, |stepper| {
                stepper.move_conveyor(id, activate, speed, direction)
            })
    }

    fn update_conveyor_id(&self, old_id: u8, new_id: u8) -> ConveyorStatus {
        self.ctx
            .buses
            .stepper()
            .map_or(ConveyorStatus::UpdateIdOk, |stepper| {
                stepper.update_conveyor_id(old_id, new_id)
            })
    }

    fn conveyor_feedback(&self, id: u8) -> ConveyorFeedback {
        self.ctx
            .buses
            .stepper()
            .map(|stepper| stepper.conveyor_feedback(id))
            .unwrap_or_default()
    }

    fn reboot_motors(&self) {
        if let Some(servo) = self.ctx.buses.servo() {
            servo.reboot_motors();
        }
    }

    fn write_register(&self, write: RegisterWrite) {
        if let Some(servo) = self.ctx.buses.servo() {
            servo.write_register(write);
        }
    }

    fn gripper_position(&self) -> f64 {
        self.ctx
            .buses
            .servo()
            .map_or(0.0, |servo| servo.gripper_position())
    }

    fn gripper_effort(&self) -> f64 {
        self.ctx
            .buses
            .servo()
            .map_or(0.0, |servo| servo.gripper_effort())
    }

    fn shutdown(&self) {
        // Dropping the handle stops and joins the supervisor threads.
        if self.supervision.lock().take().is_some() {
            info!("connection supervision stopped");
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
