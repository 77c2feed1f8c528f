//! In-process simulated bus drivers for running without physical hardware.
//!
//! [`SimStepperBus`] and [`SimServoBus`] honour the full driver contract and
//! keep plausible state: a scan connects the bus, commanded positions are
//! echoed back, calibration walks through its two phases.  Fault injection
//! knobs (`unplug`, `fail_next_scans`, `script_calibration`, ...) let tests
//! and the interactive shell exercise the connection supervisors.
//!
//! # Example
//!
//! ```rust
//! use armbus_hal::{BusHandle, SimStepperBus};
//! use armbus_types::HardwareVersion;
//!
//! let bus = SimStepperBus::new(HardwareVersion::V2);
//! assert!(!bus.is_connected());
//! bus.scan().expect("a plugged bus answers its scan");
//! assert!(bus.is_connected());
//!
//! bus.unplug();
//! assert!(bus.scan().is_err());
//! ```

use std::collections::{HashMap, VecDeque};

use armbus_types::{
    BusKind, BusStatus, CalibrationMode, CalibrationOutcome, CalibrationPhase, ConveyorFeedback,
    ConveyorStatus, GripperCommand, HardwareVersion, HwError, MotorFirmware, MotorStatus,
    RegisterWrite, ToolStatus, VersionProbe,
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::bus::{BusHandle, ServoBus, StepperBus};

// ────────────────────────────────────────────────────────────────────────────
// Shared link / control loop bookkeeping
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Link {
    plugged: bool,
    connected: bool,
    failing_scans: u32,
    scans: u32,
    torque_on: bool,
    /// `None` while stopped, `Some(limited)` while running.
    control_loop: Option<bool>,
}

impl Link {
    fn new() -> Self {
        Self {
            plugged: true,
            connected: false,
            failing_scans: 0,
            scans: 0,
            torque_on: false,
            control_loop: None,
        }
    }

    fn scan(&mut self, bus: BusKind) -> Result<(), HwError> {
        self.scans += 1;
        if !self.plugged {
            return Err(HwError::ScanFailed {
                bus,
                details: "no motor answered".to_string(),
            });
        }
        if self.failing_scans > 0 {
            self.failing_scans -= 1;
            return Err(HwError::ScanFailed {
                bus,
                details: "missing motors".to_string(),
            });
        }
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.plugged && self.connected
    }

    fn unplug(&mut self) {
        self.plugged = false;
        self.connected = false;
        self.control_loop = None;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated stepper bus
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct StepperSim {
    link: Link,
    calibration_needed: bool,
    calibration_in_progress: bool,
    calibration_mode: CalibrationMode,
    user_confirmed: bool,
    scripted: VecDeque<CalibrationOutcome>,
    calibration_calls: Vec<CalibrationPhase>,
    manual_refusal: Option<String>,
    validated_modes: Vec<CalibrationMode>,
    goal: Vec<f64>,
    synchronized: Option<bool>,
    conveyors: HashMap<u8, ConveyorFeedback>,
}

/// A simulated stepper bus.  Starts plugged in but not yet scanned.
#[derive(Debug)]
pub struct SimStepperBus {
    inner: Mutex<StepperSim>,
}

impl SimStepperBus {
    pub fn new(version: HardwareVersion) -> Self {
        Self {
            inner: Mutex::new(StepperSim {
                link: Link::new(),
                calibration_needed: true,
                calibration_in_progress: false,
                calibration_mode: CalibrationMode::Auto,
                user_confirmed: false,
                scripted: VecDeque::new(),
                calibration_calls: Vec::new(),
                manual_refusal: None,
                validated_modes: Vec::new(),
                goal: vec![0.0; version.stepper_joints()],
                synchronized: None,
                conveyors: HashMap::new(),
            }),
        }
    }

    /// Simulate a cable pull: the bus drops and scans fail until [`plug`](Self::plug).
    pub fn unplug(&self) {
        info!("sim: stepper bus unplugged");
        self.inner.lock().link.unplug();
    }

    /// Reconnect the cable.  The bus reports connected after the next scan.
    pub fn plug(&self) {
        info!("sim: stepper bus plugged");
        self.inner.lock().link.plugged = true;
    }

    /// Make the next `count` scans fail even though the bus is plugged.
    pub fn fail_next_scans(&self, count: u32) {
        self.inner.lock().link.failing_scans = count;
    }

    /// Queue the results of the next calibration phases, in call order.
    /// Once the queue is empty every phase succeeds (manual mode waits for
    /// user confirmation first).
    pub fn script_calibration<I>(&self, outcomes: I)
    where
        I: IntoIterator<Item = CalibrationOutcome>,
    {
        self.inner.lock().scripted.extend(outcomes);
    }

    pub fn set_calibration_mode(&self, mode: CalibrationMode) {
        self.inner.lock().calibration_mode = mode;
    }

    /// Make [`StepperBus::can_process_manual_calibration`] refuse with `reason`.
    pub fn refuse_manual_calibration(&self, reason: Option<String>) {
        self.inner.lock().manual_refusal = reason;
    }

    pub fn calibration_calls(&self) -> Vec<CalibrationPhase> {
        self.inner.lock().calibration_calls.clone()
    }

    pub fn validated_modes(&self) -> Vec<CalibrationMode> {
        self.inner.lock().validated_modes.clone()
    }

    pub fn scan_count(&self) -> u32 {
        self.inner.lock().link.scans
    }

    pub fn torque_on(&self) -> bool {
        self.inner.lock().link.torque_on
    }

    /// `None` while the control loop is stopped, `Some(limited)` otherwise.
    pub fn control_loop(&self) -> Option<bool> {
        self.inner.lock().link.control_loop
    }

    pub fn calibration_needed(&self) -> bool {
        self.inner.lock().calibration_needed
    }

    pub fn last_synchronize(&self) -> Option<bool> {
        self.inner.lock().synchronized
    }
}

impl BusHandle for SimStepperBus {
    fn kind(&self) -> BusKind {
        BusKind::Stepper
    }

    fn scan(&self) -> Result<(), HwError> {
        self.inner.lock().link.scan(BusKind::Stepper)
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().link.is_connected()
    }

    fn set_torque(&self, enabled: bool) {
        self.inner.lock().link.torque_on = enabled;
    }

    fn start_control_loop(&self, limited: bool) {
        let mut sim = self.inner.lock();
        if sim.link.is_connected() {
            sim.link.control_loop = Some(limited);
        }
    }

    fn stop_control_loop(&self) {
        self.inner.lock().link.control_loop = None;
    }

    fn position(&self) -> Vec<f64> {
        self.inner.lock().goal.clone()
    }

    fn set_position(&self, target: &[f64]) {
        let mut sim = self.inner.lock();
        if sim.link.control_loop == Some(false) {
            for (slot, value) in sim.goal.iter_mut().zip(target) {
                *slot = *value;
            }
        }
    }

    fn status(&self) -> BusStatus {
        let sim = self.inner.lock();
        let connected = sim.link.is_connected();
        BusStatus {
            connection_ok: connected,
            calibration_needed: sim.calibration_needed,
            calibration_in_progress: sim.calibration_in_progress,
            error_message: if connected {
                String::new()
            } else {
                "Stepper bus disconnected".to_string()
            },
            motors: (1..=sim.goal.len())
                .map(|n| MotorStatus {
                    name: format!("Stepper Motor {n}"),
                    motor_type: "stepper".to_string(),
                    temperature: 32,
                    voltage: 12.0,
                    hardware_error: 0,
                })
                .collect(),
        }
    }
}

impl StepperBus for SimStepperBus {
    fn set_calibration_flag(&self, needed: bool) {
        self.inner.lock().calibration_needed = needed;
    }

    fn calibrate(&self, phase: CalibrationPhase) -> CalibrationOutcome {
        let mut sim = self.inner.lock();
        sim.calibration_calls.push(phase);
        // The driver's own loop pauses while motors home.
        sim.link.control_loop = None;

        let outcome = if !sim.link.is_connected() {
            CalibrationOutcome::Fail
        } else if let Some(scripted) = sim.scripted.pop_front() {
            scripted
        } else if phase == CalibrationPhase::One
            && sim.calibration_mode == CalibrationMode::Manual
            && !sim.user_confirmed
        {
            CalibrationOutcome::WaitingUserInput
        } else {
            CalibrationOutcome::Ok
        };

        match (outcome, phase) {
            (CalibrationOutcome::Ok, CalibrationPhase::Two) => {
                sim.calibration_needed = false;
                sim.calibration_in_progress = false;
                sim.user_confirmed = false;
            }
            (CalibrationOutcome::Ok, CalibrationPhase::One)
            | (CalibrationOutcome::WaitingUserInput, _) => sim.calibration_in_progress = true,
            (CalibrationOutcome::Fail, _) => sim.calibration_in_progress = false,
        }
        debug!(?phase, ?outcome, "sim: calibration phase");
        outcome
    }

    fn calibration_mode(&self) -> CalibrationMode {
        self.inner.lock().calibration_mode
    }

    fn is_calibration_in_progress(&self) -> bool {
        self.inner.lock().calibration_in_progress
    }

    fn can_process_manual_calibration(&self) -> Result<(), String> {
        match &self.inner.lock().manual_refusal {
            Some(reason) => Err(reason.clone()),
            None => Ok(()),
        }
    }

    fn validate_calibration_mode(&self, mode: CalibrationMode) {
        let mut sim = self.inner.lock();
        sim.calibration_mode = mode;
        sim.user_confirmed = true;
        sim.validated_modes.push(mode);
    }

    fn synchronize(&self, begin_trajectory: bool) {
        self.inner.lock().synchronized = Some(begin_trajectory);
    }

    fn firmware_versions(&self) -> Vec<MotorFirmware> {
        let sim = self.inner.lock();
        (1..=sim.goal.len())
            .map(|n| MotorFirmware {
                name: format!("Stepper Motor {n}"),
                version: "2.0.14".to_string(),
            })
            .collect()
    }

    fn set_conveyor(&self, id: u8, activate: bool) -> ConveyorStatus {
        let mut sim = self.inner.lock();
        if !sim.link.is_connected() {
            return ConveyorStatus::SetError;
        }
        let conveyor = sim.conveyors.entry(id).or_default();
        conveyor.connected = activate;
        if !activate {
            conveyor.running = false;
        }
        ConveyorStatus::SetOk
    }

    fn move_conveyor(&self, id: u8, activate: bool, speed: i16, direction: i8) -> ConveyorStatus {
        let mut sim = self.inner.lock();
        if !sim.link.is_connected() {
            return ConveyorStatus::ControlError;
        }
        match sim.conveyors.get_mut(&id) {
            Some(conveyor) if conveyor.connected => {
                conveyor.running = activate;
                conveyor.speed = speed;
                conveyor.direction = direction;
                ConveyorStatus::ControlOk
            }
            _ => ConveyorStatus::ControlError,
        }
    }

    fn update_conveyor_id(&self, old_id: u8, new_id: u8) -> ConveyorStatus {
        let mut sim = self.inner.lock();
        match sim.conveyors.remove(&old_id) {
            Some(conveyor) => {
                sim.conveyors.insert(new_id, conveyor);
                ConveyorStatus::UpdateIdOk
            }
            None => ConveyorStatus::UpdateIdError,
        }
    }

    fn conveyor_feedback(&self, id: u8) -> ConveyorFeedback {
        self.inner
            .lock()
            .conveyors
            .get(&id)
            .copied()
            .unwrap_or_default()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated servo bus
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct ServoSim {
    link: Link,
    version: HardwareVersion,
    version_probes: VecDeque<VersionProbe>,
    goal: Vec<f64>,
    home_moves: u32,
    leds: Option<[i32; 4]>,
    register_writes: Vec<RegisterWrite>,
    reboots: u32,
    gripper_position: f64,
    tool: Option<(u8, String)>,
}

/// A simulated servo bus with an attached gripper.  Starts plugged in but
/// not yet scanned.
#[derive(Debug)]
pub struct SimServoBus {
    inner: Mutex<ServoSim>,
}

impl SimServoBus {
    pub fn new(version: HardwareVersion) -> Self {
        Self {
            inner: Mutex::new(ServoSim {
                link: Link::new(),
                version,
                version_probes: VecDeque::new(),
                goal: vec![0.0; armbus_types::JOINT_COUNT - version.stepper_joints()],
                home_moves: 0,
                leds: None,
                register_writes: Vec::new(),
                reboots: 0,
                gripper_position: 0.0,
                tool: None,
            }),
        }
    }

    pub fn unplug(&self) {
        info!("sim: servo bus unplugged");
        self.inner.lock().link.unplug();
    }

    pub fn plug(&self) {
        info!("sim: servo bus plugged");
        self.inner.lock().link.plugged = true;
    }

    pub fn fail_next_scans(&self, count: u32) {
        self.inner.lock().link.failing_scans = count;
    }

    /// Queue answers for [`ServoBus::detect_version`].  Once the queue is
    /// empty the bus reports the generation it was built with.
    pub fn script_version_probes<I>(&self, probes: I)
    where
        I: IntoIterator<Item = VersionProbe>,
    {
        self.inner.lock().version_probes.extend(probes);
    }

    pub fn home_moves(&self) -> u32 {
        self.inner.lock().home_moves
    }

    pub fn leds(&self) -> Option<[i32; 4]> {
        self.inner.lock().leds
    }

    pub fn register_writes(&self) -> Vec<RegisterWrite> {
        self.inner.lock().register_writes.clone()
    }

    pub fn reboots(&self) -> u32 {
        self.inner.lock().reboots
    }

    pub fn torque_on(&self) -> bool {
        self.inner.lock().link.torque_on
    }

    pub fn control_loop(&self) -> Option<bool> {
        self.inner.lock().link.control_loop
    }

    pub fn scan_count(&self) -> u32 {
        self.inner.lock().link.scans
    }

    fn tool_call(&self, id: u8, success: ToolStatus, gripper_position: Option<f64>) -> ToolStatus {
        let mut sim = self.inner.lock();
        if !sim.link.is_connected() {
            return ToolStatus::Timeout;
        }
        if !matches!(&sim.tool, Some((tool_id, _)) if *tool_id == id) {
            return ToolStatus::PingFailed;
        }
        if let Some(position) = gripper_position {
            sim.gripper_position = position;
        }
        success
    }
}

impl BusHandle for SimServoBus {
    fn kind(&self) -> BusKind {
        BusKind::Servo
    }

    fn scan(&self) -> Result<(), HwError> {
        self.inner.lock().link.scan(BusKind::Servo)
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().link.is_connected()
    }

    fn set_torque(&self, enabled: bool) {
        self.inner.lock().link.torque_on = enabled;
    }

    fn start_control_loop(&self, limited: bool) {
        let mut sim = self.inner.lock();
        if sim.link.is_connected() {
            sim.link.control_loop = Some(limited);
        }
    }

    fn stop_control_loop(&self) {
        self.inner.lock().link.control_loop = None;
    }

    fn position(&self) -> Vec<f64> {
        self.inner.lock().goal.clone()
    }

    fn set_position(&self, target: &[f64]) {
        let mut sim = self.inner.lock();
        if sim.link.control_loop == Some(false) {
            for (slot, value) in sim.goal.iter_mut().zip(target) {
                *slot = *value;
            }
        }
    }

    fn status(&self) -> BusStatus {
        let sim = self.inner.lock();
        let connected = sim.link.is_connected();
        BusStatus {
            connection_ok: connected,
            calibration_needed: false,
            calibration_in_progress: false,
            error_message: if connected {
                String::new()
            } else {
                "Servo bus disconnected".to_string()
            },
            motors: (1..=sim.goal.len())
                .map(|n| MotorStatus {
                    name: format!("Servo Motor {n}"),
                    motor_type: "servo".to_string(),
                    temperature: 38,
                    voltage: 7.4,
                    hardware_error: 0,
                })
                .collect(),
        }
    }
}

impl ServoBus for SimServoBus {
    fn detect_version(&self) -> VersionProbe {
        // Probing talks to the motors directly; the driver does not need to
        // be connected, only the cable plugged in.
        let mut sim = self.inner.lock();
        if !sim.link.plugged {
            return VersionProbe::Pending;
        }
        let version = sim.version.as_u8();
        sim.version_probes
            .pop_front()
            .unwrap_or(VersionProbe::Detected(version))
    }

    fn move_to_home(&self) {
        let mut sim = self.inner.lock();
        sim.home_moves += 1;
        sim.goal.iter_mut().for_each(|slot| *slot = 0.0);
    }

    fn ping_tool(&self, id: u8, name: &str) -> ToolStatus {
        let mut sim = self.inner.lock();
        if !sim.link.is_connected() {
            return ToolStatus::PingFailed;
        }
        sim.tool = Some((id, name.to_string()));
        ToolStatus::PingOk
    }

    fn open_gripper(&self, id: u8, command: GripperCommand) -> ToolStatus {
        self.tool_call(id, ToolStatus::GripperOpen, Some(f64::from(command.position)))
    }

    fn close_gripper(&self, id: u8, command: GripperCommand) -> ToolStatus {
        self.tool_call(id, ToolStatus::GripperClosed, Some(f64::from(command.position)))
    }

    fn pull_air(&self, id: u8, _position: u16, _hold_torque: u16) -> ToolStatus {
        self.tool_call(id, ToolStatus::PumpPulled, None)
    }

    fn push_air(&self, id: u8, _position: u16) -> ToolStatus {
        self.tool_call(id, ToolStatus::PumpPushed, None)
    }

    fn set_leds(&self, leds: [i32; 4]) {
        self.inner.lock().leds = Some(leds);
    }

    fn write_register(&self, write: RegisterWrite) {
        self.inner.lock().register_writes.push(write);
    }

    fn reboot_motors(&self) {
        self.inner.lock().reboots += 1;
    }

    fn gripper_position(&self) -> f64 {
        self.inner.lock().gripper_position
    }

    fn gripper_effort(&self) -> f64 {
        0.0
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
