use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of logical joints on the arm, across both buses.
pub const JOINT_COUNT: usize = 6;

/// One value per logical joint, stepper-bus joints first.
pub type PositionVector = [f64; JOINT_COUNT];

/// Status code returned by successful calls in the numeric contract.
pub const STATUS_OK: u16 = 200;

/// The two physical buses that make up the arm's actuator bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    /// Daisy-chained stepper motors (base, shoulder, elbow, ...).
    Stepper,
    /// Serial servo motors (wrist joints and end-effector tools).
    Servo,
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusKind::Stepper => write!(f, "stepper"),
            BusKind::Servo => write!(f, "servo"),
        }
    }
}

/// Physical hardware generation of the arm. Decides how the six logical
/// joints are split between the two buses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum HardwareVersion {
    V1,
    V2,
}

impl HardwareVersion {
    /// Number of joints driven by the stepper bus.
    pub fn stepper_joints(self) -> usize {
        match self {
            HardwareVersion::V1 => 4,
            HardwareVersion::V2 => 3,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            HardwareVersion::V1 => 1,
            HardwareVersion::V2 => 2,
        }
    }
}

impl TryFrom<u8> for HardwareVersion {
    type Error = HwError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(HardwareVersion::V1),
            2 => Ok(HardwareVersion::V2),
            other => Err(HwError::InvalidHardwareVersion(other)),
        }
    }
}

impl From<HardwareVersion> for u8 {
    fn from(version: HardwareVersion) -> Self {
        version.as_u8()
    }
}

impl fmt::Display for HardwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.as_u8())
    }
}

/// Maps the logical [`PositionVector`] onto the two buses.
///
/// For [`HardwareVersion::V1`] joints `0..4` live on the stepper bus and
/// `4..6` on the servo bus; for [`HardwareVersion::V2`] the split is `0..3` /
/// `3..6`.  The two ranges never overlap and always cover all six slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JointLayout {
    stepper_joints: usize,
}

impl JointLayout {
    pub fn for_version(version: HardwareVersion) -> Self {
        Self {
            stepper_joints: version.stepper_joints(),
        }
    }

    pub fn stepper_joints(&self) -> usize {
        self.stepper_joints
    }

    pub fn servo_joints(&self) -> usize {
        JOINT_COUNT - self.stepper_joints
    }

    pub fn stepper_range(&self) -> Range<usize> {
        0..self.stepper_joints
    }

    pub fn servo_range(&self) -> Range<usize> {
        self.stepper_joints..JOINT_COUNT
    }

    /// Split a command into its `(stepper, servo)` halves.
    pub fn split<'a>(&self, positions: &'a PositionVector) -> (&'a [f64], &'a [f64]) {
        positions.split_at(self.stepper_joints)
    }

    /// Copy `values` into the stepper half of `positions`.  Extra values are
    /// ignored; missing values leave the slot untouched.
    pub fn write_stepper(&self, positions: &mut PositionVector, values: &[f64]) {
        fill(&mut positions[self.stepper_range()], values);
    }

    /// Copy `values` into the servo half of `positions`.
    pub fn write_servo(&self, positions: &mut PositionVector, values: &[f64]) {
        fill(&mut positions[self.servo_range()], values);
    }
}

fn fill(slots: &mut [f64], values: &[f64]) {
    for (slot, value) in slots.iter_mut().zip(values) {
        *slot = *value;
    }
}

/// Result of one calibration phase on the stepper bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationOutcome {
    Ok,
    Fail,
    /// The motors are parked waiting for the operator to confirm a manual
    /// calibration.
    WaitingUserInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationPhase {
    One,
    Two,
}

/// How the stepper bus finds its reference position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationMode {
    /// Motors drive themselves onto their end stops.
    #[default]
    Auto,
    /// The operator places the arm in its home pose by hand.
    Manual,
}

impl fmt::Display for CalibrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationMode::Auto => write!(f, "auto"),
            CalibrationMode::Manual => write!(f, "manual"),
        }
    }
}

impl FromStr for CalibrationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "1" => Ok(CalibrationMode::Auto),
            "manual" | "2" => Ok(CalibrationMode::Manual),
            other => Err(format!("unknown calibration mode '{other}'")),
        }
    }
}

/// Answer of the servo bus when asked which hardware generation it sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionProbe {
    /// Motors have not answered yet; ask again later.
    Pending,
    /// Some motors are disabled, so no generation can be inferred.
    Undetermined,
    Detected(u8),
}

/// Telemetry for a single motor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorStatus {
    pub name: String,
    pub motor_type: String,
    pub temperature: i32,
    pub voltage: f64,
    pub hardware_error: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorFirmware {
    pub name: String,
    pub version: String,
}

/// Status reported by one bus driver.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BusStatus {
    pub connection_ok: bool,
    pub calibration_needed: bool,
    pub calibration_in_progress: bool,
    pub error_message: String,
    pub motors: Vec<MotorStatus>,
}

/// Status of the whole arm, composed fresh from both buses on every query.
///
/// Motors are listed stepper bus first, then servo bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareStatus {
    pub connection_ok: bool,
    pub calibration_needed: bool,
    pub calibration_in_progress: bool,
    /// At least one bus runs its control loop in limited mode.
    pub limited_mode: bool,
    pub error_message: String,
    pub motors: Vec<MotorStatus>,
}

impl Default for HardwareStatus {
    fn default() -> Self {
        Self {
            connection_ok: true,
            calibration_needed: false,
            calibration_in_progress: false,
            limited_mode: false,
            error_message: String::new(),
            motors: Vec::new(),
        }
    }
}

/// Result codes of the end-effector tools on the servo bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolStatus {
    PingOk,
    PingFailed,
    GripperOpen,
    GripperClosed,
    PumpPulled,
    PumpPushed,
    Timeout,
}

/// Goal parameters for a gripper open/close command, in raw servo units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GripperCommand {
    pub position: u16,
    pub speed: u16,
    pub hold_torque: u16,
    /// Only used when closing.
    pub max_torque: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConveyorStatus {
    SetOk,
    SetError,
    ControlOk,
    ControlError,
    UpdateIdOk,
    UpdateIdError,
}

impl ConveyorStatus {
    pub fn is_ok(self) -> bool {
        matches!(
            self,
            ConveyorStatus::SetOk | ConveyorStatus::ControlOk | ConveyorStatus::UpdateIdOk
        )
    }

    pub fn message(self) -> &'static str {
        match self {
            ConveyorStatus::SetOk => "Set conveyor OK",
            ConveyorStatus::SetError => "Set conveyor ERROR",
            ConveyorStatus::ControlOk => "Command conveyor OK",
            ConveyorStatus::ControlError => "Command conveyor ERROR",
            ConveyorStatus::UpdateIdOk => "Update conveyor OK",
            ConveyorStatus::UpdateIdError => "Update conveyor ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConveyorFeedback {
    pub connected: bool,
    pub running: bool,
    pub speed: i16,
    pub direction: i8,
}

/// Raw register write queued on the servo bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterWrite {
    pub motor_type: u8,
    pub id: u8,
    pub value: u32,
    pub address: u32,
    pub byte_count: u32,
}

/// Static hardware description, loaded once from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareConfig {
    #[serde(default = "default_hardware_version")]
    pub hardware_version: HardwareVersion,
    #[serde(default = "default_enabled")]
    pub stepper_bus_enabled: bool,
    #[serde(default = "default_enabled")]
    pub servo_bus_enabled: bool,
    /// Rate of the per-bus connection supervisor loops.
    #[serde(default = "default_poll_frequency_hz")]
    pub poll_frequency_hz: f64,
    /// Position reported for joints whose bus is disabled, until the first
    /// command overwrites it.
    #[serde(default)]
    pub home_position: PositionVector,
}

fn default_hardware_version() -> HardwareVersion {
    HardwareVersion::V2
}
fn default_enabled() -> bool {
    true
}
fn default_poll_frequency_hz() -> f64 {
    2.0
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            hardware_version: default_hardware_version(),
            stepper_bus_enabled: default_enabled(),
            servo_bus_enabled: default_enabled(),
            poll_frequency_hz: default_poll_frequency_hz(),
            home_position: [0.0; JOINT_COUNT],
        }
    }
}

impl HardwareConfig {
    pub fn layout(&self) -> JointLayout {
        JointLayout::for_version(self.hardware_version)
    }
}

/// Global error type for the actuator-bus layer.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HwError {
    #[error("{bus} bus is disconnected")]
    Disconnected { bus: BusKind },

    #[error("Scan failed on {bus} bus: {details}")]
    ScanFailed { bus: BusKind, details: String },

    #[error("Led array must have 4 values, got {0}")]
    InvalidLedCount(usize),

    #[error("Calibration refused: {0}")]
    CalibrationRefused(String),

    #[error("Wrong hardware version: configured {configured}, detected {detected}")]
    VersionMismatch { configured: u8, detected: u8 },

    #[error("Invalid hardware version {0} (expected 1 or 2)")]
    InvalidHardwareVersion(u8),

    #[error("Bus configuration error: {0}")]
    BusConfiguration(String),

    #[error("Connection supervision is already running")]
    SupervisionAlreadyRunning,

    #[error("Driver error on {bus} bus: {details}")]
    Driver { bus: BusKind, details: String },
}

impl HwError {
    /// Numeric status code: 400 for rejected requests, 500 otherwise.
    pub fn status_code(&self) -> u16 {
        match self {
            HwError::InvalidLedCount(_) | HwError::CalibrationRefused(_) => 400,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_layout_puts_four_joints_on_stepper_bus() {
        let layout = JointLayout::for_version(HardwareVersion::V1);
        let cmd = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let (stepper, servo) = layout.split(&cmd);
        assert_eq!(stepper, &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(servo, &[4.0, 5.0]);
        assert_eq!(layout.servo_range(), 4..6);
    }

    #[test]
    fn v2_layout_splits_three_and_three() {
        let layout = JointLayout::for_version(HardwareVersion::V2);
        let cmd = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let (stepper, servo) = layout.split(&cmd);
        assert_eq!(stepper, &[0.0, 1.0, 2.0]);
        assert_eq!(servo, &[3.0, 4.0, 5.0]);
    }

    #[test]
    fn layout_ranges_cover_all_joints_once() {
        for version in [HardwareVersion::V1, HardwareVersion::V2] {
            let layout = JointLayout::for_version(version);
            assert_eq!(layout.stepper_range().end, layout.servo_range().start);
            assert_eq!(layout.stepper_joints() + layout.servo_joints(), JOINT_COUNT);
        }
    }

    #[test]
    fn write_halves_ignores_short_and_long_inputs() {
        let layout = JointLayout::for_version(HardwareVersion::V2);
        let mut pos = [9.0; JOINT_COUNT];
        layout.write_stepper(&mut pos, &[1.0]);
        layout.write_servo(&mut pos, &[3.0, 4.0, 5.0, 6.0]);
        assert_eq!(pos, [1.0, 9.0, 9.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn hardware_version_rejects_unknown_generation() {
        assert_eq!(HardwareVersion::try_from(1).unwrap(), HardwareVersion::V1);
        assert_eq!(HardwareVersion::try_from(2).unwrap(), HardwareVersion::V2);
        assert!(matches!(
            HardwareVersion::try_from(3),
            Err(HwError::InvalidHardwareVersion(3))
        ));
    }

    #[test]
    fn hardware_config_defaults_from_empty_toml() {
        let cfg: HardwareConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, HardwareConfig::default());
        assert_eq!(cfg.hardware_version, HardwareVersion::V2);
        assert!(cfg.stepper_bus_enabled && cfg.servo_bus_enabled);
    }

    #[test]
    fn hardware_config_parses_version_as_integer() {
        let cfg: HardwareConfig = toml::from_str(
            "hardware_version = 1\nservo_bus_enabled = false\npoll_frequency_hz = 5.0",
        )
        .unwrap();
        assert_eq!(cfg.hardware_version, HardwareVersion::V1);
        assert!(!cfg.servo_bus_enabled);
        assert_eq!(cfg.layout().stepper_joints(), 4);

        let bad: Result<HardwareConfig, _> = toml::from_str("hardware_version = 7");
        assert!(bad.is_err());
    }

    #[test]
    fn calibration_mode_parses_names_and_codes() {
        assert_eq!("AUTO".parse::<CalibrationMode>().unwrap(), CalibrationMode::Auto);
        assert_eq!("2".parse::<CalibrationMode>().unwrap(), CalibrationMode::Manual);
        assert!("sideways".parse::<CalibrationMode>().is_err());
    }

    #[test]
    fn precondition_errors_map_to_client_error() {
        assert_eq!(HwError::InvalidLedCount(3).status_code(), 400);
        assert_eq!(HwError::CalibrationRefused("out of bounds".into()).status_code(), 400);
        let mismatch = HwError::VersionMismatch {
            configured: 2,
            detected: 1,
        };
        assert_eq!(mismatch.status_code(), 500);
        assert!(mismatch.to_string().contains("Wrong hardware version"));
    }

    #[test]
    fn disabled_bus_status_defaults_to_healthy() {
        let status = HardwareStatus::default();
        assert!(status.connection_ok);
        assert!(!status.calibration_needed);
        assert!(status.motors.is_empty());
    }

    #[test]
    fn hardware_status_serialization_roundtrip() {
        let status = HardwareStatus {
            connection_ok: false,
            error_message: "stepper bus disconnected".into(),
            motors: vec![MotorStatus {
                name: "Stepper Motor 1".into(),
                motor_type: "stepper".into(),
                temperature: 31,
                voltage: 12.1,
                hardware_error: 0,
            }],
            ..HardwareStatus::default()
        };
        let json = serde_json::to_string(&status).unwrap();
        let back: HardwareStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(status, back);
    }
}
