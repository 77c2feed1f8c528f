//! Configuration – reads `~/.armbus/config.toml`.
//!
//! The file is read once at start-up.  A missing file yields the defaults;
//! `ARMBUS_*` environment variables are applied on top in both cases.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use armbus_kernel::SupervisorTiming;
use armbus_kernel::timing::{
    DEFAULT_CALIBRATION_RETRY, DEFAULT_SCAN_RETRY, DEFAULT_SETTLE_DELAY, DEFAULT_VERSION_RETRY,
};
use armbus_runtime::diagnostics::{DEFAULT_READ_INTERVAL, DEFAULT_THERMAL_PATH};
use armbus_types::{HardwareConfig, HardwareVersion};

/// Supervisor backoffs, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_scan_retry_ms")]
    pub scan_retry_ms: u64,
    #[serde(default = "default_calibration_retry_ms")]
    pub calibration_retry_ms: u64,
    #[serde(default = "default_version_retry_ms")]
    pub version_retry_ms: u64,
}

fn default_settle_delay_ms() -> u64 {
    millis(DEFAULT_SETTLE_DELAY)
}
fn default_scan_retry_ms() -> u64 {
    millis(DEFAULT_SCAN_RETRY)
}
fn default_calibration_retry_ms() -> u64 {
    millis(DEFAULT_CALIBRATION_RETRY)
}
fn default_version_retry_ms() -> u64 {
    millis(DEFAULT_VERSION_RETRY)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            scan_retry_ms: default_scan_retry_ms(),
            calibration_retry_ms: default_calibration_retry_ms(),
            version_retry_ms: default_version_retry_ms(),
        }
    }
}

impl TimingConfig {
    /// Supervisor timing with the tick period derived from `poll_frequency_hz`.
    pub fn supervisor_timing(&self, poll_frequency_hz: f64) -> SupervisorTiming {
        SupervisorTiming {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            scan_retry: Duration::from_millis(self.scan_retry_ms),
            calibration_retry: Duration::from_millis(self.calibration_retry_ms),
            version_retry: Duration::from_millis(self.version_retry_ms),
            ..SupervisorTiming::default()
        }
        .with_poll_frequency(poll_frequency_hz)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Thermal-zone file holding the CPU temperature in millidegrees.
    #[serde(default = "default_cpu_temperature_path")]
    pub cpu_temperature_path: PathBuf,
    #[serde(default = "default_read_interval_ms")]
    pub read_interval_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_cpu_temperature_path() -> PathBuf {
    PathBuf::from(DEFAULT_THERMAL_PATH)
}
fn default_read_interval_ms() -> u64 {
    millis(DEFAULT_READ_INTERVAL)
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            cpu_temperature_path: default_cpu_temperature_path(),
            read_interval_ms: default_read_interval_ms(),
        }
    }
}

/// Contents of `~/.armbus/config.toml`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Config {
    /// Run against the echo backend instead of the bus drivers.
    #[serde(default)]
    pub fake_drivers: bool,

    #[serde(default)]
    pub hardware: HardwareConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

impl Config {
    /// # Errors
    ///
    /// Returns a description of the first invalid setting.
    pub fn validate(&self) -> Result<(), String> {
        let hz = self.hardware.poll_frequency_hz;
        if !hz.is_finite() || hz <= 0.0 {
            return Err(format!(
                "hardware.poll_frequency_hz must be a positive number, got {hz}"
            ));
        }
        if self.diagnostics.read_interval_ms == 0 {
            return Err("diagnostics.read_interval_ms must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn supervisor_timing(&self) -> SupervisorTiming {
        self.timing
            .supervisor_timing(self.hardware.poll_frequency_hz)
    }
}

/// Return the config path: `$ARMBUS_CONFIG`, else `~/.armbus/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("ARMBUS_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".armbus").join("config.toml")
}

/// Load, apply environment overrides and validate.
///
/// # Errors
///
/// Returns a message when the file cannot be read or parsed, or when the
/// resulting configuration is invalid.
pub fn load() -> Result<Config, String> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `ARMBUS_*` environment variable overrides to `cfg`.  Unparsable
/// values are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `ARMBUS_HARDWARE_VERSION` | `hardware.hardware_version` (1 or 2) |
/// | `ARMBUS_STEPPER_BUS_ENABLED` | `hardware.stepper_bus_enabled` |
/// | `ARMBUS_SERVO_BUS_ENABLED` | `hardware.servo_bus_enabled` |
/// | `ARMBUS_POLL_FREQUENCY_HZ` | `hardware.poll_frequency_hz` |
/// | `ARMBUS_FAKE_DRIVERS` | `fake_drivers` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ARMBUS_HARDWARE_VERSION")
        && let Ok(raw) = v.trim().parse::<u8>()
        && let Ok(version) = HardwareVersion::try_from(raw)
    {
        cfg.hardware.hardware_version = version;
    }
    if let Some(enabled) = env_flag("ARMBUS_STEPPER_BUS_ENABLED") {
        cfg.hardware.stepper_bus_enabled = enabled;
    }
    if let Some(enabled) = env_flag("ARMBUS_SERVO_BUS_ENABLED") {
        cfg.hardware.servo_bus_enabled = enabled;
    }
    if let Ok(v) = std::env::var("ARMBUS_POLL_FREQUENCY_HZ")
        && let Ok(hz) = v.trim().parse::<f64>()
    {
        cfg.hardware.poll_frequency_hz = hz;
    }
    if let Some(fake) = env_flag("ARMBUS_FAKE_DRIVERS") {
        cfg.fake_drivers = fake;
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().and_then(|v| parse_flag(&v))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn config_path_points_to_armbus_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".armbus"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn defaults_match_hardware_layer() {
        let cfg = Config::default();
        assert!(!cfg.fake_drivers);
        assert_eq!(cfg.hardware.hardware_version, HardwareVersion::V2);
        assert!(cfg.hardware.stepper_bus_enabled);
        assert!(cfg.hardware.servo_bus_enabled);
        assert_eq!(cfg.timing.settle_delay_ms, 100);
        assert_eq!(cfg.timing.scan_retry_ms, 250);
        assert!(cfg.validate().is_ok());

        let timing = cfg.supervisor_timing();
        assert_eq!(timing.poll_period, Duration::from_millis(500));
        assert_eq!(timing.calibration_retry, Duration::from_millis(250));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let (_dir, path) = write_config(
            r#"
fake_drivers = true

[hardware]
hardware_version = 1
servo_bus_enabled = false
poll_frequency_hz = 4.0

[timing]
scan_retry_ms = 50
"#,
        );
        let cfg = load_from(&path).unwrap().unwrap();
        assert!(cfg.fake_drivers);
        assert_eq!(cfg.hardware.hardware_version, HardwareVersion::V1);
        assert!(cfg.hardware.stepper_bus_enabled);
        assert!(!cfg.hardware.servo_bus_enabled);
        assert_eq!(cfg.timing.scan_retry_ms, 50);
        assert_eq!(cfg.timing.settle_delay_ms, 100);
        assert!(cfg.diagnostics.enabled);

        let timing = cfg.supervisor_timing();
        assert_eq!(timing.poll_period, Duration::from_millis(250));
        assert_eq!(timing.scan_retry, Duration::from_millis(50));
    }

    #[test]
    fn unknown_hardware_version_is_a_parse_error() {
        let (_dir, path) = write_config("[hardware]\nhardware_version = 3\n");
        let err = load_from(&path).unwrap_err();
        assert!(err.contains("Failed to parse config"));
    }

    #[test]
    fn validate_rejects_non_positive_poll_frequency() {
        let mut cfg = Config::default();
        cfg.hardware.poll_frequency_hz = 0.0;
        assert!(cfg.validate().is_err());
        cfg.hardware.poll_frequency_hz = f64::INFINITY;
        assert!(cfg.validate().is_err());
        cfg.hardware.poll_frequency_hz = 10.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_diagnostics_interval() {
        let mut cfg = Config::default();
        cfg.diagnostics.read_interval_ms = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn roundtrip_through_toml() {
        let mut cfg = Config::default();
        cfg.hardware.home_position = [0.0, 0.5, -1.25, 0.0, 0.0, 0.0];
        let raw = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&raw).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn parse_flag_accepts_common_spellings() {
        assert_eq!(parse_flag("true"), Some(true));
        assert_eq!(parse_flag(" ON "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("No"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn apply_env_overrides_changes_hardware_version() {
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("ARMBUS_HARDWARE_VERSION", "1") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.hardware.hardware_version, HardwareVersion::V1);
        unsafe { std::env::remove_var("ARMBUS_HARDWARE_VERSION") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_poll_frequency() {
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("ARMBUS_POLL_FREQUENCY_HZ", "fast") };
        let mut cfg = Config::default();
        let original = cfg.hardware.poll_frequency_hz;
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.hardware.poll_frequency_hz, original);
        unsafe { std::env::remove_var("ARMBUS_POLL_FREQUENCY_HZ") };
    }

    #[test]
    fn apply_env_overrides_disables_servo_bus() {
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("ARMBUS_SERVO_BUS_ENABLED", "false") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert!(!cfg.hardware.servo_bus_enabled);
        unsafe { std::env::remove_var("ARMBUS_SERVO_BUS_ENABLED") };
    }
}
