//! Wires a configured hardware backend together for the shell.
//!
//! Without a physical bus attached the drivers are the simulated ones from
//! `armbus-hal`; their handles are kept so the shell can unplug and replug a
//! bus while the supervisors are running.

use std::sync::Arc;
use std::time::Duration;

use armbus_hal::{BusSet, ServoBus, SimServoBus, SimStepperBus, StepperBus};
use armbus_runtime::{ArmHardware, CpuTemperatureMonitor, FakeHardware, HardwareInterface};
use armbus_types::{BusKind, HwError};
use tracing::warn;

use crate::config::Config;

pub struct Session {
    pub hardware: Arc<dyn HardwareInterface>,
    /// Set when running the bus-backed facade rather than the echo backend.
    pub arm: Option<Arc<ArmHardware>>,
    pub stepper: Option<Arc<SimStepperBus>>,
    pub servo: Option<Arc<SimServoBus>>,
    pub monitor: Option<CpuTemperatureMonitor>,
}

impl Session {
    /// Build the backend selected by `cfg`, initialise it and start
    /// supervision.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while building, scanning or spawning
    /// the supervisor threads.
    pub fn start(cfg: &Config) -> Result<Self, HwError> {
        let mut session = if cfg.fake_drivers {
            Self {
                hardware: Arc::new(FakeHardware::new(&cfg.hardware)),
                arm: None,
                stepper: None,
                servo: None,
                monitor: None,
            }
        } else {
            Self::simulated(cfg)?
        };

        session.hardware.init()?;
        session.hardware.start_supervision()?;

        if cfg.diagnostics.enabled {
            match CpuTemperatureMonitor::start(
                cfg.diagnostics.cpu_temperature_path.clone(),
                Duration::from_millis(cfg.diagnostics.read_interval_ms),
            ) {
                Ok(monitor) => session.monitor = Some(monitor),
                Err(e) => warn!(error = %e, "cpu temperature monitor not started"),
            }
        }
        Ok(session)
    }

    fn simulated(cfg: &Config) -> Result<Self, HwError> {
        let version = cfg.hardware.hardware_version;
        let stepper = cfg
            .hardware
            .stepper_bus_enabled
            .then(|| Arc::new(SimStepperBus::new(version)));
        let servo = cfg
            .hardware
            .servo_bus_enabled
            .then(|| Arc::new(SimServoBus::new(version)));

        let buses = BusSet::new(
            stepper.clone().map(|bus| bus as Arc<dyn StepperBus>),
            servo.clone().map(|bus| bus as Arc<dyn ServoBus>),
        );
        let arm = Arc::new(ArmHardware::with_timing(
            cfg.hardware.clone(),
            buses,
            cfg.supervisor_timing(),
        )?);

        Ok(Self {
            hardware: arm.clone(),
            arm: Some(arm),
            stepper,
            servo,
            monitor: None,
        })
    }

    /// Simulate a cable being pulled (`plugged == false`) or reconnected.
    /// Returns `false` when that bus has no simulated driver.
    pub fn set_plugged(&self, kind: BusKind, plugged: bool) -> bool {
        match (kind, plugged) {
            (BusKind::Stepper, true) => self.stepper.as_ref().map(|bus| bus.plug()).is_some(),
            (BusKind::Stepper, false) => self.stepper.as_ref().map(|bus| bus.unplug()).is_some(),
            (BusKind::Servo, true) => self.servo.as_ref().map(|bus| bus.plug()).is_some(),
            (BusKind::Servo, false) => self.servo.as_ref().map(|bus| bus.unplug()).is_some(),
        }
    }

    pub fn cpu_temperature(&self) -> Option<i32> {
        self.monitor.as_ref().map(CpuTemperatureMonitor::temperature)
    }

    pub fn shutdown(&mut self) {
        self.hardware.shutdown();
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn quiet_config() -> Config {
        let mut cfg = Config::default();
        cfg.diagnostics.enabled = false;
        cfg.timing.settle_delay_ms = 1;
        cfg.timing.scan_retry_ms = 1;
        cfg.timing.calibration_retry_ms = 1;
        cfg.timing.version_retry_ms = 1;
        cfg.hardware.poll_frequency_hz = 200.0;
        cfg
    }

    #[test]
    fn fake_session_has_no_buses() {
        let mut cfg = quiet_config();
        cfg.fake_drivers = true;
        let mut session = Session::start(&cfg).unwrap();
        assert!(session.arm.is_none());
        assert!(!session.set_plugged(BusKind::Servo, false));
        assert!(session.hardware.is_connection_ok());
        session.shutdown();
    }

    #[test]
    fn simulated_session_supervises_enabled_buses() {
        let mut cfg = quiet_config();
        cfg.hardware.servo_bus_enabled = false;
        let mut session = Session::start(&cfg).unwrap();
        assert!(session.stepper.is_some());
        assert!(session.servo.is_none());
        assert!(session.arm.as_ref().is_some_and(|arm| arm.is_supervising()));

        let deadline = Instant::now() + Duration::from_secs(10);
        while !session.hardware.status().connection_ok && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(session.hardware.status().connection_ok);
        assert!(session.set_plugged(BusKind::Stepper, false));
        session.shutdown();
        assert!(!session.arm.as_ref().is_some_and(|arm| arm.is_supervising()));
    }

    #[test]
    fn temperature_is_absent_when_diagnostics_disabled() {
        let mut cfg = quiet_config();
        cfg.fake_drivers = true;
        let session = Session::start(&cfg).unwrap();
        assert_eq!(session.cpu_temperature(), None);
    }
}
