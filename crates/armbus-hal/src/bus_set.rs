//! [`BusSet`] – the enabled bus drivers of one arm.
//!
//! A bus that is disabled in the configuration simply has no driver here.
//! Cloning a `BusSet` clones the `Arc`s, so the facade and both connection
//! supervisors can hold the same drivers.

use std::sync::Arc;

use armbus_types::BusKind;
use tracing::debug;

use crate::bus::{ServoBus, StepperBus};

#[derive(Clone, Default)]
pub struct BusSet {
    stepper: Option<Arc<dyn StepperBus>>,
    servo: Option<Arc<dyn ServoBus>>,
}

impl BusSet {
    pub fn new(stepper: Option<Arc<dyn StepperBus>>, servo: Option<Arc<dyn ServoBus>>) -> Self {
        Self { stepper, servo }
    }

    pub fn stepper(&self) -> Option<&Arc<dyn StepperBus>> {
        self.stepper.as_ref()
    }

    pub fn servo(&self) -> Option<&Arc<dyn ServoBus>> {
        self.servo.as_ref()
    }

    pub fn is_enabled(&self, kind: BusKind) -> bool {
        match kind {
            BusKind::Stepper => self.stepper.is_some(),
            BusKind::Servo => self.servo.is_some(),
        }
    }

    /// Learning mode turns torque off on every enabled bus so the arm can be
    /// moved by hand; leaving it turns torque back on.
    pub fn activate_learning_mode(&self, enable: bool) {
        debug!(enable, "learning mode");
        if let Some(stepper) = &self.stepper {
            stepper.set_torque(!enable);
        }
        if let Some(servo) = &self.servo {
            servo.set_torque(!enable);
        }
    }
}
