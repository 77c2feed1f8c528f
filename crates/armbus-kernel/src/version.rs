//! [`VersionReconciler`] – start-up check of the configured hardware
//! generation against what the servo bus actually finds.
//!
//! A mismatch is logged as an error and reported, never corrected: the
//! operator has to fix the configuration and restart.  Only a known
//! generation that differs from the configured one is a mismatch; a
//! generation number this layer does not know counts as undetermined.

use std::time::Duration;

use armbus_hal::ServoBus;
use armbus_types::{HardwareVersion, HwError, VersionProbe};
use tracing::{error, info, warn};

use crate::timing::Shutdown;

/// Outcome of the start-up version check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    Matched,
    /// Some motors are disabled; the configured version is kept.
    Undetermined,
    Mismatch {
        configured: HardwareVersion,
        detected: u8,
    },
}

impl VersionCheck {
    /// # Errors
    ///
    /// Returns [`HwError::VersionMismatch`] for [`VersionCheck::Mismatch`].
    pub fn into_result(self) -> Result<(), HwError> {
        match self {
            VersionCheck::Matched | VersionCheck::Undetermined => Ok(()),
            VersionCheck::Mismatch {
                configured,
                detected,
            } => Err(HwError::VersionMismatch {
                configured: configured.as_u8(),
                detected,
            }),
        }
    }
}

pub struct VersionReconciler {
    configured: HardwareVersion,
    retry: Duration,
}

impl VersionReconciler {
    pub fn new(configured: HardwareVersion, retry: Duration) -> Self {
        Self { configured, retry }
    }

    /// Interpret one probe.  `None` means the motors have not answered yet.
    pub fn classify(&self, probe: VersionProbe) -> Option<VersionCheck> {
        match probe {
            VersionProbe::Pending => None,
            VersionProbe::Undetermined => Some(VersionCheck::Undetermined),
            VersionProbe::Detected(detected) if detected == self.configured.as_u8() => {
                Some(VersionCheck::Matched)
            }
            VersionProbe::Detected(detected) => match HardwareVersion::try_from(detected) {
                Ok(_) => Some(VersionCheck::Mismatch {
                    configured: self.configured,
                    detected,
                }),
                Err(_) => Some(VersionCheck::Undetermined),
            },
        }
    }

    /// Probe the servo bus until it answers.  Returns `None` only if shutdown
    /// is triggered first.
    pub fn reconcile<S: ServoBus + ?Sized>(
        &self,
        servo: &S,
        shutdown: &Shutdown,
    ) -> Option<VersionCheck> {
        let check = loop {
            if let Some(check) = self.classify(servo.detect_version()) {
                break check;
            }
            warn!("scan to find servo motors and check hardware version");
            if !shutdown.sleep(self.retry) {
                return None;
            }
        };

        match check {
            VersionCheck::Matched => {
                info!(version = %self.configured, "detected hardware version matches configuration");
            }
            VersionCheck::Undetermined => {
                info!(
                    configured = %self.configured,
                    "hardware version could not be detected (motors disabled?); keeping configuration"
                );
            }
            VersionCheck::Mismatch {
                configured,
                detected,
            } => {
                error!(
                    configured = %configured,
                    detected,
                    "WRONG HARDWARE VERSION: fix the configuration and restart"
                );
            }
        }
        Some(check)
    }
}
