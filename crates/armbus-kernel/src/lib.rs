//! `armbus-kernel` – Connection supervision & calibration
//!
//! Keeps both actuator buses alive without operator intervention: detects
//! disconnections, re-scans until the motors answer, re-runs calibration and
//! switches control loops between full and limited mode.
//!
//! # Modules
//!
//! - [`connection`] – [`ConnectionState`][connection::ConnectionState] and
//!   [`CalibrationRequest`][connection::CalibrationRequest]: the lock-free
//!   flags shared between a bus's supervisor and its readers.
//! - [`calibration`] – [`CalibrationCoordinator`][calibration::CalibrationCoordinator]:
//!   the two-phase stepper calibration protocol with its retry loop, homing
//!   the servos between phases when calibration is automatic.
//! - [`supervisor`] – [`ConnectionSupervisor`][supervisor::ConnectionSupervisor]
//!   and the [`Supervision`][supervisor::Supervision] thread handle: one
//!   watchdog loop per enabled bus.
//! - [`version`] – [`VersionReconciler`][version::VersionReconciler]:
//!   start-up check of the configured hardware generation.
//! - [`timing`] – [`SupervisorTiming`][timing::SupervisorTiming] backoffs and
//!   the interruptible [`Shutdown`][timing::Shutdown] flag.

pub mod calibration;
pub mod connection;
pub mod supervisor;
pub mod timing;
pub mod version;

pub use calibration::{AttemptOutcome, CalibrationCoordinator};
pub use connection::{CalibrationRequest, ConnectionState};
pub use supervisor::{ConnectionSupervisor, Supervision, SupervisionContext};
pub use timing::{Shutdown, SupervisorTiming};
pub use version::{VersionCheck, VersionReconciler};
