//! `armbus-runtime` – The arm's hardware control surface
//!
//! Assembles the bus drivers, the connection supervisors and the ambient
//! services into the single interface a motion controller talks to.
//!
//! # Modules
//!
//! - [`interface`] – [`HardwareInterface`][interface::HardwareInterface]:
//!   the backend-independent control surface (positions, status,
//!   calibration, tools, conveyors).
//! - [`facade`] – [`ArmHardware`][facade::ArmHardware]: merges both buses
//!   according to the hardware generation, serves disabled buses from a
//!   shadow buffer and owns the supervisor threads.
//! - [`fake`] – [`FakeHardware`][fake::FakeHardware]: echo backend for
//!   running without an arm.
//! - [`diagnostics`] – [`CpuTemperatureMonitor`][diagnostics::CpuTemperatureMonitor]:
//!   background CPU temperature reader.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with an optional OTLP span exporter.

pub mod diagnostics;
pub mod facade;
pub mod fake;
pub mod interface;
pub mod telemetry;

pub use diagnostics::CpuTemperatureMonitor;
pub use facade::ArmHardware;
pub use fake::FakeHardware;
pub use interface::HardwareInterface;
