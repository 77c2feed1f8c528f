//! `armbus-hal` – Bus Driver Contracts
//!
//! The only place where the rest of the stack touches the two physical buses.
//!
//! # Modules
//!
//! - [`bus`] – [`BusHandle`][bus::BusHandle], [`StepperBus`][bus::StepperBus]
//!   and [`ServoBus`][bus::ServoBus]: the capability set every bus driver must
//!   offer.  Drivers are internally synchronised, so every method takes
//!   `&self` and a driver can be shared between the command thread and its
//!   connection supervisor.
//! - [`bus_set`] – [`BusSet`][bus_set::BusSet]: the enabled drivers of one
//!   arm, plus the operations that fan out to both of them.
//! - [`sim`] – [`SimStepperBus`][sim::SimStepperBus] and
//!   [`SimServoBus`][sim::SimServoBus]: in-process drivers with fault
//!   injection, used when no physical driver is linked and in tests.

pub mod bus;
pub mod bus_set;
pub mod sim;

pub use bus::{BusHandle, ServoBus, StepperBus};
pub use bus_set::BusSet;
pub use sim::{SimServoBus, SimStepperBus};
