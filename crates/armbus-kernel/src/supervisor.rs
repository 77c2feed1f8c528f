//! [`ConnectionSupervisor`] – per-bus watchdog loop.
//!
//! One supervisor runs per enabled bus, each on its own thread.  Every tick
//! it checks its bus:
//!
//! 1. Disconnected (or, for the stepper bus, a calibration was requested):
//!    stop the control loop, settle, re-scan until the bus answers, put it in
//!    a safe state and, for the stepper bus, run the calibration protocol.
//! 2. Connected: enter limited mode if the other bus just went down, leave
//!    it (torque off) once the other bus is back.
//!
//! A supervisor writes only its own bus's [`ConnectionState`]; the other
//! bus's state is read to decide limited-mode transitions.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use armbus_hal::{BusSet, SimServoBus, SimStepperBus};
//! use armbus_kernel::{Supervision, SupervisionContext, SupervisorTiming};
//! use armbus_types::HardwareVersion;
//!
//! let buses = BusSet::new(
//!     Some(Arc::new(SimStepperBus::new(HardwareVersion::V2))),
//!     Some(Arc::new(SimServoBus::new(HardwareVersion::V2))),
//! );
//! let ctx = SupervisionContext::new(buses, HardwareVersion::V2, SupervisorTiming::default());
//! let supervision = Supervision::spawn(&ctx).expect("spawn supervisor threads");
//! // ... supervisors run until `supervision` is dropped.
//! drop(supervision);
//! ```

use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use armbus_hal::{BusHandle, BusSet, ServoBus, StepperBus};
use armbus_types::{BusKind, HardwareVersion, HwError};
use tracing::{debug, info, warn};

use crate::calibration::CalibrationCoordinator;
use crate::connection::{CalibrationRequest, ConnectionState};
use crate::timing::{Shutdown, SupervisorTiming};
use crate::version::{VersionCheck, VersionReconciler};

// ────────────────────────────────────────────────────────────────────────────
// Shared context
// ────────────────────────────────────────────────────────────────────────────

/// Everything the two supervisors and the hardware facade share.
#[derive(Clone)]
pub struct SupervisionContext {
    pub buses: BusSet,
    pub stepper_state: Arc<ConnectionState>,
    pub servo_state: Arc<ConnectionState>,
    pub request: Arc<CalibrationRequest>,
    /// Set once by the servo supervisor after its start-up version check.
    pub version_report: Arc<OnceLock<VersionCheck>>,
    pub hardware_version: HardwareVersion,
    pub timing: SupervisorTiming,
    /// Stops supervisors built directly from this context.  Each
    /// [`Supervision`] run has its own flag instead.
    pub shutdown: Shutdown,
}

impl SupervisionContext {
    pub fn new(buses: BusSet, hardware_version: HardwareVersion, timing: SupervisorTiming) -> Self {
        Self {
            buses,
            stepper_state: Arc::new(ConnectionState::new()),
            servo_state: Arc::new(ConnectionState::new()),
            request: Arc::new(CalibrationRequest::new()),
            version_report: Arc::new(OnceLock::new()),
            hardware_version,
            timing,
            shutdown: Shutdown::new(),
        }
    }

    pub fn state(&self, kind: BusKind) -> &Arc<ConnectionState> {
        match kind {
            BusKind::Stepper => &self.stepper_state,
            BusKind::Servo => &self.servo_state,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Supervisor
// ────────────────────────────────────────────────────────────────────────────

enum Role {
    Stepper {
        bus: Arc<dyn StepperBus>,
        coordinator: CalibrationCoordinator,
        request: Arc<CalibrationRequest>,
    },
    Servo {
        bus: Arc<dyn ServoBus>,
        reconciler: VersionReconciler,
        report: Arc<OnceLock<VersionCheck>>,
    },
}

pub struct ConnectionSupervisor {
    kind: BusKind,
    role: Role,
    state: Arc<ConnectionState>,
    /// `None` when the other bus is disabled, which counts as connected.
    counterpart: Option<Arc<ConnectionState>>,
    buses: BusSet,
    timing: SupervisorTiming,
    shutdown: Shutdown,
}

impl ConnectionSupervisor {
    /// Supervisor of the stepper bus, or `None` if that bus is disabled.
    pub fn for_stepper(ctx: &SupervisionContext) -> Option<Self> {
        let bus = ctx.buses.stepper()?.clone();
        let coordinator = CalibrationCoordinator::new(
            bus.clone(),
            ctx.buses.clone(),
            ctx.request.clone(),
            ctx.stepper_state.clone(),
            ctx.timing,
            ctx.shutdown.clone(),
        );
        Some(Self {
            kind: BusKind::Stepper,
            role: Role::Stepper {
                bus,
                coordinator,
                request: ctx.request.clone(),
            },
            state: ctx.stepper_state.clone(),
            counterpart: ctx
                .buses
                .is_enabled(BusKind::Servo)
                .then(|| ctx.servo_state.clone()),
            buses: ctx.buses.clone(),
            timing: ctx.timing,
            shutdown: ctx.shutdown.clone(),
        })
    }

    /// Supervisor of the servo bus, or `None` if that bus is disabled.
    pub fn for_servo(ctx: &SupervisionContext) -> Option<Self> {
        let bus = ctx.buses.servo()?.clone();
        Some(Self {
            kind: BusKind::Servo,
            role: Role::Servo {
                bus,
                reconciler: VersionReconciler::new(ctx.hardware_version, ctx.timing.version_retry),
                report: ctx.version_report.clone(),
            },
            state: ctx.servo_state.clone(),
            counterpart: ctx
                .buses
                .is_enabled(BusKind::Stepper)
                .then(|| ctx.stepper_state.clone()),
            buses: ctx.buses.clone(),
            timing: ctx.timing,
            shutdown: ctx.shutdown.clone(),
        })
    }

    pub fn kind(&self) -> BusKind {
        self.kind
    }

    /// Run one supervision step.  Returns `false` if shutdown interrupted it.
    pub fn tick(&self) -> bool {
        match &self.role {
            Role::Stepper {
                bus,
                coordinator,
                request,
            } => {
                let requested = request.take();
                if requested || !bus.is_connected() {
                    if requested {
                        info!("new stepper calibration requested");
                    }
                    self.recover_stepper(bus.as_ref(), coordinator)
                } else {
                    self.state.set_connected(true);
                    self.reconcile_limited_mode(bus.as_ref());
                    true
                }
            }
            Role::Servo { bus, .. } => {
                if bus.is_connected() {
                    self.state.set_connected(true);
                    self.reconcile_limited_mode(bus.as_ref());
                    true
                } else {
                    self.recover_servo(bus.as_ref())
                }
            }
        }
    }

    /// Supervise until shutdown.  The servo supervisor first checks the
    /// hardware version.
    pub fn run(&self) {
        if let Role::Servo {
            bus,
            reconciler,
            report,
        } = &self.role
        {
            match reconciler.reconcile(bus.as_ref(), &self.shutdown) {
                Some(check) => {
                    let _ = report.set(check);
                }
                None => return,
            }
        }

        info!(bus = %self.kind, "connection supervisor started");
        while !self.shutdown.is_triggered() {
            let started = Instant::now();
            if !self.tick() {
                break;
            }
            let remaining = self.timing.poll_period.saturating_sub(started.elapsed());
            if !self.shutdown.sleep(remaining) {
                break;
            }
        }
        info!(bus = %self.kind, "connection supervisor stopped");
    }

    fn recover_stepper(&self, bus: &dyn StepperBus, coordinator: &CalibrationCoordinator) -> bool {
        if !self.reconnect(bus) {
            return false;
        }

        info!("set calibration flag");
        bus.set_calibration_flag(true);
        bus.set_torque(false);
        self.start_loop(bus, true);

        if !coordinator.run() {
            return false;
        }

        self.buses.activate_learning_mode(true);
        let limited = self.counterpart_down();
        warn!(bus = %self.kind, limited, "resume control loop");
        self.start_loop(bus, limited);
        true
    }

    fn recover_servo(&self, bus: &dyn ServoBus) -> bool {
        if !self.reconnect(bus) {
            return false;
        }

        bus.set_torque(false);
        self.buses.activate_learning_mode(true);
        let limited = self.counterpart_down();
        warn!(bus = %self.kind, limited, "resume control loop");
        self.start_loop(bus, limited);
        true
    }

    fn reconnect<B: BusHandle + ?Sized>(&self, bus: &B) -> bool {
        warn!(bus = %self.kind, "stop control loop");
        bus.stop_control_loop();
        self.state.set_limited_mode(false);
        if !self.shutdown.sleep(self.timing.settle_delay) {
            return false;
        }
        scan_until_found(bus, &self.state, &self.timing, &self.shutdown)
    }

    fn start_loop<B: BusHandle + ?Sized>(&self, bus: &B, limited: bool) {
        bus.start_control_loop(limited);
        self.state.set_limited_mode(limited);
    }

    fn counterpart_down(&self) -> bool {
        self.counterpart
            .as_ref()
            .is_some_and(|other| !other.is_connected())
    }

    fn reconcile_limited_mode<B: BusHandle + ?Sized>(&self, bus: &B) {
        let counterpart_down = self.counterpart_down();
        let limited = self.state.is_limited_mode();
        if counterpart_down && !limited {
            warn!(bus = %self.kind, "other bus is down, entering limited mode");
            self.start_loop(bus, true);
        } else if !counterpart_down && limited {
            info!(bus = %self.kind, "other bus is back, leaving limited mode");
            bus.set_torque(false);
            self.start_loop(bus, false);
        }
    }
}

/// Scan `bus` until every motor answers.  Returns `false` on shutdown.
pub(crate) fn scan_until_found<B: BusHandle + ?Sized>(
    bus: &B,
    state: &ConnectionState,
    timing: &SupervisorTiming,
    shutdown: &Shutdown,
) -> bool {
    state.set_connected(false);
    let kind = bus.kind();
    loop {
        match bus.scan() {
            Ok(()) => {
                debug!(bus = %kind, "scan succeeded");
                state.set_connected(true);
                return true;
            }
            Err(e) => {
                warn!(bus = %kind, error = %e, "scan to find motors...");
                if !shutdown.sleep(timing.scan_retry) {
                    return false;
                }
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Supervision threads
// ────────────────────────────────────────────────────────────────────────────

/// Running supervisor threads.  Dropping the handle triggers shutdown and
/// joins every thread.
pub struct Supervision {
    shutdown: Shutdown,
    handles: Vec<JoinHandle<()>>,
}

impl Supervision {
    /// Spawn one named thread per enabled bus.  The threads share a fresh
    /// shutdown flag, so a context can be supervised again after a previous
    /// run was stopped.
    ///
    /// # Errors
    ///
    /// Returns [`HwError::Driver`] if the OS refuses to spawn a thread.  Any
    /// thread already started is stopped before returning.
    pub fn spawn(ctx: &SupervisionContext) -> Result<Self, HwError> {
        let run = SupervisionContext {
            shutdown: Shutdown::new(),
            ..ctx.clone()
        };
        let mut supervision = Self {
            shutdown: run.shutdown.clone(),
            handles: Vec::with_capacity(2),
        };
        let supervisors = [
            ConnectionSupervisor::for_stepper(&run),
            ConnectionSupervisor::for_servo(&run),
        ];
        for supervisor in supervisors.into_iter().flatten() {
            let kind = supervisor.kind();
            let handle = thread::Builder::new()
                .name(format!("armbus-{kind}"))
                .spawn(move || supervisor.run())
                .map_err(|e| HwError::Driver {
                    bus: kind,
                    details: format!("cannot spawn supervisor thread: {e}"),
                })?;
            supervision.handles.push(handle);
        }
        Ok(supervision)
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Number of supervisor threads (one per enabled bus).
    pub fn thread_count(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for Supervision {
    fn drop(&mut self) {
        self.shutdown.trigger();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("supervisor thread panicked");
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
