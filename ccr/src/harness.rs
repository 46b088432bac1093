//! The collaborators and configuration one chaos run works against.

use crate::fault::FaultInjector;
use crate::health::HealthProber;
use crate::operations::Operations;
use crate::plan::PlanObserver;
use crate::recovery::Recovery;
use crate::sequencer::OperationSequencer;
use ccr_common::{ChaosConfig, ControlPlane, RemoteShell, SpinOptions};

/// Control plane, remote shell and configuration of a chaos run.
///
/// Components are handed out as cheap borrowing views so each scenario
/// works against the same collaborators without shared mutable state.
pub struct Harness<C, S> {
    pub control_plane: C,
    pub shell: S,
    pub config: ChaosConfig,
}

impl<C: ControlPlane, S: RemoteShell> Harness<C, S> {
    pub fn new(control_plane: C, shell: S, config: ChaosConfig) -> Self {
        Self {
            control_plane,
            shell,
            config,
        }
    }

    /// Asserting poll options from the timing config.
    pub fn spin_options(&self) -> SpinOptions {
        self.config.timing.spin_options()
    }

    pub fn plans(&self) -> PlanObserver<'_, C> {
        PlanObserver::new(&self.control_plane, self.spin_options())
    }

    pub fn health(&self) -> HealthProber<'_, C> {
        HealthProber::new(&self.control_plane, &self.config.service, self.spin_options())
    }

    pub fn faults(&self) -> FaultInjector<'_, C, S> {
        FaultInjector::new(
            &self.control_plane,
            &self.shell,
            self.config.timing.partition_dwell,
        )
    }

    pub fn recovery(&self) -> Recovery<'_, C, S> {
        Recovery::new(
            &self.control_plane,
            &self.shell,
            self.health(),
            self.plans(),
            self.spin_options(),
        )
    }

    pub fn operations(&self) -> Operations<'_, C> {
        Operations::new(&self.control_plane)
    }

    pub fn sequencer(&self) -> OperationSequencer<'_, C> {
        OperationSequencer::new(self.plans())
    }
}
