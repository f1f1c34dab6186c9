use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use qos_tunnel_core::prelude::{ShutdownHandle, Topology, VerificationPolicy};
use qos_tunnel_instruments::Reporter;

use crate::clock::{Clock, SystemClock};
use crate::control::ControlInterface;
use crate::workload::WorkloadGenerator;

pub const DEFAULT_TICK: Duration = Duration::from_millis(200);
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_APPLY_DELAY: Duration = Duration::from_secs(1);

/// Timing and verification settings shared by every timeline in a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    /// Interval of the timeline loop
    pub tick: Duration,
    /// How long a workload may overrun its planned end before it is treated as failed
    pub join_timeout: Duration,
    /// How long after a test case's workload starts to apply the limit under test
    pub apply_delay: Duration,
    pub policy: VerificationPolicy,
    pub no_progress: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            apply_delay: DEFAULT_APPLY_DELAY,
            policy: VerificationPolicy::default(),
            no_progress: false,
        }
    }
}

/// Everything a run needs to drive the storage target.
pub struct RunnerContext {
    reporter: Arc<Reporter>,
    shutdown_handle: ShutdownHandle,
    clock: Arc<dyn Clock>,
    control: Arc<dyn ControlInterface>,
    generator: Arc<dyn WorkloadGenerator>,
    topology: Topology,
    settings: RunSettings,
    run_index: AtomicUsize,
}

impl RunnerContext {
    pub fn new(
        reporter: Arc<Reporter>,
        shutdown_handle: ShutdownHandle,
        control: Arc<dyn ControlInterface>,
        generator: Arc<dyn WorkloadGenerator>,
        topology: Topology,
    ) -> Self {
        Self {
            reporter,
            shutdown_handle,
            clock: Arc::new(SystemClock::default()),
            control,
            generator,
            topology,
            settings: RunSettings::default(),
            run_index: AtomicUsize::new(0),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn reporter(&self) -> &Arc<Reporter> {
        &self.reporter
    }

    pub fn shutdown_handle(&self) -> &ShutdownHandle {
        &self.shutdown_handle
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn control(&self) -> &dyn ControlInterface {
        self.control.as_ref()
    }

    pub fn generator(&self) -> &dyn WorkloadGenerator {
        self.generator.as_ref()
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// The index for the next workload launch, unique within the run.
    pub(crate) fn next_run_index(&self) -> usize {
        self.run_index.fetch_add(1, Ordering::Relaxed)
    }
}
