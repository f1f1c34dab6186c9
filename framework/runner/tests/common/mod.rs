#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use qos_tunnel_runner::prelude::*;

pub const BASE: BasePerformance = BasePerformance {
    bw: 1000.0,
    iops: 100_000.0,
};

/// What a fake workload does when it is launched.
#[derive(Debug, Clone)]
pub enum Script {
    Readings(WorkloadResult),
    LaunchError,
    ExitError,
    Hang,
}

pub fn flat(bw: f64, iops: f64) -> MeasuredSample {
    MeasuredSample::new(vec![Sample::new(bw, iops); 5])
}

pub fn readings(bw: f64, iops: f64) -> Script {
    Script::Readings(WorkloadResult::from_total(flat(bw, iops)))
}

pub fn volume_readings(total_bw: f64, volumes: &[(u32, f64)]) -> Script {
    Script::Readings(WorkloadResult {
        total: flat(total_bw, 0.0),
        volumes: volumes
            .iter()
            .map(|(id, bw)| (*id, flat(*bw, 0.0)))
            .collect::<BTreeMap<_, _>>(),
    })
}

pub fn workload(name: &str, duration_s: u64) -> WorkloadDescriptor {
    WorkloadDescriptor {
        name: name.to_string(),
        read_percent: 0,
        block_size: "128k".to_string(),
        queue_depth: 128,
        duration_s,
    }
}

/// Records every limit it is given, with the time it was given.
pub struct FakeControl {
    clock: Arc<ManualClock>,
    pub applied: Mutex<Vec<(Duration, LimitRequest)>>,
    fail_kind: Option<LimitKind>,
    shutdown_on_apply: Option<ShutdownHandle>,
}

impl FakeControl {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            applied: Mutex::new(Vec::new()),
            fail_kind: None,
            shutdown_on_apply: None,
        }
    }

    pub fn failing_on(mut self, kind: LimitKind) -> Self {
        self.fail_kind = Some(kind);
        self
    }

    pub fn shutdown_on_apply(mut self, handle: ShutdownHandle) -> Self {
        self.shutdown_on_apply = Some(handle);
        self
    }

    pub fn requests(&self) -> Vec<LimitRequest> {
        self.applied.lock().iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn requests_of(&self, kind: LimitKind) -> Vec<LimitRequest> {
        self.requests().into_iter().filter(|r| r.kind == kind).collect()
    }
}

impl ControlInterface for FakeControl {
    fn apply(&self, request: &LimitRequest) -> anyhow::Result<()> {
        if Some(request.kind) == self.fail_kind {
            anyhow::bail!("array rejected {request}");
        }
        self.applied.lock().push((self.clock.now(), request.clone()));
        if let Some(handle) = &self.shutdown_on_apply {
            handle.shutdown();
        }
        Ok(())
    }
}

/// Plays back scripted workload outcomes in launch order. Once the script runs out every workload
/// reads as the baseline.
pub struct FakeGenerator {
    clock: Arc<ManualClock>,
    script: Mutex<VecDeque<Script>>,
    pub launches: Mutex<Vec<(Duration, String, usize)>>,
    pub joins: Arc<Mutex<Vec<(Duration, String)>>>,
}

impl FakeGenerator {
    pub fn new(clock: Arc<ManualClock>, script: Vec<Script>) -> Self {
        Self {
            clock,
            script: Mutex::new(script.into()),
            launches: Mutex::new(Vec::new()),
            joins: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl WorkloadGenerator for FakeGenerator {
    fn launch(
        &self,
        descriptor: &WorkloadDescriptor,
        run_index: usize,
    ) -> Result<Box<dyn WorkloadTask>, WorkloadError> {
        self.launches
            .lock()
            .push((self.clock.now(), descriptor.name.clone(), run_index));
        let script = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| readings(BASE.bw, BASE.iops));

        if let Script::LaunchError = script {
            return Err(WorkloadError::Launch("no such generator".to_string()));
        }

        Ok(Box::new(FakeTask {
            name: descriptor.name.clone(),
            script,
            clock: self.clock.clone(),
            joins: self.joins.clone(),
        }))
    }
}

struct FakeTask {
    name: String,
    script: Script,
    clock: Arc<ManualClock>,
    joins: Arc<Mutex<Vec<(Duration, String)>>>,
}

impl WorkloadTask for FakeTask {
    fn poll(&mut self) -> bool {
        false
    }

    fn join(self: Box<Self>, timeout: Duration) -> Result<ResultArtifact, WorkloadError> {
        self.joins.lock().push((self.clock.now(), self.name.clone()));
        match self.script {
            Script::Readings(result) => Ok(ResultArtifact::Inline(
                serde_json::to_string(&result).unwrap(),
            )),
            Script::ExitError => Err(WorkloadError::Exited("exit status: 1".to_string())),
            Script::Hang => Err(WorkloadError::JoinTimeout(timeout)),
            Script::LaunchError => unreachable!(),
        }
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub control: Arc<FakeControl>,
    pub generator: Arc<FakeGenerator>,
    pub shutdown_handle: ShutdownHandle,
    pub context: RunnerContext,
}

impl Harness {
    pub fn new(script: Vec<Script>) -> Self {
        Self::with_control(script, |clock, _| FakeControl::new(clock))
    }

    pub fn with_control(
        script: Vec<Script>,
        control: impl FnOnce(Arc<ManualClock>, ShutdownHandle) -> FakeControl,
    ) -> Self {
        let clock = Arc::new(ManualClock::new());
        let shutdown_handle = ShutdownHandle::default();
        let control = Arc::new(control(clock.clone(), shutdown_handle.clone()));
        let generator = Arc::new(FakeGenerator::new(clock.clone(), script));
        let context = RunnerContext::new(
            Arc::new(Reporter::noop()),
            shutdown_handle.clone(),
            control.clone(),
            generator.clone(),
            Topology::default().with_array("ARR0", 1..=5),
        )
        .with_clock(clock.clone())
        .with_settings(RunSettings {
            no_progress: true,
            ..Default::default()
        });

        Self {
            clock,
            control,
            generator,
            shutdown_handle,
            context,
        }
    }
}
