use std::time::Duration;

use qos_tunnel_core::prelude::{
    distribute, BasePerformance, Distribution, ScenarioCommand, WorkloadResult,
};

use crate::collector::collect;
use crate::context::RunnerContext;
use crate::control::apply_distribution;
use crate::progress::timeline_progress;
use crate::workload::{WorkloadDescriptor, WorkloadError, WorkloadTask};

enum WorkloadState {
    NotSubmitted,
    Running(Box<dyn WorkloadTask>),
    Done(Result<WorkloadResult, WorkloadError>),
    Cancelled,
}

struct WorkloadEvent {
    start: Duration,
    descriptor: WorkloadDescriptor,
    run_index: Option<usize>,
    state: WorkloadState,
}

impl WorkloadEvent {
    fn end(&self) -> Duration {
        self.start + self.descriptor.duration()
    }

    fn is_finished(&self) -> bool {
        matches!(self.state, WorkloadState::Done(_) | WorkloadState::Cancelled)
    }
}

enum ConfigState {
    Pending,
    Done(Distribution),
    Aborting(String),
    Cancelled,
}

struct ConfigEvent {
    start: Duration,
    title: String,
    command: ScenarioCommand,
    state: ConfigState,
}

/// Why a timeline stopped before all of its workloads finished.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimelineAbort {
    #[error("configuration apply failure in `{title}`: {reason}")]
    ConfigurationApplyFailure { title: String, reason: String },
    #[error("run cancelled by shutdown signal")]
    Shutdown,
}

#[derive(Debug)]
pub enum WorkloadOutcome {
    Completed(WorkloadResult),
    Failed(WorkloadError),
    /// Never started, or stopped when the timeline was aborted.
    Cancelled,
}

#[derive(Debug)]
pub struct WorkloadRecord {
    pub name: String,
    pub start: Duration,
    pub run_index: Option<usize>,
    pub outcome: WorkloadOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigOutcome {
    Applied(Distribution),
    Failed(String),
    Cancelled,
    /// The workloads all finished before the event was due.
    NotReached,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigRecord {
    pub title: String,
    pub start: Duration,
    pub outcome: ConfigOutcome,
}

/// What happened to every event of a timeline, in start order.
#[derive(Debug)]
pub struct TimelineOutcome {
    pub workloads: Vec<WorkloadRecord>,
    pub configs: Vec<ConfigRecord>,
    pub aborted: Option<TimelineAbort>,
    /// Number of loop iterations that ran
    pub ticks: usize,
}

/// A schedule of workload runs and limit changes, relative to the moment the timeline starts.
///
/// Each tick samples the elapsed time once, then launches the workloads that are due, applies the
/// limits that are due and joins the workloads that have reached their planned end, in that order.
/// The timeline is over when every workload has finished. A limit that cannot be applied aborts the
/// timeline.
#[derive(Default)]
pub struct Timeline {
    workloads: Vec<WorkloadEvent>,
    configs: Vec<ConfigEvent>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workload(mut self, start: Duration, descriptor: WorkloadDescriptor) -> Self {
        let at = self.workloads.partition_point(|e| e.start <= start);
        self.workloads.insert(
            at,
            WorkloadEvent {
                start,
                descriptor,
                run_index: None,
                state: WorkloadState::NotSubmitted,
            },
        );
        self
    }

    pub fn with_config(
        mut self,
        start: Duration,
        title: impl Into<String>,
        command: ScenarioCommand,
    ) -> Self {
        let at = self.configs.partition_point(|e| e.start <= start);
        self.configs.insert(
            at,
            ConfigEvent {
                start,
                title: title.into(),
                command,
                state: ConfigState::Pending,
            },
        );
        self
    }

    /// The planned end of the last workload, or the last limit change if that is later.
    pub fn planned_end(&self) -> Duration {
        self.workloads
            .iter()
            .map(WorkloadEvent::end)
            .chain(self.configs.iter().map(|c| c.start))
            .max()
            .unwrap_or_default()
    }

    /// Drive the timeline to completion on the calling thread.
    ///
    /// `base` is used to derive what each limit change is expected to do to the measurements.
    pub fn run(mut self, ctx: &RunnerContext, base: &BasePerformance) -> TimelineOutcome {
        let clock = ctx.clock();
        let settings = ctx.settings();
        let mut shutdown_listener = ctx.shutdown_handle().new_listener();
        let progress = (!settings.no_progress).then(|| timeline_progress(self.planned_end()));

        let origin = clock.now();
        let mut ticks = 0;
        let aborted = loop {
            let elapsed = clock.now().saturating_sub(origin);
            ticks += 1;

            if shutdown_listener.should_shutdown() {
                break Some(TimelineAbort::Shutdown);
            }

            self.launch_due_workloads(ctx, elapsed);
            if let Some(abort) = self.apply_due_configs(ctx, base, elapsed) {
                break Some(abort);
            }
            self.join_due_workloads(ctx, elapsed);

            if self.workloads.iter().all(WorkloadEvent::is_finished) {
                break None;
            }

            if let Some(pb) = &progress {
                pb.set_position(elapsed.as_secs());
            }
            clock.sleep(settings.tick);
        };

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        if let Some(abort) = &aborted {
            log::error!("Timeline aborted: {abort}");
            let join_timeout = match abort {
                TimelineAbort::Shutdown => Duration::ZERO,
                TimelineAbort::ConfigurationApplyFailure { .. } => settings.join_timeout,
            };
            self.cancel_remaining(join_timeout);
        }

        self.into_outcome(aborted, ticks)
    }

    fn launch_due_workloads(&mut self, ctx: &RunnerContext, elapsed: Duration) {
        for event in self
            .workloads
            .iter_mut()
            .filter(|e| matches!(e.state, WorkloadState::NotSubmitted) && e.start <= elapsed)
        {
            let run_index = ctx.next_run_index();
            log::info!(
                "{:.1}s: starting workload {} (run {run_index})",
                elapsed.as_secs_f64(),
                event.descriptor.name
            );

            event.run_index = Some(run_index);
            event.state = match ctx.generator().launch(&event.descriptor, run_index) {
                Ok(task) => WorkloadState::Running(task),
                Err(e) => {
                    log::error!("Workload {} failed to start: {e}", event.descriptor.name);
                    WorkloadState::Done(Err(e))
                }
            };
        }
    }

    fn apply_due_configs(
        &mut self,
        ctx: &RunnerContext,
        base: &BasePerformance,
        elapsed: Duration,
    ) -> Option<TimelineAbort> {
        for event in self
            .configs
            .iter_mut()
            .filter(|e| matches!(e.state, ConfigState::Pending) && e.start <= elapsed)
        {
            log::info!("{:.1}s: {}", elapsed.as_secs_f64(), event.title);

            let distribution = distribute(&event.command, ctx.topology(), base);
            match apply_distribution(ctx.control(), &distribution) {
                Ok(()) => event.state = ConfigState::Done(distribution),
                Err(e) => {
                    let reason = format!("{e:#}");
                    event.state = ConfigState::Aborting(reason.clone());
                    return Some(TimelineAbort::ConfigurationApplyFailure {
                        title: event.title.clone(),
                        reason,
                    });
                }
            }
        }

        None
    }

    fn join_due_workloads(&mut self, ctx: &RunnerContext, elapsed: Duration) {
        let join_timeout = ctx.settings().join_timeout;
        for event in self.workloads.iter_mut() {
            let end = event.end();
            let due = match &mut event.state {
                WorkloadState::Running(_) if elapsed >= end => true,
                WorkloadState::Running(task) => {
                    let finished = task.poll();
                    if finished {
                        log::warn!(
                            "Workload {} finished before its planned end",
                            event.descriptor.name
                        );
                    }
                    finished
                }
                _ => false,
            };
            if !due {
                continue;
            }

            let WorkloadState::Running(task) =
                std::mem::replace(&mut event.state, WorkloadState::Cancelled)
            else {
                continue;
            };

            let result = task.join(join_timeout).and_then(collect);
            match &result {
                Ok(result) => log::info!(
                    "{:.1}s: workload {} finished with {} readings",
                    elapsed.as_secs_f64(),
                    event.descriptor.name,
                    result.total.len()
                ),
                Err(e) => log::error!("Workload {} failed: {e}", event.descriptor.name),
            }
            event.state = WorkloadState::Done(result);
        }
    }

    fn cancel_remaining(&mut self, join_timeout: Duration) {
        for event in self.configs.iter_mut() {
            if matches!(event.state, ConfigState::Pending) {
                log::info!("Cancelled: {}", event.title);
                event.state = ConfigState::Cancelled;
            }
        }

        for event in self.workloads.iter_mut() {
            match std::mem::replace(&mut event.state, WorkloadState::Cancelled) {
                WorkloadState::NotSubmitted => {
                    log::info!("Cancelled workload {}", event.descriptor.name);
                }
                WorkloadState::Running(task) => {
                    if let Err(e) = task.join(join_timeout) {
                        log::warn!("Workload {} did not stop cleanly: {e}", event.descriptor.name);
                    }
                }
                finished => event.state = finished,
            }
        }
    }

    fn into_outcome(self, aborted: Option<TimelineAbort>, ticks: usize) -> TimelineOutcome {
        let workloads = self
            .workloads
            .into_iter()
            .map(|event| WorkloadRecord {
                name: event.descriptor.name,
                start: event.start,
                run_index: event.run_index,
                outcome: match event.state {
                    WorkloadState::Done(Ok(result)) => WorkloadOutcome::Completed(result),
                    WorkloadState::Done(Err(e)) => WorkloadOutcome::Failed(e),
                    _ => WorkloadOutcome::Cancelled,
                },
            })
            .collect();

        let configs = self
            .configs
            .into_iter()
            .map(|event| ConfigRecord {
                title: event.title,
                start: event.start,
                outcome: match event.state {
                    ConfigState::Done(distribution) => ConfigOutcome::Applied(distribution),
                    ConfigState::Aborting(reason) => ConfigOutcome::Failed(reason),
                    ConfigState::Cancelled => ConfigOutcome::Cancelled,
                    ConfigState::Pending => ConfigOutcome::NotReached,
                },
            })
            .collect();

        TimelineOutcome {
            workloads,
            configs,
            aborted,
            ticks,
        }
    }
}
