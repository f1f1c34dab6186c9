use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use qos_tunnel_core::prelude::{
    distribute, BasePerformance, Check, ExpectedValue, Metric, RawCommand, ScenarioCommand,
    VerificationPolicy, VerificationState,
};
use qos_tunnel_summary_model::TestCaseReport;
use serde::{Deserialize, Serialize};

use crate::context::RunnerContext;
use crate::control::apply_distribution;
use crate::timeline::{ConfigOutcome, Timeline, TimelineAbort, TimelineOutcome, WorkloadOutcome};
use crate::workload::WorkloadDescriptor;

/// A named sequence of commands, each applied while a fresh run of the workload is in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub title: String,
    pub commands: Vec<RawCommand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineWorkload {
    pub start_s: u64,
    #[serde(flatten)]
    pub workload: WorkloadDescriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineConfig {
    pub title: String,
    pub start_s: u64,
    pub command: RawCommand,
}

/// Workloads and limit changes at fixed offsets, run as a single timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineDefinition {
    #[serde(default = "default_timeline_title")]
    pub title: String,
    #[serde(default)]
    pub workloads: Vec<TimelineWorkload>,
    #[serde(default)]
    pub configs: Vec<TimelineConfig>,
}

fn default_timeline_title() -> String {
    "timeline".to_string()
}

/// Limits resolve against this when no baseline is needed.
const NO_BASELINE: BasePerformance = BasePerformance { bw: 0.0, iops: 0.0 };

/// Run a workload with no limits in place and reduce its readings to a baseline.
pub fn measure_baseline(
    ctx: &RunnerContext,
    workload: &WorkloadDescriptor,
) -> anyhow::Result<BasePerformance> {
    log::info!("Measuring base performance of {}", workload.name);

    if let Err(e) = reset_all_volumes(ctx) {
        log::error!("{e:#}");
    }

    let outcome = Timeline::new()
        .with_workload(Duration::ZERO, workload.clone())
        .run(ctx, &NO_BASELINE);
    if let Some(abort) = outcome.aborted {
        anyhow::bail!("Baseline run of {} aborted: {abort}", workload.name);
    }

    let record = outcome
        .workloads
        .into_iter()
        .next()
        .context("Baseline timeline did not record its workload")?;
    let result = match record.outcome {
        WorkloadOutcome::Completed(result) => result,
        WorkloadOutcome::Failed(e) => {
            return Err(anyhow::Error::new(e).context(format!("Baseline run of {} failed", workload.name)));
        }
        WorkloadOutcome::Cancelled => anyhow::bail!("Baseline run of {} was cancelled", workload.name),
    };

    ctx.reporter()
        .add_series(&format!("{} baseline", workload.name), &result.total);

    let base = BasePerformance::from_sample(&result.total, ctx.settings().policy.trailing_window)
        .with_context(|| format!("Baseline run of {} produced no readings", workload.name))?;
    log::info!(
        "Base performance of {}: {:.2} MB/s, {:.0} IOPS",
        workload.name,
        base.bw,
        base.iops
    );

    Ok(base)
}

/// Remove every limit from every volume.
pub fn reset_all_volumes(ctx: &RunnerContext) -> anyhow::Result<()> {
    let distribution = distribute(&ScenarioCommand::reset(), ctx.topology(), &NO_BASELINE);
    apply_distribution(ctx.control(), &distribution).context("Failed to reset volume limits")
}

/// Run every test case against every workload.
///
/// A workload without a configured baseline is measured first. Volumes are reset after each test
/// case. Every report is also forwarded to the context's reporter.
pub fn run_suite(
    ctx: &RunnerContext,
    workloads: &[WorkloadDescriptor],
    test_cases: &[TestCase],
    baselines: &BTreeMap<String, BasePerformance>,
) -> Vec<TestCaseReport> {
    let mut shutdown_listener = ctx.shutdown_handle().new_listener();
    let mut reports = Vec::new();

    'workloads: for workload in workloads {
        if shutdown_listener.should_shutdown() {
            break;
        }

        let base = match baselines.get(&workload.name) {
            Some(base) => {
                log::info!("Using configured base performance for {}", workload.name);
                *base
            }
            None => match measure_baseline(ctx, workload) {
                Ok(base) => base,
                Err(e) => {
                    log::error!("{e:#}");
                    for test_case in test_cases {
                        let mut report =
                            TestCaseReport::new(test_case.title.clone(), workload.name.clone(), None);
                        report.abort(format!("no base performance: {e:#}"));
                        ctx.reporter().add_test_case(&report);
                        reports.push(report);
                    }
                    continue;
                }
            },
        };

        for test_case in test_cases {
            if shutdown_listener.should_shutdown() {
                log::info!("Stopping before test case {}", test_case.title);
                break 'workloads;
            }

            let report = run_test_case(ctx, workload, &base, test_case);
            if let Err(e) = reset_all_volumes(ctx) {
                log::error!("{e:#}");
            }

            ctx.reporter().add_test_case(&report);
            reports.push(report);
        }
    }

    reports
}

/// Run the commands of a test case in order, one timeline each, threading the measurements from one
/// command to the next.
pub fn run_test_case(
    ctx: &RunnerContext,
    workload: &WorkloadDescriptor,
    base: &BasePerformance,
    test_case: &TestCase,
) -> TestCaseReport {
    log::info!("Test case: {} ({})", test_case.title, workload.name);

    let policy = ctx.settings().policy;
    let mut report = TestCaseReport::new(
        test_case.title.clone(),
        workload.name.clone(),
        Some(*base),
    );
    let mut state = VerificationState::new(base);
    let mut shutdown_listener = ctx.shutdown_handle().new_listener();

    for raw in &test_case.commands {
        if shutdown_listener.should_shutdown() {
            log::info!("Stopping test case {} before {raw}", test_case.title);
            report.abort(TimelineAbort::Shutdown.to_string());
            break;
        }

        let command = match ScenarioCommand::parse(raw, base) {
            Ok(command) => command,
            Err(e) => {
                log::warn!("Skipping invalid command {raw}: {e}");
                report.add_skipped(raw.to_string(), e.to_string());
                continue;
            }
        };
        log::info!("Run: {command}");

        let outcome = Timeline::new()
            .with_workload(Duration::ZERO, workload.clone())
            .with_config(ctx.settings().apply_delay, command.to_string(), command.clone())
            .run(ctx, base);

        if let Some(abort) = outcome.aborted {
            report.abort(abort.to_string());
            break;
        }

        state = verify_cycle(&policy, &command, outcome, base, state, &mut report);
    }

    report
}

fn verify_cycle(
    policy: &VerificationPolicy,
    command: &ScenarioCommand,
    outcome: TimelineOutcome,
    base: &BasePerformance,
    state: VerificationState,
    report: &mut TestCaseReport,
) -> VerificationState {
    let metric = command.kind.metric();
    let label = command.to_string();

    let distribution = match outcome.configs.into_iter().next().map(|c| c.outcome) {
        Some(ConfigOutcome::Applied(distribution)) => distribution,
        _ => {
            report.add_check(Check::no_measurement(
                label,
                metric,
                ExpectedValue::Unchecked,
                "limit was not applied before the workload finished",
            ));
            return state;
        }
    };

    let result = match outcome.workloads.into_iter().next().map(|w| w.outcome) {
        Some(WorkloadOutcome::Completed(result)) => result,
        Some(WorkloadOutcome::Failed(e)) => {
            report.add_check(Check::no_measurement(
                label,
                metric,
                distribution.expected_total(),
                e.to_string(),
            ));
            return state;
        }
        Some(WorkloadOutcome::Cancelled) | None => {
            report.add_check(Check::no_measurement(
                label,
                metric,
                distribution.expected_total(),
                "workload did not run",
            ));
            return state;
        }
    };

    if command.applies_to_all_volumes() {
        let (check, next) = policy.check(
            format!("{label}: total"),
            &result.total,
            metric,
            distribution.expected_total(),
            base,
            state,
        );
        report.add_check(check);
        return next;
    }

    for volume in distribution.checked_volumes() {
        if !result.volumes.contains_key(&volume) {
            report.add_check(Check::no_measurement(
                format!("{label}: vol{volume}"),
                metric,
                distribution.expected_for_volume(volume),
                "no readings for volume",
            ));
        }
    }
    for (volume, sample) in &result.volumes {
        let (check, _) = policy.check(
            format!("{label}: vol{volume}"),
            sample,
            metric,
            distribution.expected_for_volume(*volume),
            base,
            state,
        );
        report.add_check(check);
    }

    match result.total.last() {
        Some(last) => state.observe(last),
        None => state,
    }
}

/// Run a free-form timeline and report what every workload measured.
///
/// Nothing is verified, each workload contributes an unchecked reading for both metrics.
pub fn run_timeline(
    ctx: &RunnerContext,
    definition: &TimelineDefinition,
    baseline: Option<BasePerformance>,
) -> TestCaseReport {
    let workload_names = definition
        .workloads
        .iter()
        .map(|w| w.workload.name.as_str())
        .collect::<Vec<_>>()
        .join(",");

    let needs_baseline = definition.configs.iter().any(|c| c.command.is_rate());
    let baseline = match (baseline, definition.workloads.first()) {
        (Some(base), _) => Some(base),
        (None, Some(first)) if needs_baseline => match measure_baseline(ctx, &first.workload) {
            Ok(base) => Some(base),
            Err(e) => {
                let mut report = TestCaseReport::new(definition.title.clone(), workload_names, None);
                report.abort(format!("no base performance: {e:#}"));
                return report;
            }
        },
        _ => None,
    };
    let base = baseline.unwrap_or(NO_BASELINE);

    let mut report = TestCaseReport::new(definition.title.clone(), workload_names, baseline);
    let mut timeline = Timeline::new();
    for event in &definition.workloads {
        timeline = timeline.with_workload(Duration::from_secs(event.start_s), event.workload.clone());
    }
    for event in &definition.configs {
        match ScenarioCommand::parse(&event.command, &base) {
            Ok(command) => {
                timeline = timeline.with_config(
                    Duration::from_secs(event.start_s),
                    event.title.clone(),
                    command,
                );
            }
            Err(e) => {
                log::warn!("Skipping invalid command {}: {e}", event.command);
                report.add_skipped(event.command.to_string(), e.to_string());
            }
        }
    }

    let outcome = timeline.run(ctx, &base);
    if let Some(abort) = &outcome.aborted {
        report.abort(abort.to_string());
    }

    for config in &outcome.configs {
        if config.outcome == ConfigOutcome::NotReached {
            log::warn!("{} was not applied before the workloads finished", config.title);
        }
    }

    let policy = ctx.settings().policy;
    for record in outcome.workloads {
        let label = format!("{} @ {}s", record.name, record.start.as_secs());
        match record.outcome {
            WorkloadOutcome::Completed(result) => {
                ctx.reporter().add_series(&label, &result.total);
                for metric in [Metric::Bw, Metric::Iops] {
                    let (check, _) = policy.check(
                        label.clone(),
                        &result.total,
                        metric,
                        ExpectedValue::Unchecked,
                        &base,
                        VerificationState::new(&base),
                    );
                    report.add_check(check);
                }
            }
            WorkloadOutcome::Failed(e) => report.add_check(Check::no_measurement(
                label,
                Metric::Bw,
                ExpectedValue::Unchecked,
                e.to_string(),
            )),
            WorkloadOutcome::Cancelled => log::info!("{label} was cancelled"),
        }
    }

    report
}
