use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use qos_tunnel_instruments::ReportConfig;
use qos_tunnel_summary_model::{append_run_summary, RunSummary};

use crate::context::RunnerContext;
use crate::control::CommandControl;
use crate::definition::{ScenarioDefinitionBuilder, ScenarioPlan};
use crate::executor::Executor;
use crate::shutdown::start_shutdown_listener;
use crate::suite::{run_suite, run_timeline};
use crate::workload::CommandWorkloadGenerator;

/// Environment variables recorded in the run summary when they are set.
const RECORDED_ENV: &[&str] = &["RUST_LOG", "QOS_TARGET"];

/// Run a scenario against the storage target described on the command line.
///
/// The report is printed when the run completes and the run summary is appended to the file named by
/// `RUN_SUMMARY_PATH`, `run_summary.jsonl` by default. Returns an error if the scenario could not be
/// run or if any test case failed.
pub fn run(definition: ScenarioDefinitionBuilder) -> anyhow::Result<RunSummary> {
    let definition = definition.build()?;

    log::info!("Running scenario: {}", definition.name);

    std::fs::create_dir_all(&definition.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            definition.output_dir.display()
        )
    })?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let shutdown_handle = start_shutdown_listener(&runtime)?;
    let executor = Arc::new(Executor::new(runtime, shutdown_handle.clone()));
    let control = Arc::new(CommandControl::new(
        executor.clone(),
        definition.control_command.clone(),
        definition.control_timeout,
    ));
    let generator = Arc::new(CommandWorkloadGenerator::new(
        executor,
        definition.workload_command.clone(),
        definition.output_dir.clone(),
    ));
    let reporter = Arc::new(ReportConfig::default().enable_in_memory().init());
    let runner_context = RunnerContext::new(
        reporter,
        shutdown_handle,
        control,
        generator,
        definition.topology.clone(),
    )
    .with_settings(definition.settings.clone());

    let summary = run_plan(
        &runner_context,
        &definition.name,
        &definition.plan,
        definition.run_id.clone(),
    );

    runner_context.reporter().finalize();

    let summary_path = std::env::var("RUN_SUMMARY_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("run_summary.jsonl"));
    // The run has already happened, losing the summary should not fail it.
    if let Err(e) = append_run_summary(&summary, summary_path.clone()) {
        log::error!(
            "Failed to append run summary to {}: {e:?}",
            summary_path.display()
        );
    }

    let failed = summary.failed_test_case_count();
    if failed > 0 {
        anyhow::bail!(
            "{failed} of {} test cases failed",
            summary.test_cases.len()
        );
    }

    Ok(summary)
}

/// Run a plan with an already configured context and summarise it.
pub fn run_plan(
    runner_context: &RunnerContext,
    name: &str,
    plan: &ScenarioPlan,
    run_id: Option<String>,
) -> RunSummary {
    let run_id = run_id.unwrap_or_else(|| nanoid::nanoid!());
    let mut summary = RunSummary::new(
        run_id,
        name.to_string(),
        chrono::Utc::now().timestamp(),
        runner_context.settings().tick.as_millis() as u64,
        env!("CARGO_PKG_VERSION").to_string(),
    );
    for key in RECORDED_ENV {
        if let Ok(value) = std::env::var(key) {
            summary.add_env(key.to_string(), value);
        }
    }

    match plan {
        ScenarioPlan::Suite {
            workloads,
            test_cases,
            baselines,
        } => {
            for report in run_suite(runner_context, workloads, test_cases, baselines) {
                summary.add_test_case(report);
            }
        }
        ScenarioPlan::Timeline {
            definition,
            baseline,
        } => {
            let report = run_timeline(runner_context, definition, *baseline);
            runner_context.reporter().add_test_case(&report);
            summary.add_test_case(report);
        }
    }

    if summary.passed() {
        log::info!("Run {} passed ({})", summary.run_id, summary.fingerprint());
    } else {
        log::warn!(
            "Run {} failed {} of {} test cases ({})",
            summary.run_id,
            summary.failed_test_case_count(),
            summary.test_cases.len(),
            summary.fingerprint()
        );
    }

    summary
}
