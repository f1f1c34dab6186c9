use itertools::Itertools;
use qos_tunnel_core::prelude::{BasePerformance, Check};
use serde::{Deserialize, Serialize};
use sha3::Digest;
use std::collections::HashMap;
use std::io::{BufRead, Read, Write};
use std::path::PathBuf;

/// A scenario command that was rejected before it was run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkippedCommand {
    /// The command as it was written
    pub command: String,
    /// Why it was rejected
    pub reason: String,
}

/// Report for one test case run against one workload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCaseReport {
    /// The title of the test case
    pub title: String,
    /// The workload that was running while the limits were applied
    pub workload: String,
    /// The unthrottled performance of the workload, if it is known
    pub baseline: Option<BasePerformance>,
    /// Every condition that was checked, in the order it was checked
    pub checks: Vec<Check>,
    /// Commands that failed validation and were not run
    pub skipped: Vec<SkippedCommand>,
    /// Set when applying a limit failed and the remainder of the test case was abandoned
    pub aborted: Option<String>,
}

impl TestCaseReport {
    pub fn new(title: String, workload: String, baseline: Option<BasePerformance>) -> Self {
        Self {
            title,
            workload,
            baseline,
            checks: Vec::new(),
            skipped: Vec::new(),
            aborted: None,
        }
    }

    pub fn add_check(&mut self, check: Check) {
        self.checks.push(check);
    }

    pub fn add_skipped(&mut self, command: String, reason: String) {
        self.skipped.push(SkippedCommand { command, reason });
    }

    pub fn abort(&mut self, reason: String) {
        self.aborted = Some(reason);
    }

    /// A test case passes when it ran to completion and none of its checks failed.
    ///
    /// Skipped commands do not fail a test case.
    pub fn passed(&self) -> bool {
        self.aborted.is_none() && !self.checks.iter().any(Check::failed)
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| c.failed())
    }
}

/// Summary of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// Identifies this run, generated by the runner
    pub run_id: String,
    /// The name of the scenario that was run
    pub scenario_name: String,
    /// The time the run started
    ///
    /// This is a Unix timestamp in seconds.
    pub started_at: i64,
    /// The tick interval of the timeline loop, in milliseconds
    pub tick_ms: u64,
    /// The reports for every test case, in the order they were run
    pub test_cases: Vec<TestCaseReport>,
    /// Environment variables that affect the run, such as `RUST_LOG` and `QOS_TARGET`
    pub env: HashMap<String, String>,
    /// The version of QoS Tunnel that was used for this run
    pub qos_tunnel_version: String,
}

impl RunSummary {
    pub fn new(
        run_id: String,
        scenario_name: String,
        started_at: i64,
        tick_ms: u64,
        qos_tunnel_version: String,
    ) -> Self {
        Self {
            run_id,
            scenario_name,
            started_at,
            tick_ms,
            test_cases: Vec::new(),
            env: HashMap::with_capacity(0),
            qos_tunnel_version,
        }
    }

    pub fn add_test_case(&mut self, report: TestCaseReport) {
        self.test_cases.push(report);
    }

    pub fn add_env(&mut self, key: String, value: String) {
        self.env.insert(key, value);
    }

    /// True when every test case passed
    pub fn passed(&self) -> bool {
        self.test_cases.iter().all(TestCaseReport::passed)
    }

    pub fn failed_test_case_count(&self) -> usize {
        self.test_cases.iter().filter(|t| !t.passed()).count()
    }

    /// Identifies runs of the same configuration, so their results can be compared.
    ///
    /// Covers the scenario name, tick interval, test case titles and workloads, recorded
    /// environment variables and version, hashed with [sha3::Sha3_256]. The run id and start time
    /// are left out.
    pub fn fingerprint(&self) -> String {
        let mut hasher = sha3::Sha3_256::new();
        Digest::update(&mut hasher, self.scenario_name.as_bytes());
        Digest::update(&mut hasher, self.tick_ms.to_le_bytes());
        self.test_cases.iter().for_each(|t| {
            Digest::update(&mut hasher, t.title.as_bytes());
            Digest::update(&mut hasher, t.workload.as_bytes());
        });
        self.env
            .iter()
            .sorted_by_key(|(k, _)| k.to_owned())
            .for_each(|(k, v)| {
                Digest::update(&mut hasher, k.as_bytes());
                Digest::update(&mut hasher, v.as_bytes());
            });
        Digest::update(&mut hasher, self.qos_tunnel_version.as_bytes());

        format!("{:x}", hasher.finalize())
    }
}

/// Append the summary to a JSON lines file, creating it if needed.
pub fn append_run_summary(run_summary: &RunSummary, path: PathBuf) -> anyhow::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    store_run_summary(run_summary, &mut file)?;
    file.write_all(b"\n")?;
    Ok(())
}

pub fn store_run_summary<W: Write>(run_summary: &RunSummary, writer: &mut W) -> anyhow::Result<()> {
    serde_json::to_writer(writer, run_summary)?;
    Ok(())
}

pub fn load_run_summary<R: Read>(reader: R) -> anyhow::Result<RunSummary> {
    let reader = std::io::BufReader::new(reader);
    let run_summary: RunSummary = serde_json::from_reader(reader)?;
    Ok(run_summary)
}

/// Read every summary written by [append_run_summary]. Blank lines are ignored.
pub fn load_summary_runs(path: PathBuf) -> anyhow::Result<Vec<RunSummary>> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut runs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let run: RunSummary = serde_json::from_str(&line)?;
        runs.push(run);
    }
    Ok(runs)
}
