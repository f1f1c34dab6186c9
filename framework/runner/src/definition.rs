use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use qos_tunnel_core::prelude::{BasePerformance, RawCommand, Topology, VerificationPolicy};

use crate::cli::QosTunnelCli;
use crate::config::ScenarioFile;
use crate::context::{RunSettings, DEFAULT_APPLY_DELAY, DEFAULT_JOIN_TIMEOUT, DEFAULT_TICK};
use crate::init::init;
use crate::suite::{TestCase, TimelineDefinition};
use crate::workload::WorkloadDescriptor;

/// The builder for a scenario definition.
///
/// This must be used at the start of a test to define the scenario that you want to run.
pub struct ScenarioDefinitionBuilder {
    /// The name of the scenario, which should be unique within the test suite.
    ///
    /// Recommended value is `env!("CARGO_PKG_NAME")`.
    name: String,
    /// This value is initialised for you and you cannot change it.
    #[doc(hidden)]
    cli: QosTunnelCli,
    /// Workloads that every test case is run against, in order.
    workloads: Vec<WorkloadDescriptor>,
    test_cases: Vec<TestCase>,
    /// When set, the scenario runs this timeline instead of the test cases.
    timeline: Option<TimelineDefinition>,
    /// Known unthrottled performance, by workload name. Workloads without one are measured.
    baselines: BTreeMap<String, BasePerformance>,
    policy: VerificationPolicy,
    default_tick: Duration,
    default_join_timeout: Duration,
    default_apply_delay: Duration,
}

/// What a scenario runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioPlan {
    /// Every test case against every workload.
    Suite {
        workloads: Vec<WorkloadDescriptor>,
        test_cases: Vec<TestCase>,
        baselines: BTreeMap<String, BasePerformance>,
    },
    /// A single free-form timeline.
    Timeline {
        definition: TimelineDefinition,
        baseline: Option<BasePerformance>,
    },
}

#[derive(Debug, Clone)]
pub struct ScenarioDefinition {
    pub name: String,
    pub topology: Topology,
    pub plan: ScenarioPlan,
    pub settings: RunSettings,
    pub control_command: String,
    pub control_timeout: Duration,
    pub workload_command: String,
    pub output_dir: PathBuf,
    pub run_id: Option<String>,
}

impl ScenarioDefinitionBuilder {
    /// Initialise a new scenario definition from the scenario name and command line arguments.
    /// See the [ScenarioDefinitionBuilder::name] for more information about the name.
    pub fn new_with_init(name: &str) -> Self {
        Self::new(name, init())
    }

    pub fn new(name: &str, cli: QosTunnelCli) -> Self {
        Self {
            name: name.to_string(),
            cli,
            workloads: Vec::new(),
            test_cases: Vec::new(),
            timeline: None,
            baselines: BTreeMap::new(),
            policy: VerificationPolicy::default(),
            default_tick: DEFAULT_TICK,
            default_join_timeout: DEFAULT_JOIN_TIMEOUT,
            default_apply_delay: DEFAULT_APPLY_DELAY,
        }
    }

    pub fn with_workload(mut self, workload: WorkloadDescriptor) -> Self {
        self.workloads.push(workload);
        self
    }

    pub fn with_test_case(mut self, title: &str, commands: Vec<RawCommand>) -> Self {
        self.test_cases.push(TestCase {
            title: title.to_string(),
            commands,
        });
        self
    }

    pub fn with_timeline(mut self, timeline: TimelineDefinition) -> Self {
        self.timeline = Some(timeline);
        self
    }

    /// Use a known unthrottled performance for a workload instead of measuring it.
    pub fn with_baseline(mut self, workload: &str, base: BasePerformance) -> Self {
        self.baselines.insert(workload.to_string(), base);
        self
    }

    pub fn with_verification_policy(mut self, policy: VerificationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the tick interval when none is given on the command line or in a scenario file.
    pub fn with_default_tick(mut self, tick: Duration) -> Self {
        self.default_tick = tick;
        self
    }

    pub fn with_default_join_timeout(mut self, join_timeout: Duration) -> Self {
        self.default_join_timeout = join_timeout;
        self
    }

    pub fn with_default_apply_delay(mut self, apply_delay: Duration) -> Self {
        self.default_apply_delay = apply_delay;
        self
    }

    pub(crate) fn build(self) -> anyhow::Result<ScenarioDefinition> {
        let file = match &self.cli.scenario_file {
            Some(path) => ScenarioFile::load(path)?,
            None => ScenarioFile::default(),
        };

        let topology = if !self.cli.volumes.is_empty() {
            Topology::new(self.cli.volumes.clone())
        } else {
            Topology::new(file.topology.unwrap_or_default())
        };
        if topology.volume_count() == 0 {
            anyhow::bail!("No volumes to test, use --volumes or add a [[topology]] table to the scenario file");
        }

        let policy = file.verification.unwrap_or(self.policy);
        if !(0.0..1.0).contains(&policy.tolerance) {
            anyhow::bail!("Tolerance must be at least 0 and less than 1, got {}", policy.tolerance);
        }
        if policy.trailing_window == 0 {
            anyhow::bail!("The trailing window must include at least one reading");
        }

        let mut baselines = self.baselines;
        baselines.extend(file.baselines);

        let workloads = file.workloads.unwrap_or(self.workloads);
        let test_cases = file.test_cases.unwrap_or(self.test_cases);
        let plan = match file.timeline.or(self.timeline) {
            Some(definition) => {
                if definition.workloads.is_empty() {
                    anyhow::bail!("The timeline has no workloads");
                }
                let baseline = baselines.get(&definition.workloads[0].workload.name).copied();
                ScenarioPlan::Timeline {
                    definition,
                    baseline,
                }
            }
            None => {
                if workloads.is_empty() {
                    anyhow::bail!("The scenario has no workloads");
                }
                if test_cases.is_empty() {
                    anyhow::bail!("The scenario has no test cases");
                }
                ScenarioPlan::Suite {
                    workloads,
                    test_cases,
                    baselines,
                }
            }
        };

        let tick = self
            .cli
            .tick_ms
            .or(file.tick_ms)
            .map(Duration::from_millis)
            .unwrap_or(self.default_tick);
        if tick.is_zero() {
            anyhow::bail!("The tick interval must be greater than zero");
        }

        let settings = RunSettings {
            tick,
            join_timeout: self
                .cli
                .join_timeout_s
                .or(file.join_timeout_s)
                .map(Duration::from_secs)
                .unwrap_or(self.default_join_timeout),
            apply_delay: self
                .cli
                .apply_delay_ms
                .or(file.apply_delay_ms)
                .map(Duration::from_millis)
                .unwrap_or(self.default_apply_delay),
            policy,
            no_progress: self.cli.no_progress,
        };

        Ok(ScenarioDefinition {
            name: self.name,
            topology,
            plan,
            settings,
            control_command: self.cli.control_command,
            control_timeout: Duration::from_secs(self.cli.control_timeout_s),
            workload_command: self.cli.workload_command,
            output_dir: self.cli.output_dir,
            run_id: self.cli.run_id,
        })
    }
}
