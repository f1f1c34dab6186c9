use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use qos_tunnel_core::prelude::{ArrayVolumes, BasePerformance, VerificationPolicy};
use serde::Deserialize;

use crate::suite::{TestCase, TimelineDefinition};
use crate::workload::WorkloadDescriptor;

/// Scenario settings loaded from a TOML file. Anything set here replaces what the scenario built in.
///
/// ```toml
/// tick_ms = 200
///
/// [verification]
/// tolerance = 0.1
/// trailing_window = 3
///
/// [[topology]]
/// name = "ARR0"
/// volumes = [1, 2, 3]
///
/// [[workloads]]
/// name = "seq_w"
/// read_percent = 0
/// block_size = "128k"
/// queue_depth = 128
/// duration_s = 18
///
/// [baselines.seq_w]
/// bw = 3000.0
/// iops = 24000.0
///
/// [[test_cases]]
/// title = "Throttle max bandwidth to 10% of the baseline"
/// commands = [["bw", "rate", "10"], ["bw", ["1-3"], ["50"], "min"]]
/// ```
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioFile {
    pub tick_ms: Option<u64>,
    pub join_timeout_s: Option<u64>,
    pub apply_delay_ms: Option<u64>,
    pub verification: Option<VerificationPolicy>,
    pub topology: Option<Vec<ArrayVolumes>>,
    pub workloads: Option<Vec<WorkloadDescriptor>>,
    #[serde(default)]
    pub baselines: BTreeMap<String, BasePerformance>,
    pub test_cases: Option<Vec<TestCase>>,
    pub timeline: Option<TimelineDefinition>,
}

impl ScenarioFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Invalid scenario file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
