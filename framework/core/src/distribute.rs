use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::command::{LimitKind, LimitMode, LimitTarget, ScenarioCommand};
use crate::sample::BasePerformance;
use crate::topology::{Topology, VolumeRef};
use crate::verify::ExpectedValue;

/// The limit applied to a single volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// MB/s or kIOPS, 0 removes the limit.
    pub value: f64,
    pub min: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DistributionOutcome {
    /// Limits are in place.
    Throttled {
        /// Sum of the per-volume limits, when the command applied to all volumes.
        total_applied: Option<f64>,
        /// What the aggregate measurement should show. Per-volume commands do not check the
        /// aggregate.
        expected: ExpectedValue,
    },
    /// The command removes throttling.
    Disabled,
}

/// A concrete per-volume limit assignment for one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub kind: LimitKind,
    pub assignments: Vec<(VolumeRef, Assignment)>,
    pub outcome: DistributionOutcome,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    volume_expectations: BTreeMap<u32, ExpectedValue>,
}

impl Distribution {
    pub fn is_disabled(&self) -> bool {
        matches!(self.outcome, DistributionOutcome::Disabled)
    }

    /// Expectation for the aggregate measurement of all volumes.
    pub fn expected_total(&self) -> ExpectedValue {
        match self.outcome {
            DistributionOutcome::Throttled { expected, .. } => expected,
            DistributionOutcome::Disabled => ExpectedValue::Baseline,
        }
    }

    /// Volumes that a per-volume command put a limit on, and so must be measured.
    pub fn checked_volumes(&self) -> impl Iterator<Item = u32> + '_ {
        self.volume_expectations.keys().copied()
    }

    /// Expectation for the measurement of one volume.
    ///
    /// Volumes that were not named by a per-volume command, or whose limit was removed, are not
    /// checked.
    pub fn expected_for_volume(&self, volume: u32) -> ExpectedValue {
        self.volume_expectations
            .get(&volume)
            .copied()
            .unwrap_or(ExpectedValue::Unchecked)
    }
}

/// Turn a command into per-volume limits for the given topology.
///
/// An aggregate `rate` limit is split evenly across every volume, an aggregate `value` limit is
/// applied to each volume as is. A reset, or a limit that resolves to zero, removes throttling from
/// every volume. An aggregate limit above the measured baseline cannot be observed, so the
/// measurement is then expected to match the baseline instead.
pub fn distribute(
    command: &ScenarioCommand,
    topology: &Topology,
    base: &BasePerformance,
) -> Distribution {
    let metric = command.kind.metric();

    let target = match (&command.kind, &command.target) {
        (LimitKind::Reset, _) => None,
        (_, target) => Some(target),
    };

    match target {
        None => disabled(command, topology),
        Some(LimitTarget::AllVolumes { mode, value }) => {
            let volume_count = topology.volume_count();
            let (per_volume, total_applied) = match mode {
                LimitMode::Rate { .. } => (*value / volume_count.max(1) as f64, *value),
                LimitMode::Value => (*value, *value * volume_count as f64),
            };

            if per_volume == 0.0 {
                return disabled(command, topology);
            }

            let assignment = Assignment {
                value: per_volume,
                min: command.min,
            };
            let assignments = topology.volumes().map(|v| (v, assignment)).collect();

            let expected = command.expect.unwrap_or_else(|| {
                let total_measured = total_applied * metric.limit_scale();
                if total_measured > base.get(metric) {
                    ExpectedValue::Baseline
                } else {
                    ExpectedValue::Bound {
                        limit: total_measured,
                        floor: command.min,
                    }
                }
            });

            Distribution {
                kind: command.kind,
                assignments,
                outcome: DistributionOutcome::Throttled {
                    total_applied: Some(total_applied),
                    expected,
                },
                volume_expectations: BTreeMap::new(),
            }
        }
        Some(LimitTarget::Volumes(map)) => {
            let Some(array) = topology.primary_array() else {
                return disabled(command, topology);
            };

            let volumes = map.expand();
            let assignments = volumes
                .iter()
                .map(|(volume, value)| {
                    (
                        VolumeRef {
                            array: array.to_string(),
                            volume: *volume,
                        },
                        Assignment {
                            value: *value,
                            min: command.min,
                        },
                    )
                })
                .collect();
            // A zero entry lifts the limit from that volume, which leaves nothing to check.
            let volume_expectations = volumes
                .iter()
                .filter(|(_, value)| command.expect.is_some() || **value != 0.0)
                .map(|(volume, value)| {
                    let expected = command.expect.unwrap_or(ExpectedValue::Bound {
                        limit: value * metric.limit_scale(),
                        floor: command.min,
                    });
                    (*volume, expected)
                })
                .collect();

            Distribution {
                kind: command.kind,
                assignments,
                outcome: DistributionOutcome::Throttled {
                    total_applied: None,
                    expected: command.expect.unwrap_or(ExpectedValue::Unchecked),
                },
                volume_expectations,
            }
        }
    }
}

fn disabled(command: &ScenarioCommand, topology: &Topology) -> Distribution {
    let assignment = Assignment {
        value: 0.0,
        min: command.min,
    };
    Distribution {
        kind: command.kind,
        assignments: topology.volumes().map(|v| (v, assignment)).collect(),
        outcome: DistributionOutcome::Disabled,
        volume_expectations: BTreeMap::new(),
    }
}
