use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::sample::BasePerformance;
use crate::verify::ExpectedValue;

/// The kind of limit that a scenario command applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Bw,
    Iops,
    Reset,
}

impl LimitKind {
    /// The metric that a limit of this kind is verified against.
    ///
    /// A reset has no metric of its own, the bandwidth is checked to confirm the volumes are back to
    /// their unthrottled performance.
    pub fn metric(&self) -> Metric {
        match self {
            LimitKind::Bw | LimitKind::Reset => Metric::Bw,
            LimitKind::Iops => Metric::Iops,
        }
    }
}

impl Display for LimitKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitKind::Bw => write!(f, "bw"),
            LimitKind::Iops => write!(f, "iops"),
            LimitKind::Reset => write!(f, "reset"),
        }
    }
}

/// A measured quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Bandwidth in MB/s
    Bw,
    /// Operations per second
    Iops,
}

impl Metric {
    pub fn unit(&self) -> &'static str {
        match self {
            Metric::Bw => "MB/s",
            Metric::Iops => "IOPS",
        }
    }

    /// Factor to convert a limit value (MB/s or kIOPS) into the unit that measurements are reported in.
    pub fn limit_scale(&self) -> f64 {
        match self {
            Metric::Bw => 1.0,
            Metric::Iops => 1000.0,
        }
    }
}

impl Display for Metric {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::Bw => write!(f, "bw"),
            Metric::Iops => write!(f, "iops"),
        }
    }
}

/// How an aggregate limit value was specified.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LimitMode {
    /// A percentage of the measured baseline.
    Rate { percent: f64 },
    /// An absolute value.
    Value,
}

/// Widest volume range a single key may name.
pub const MAX_VOLUME_RANGE: u32 = 4096;

/// A single volume id or an inclusive range of volume ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeKey {
    Single(u32),
    Range(u32, u32),
}

impl VolumeKey {
    pub fn ids(&self) -> impl Iterator<Item = u32> {
        match *self {
            VolumeKey::Single(id) => id..=id,
            VolumeKey::Range(start, end) => start..=end,
        }
    }
}

impl FromStr for VolumeKey {
    type Err = MalformedScenario;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MalformedScenario::InvalidVolumeKey(s.to_string());

        match s.split_once('-') {
            Some((start, end)) => {
                let start = start.trim().parse::<u32>().map_err(|_| invalid())?;
                let end = end.trim().parse::<u32>().map_err(|_| invalid())?;
                if start > end {
                    return Err(invalid());
                }
                if end - start >= MAX_VOLUME_RANGE {
                    return Err(MalformedScenario::VolumeRangeTooLarge(s.to_string()));
                }
                Ok(VolumeKey::Range(start, end))
            }
            None => s
                .trim()
                .parse::<u32>()
                .map(VolumeKey::Single)
                .map_err(|_| invalid()),
        }
    }
}

impl Display for VolumeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeKey::Single(id) => write!(f, "{id}"),
            VolumeKey::Range(start, end) => write!(f, "{start}-{end}"),
        }
    }
}

/// Literal limit values for individual volumes, in the order they were written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeMap {
    entries: Vec<(VolumeKey, f64)>,
}

impl VolumeMap {
    pub fn new(entries: Vec<(VolumeKey, f64)>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[(VolumeKey, f64)] {
        &self.entries
    }

    /// Expand ranges into individual volumes.
    ///
    /// When a volume is named more than once, the last value written for it wins so that every
    /// volume ends up with exactly one value.
    pub fn expand(&self) -> BTreeMap<u32, f64> {
        let mut volumes = BTreeMap::new();
        for (key, value) in &self.entries {
            for id in key.ids() {
                volumes.insert(id, *value);
            }
        }
        volumes
    }
}

/// Which volumes a command applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitTarget {
    /// One aggregate limit shared by every volume in the topology.
    ///
    /// The `value` is absolute, in MB/s for bandwidth and kIOPS for IOPS.
    AllVolumes { mode: LimitMode, value: f64 },
    /// Literal values for named volumes.
    Volumes(VolumeMap),
}

/// A validated scenario command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioCommand {
    pub kind: LimitKind,
    pub target: LimitTarget,
    /// The limit is a floor rather than a ceiling.
    pub min: bool,
    /// Overrides the expectation that would otherwise be derived from the limit.
    pub expect: Option<ExpectedValue>,
}

/// Parse-time validation failures. The offending command is skipped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MalformedScenario {
    #[error("expected at least 3 fields but got {0}")]
    TooFewFields(usize),
    #[error("limit type `{0}` is wrong (reset, bw, iops)")]
    UnknownLimitKind(String),
    #[error("limit mode `{0}` is wrong (rate, value)")]
    UnknownMode(String),
    #[error("number of volumes ({volumes}) and limit values ({values}) is not the same")]
    ValueCountMismatch { volumes: usize, values: usize },
    #[error("`{0}` is not a valid limit value")]
    InvalidValue(String),
    #[error("`{0}` is not a valid volume id or range")]
    InvalidVolumeKey(String),
    #[error("unknown flag `{0}` (min, unchanged, nocheck)")]
    UnknownFlag(String),
    #[error("volume range `{0}` names more than {max} volumes", max = MAX_VOLUME_RANGE)]
    VolumeRangeTooLarge(String),
    #[error("`unchanged` compares the aggregate and cannot be used with a volume list")]
    UnchangedPerVolume,
}

/// One field of a raw scenario command as written in a scenario definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawField {
    Text(String),
    Number(f64),
    List(Vec<String>),
}

impl RawField {
    fn as_text(&self) -> Option<&str> {
        match self {
            RawField::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    fn as_number(&self) -> Result<f64, MalformedScenario> {
        match self {
            RawField::Text(s) => parse_value(s),
            RawField::Number(n) if *n >= 0.0 && n.is_finite() => Ok(*n),
            other => Err(MalformedScenario::InvalidValue(other.to_string())),
        }
    }
}

impl Display for RawField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RawField::Text(s) => write!(f, "{s:?}"),
            RawField::Number(n) => write!(f, "{n}"),
            RawField::List(items) => write!(f, "{items:?}"),
        }
    }
}

impl From<&str> for RawField {
    fn from(value: &str) -> Self {
        RawField::Text(value.to_string())
    }
}

impl From<Vec<&str>> for RawField {
    fn from(value: Vec<&str>) -> Self {
        RawField::List(value.into_iter().map(str::to_string).collect())
    }
}

/// An unvalidated scenario command, for example `["bw", "rate", "10"]` or
/// `["iops", ["1-2", "4-5"], ["10", "20"], "min"]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawCommand(pub Vec<RawField>);

impl RawCommand {
    pub fn fields(&self) -> &[RawField] {
        &self.0
    }

    /// True when the command sets a limit relative to the baseline, which must then be known before
    /// the command can be resolved.
    pub fn is_rate(&self) -> bool {
        matches!(self.0.get(1), Some(RawField::Text(mode)) if mode == "rate")
    }
}

impl Display for RawCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, field) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{field}")?;
        }
        write!(f, "]")
    }
}

/// Build a [RawCommand] from string-like fields.
#[macro_export]
macro_rules! raw_command {
    ($($field:expr),* $(,)?) => {
        $crate::command::RawCommand(vec![$($crate::command::RawField::from($field)),*])
    };
}

fn parse_value(s: &str) -> Result<f64, MalformedScenario> {
    match s.trim().parse::<f64>() {
        Ok(v) if v >= 0.0 && v.is_finite() => Ok(v),
        _ => Err(MalformedScenario::InvalidValue(s.to_string())),
    }
}

fn parse_flags(fields: &[RawField]) -> Result<(bool, Option<ExpectedValue>), MalformedScenario> {
    let mut min = false;
    let mut expect = None;
    for field in fields {
        match field.as_text() {
            Some("min") => min = true,
            Some("unchanged") => expect = Some(ExpectedValue::Previous),
            Some("nocheck") => expect = Some(ExpectedValue::Unchecked),
            Some("") => {}
            _ => return Err(MalformedScenario::UnknownFlag(field.to_string())),
        }
    }
    Ok((min, expect))
}

impl ScenarioCommand {
    /// Validate a raw command and normalise it.
    ///
    /// Rate limits are resolved to absolute values against the baseline, with IOPS expressed in
    /// thousands so that they are in the same reporting unit as the control interface expects.
    pub fn parse(raw: &RawCommand, base: &BasePerformance) -> Result<Self, MalformedScenario> {
        let fields = raw.fields();
        if fields.len() < 3 {
            return Err(MalformedScenario::TooFewFields(fields.len()));
        }

        let kind = match fields[0].as_text() {
            Some("reset") => LimitKind::Reset,
            Some("bw") => LimitKind::Bw,
            Some("iops") => LimitKind::Iops,
            _ => return Err(MalformedScenario::UnknownLimitKind(fields[0].to_string())),
        };

        let (min, expect) = parse_flags(&fields[3..])?;

        if kind == LimitKind::Reset {
            return Ok(Self {
                kind,
                target: LimitTarget::AllVolumes {
                    mode: LimitMode::Value,
                    value: 0.0,
                },
                min,
                expect,
            });
        }

        let target = match &fields[1] {
            RawField::List(volumes) => {
                if expect == Some(ExpectedValue::Previous) {
                    return Err(MalformedScenario::UnchangedPerVolume);
                }
                let values = match &fields[2] {
                    RawField::List(values) => values,
                    _ => {
                        return Err(MalformedScenario::ValueCountMismatch {
                            volumes: volumes.len(),
                            values: 1,
                        })
                    }
                };
                if volumes.len() != values.len() {
                    return Err(MalformedScenario::ValueCountMismatch {
                        volumes: volumes.len(),
                        values: values.len(),
                    });
                }

                let entries = volumes
                    .iter()
                    .zip(values)
                    .map(|(key, value)| Ok((key.parse::<VolumeKey>()?, parse_value(value)?)))
                    .collect::<Result<Vec<_>, MalformedScenario>>()?;
                LimitTarget::Volumes(VolumeMap::new(entries))
            }
            field => match field.as_text() {
                Some("rate") => {
                    let percent = fields[2].as_number()?;
                    let value = if percent != 0.0 {
                        base.limit_from_rate(kind.metric(), percent)
                    } else {
                        0.0
                    };
                    LimitTarget::AllVolumes {
                        mode: LimitMode::Rate { percent },
                        value,
                    }
                }
                Some("value") => LimitTarget::AllVolumes {
                    mode: LimitMode::Value,
                    value: fields[2].as_number()?,
                },
                _ => return Err(MalformedScenario::UnknownMode(field.to_string())),
            },
        };

        Ok(Self {
            kind,
            target,
            min,
            expect,
        })
    }

    pub fn reset() -> Self {
        Self {
            kind: LimitKind::Reset,
            target: LimitTarget::AllVolumes {
                mode: LimitMode::Value,
                value: 0.0,
            },
            min: false,
            expect: None,
        }
    }

    pub fn applies_to_all_volumes(&self) -> bool {
        matches!(self.target, LimitTarget::AllVolumes { .. })
    }
}

impl Display for ScenarioCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let bound = if self.min { "min" } else { "max" };
        let unit = match self.kind {
            LimitKind::Iops => "kIOPS",
            _ => "MB/s",
        };
        match (&self.kind, &self.target) {
            (LimitKind::Reset, _) => write!(f, "reset"),
            (kind, LimitTarget::AllVolumes { mode, value }) => match mode {
                LimitMode::Rate { percent } => {
                    write!(f, "{bound} {kind} {percent}% of base ({value:.2} {unit}) on all volumes")
                }
                LimitMode::Value => write!(f, "{bound} {kind} {value} {unit} per volume"),
            },
            (kind, LimitTarget::Volumes(map)) => {
                write!(f, "{bound} {kind}")?;
                for (key, value) in map.entries() {
                    write!(f, " vol{key}={value}")?;
                }
                write!(f, " {unit}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw_command;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn base() -> BasePerformance {
        BasePerformance {
            bw: 1000.0,
            iops: 200_000.0,
        }
    }

    #[test]
    fn rejects_short_commands() {
        let err = ScenarioCommand::parse(&raw_command!["bw", "rate"], &base()).unwrap_err();
        assert_eq!(MalformedScenario::TooFewFields(2), err);
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = ScenarioCommand::parse(&raw_command!["latency", "rate", "10"], &base()).unwrap_err();
        assert!(matches!(err, MalformedScenario::UnknownLimitKind(_)));
    }

    #[test]
    fn rejects_unknown_mode() {
        let err = ScenarioCommand::parse(&raw_command!["bw", "percent", "10"], &base()).unwrap_err();
        assert!(matches!(err, MalformedScenario::UnknownMode(_)));
    }

    #[test]
    fn rejects_scalar_value_for_volume_list() {
        let err = ScenarioCommand::parse(&raw_command!["bw", vec!["1", "2"], "10"], &base()).unwrap_err();
        assert_eq!(
            MalformedScenario::ValueCountMismatch {
                volumes: 2,
                values: 1
            },
            err
        );
    }

    #[test]
    fn rate_bw_is_resolved_against_baseline() {
        let cmd = ScenarioCommand::parse(&raw_command!["bw", "rate", "10"], &base()).unwrap();
        assert_eq!(
            LimitTarget::AllVolumes {
                mode: LimitMode::Rate { percent: 10.0 },
                value: 100.0
            },
            cmd.target
        );
        assert!(!cmd.min);
    }

    #[test]
    fn rate_iops_is_reported_in_thousands() {
        let cmd = ScenarioCommand::parse(&raw_command!["iops", "rate", "50"], &base()).unwrap();
        assert_eq!(
            LimitTarget::AllVolumes {
                mode: LimitMode::Rate { percent: 50.0 },
                value: 100.0
            },
            cmd.target
        );
    }

    #[test]
    fn rate_above_hundred_percent_is_accepted() {
        let cmd = ScenarioCommand::parse(&raw_command!["bw", "rate", "150"], &base()).unwrap();
        assert!(matches!(
            cmd.target,
            LimitTarget::AllVolumes { value, .. } if value == 1500.0
        ));
    }

    #[test]
    fn rate_commands_are_detected() {
        assert!(raw_command!["bw", "rate", "10"].is_rate());
        assert!(!raw_command!["bw", "value", "10"].is_rate());
        assert!(!raw_command!["bw", vec!["1"], vec!["10"]].is_rate());
    }

    #[test]
    fn reset_ignores_target_fields() {
        let cmd = ScenarioCommand::parse(&raw_command!["reset", "", "", "min"], &base()).unwrap();
        assert_eq!(LimitKind::Reset, cmd.kind);
        assert!(cmd.min);
    }

    #[test]
    fn volume_list_with_min_flag() {
        let cmd = ScenarioCommand::parse(&raw_command!["bw", vec!["1"], vec!["800"], "min"], &base())
            .unwrap();
        assert!(cmd.min);
        let LimitTarget::Volumes(map) = cmd.target else {
            panic!("expected a volume map");
        };
        assert_eq!(vec![(VolumeKey::Single(1), 800.0)], map.entries().to_vec());
    }

    #[test]
    fn trailing_flags_set_expectation() {
        let cmd = ScenarioCommand::parse(&raw_command!["bw", "value", "10", "unchanged"], &base())
            .unwrap();
        assert_eq!(Some(ExpectedValue::Previous), cmd.expect);

        let err = ScenarioCommand::parse(&raw_command!["bw", "value", "10", "max"], &base())
            .unwrap_err();
        assert!(matches!(err, MalformedScenario::UnknownFlag(_)));
    }

    #[test]
    fn rejects_bad_values_and_keys() {
        let err = ScenarioCommand::parse(&raw_command!["bw", "value", "ten"], &base()).unwrap_err();
        assert!(matches!(err, MalformedScenario::InvalidValue(_)));

        let err = ScenarioCommand::parse(&raw_command!["bw", vec!["3-1"], vec!["10"]], &base())
            .unwrap_err();
        assert!(matches!(err, MalformedScenario::InvalidVolumeKey(_)));
    }

    #[test]
    fn rejects_oversized_volume_ranges() {
        let err = ScenarioCommand::parse(&raw_command!["bw", vec!["0-4294967295"], vec!["10"]], &base())
            .unwrap_err();
        assert_eq!(
            MalformedScenario::VolumeRangeTooLarge("0-4294967295".to_string()),
            err
        );

        let widest = format!("1-{MAX_VOLUME_RANGE}");
        assert_eq!(
            VolumeKey::Range(1, MAX_VOLUME_RANGE),
            widest.parse::<VolumeKey>().unwrap()
        );
        let too_wide = format!("0-{MAX_VOLUME_RANGE}");
        assert!(too_wide.parse::<VolumeKey>().is_err());
    }

    #[test]
    fn rejects_unchanged_on_volume_list() {
        let err = ScenarioCommand::parse(
            &raw_command!["bw", vec!["1"], vec!["10"], "unchanged"],
            &base(),
        )
        .unwrap_err();
        assert_eq!(MalformedScenario::UnchangedPerVolume, err);
    }

    #[test]
    fn range_key_expands_inclusively() {
        let map = VolumeMap::new(vec![("1-3".parse().unwrap(), 7.0)]);
        assert_eq!(
            BTreeMap::from([(1, 7.0), (2, 7.0), (3, 7.0)]),
            map.expand()
        );
    }

    #[test]
    fn later_entries_win_on_overlap() {
        let map = VolumeMap::new(vec![
            ("1-2".parse().unwrap(), 10.0),
            ("2".parse().unwrap(), 20.0),
        ]);
        assert_eq!(BTreeMap::from([(1, 10.0), (2, 20.0)]), map.expand());
    }

    #[test]
    fn deserializes_mixed_toml_style_fields() {
        let raw: RawCommand = serde_json::from_str(r#"["iops", ["1-2", "4-5"], ["10", "20"]]"#).unwrap();
        let cmd = ScenarioCommand::parse(&raw, &base()).unwrap();
        let LimitTarget::Volumes(map) = cmd.target else {
            panic!("expected a volume map");
        };
        assert_eq!(4, map.expand().len());
    }

    proptest! {
        #[test]
        fn mismatched_volume_and_value_lists_are_rejected(
            volumes in proptest::collection::vec(1u32..64, 1..8),
            values in proptest::collection::vec(1u32..5000, 1..8),
        ) {
            prop_assume!(volumes.len() != values.len());
            let raw = RawCommand(vec![
                RawField::from("bw"),
                RawField::List(volumes.iter().map(u32::to_string).collect()),
                RawField::List(values.iter().map(u32::to_string).collect()),
            ]);
            let err = ScenarioCommand::parse(&raw, &base()).unwrap_err();
            let is_mismatch = matches!(err, MalformedScenario::ValueCountMismatch { .. });
            prop_assert!(is_mismatch);
        }

        #[test]
        fn matching_lists_assign_every_volume(
            values in proptest::collection::vec(1u32..5000, 1..8),
        ) {
            let raw = RawCommand(vec![
                RawField::from("bw"),
                RawField::List((1..=values.len()).map(|id| id.to_string()).collect()),
                RawField::List(values.iter().map(u32::to_string).collect()),
            ]);
            let cmd = ScenarioCommand::parse(&raw, &base()).unwrap();
            let LimitTarget::Volumes(map) = cmd.target else {
                panic!("expected a volume map");
            };
            prop_assert_eq!(values.len(), map.expand().len());
        }
    }
}
