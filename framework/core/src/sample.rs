use std::collections::BTreeMap;
use std::io::Read;

use serde::{Deserialize, Deserializer, Serialize};

use crate::command::Metric;

/// One periodic reading from a workload run.
///
/// Workload generators commonly report bandwidth as `MB/sec` and IOPS as `rate`, sometimes as
/// strings, so both spellings and both representations are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(alias = "MB/sec", deserialize_with = "lenient_f64")]
    pub bw: f64,
    #[serde(alias = "rate", deserialize_with = "lenient_f64")]
    pub iops: f64,
}

impl Sample {
    pub fn new(bw: f64, iops: f64) -> Self {
        Self { bw, iops }
    }

    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Bw => self.bw,
            Metric::Iops => self.iops,
        }
    }
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.trim().parse::<f64>().map_err(serde::de::Error::custom),
    }
}

/// The ordered readings produced by a completed workload run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeasuredSample(Vec<Sample>);

impl MeasuredSample {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self(samples)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.0
    }

    pub fn last(&self) -> Option<&Sample> {
        self.0.last()
    }

    /// Average of the last `window` readings for a metric, or fewer if the run produced less.
    pub fn trailing_average(&self, metric: Metric, window: usize) -> Option<f64> {
        let window = window.max(1).min(self.0.len());
        if window == 0 {
            return None;
        }

        let tail = &self.0[self.0.len() - window..];
        Some(tail.iter().map(|s| s.get(metric)).sum::<f64>() / window as f64)
    }
}

impl FromIterator<Sample> for MeasuredSample {
    fn from_iter<T: IntoIterator<Item = Sample>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Everything measured by one workload run: the aggregate over all volumes and, when the
/// generator reports it, the readings for each volume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadResult {
    pub total: MeasuredSample,
    #[serde(default)]
    pub volumes: BTreeMap<u32, MeasuredSample>,
}

impl WorkloadResult {
    pub fn from_total(total: MeasuredSample) -> Self {
        Self {
            total,
            volumes: BTreeMap::new(),
        }
    }

    /// Parse a result artifact.
    ///
    /// Accepts either a bare array of readings, taken as the aggregate, or an object with a `total`
    /// array and an optional `volumes` map from volume id to readings.
    pub fn from_json_reader<R: Read>(reader: R) -> serde_json::Result<Self> {
        #[derive(Deserialize)]
        struct Detailed {
            total: MeasuredSample,
            #[serde(default)]
            volumes: BTreeMap<String, MeasuredSample>,
        }

        let value: serde_json::Value = serde_json::from_reader(std::io::BufReader::new(reader))?;
        if value.is_array() {
            return Ok(Self::from_total(serde_json::from_value(value)?));
        }

        let detailed: Detailed = serde_json::from_value(value)?;
        let volumes = detailed
            .volumes
            .into_iter()
            .map(|(id, sample)| {
                id.trim()
                    .parse::<u32>()
                    .map(|id| (id, sample))
                    .map_err(|_| serde::de::Error::custom(format!("invalid volume id `{id}`")))
            })
            .collect::<serde_json::Result<_>>()?;

        Ok(Self {
            total: detailed.total,
            volumes,
        })
    }

    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        Self::from_json_reader(s.as_bytes())
    }
}

/// Unthrottled performance of a workload, the reference for rate limits and for checking that a
/// reset restored full performance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BasePerformance {
    /// MB/s
    pub bw: f64,
    /// Operations per second
    pub iops: f64,
}

impl BasePerformance {
    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Bw => self.bw,
            Metric::Iops => self.iops,
        }
    }

    /// Average of the trailing readings of an unthrottled run.
    pub fn from_sample(sample: &MeasuredSample, window: usize) -> Option<Self> {
        Some(Self {
            bw: sample.trailing_average(Metric::Bw, window)?,
            iops: sample.trailing_average(Metric::Iops, window)?,
        })
    }

    /// Resolve a percentage of this baseline into a limit value, in MB/s or kIOPS.
    pub fn limit_from_rate(&self, metric: Metric, percent: f64) -> f64 {
        self.get(metric) * percent / 100.0 / metric.limit_scale()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn trailing_average_uses_last_three() {
        let sample: MeasuredSample = [1.0, 2.0, 10.0, 20.0, 30.0]
            .into_iter()
            .map(|bw| Sample::new(bw, 0.0))
            .collect();
        assert_eq!(Some(20.0), sample.trailing_average(Metric::Bw, 3));
    }

    #[test]
    fn trailing_average_of_short_run() {
        let sample = MeasuredSample::new(vec![Sample::new(4.0, 8.0)]);
        assert_eq!(Some(8.0), sample.trailing_average(Metric::Iops, 3));
        assert_eq!(None, MeasuredSample::default().trailing_average(Metric::Iops, 3));
    }

    #[test]
    fn parses_vdbench_style_records() {
        let result = WorkloadResult::from_json_str(
            r#"[{"MB/sec": "512.5", "rate": "4100.0"}, {"MB/sec": 500, "rate": 4000}]"#,
        )
        .unwrap();
        assert_eq!(
            vec![Sample::new(512.5, 4100.0), Sample::new(500.0, 4000.0)],
            result.total.samples().to_vec()
        );
        assert!(result.volumes.is_empty());
    }

    #[test]
    fn parses_per_volume_records() {
        let result = WorkloadResult::from_json_str(
            r#"{"total": [{"bw": 100, "iops": 10}], "volumes": {"1": [{"bw": 50, "iops": 5}], "3": []}}"#,
        )
        .unwrap();
        assert_eq!(1, result.total.len());
        assert_eq!(vec![1, 3], result.volumes.keys().copied().collect::<Vec<_>>());
    }

    #[test]
    fn rate_limit_units() {
        let base = BasePerformance {
            bw: 2000.0,
            iops: 500_000.0,
        };
        assert_eq!(200.0, base.limit_from_rate(Metric::Bw, 10.0));
        assert_eq!(50.0, base.limit_from_rate(Metric::Iops, 10.0));
    }
}
