use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::command::Metric;
use crate::sample::{BasePerformance, MeasuredSample, Sample};

/// Relative tolerance used when a measurement must match a reference value.
pub const DEFAULT_TOLERANCE: f64 = 0.1;

/// Number of trailing readings averaged to produce the measured value.
pub const DEFAULT_TRAILING_WINDOW: usize = 3;

/// What a measurement is expected to be after a limit has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpectedValue {
    /// Only log the reading.
    Unchecked,
    /// Must match the unthrottled baseline within tolerance.
    Baseline,
    /// Must match the previous cycle's measurement within tolerance.
    Previous,
    /// One-sided bound, in measurement units (MB/s or IOPS).
    Bound { limit: f64, floor: bool },
}

impl Display for ExpectedValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpectedValue::Unchecked => write!(f, "-"),
            ExpectedValue::Baseline => write!(f, "= baseline"),
            ExpectedValue::Previous => write!(f, "= previous"),
            ExpectedValue::Bound { limit, floor: false } => write!(f, "<= {limit:.2}"),
            ExpectedValue::Bound { limit, floor: true } => write!(f, ">= {limit:.2}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    Unchecked,
}

/// The outcome of comparing one measurement against its expectation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    pub label: String,
    pub metric: Metric,
    pub expected: ExpectedValue,
    /// The value the measurement was compared against, once resolved.
    pub reference: Option<f64>,
    pub actual: Option<f64>,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Check {
    pub fn failed(&self) -> bool {
        self.verdict == Verdict::Fail
    }

    /// A check that could not be made because there was nothing to measure.
    pub fn no_measurement(
        label: impl Into<String>,
        metric: Metric,
        expected: ExpectedValue,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            metric,
            expected,
            reference: None,
            actual: None,
            verdict: Verdict::Fail,
            detail: Some(reason.into()),
        }
    }
}

/// The measurements carried from one check to the next within a test case, so that a later
/// command can expect performance to be unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerificationState {
    pub prev_bw: f64,
    pub prev_iops: f64,
}

impl VerificationState {
    pub fn new(base: &BasePerformance) -> Self {
        Self {
            prev_bw: base.bw,
            prev_iops: base.iops,
        }
    }

    pub fn previous(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Bw => self.prev_bw,
            Metric::Iops => self.prev_iops,
        }
    }

    /// Carry forward the final reading of a run.
    pub fn observe(self, last: &Sample) -> Self {
        Self {
            prev_bw: last.bw,
            prev_iops: last.iops,
        }
    }
}

/// How measurements are reduced and compared.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationPolicy {
    pub tolerance: f64,
    pub trailing_window: usize,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            trailing_window: DEFAULT_TRAILING_WINDOW,
        }
    }
}

impl VerificationPolicy {
    /// Compare a measured run against its expectation.
    ///
    /// Returns the check and the state for the next check, which holds the final reading of this
    /// run whatever the verdict was.
    pub fn check(
        &self,
        label: impl Into<String>,
        sample: &MeasuredSample,
        metric: Metric,
        expected: ExpectedValue,
        base: &BasePerformance,
        state: VerificationState,
    ) -> (Check, VerificationState) {
        let label = label.into();
        let Some(actual) = sample.trailing_average(metric, self.trailing_window) else {
            log::warn!("{label}: no {metric} readings to check");
            return (
                Check::no_measurement(label, metric, expected, "no measurement"),
                state,
            );
        };

        let (reference, verdict) = match expected {
            ExpectedValue::Unchecked => (None, Verdict::Unchecked),
            ExpectedValue::Baseline => {
                let reference = base.get(metric);
                (Some(reference), self.within_tolerance(actual, reference))
            }
            ExpectedValue::Previous => {
                let reference = state.previous(metric);
                (Some(reference), self.within_tolerance(actual, reference))
            }
            ExpectedValue::Bound { limit, floor } => {
                let pass = if floor { actual >= limit } else { actual <= limit };
                (Some(limit), if pass { Verdict::Pass } else { Verdict::Fail })
            }
        };

        match verdict {
            Verdict::Fail => log::warn!(
                "{label}: failed qos throttling, {metric} expected {expected} (reference {:.2}), actual {actual:.2} {}",
                reference.unwrap_or_default(),
                metric.unit()
            ),
            _ => log::info!("{label}: {metric} actual {actual:.2} {}, expected {expected}", metric.unit()),
        }

        let next_state = match sample.last() {
            Some(last) => state.observe(last),
            None => state,
        };

        (
            Check {
                label,
                metric,
                expected,
                reference,
                actual: Some(actual),
                verdict,
                detail: None,
            },
            next_state,
        )
    }

    fn within_tolerance(&self, actual: f64, reference: f64) -> Verdict {
        let low = reference * (1.0 - self.tolerance);
        let high = reference * (1.0 + self.tolerance);
        if low <= actual && actual <= high {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BASE: BasePerformance = BasePerformance {
        bw: 1000.0,
        iops: 100_000.0,
    };

    fn flat(bw: f64) -> MeasuredSample {
        MeasuredSample::new(vec![Sample::new(bw, bw * 100.0); 4])
    }

    fn verdict_for(bw: f64, expected: ExpectedValue) -> Verdict {
        let policy = VerificationPolicy::default();
        let (check, _) = policy.check(
            "test",
            &flat(bw),
            Metric::Bw,
            expected,
            &BASE,
            VerificationState::new(&BASE),
        );
        check.verdict
    }

    #[test]
    fn baseline_band() {
        assert_eq!(Verdict::Pass, verdict_for(901.0, ExpectedValue::Baseline));
        assert_eq!(Verdict::Pass, verdict_for(1099.0, ExpectedValue::Baseline));
        assert_eq!(Verdict::Fail, verdict_for(899.0, ExpectedValue::Baseline));
        assert_eq!(Verdict::Fail, verdict_for(1101.0, ExpectedValue::Baseline));
    }

    #[test]
    fn ceiling() {
        let expected = ExpectedValue::Bound {
            limit: 100.0,
            floor: false,
        };
        assert_eq!(Verdict::Pass, verdict_for(95.0, expected));
        assert_eq!(Verdict::Pass, verdict_for(100.0, expected));
        assert_eq!(Verdict::Fail, verdict_for(150.0, expected));
    }

    #[test]
    fn floor_flips_the_comparison() {
        let expected = ExpectedValue::Bound {
            limit: 800.0,
            floor: true,
        };
        assert_eq!(Verdict::Fail, verdict_for(700.0, expected));
        assert_eq!(Verdict::Pass, verdict_for(800.0, expected));
        assert_eq!(Verdict::Pass, verdict_for(850.0, expected));
    }

    #[test]
    fn unchecked_still_records_the_reading() {
        let policy = VerificationPolicy::default();
        let (check, _) = policy.check(
            "test",
            &flat(42.0),
            Metric::Bw,
            ExpectedValue::Unchecked,
            &BASE,
            VerificationState::new(&BASE),
        );
        assert_eq!(Verdict::Unchecked, check.verdict);
        assert_eq!(Some(42.0), check.actual);
        assert_eq!(None, check.reference);
    }

    #[test]
    fn previous_uses_last_reading_of_prior_check() {
        let policy = VerificationPolicy::default();
        let state = VerificationState::new(&BASE);

        let first = MeasuredSample::new(vec![
            Sample::new(300.0, 1.0),
            Sample::new(200.0, 2.0),
            Sample::new(500.0, 3.0),
        ]);
        let (_, state) = policy.check(
            "first",
            &first,
            Metric::Bw,
            ExpectedValue::Unchecked,
            &BASE,
            state,
        );
        assert_eq!(500.0, state.prev_bw);
        assert_eq!(3.0, state.prev_iops);

        let (check, _) = policy.check(
            "second",
            &flat(520.0),
            Metric::Bw,
            ExpectedValue::Previous,
            &BASE,
            state,
        );
        assert_eq!(Some(500.0), check.reference);
        assert_eq!(Verdict::Pass, check.verdict);
    }

    #[test]
    fn empty_run_fails_and_keeps_state() {
        let policy = VerificationPolicy::default();
        let state = VerificationState::new(&BASE);
        let (check, next) = policy.check(
            "empty",
            &MeasuredSample::default(),
            Metric::Iops,
            ExpectedValue::Unchecked,
            &BASE,
            state,
        );
        assert!(check.failed());
        assert_eq!(state, next);
    }

    #[test]
    fn custom_tolerance() {
        let policy = VerificationPolicy {
            tolerance: 0.2,
            trailing_window: 1,
        };
        let (check, _) = policy.check(
            "wide",
            &flat(820.0),
            Metric::Bw,
            ExpectedValue::Baseline,
            &BASE,
            VerificationState::new(&BASE),
        );
        assert_eq!(Verdict::Pass, check.verdict);
    }
}
