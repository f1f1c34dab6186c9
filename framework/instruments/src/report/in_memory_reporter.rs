mod check_table;
mod series_table;

use crate::report::in_memory_reporter::check_table::{CheckRow, TestCaseRow};
use crate::report::in_memory_reporter::series_table::SeriesRow;
use crate::report::ReportCollector;
use qos_tunnel_core::prelude::{MeasuredSample, Verdict};
use qos_tunnel_summary_model::TestCaseReport;
use tabled::settings::Style;
use tabled::Table;

/// Keeps every report in memory and prints them as tables at the end of the run.
pub struct InMemoryReporter {
    test_cases: Vec<TestCaseReport>,
    series: Vec<(String, MeasuredSample)>,
}

impl Default for InMemoryReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryReporter {
    pub fn new() -> Self {
        Self {
            test_cases: Vec::new(),
            series: Vec::new(),
        }
    }

    pub(crate) fn check_rows(&self) -> Vec<CheckRow> {
        self.test_cases
            .iter()
            .flat_map(|report| {
                report.checks.iter().map(|check| CheckRow {
                    test_case: report.title.clone(),
                    workload: report.workload.clone(),
                    check: check.label.clone(),
                    metric: check.metric.to_string(),
                    expected: check.expected.to_string(),
                    reference: check.reference,
                    actual: check.actual,
                    verdict: match check.verdict {
                        Verdict::Pass => "pass".to_string(),
                        Verdict::Fail => match &check.detail {
                            Some(detail) => format!("FAIL ({detail})"),
                            None => "FAIL".to_string(),
                        },
                        Verdict::Unchecked => "-".to_string(),
                    },
                })
            })
            .collect()
    }

    pub(crate) fn test_case_rows(&self) -> Vec<TestCaseRow> {
        self.test_cases
            .iter()
            .map(|report| TestCaseRow {
                test_case: report.title.clone(),
                workload: report.workload.clone(),
                checks: report.checks.len(),
                failed: report.failed_checks().count(),
                skipped: report.skipped.len(),
                result: match (&report.aborted, report.passed()) {
                    (Some(reason), _) => format!("ABORTED: {reason}"),
                    (None, true) => "PASS".to_string(),
                    (None, false) => "FAIL".to_string(),
                },
            })
            .collect()
    }

    fn print_series(&self) {
        for (workload, sample) in &self.series {
            println!("\nReadings of {workload}");
            let rows = sample
                .samples()
                .iter()
                .enumerate()
                .map(|(index, s)| SeriesRow {
                    index,
                    bw: s.bw,
                    iops: s.iops,
                })
                .collect::<Vec<_>>();

            let mut table = Table::new(rows);
            table.with(Style::modern());
            println!("{table}");
        }
    }

    fn print_summary_of_checks(&self) {
        if self.test_cases.is_empty() {
            return;
        }

        println!("\nSummary of checks");
        let mut table = Table::new(self.check_rows());
        table.with(Style::modern());
        println!("{table}");

        println!("\nSummary of test cases");
        let mut table = Table::new(self.test_case_rows());
        table.with(Style::modern());
        println!("{table}");

        for report in &self.test_cases {
            for skipped in &report.skipped {
                log::warn!(
                    "[{}] skipped {}: {}",
                    report.title,
                    skipped.command,
                    skipped.reason
                );
            }
        }
    }
}

impl ReportCollector for InMemoryReporter {
    fn add_test_case(&mut self, report: &TestCaseReport) {
        self.test_cases.push(report.clone());
    }

    fn add_series(&mut self, workload: &str, sample: &MeasuredSample) {
        self.series.push((workload.to_string(), sample.clone()));
    }

    fn finalize(&self) {
        self.print_series();
        self.print_summary_of_checks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use qos_tunnel_core::prelude::{Check, ExpectedValue, Metric};

    fn report() -> TestCaseReport {
        let mut report = TestCaseReport::new("Throttle".to_string(), "rand_r".to_string(), None);
        report.add_check(Check {
            label: "total".to_string(),
            metric: Metric::Iops,
            expected: ExpectedValue::Bound {
                limit: 10_000.0,
                floor: false,
            },
            reference: Some(10_000.0),
            actual: Some(12_000.0),
            verdict: Verdict::Fail,
            detail: None,
        });
        report.add_check(Check::no_measurement(
            "vol2",
            Metric::Iops,
            ExpectedValue::Unchecked,
            "join timed out",
        ));
        report
    }

    #[test]
    fn rows_follow_checks() {
        let mut reporter = InMemoryReporter::new();
        reporter.add_test_case(&report());

        let rows = reporter.check_rows();
        assert_eq!(2, rows.len());
        assert_eq!("<= 10000.00", rows[0].expected);
        assert_eq!("FAIL", rows[0].verdict);
        assert_eq!("FAIL (join timed out)", rows[1].verdict);

        let rows = reporter.test_case_rows();
        assert_eq!(1, rows.len());
        assert_eq!(2, rows[0].failed);
        assert_eq!("FAIL", rows[0].result);
    }
}
