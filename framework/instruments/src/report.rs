mod in_memory_reporter;

use parking_lot::Mutex;
use qos_tunnel_core::prelude::MeasuredSample;
use qos_tunnel_summary_model::TestCaseReport;

pub use in_memory_reporter::InMemoryReporter;

pub trait ReportCollector {
    /// Record the outcome of a finished test case.
    fn add_test_case(&mut self, report: &TestCaseReport);

    /// Record the readings of a workload run that is reported without being checked.
    fn add_series(&mut self, workload: &str, sample: &MeasuredSample);

    fn finalize(&self);
}

/// Configure which collectors a [Reporter] forwards to.
#[derive(Debug, Default)]
pub struct ReportConfig {
    in_memory: bool,
}

impl ReportConfig {
    pub fn enable_in_memory(mut self) -> Self {
        self.in_memory = true;
        self
    }

    pub fn init(self) -> Reporter {
        let mut collectors: Vec<Box<dyn ReportCollector + Send>> = Vec::new();
        if self.in_memory {
            collectors.push(Box::new(InMemoryReporter::new()));
        }
        Reporter {
            collectors: Mutex::new(collectors),
        }
    }
}

/// Shared handle to the configured report collectors.
pub struct Reporter {
    collectors: Mutex<Vec<Box<dyn ReportCollector + Send>>>,
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("collectors", &self.collectors.lock().len())
            .finish()
    }
}

impl Reporter {
    /// A reporter with no collectors, everything it is given is dropped.
    pub fn noop() -> Self {
        ReportConfig::default().init()
    }

    pub fn add_test_case(&self, report: &TestCaseReport) {
        for collector in self.collectors.lock().iter_mut() {
            collector.add_test_case(report);
        }
    }

    pub fn add_series(&self, workload: &str, sample: &MeasuredSample) {
        for collector in self.collectors.lock().iter_mut() {
            collector.add_series(workload, sample);
        }
    }

    pub fn finalize(&self) {
        for collector in self.collectors.lock().iter() {
            collector.finalize();
        }
    }
}
