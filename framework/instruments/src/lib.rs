mod report;

pub use report::{InMemoryReporter, ReportCollector, ReportConfig, Reporter};
