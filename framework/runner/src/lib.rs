mod cli;
mod clock;
mod collector;
mod config;
mod context;
mod control;
mod definition;
mod executor;
mod init;
mod progress;
mod run;
mod shutdown;
mod suite;
mod timeline;
mod types;
mod workload;

pub mod prelude {
    pub use crate::cli::QosTunnelCli;
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::collector::collect;
    pub use crate::config::ScenarioFile;
    pub use crate::context::{
        RunSettings, RunnerContext, DEFAULT_APPLY_DELAY, DEFAULT_JOIN_TIMEOUT, DEFAULT_TICK,
    };
    pub use crate::control::{apply_distribution, CommandControl, ControlInterface, LimitRequest};
    pub use crate::definition::{ScenarioDefinitionBuilder, ScenarioPlan};
    pub use crate::executor::Executor;
    pub use crate::init::init;
    pub use crate::run::{run, run_plan};
    pub use crate::suite::{
        measure_baseline, reset_all_volumes, run_suite, run_test_case, run_timeline, TestCase,
        TimelineConfig, TimelineDefinition, TimelineWorkload,
    };
    pub use crate::timeline::{
        ConfigOutcome, ConfigRecord, Timeline, TimelineAbort, TimelineOutcome, WorkloadOutcome,
        WorkloadRecord,
    };
    pub use crate::types::QosTunnelResult;
    pub use crate::workload::{
        CommandWorkloadGenerator, ResultArtifact, WorkloadDescriptor, WorkloadError,
        WorkloadGenerator, WorkloadTask,
    };

    pub use qos_tunnel_core::prelude::*;
    pub use qos_tunnel_instruments::{ReportConfig, Reporter};
    pub use qos_tunnel_summary_model::{RunSummary, TestCaseReport};
}
