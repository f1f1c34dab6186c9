pub mod command;
pub mod distribute;
pub mod sample;
mod shutdown;
pub mod topology;
pub mod verify;

pub mod prelude {
    pub use crate::command::{
        LimitKind, LimitMode, LimitTarget, MalformedScenario, Metric, RawCommand, RawField,
        ScenarioCommand, VolumeKey, VolumeMap, MAX_VOLUME_RANGE,
    };
    pub use crate::distribute::{distribute, Assignment, Distribution, DistributionOutcome};
    pub use crate::raw_command;
    pub use crate::sample::{BasePerformance, MeasuredSample, Sample, WorkloadResult};
    pub use crate::shutdown::{ShutdownHandle, ShutdownListener, ShutdownSignalError};
    pub use crate::topology::{ArrayVolumes, Topology, TopologyParseError, VolumeRef};
    pub use crate::verify::{
        Check, ExpectedValue, Verdict, VerificationPolicy, VerificationState,
        DEFAULT_TOLERANCE, DEFAULT_TRAILING_WINDOW,
    };
}
