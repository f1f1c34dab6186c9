use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::executor::Executor;

/// Parameters of one I/O workload run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadDescriptor {
    pub name: String,
    /// Share of reads, 0 is write only and 100 is read only.
    pub read_percent: u8,
    /// Transfer size as the generator understands it, for example `128k`.
    pub block_size: String,
    pub queue_depth: u32,
    pub duration_s: u64,
}

impl WorkloadDescriptor {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_s)
    }
}

/// Where the readings of a finished workload can be found.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultArtifact {
    File(PathBuf),
    Inline(String),
}

/// A workload that could not produce a usable result.
#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    #[error("failed to launch workload: {0}")]
    Launch(String),
    #[error("workload exited with {0}")]
    Exited(String),
    #[error("workload did not finish within {0:?} of its planned end")]
    JoinTimeout(Duration),
    #[error("unreadable result artifact {artifact}: {reason}")]
    Artifact { artifact: String, reason: String },
}

/// A running workload.
pub trait WorkloadTask: Send {
    /// True once the workload has finished, without waiting for it.
    fn poll(&mut self) -> bool;

    /// Wait for the workload to finish, giving up after `timeout`. A workload that is given up on is
    /// stopped.
    fn join(self: Box<Self>, timeout: Duration) -> Result<ResultArtifact, WorkloadError>;
}

/// Starts workloads.
pub trait WorkloadGenerator: Send + Sync {
    /// Start a workload and return immediately. `run_index` is unique within a run.
    fn launch(
        &self,
        descriptor: &WorkloadDescriptor,
        run_index: usize,
    ) -> Result<Box<dyn WorkloadTask>, WorkloadError>;
}

/// Runs each workload as a shell command with the descriptor exported to its environment.
///
/// The command must write its readings as JSON to the path in `QOS_OUTPUT`.
#[derive(Debug)]
pub struct CommandWorkloadGenerator {
    executor: Arc<Executor>,
    template: String,
    output_dir: PathBuf,
}

impl CommandWorkloadGenerator {
    pub fn new(executor: Arc<Executor>, template: String, output_dir: PathBuf) -> Self {
        Self {
            executor,
            template,
            output_dir,
        }
    }

    pub fn artifact_path(&self, descriptor: &WorkloadDescriptor, run_index: usize) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}.json", descriptor.name, run_index))
    }
}

impl WorkloadGenerator for CommandWorkloadGenerator {
    fn launch(
        &self,
        descriptor: &WorkloadDescriptor,
        run_index: usize,
    ) -> Result<Box<dyn WorkloadTask>, WorkloadError> {
        let artifact = self.artifact_path(descriptor, run_index);
        match std::fs::remove_file(&artifact) {
            Ok(()) => log::debug!("Removed stale artifact {}", artifact.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(WorkloadError::Launch(e.to_string())),
        }

        let mut command = tokio::process::Command::new("sh");
        command
            .arg("-c")
            .arg(&self.template)
            .env("QOS_WORKLOAD", &descriptor.name)
            .env("QOS_READ_PERCENT", descriptor.read_percent.to_string())
            .env("QOS_BLOCK_SIZE", &descriptor.block_size)
            .env("QOS_QUEUE_DEPTH", descriptor.queue_depth.to_string())
            .env("QOS_DURATION_S", descriptor.duration_s.to_string())
            .env("QOS_RUN_INDEX", run_index.to_string())
            .env("QOS_OUTPUT", &artifact)
            .kill_on_drop(true);

        log::info!(
            "Launching workload {} (run {run_index}), output {}",
            descriptor.name,
            artifact.display()
        );
        let handle = self.executor.spawn(async move { command.status().await });

        Ok(Box::new(ProcessTask {
            executor: self.executor.clone(),
            handle,
            artifact,
        }))
    }
}

struct ProcessTask {
    executor: Arc<Executor>,
    handle: JoinHandle<std::io::Result<ExitStatus>>,
    artifact: PathBuf,
}

impl WorkloadTask for ProcessTask {
    fn poll(&mut self) -> bool {
        self.handle.is_finished()
    }

    fn join(self: Box<Self>, timeout: Duration) -> Result<ResultArtifact, WorkloadError> {
        let ProcessTask {
            executor,
            mut handle,
            artifact,
        } = *self;
        let joined = executor.block_on(async { tokio::time::timeout(timeout, &mut handle).await });

        match joined {
            Err(_) => {
                // Dropping the child kills it
                handle.abort();
                Err(WorkloadError::JoinTimeout(timeout))
            }
            Ok(Err(e)) => Err(WorkloadError::Exited(e.to_string())),
            Ok(Ok(Err(e))) => Err(WorkloadError::Launch(e.to_string())),
            Ok(Ok(Ok(status))) if !status.success() => Err(WorkloadError::Exited(status.to_string())),
            Ok(Ok(Ok(_))) => Ok(ResultArtifact::File(artifact)),
        }
    }
}
