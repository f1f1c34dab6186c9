use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use qos_tunnel_core::prelude::{Distribution, LimitKind};
use serde::Serialize;

use crate::executor::Executor;

/// One limit to set on one volume.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimitRequest {
    pub kind: LimitKind,
    pub array: String,
    pub volume: u32,
    /// MB/s or kIOPS, 0 removes the limit.
    pub value: f64,
    pub min: bool,
}

impl Display for LimitRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let bound = if self.min { "min" } else { "max" };
        write!(
            f,
            "{bound} {} {} on {}/VOL{}",
            self.kind,
            format_value(self.value),
            self.array,
            self.volume
        )
    }
}

/// The storage array's management interface.
pub trait ControlInterface: Send + Sync {
    /// Apply a limit. Blocks until the array has accepted or rejected it.
    fn apply(&self, request: &LimitRequest) -> anyhow::Result<()>;
}

/// Apply every assignment of a distribution in order, stopping at the first failure.
pub fn apply_distribution(
    control: &dyn ControlInterface,
    distribution: &Distribution,
) -> anyhow::Result<()> {
    for (volume, assignment) in &distribution.assignments {
        let request = LimitRequest {
            kind: distribution.kind,
            array: volume.array.clone(),
            volume: volume.volume,
            value: assignment.value,
            min: assignment.min,
        };
        log::debug!("Applying {request}");
        control
            .apply(&request)
            .with_context(|| format!("Failed to apply {request}"))?;
    }

    Ok(())
}

/// Applies limits by running a shell command for each one.
#[derive(Debug)]
pub struct CommandControl {
    executor: Arc<Executor>,
    template: String,
    timeout: Duration,
}

impl CommandControl {
    pub fn new(executor: Arc<Executor>, template: String, timeout: Duration) -> Self {
        Self {
            executor,
            template,
            timeout,
        }
    }

    fn render(&self, request: &LimitRequest) -> String {
        render_template(&self.template, request)
    }
}

impl ControlInterface for CommandControl {
    fn apply(&self, request: &LimitRequest) -> anyhow::Result<()> {
        let command_line = self.render(request);
        let timeout = self.timeout;

        // Ignores shutdown, the reset after an interrupted test case must still reach the array.
        self.executor.block_on(async move {
            let output = tokio::time::timeout(
                timeout,
                tokio::process::Command::new("sh")
                    .arg("-c")
                    .arg(&command_line)
                    .kill_on_drop(true)
                    .output(),
            )
            .await
            .with_context(|| format!("Control command timed out after {timeout:?}: {command_line}"))?
            .with_context(|| format!("Failed to run control command: {command_line}"))?;

            if !output.status.success() {
                anyhow::bail!(
                    "Control command exited with {}: {command_line}\n{}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }

            log::trace!("Control command succeeded: {command_line}");
            Ok(())
        })
    }
}

fn render_template(template: &str, request: &LimitRequest) -> String {
    template
        .replace("{kind}", &request.kind.to_string())
        .replace("{array}", &request.array)
        .replace("{volume}", &request.volume.to_string())
        .replace("{value}", &format_value(request.value))
        .replace("{min}", &request.min.to_string())
}

/// Whole numbers are written without a fraction, anything else to three decimal places.
fn format_value(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.3}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use qos_tunnel_core::prelude::{distribute, BasePerformance, ScenarioCommand, Topology};

    #[derive(Default)]
    struct RecordingControl {
        requests: Mutex<Vec<LimitRequest>>,
        fail_on_volume: Option<u32>,
    }

    impl ControlInterface for RecordingControl {
        fn apply(&self, request: &LimitRequest) -> anyhow::Result<()> {
            if Some(request.volume) == self.fail_on_volume {
                anyhow::bail!("rejected");
            }
            self.requests.lock().push(request.clone());
            Ok(())
        }
    }

    fn request(value: f64) -> LimitRequest {
        LimitRequest {
            kind: LimitKind::Iops,
            array: "ARR0".to_string(),
            volume: 3,
            value,
            min: true,
        }
    }

    #[test]
    fn render_all_placeholders() {
        let rendered = render_template(
            "qos --kind {kind} --array {array} --vol VOL{volume} --value {value} --min={min}",
            &request(12.5),
        );
        assert_eq!(
            "qos --kind iops --array ARR0 --vol VOL3 --value 12.500 --min=true",
            rendered
        );
    }

    #[test]
    fn whole_values_have_no_fraction() {
        assert_eq!("40", format_value(40.0));
        assert_eq!("33.333", format_value(100.0 / 3.0));
    }

    #[test]
    fn apply_distribution_in_topology_order() {
        let base = BasePerformance {
            bw: 1000.0,
            iops: 100_000.0,
        };
        let topology = Topology::default().with_array("ARR0", [1, 2, 3]);
        let distribution = distribute(&ScenarioCommand::reset(), &topology, &base);

        let control = RecordingControl::default();
        apply_distribution(&control, &distribution).unwrap();

        let requests = control.requests.lock();
        assert_eq!(
            vec![1, 2, 3],
            requests.iter().map(|r| r.volume).collect::<Vec<_>>()
        );
        assert!(requests.iter().all(|r| r.value == 0.0));
    }

    #[test]
    fn apply_distribution_stops_at_first_failure() {
        let base = BasePerformance {
            bw: 1000.0,
            iops: 100_000.0,
        };
        let topology = Topology::default().with_array("ARR0", [1, 2, 3]);
        let distribution = distribute(&ScenarioCommand::reset(), &topology, &base);

        let control = RecordingControl {
            fail_on_volume: Some(2),
            ..Default::default()
        };
        let err = apply_distribution(&control, &distribution).unwrap_err();
        assert!(err.to_string().contains("ARR0/VOL2"));
        assert_eq!(1, control.requests.lock().len());
    }

    #[test]
    fn command_control_reports_exit_status() {
        let executor = Arc::new(Executor::new(
            tokio::runtime::Runtime::new().unwrap(),
            Default::default(),
        ));
        let ok = CommandControl::new(executor.clone(), "true {value}".to_string(), Duration::from_secs(5));
        ok.apply(&request(1.0)).unwrap();

        let failing = CommandControl::new(executor, "exit 3".to_string(), Duration::from_secs(5));
        assert!(failing.apply(&request(1.0)).is_err());
    }

    #[test]
    fn command_control_still_applies_after_shutdown() {
        let executor = Arc::new(Executor::new(
            tokio::runtime::Runtime::new().unwrap(),
            Default::default(),
        ));
        executor.shutdown_handle().shutdown();

        let control = CommandControl::new(executor, "true {value}".to_string(), Duration::from_secs(5));
        control.apply(&request(0.0)).unwrap();
    }
}
