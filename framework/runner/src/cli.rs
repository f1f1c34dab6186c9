use std::path::PathBuf;

use clap::Parser;
use qos_tunnel_core::prelude::ArrayVolumes;

#[derive(Parser, Debug, Clone)]
#[command(about, long_about = None)]
pub struct QosTunnelCli {
    /// Shell command that applies one limit to one volume.
    ///
    /// The placeholders `{kind}`, `{array}`, `{volume}`, `{value}` and `{min}` are replaced before the
    /// command is run. `{kind}` is one of `bw`, `iops` or `reset`, `{value}` is in MB/s or kIOPS with
    /// 0 meaning unlimited and `{min}` is `true` when the limit is a floor.
    ///
    /// For example `--control-command='cli qos create --array {array} --volume VOL{volume} --max{kind} {value}'`.
    #[clap(long)]
    pub control_command: String,

    /// Shell command that runs one workload and writes its readings to `$QOS_OUTPUT`.
    ///
    /// The workload is described to the command by the environment variables `QOS_WORKLOAD`,
    /// `QOS_READ_PERCENT`, `QOS_BLOCK_SIZE`, `QOS_QUEUE_DEPTH`, `QOS_DURATION_S` and `QOS_RUN_INDEX`.
    #[clap(long)]
    pub workload_command: String,

    /// The volumes under test, in the format `array:volumes`. For example `--volumes=ARR0:1-5`.
    ///
    /// You can specify multiple arrays by using the flag multiple times. Per-volume limits are applied
    /// to the first array.
    #[clap(long, short)]
    pub volumes: Vec<ArrayVolumes>,

    /// A TOML file describing workloads, test cases or a timeline. Values in the file replace the
    /// defaults built into the scenario.
    #[clap(long, short)]
    pub scenario_file: Option<PathBuf>,

    /// Directory that workload result artifacts are written to
    #[clap(long, default_value = "qos-results")]
    pub output_dir: PathBuf,

    /// Interval of the timeline loop, in milliseconds
    #[clap(long)]
    pub tick_ms: Option<u64>,

    /// How long a workload may overrun its planned duration before it is treated as failed, in seconds
    #[clap(long)]
    pub join_timeout_s: Option<u64>,

    /// How long after a workload starts to apply the limit under test, in milliseconds
    #[clap(long)]
    pub apply_delay_ms: Option<u64>,

    /// How long a single control command may take, in seconds
    #[clap(long, default_value = "30")]
    pub control_timeout_s: u64,

    /// Identifier for this run, a random one is chosen if not provided
    #[clap(long)]
    pub run_id: Option<String>,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at by anyone and is just adding noise to the logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_volumes() {
        let cli = QosTunnelCli::try_parse_from([
            "qos",
            "--control-command",
            "true",
            "--workload-command",
            "true",
            "--volumes",
            "ARR0:1-3",
            "-v",
            "ARR1:1",
        ])
        .unwrap();

        assert_eq!(2, cli.volumes.len());
        assert_eq!(vec![1, 2, 3], cli.volumes[0].volumes);
        assert_eq!(PathBuf::from("qos-results"), cli.output_dir);
        assert!(!cli.no_progress);
    }

    #[test]
    fn reject_bad_volumes() {
        let result = QosTunnelCli::try_parse_from([
            "qos",
            "--control-command",
            "true",
            "--workload-command",
            "true",
            "--volumes",
            "ARR0",
        ]);
        assert!(result.is_err());
    }
}
