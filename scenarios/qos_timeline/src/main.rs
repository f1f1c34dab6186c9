use qos_tunnel_runner::prelude::*;

fn min_bw(title: &str, start_s: u64, volume: &str, value: &str) -> TimelineConfig {
    TimelineConfig {
        title: title.to_string(),
        start_s,
        command: raw_command!["bw", vec![volume], vec![value], "min"],
    }
}

fn main() -> QosTunnelResult<()> {
    let timeline = TimelineDefinition {
        title: "Min BW guarantees changing under load".to_string(),
        workloads: vec![TimelineWorkload {
            start_s: 0,
            workload: WorkloadDescriptor {
                name: "rand_r".to_string(),
                read_percent: 100,
                block_size: "4k".to_string(),
                queue_depth: 128,
                duration_s: 80,
            },
        }],
        configs: vec![
            TimelineConfig {
                title: "Reset Throttling".to_string(),
                start_s: 5,
                command: raw_command!["reset", "", ""],
            },
            min_bw("Min Throttling on volume 3", 20, "3", "2900"),
            min_bw("Min Throttling on volume 4", 25, "4", "800"),
            min_bw("Min Throttling on volume 5", 25, "5", "1200"),
            min_bw("Remove Min Throttling on volume 3", 50, "3", "0"),
            min_bw("Remove Min Throttling on volume 4", 60, "4", "0"),
        ],
    };

    let builder = ScenarioDefinitionBuilder::new_with_init(env!("CARGO_PKG_NAME"))
        .with_timeline(timeline);

    run(builder)?;

    Ok(())
}
