use qos_tunnel_runner::prelude::*;

fn workload(name: &str, read_percent: u8, block_size: &str, queue_depth: u32) -> WorkloadDescriptor {
    WorkloadDescriptor {
        name: name.to_string(),
        read_percent,
        block_size: block_size.to_string(),
        queue_depth,
        duration_s: 18,
    }
}

fn main() -> QosTunnelResult<()> {
    let builder = ScenarioDefinitionBuilder::new_with_init(env!("CARGO_PKG_NAME"))
        .with_workload(workload("seq_w", 0, "128k", 128))
        .with_workload(workload("seq_r", 100, "128k", 128))
        .with_workload(workload("rand_w", 0, "4k", 512))
        .with_workload(workload("rand_r", 100, "4k", 512))
        .with_test_case(
            "Guarantee Min BW on Volume 1",
            vec![
                raw_command!["bw", vec!["1"], vec!["800"], "min"],
                raw_command!["bw", vec!["1"], vec!["1000"], "min"],
                raw_command!["bw", vec!["1"], vec!["1500"], "min"],
                raw_command!["reset", "", "", "min"],
            ],
        )
        .with_test_case(
            "Throttle Max BW to 10% of Base Performance",
            vec![raw_command!["bw", "rate", "10"]],
        )
        .with_test_case(
            "Throttle Max IOPS to 10% of Base Performance",
            vec![raw_command!["iops", "rate", "10"]],
        )
        .with_test_case(
            "Throttle Max BW to 50% of Base Performance",
            vec![raw_command!["bw", "rate", "50"]],
        )
        .with_test_case(
            "Throttle Max IOPS to 50% of Base Performance",
            vec![raw_command!["iops", "rate", "50"]],
        )
        .with_test_case(
            "Throttle Max BW to 90% of Base Performance",
            vec![raw_command!["bw", "rate", "90"]],
        )
        .with_test_case(
            "Throttle Max IOPS to 90% of Base Performance",
            vec![raw_command!["iops", "rate", "90"]],
        )
        .with_test_case(
            "Throttle Max BW to 150% of Base Performance",
            vec![raw_command!["bw", "rate", "150"]],
        )
        .with_test_case(
            "Throttle Max IOPS to 150% of Base Performance",
            vec![raw_command!["iops", "rate", "150"]],
        )
        .with_test_case(
            "Throttle Max BW to Min Performance",
            vec![raw_command!["bw", "value", "10"]],
        )
        .with_test_case(
            "Throttle Max IOPS to Min Performance",
            vec![raw_command!["iops", "value", "10"]],
        )
        .with_test_case(
            "Throttle Both Max BW and IOPS",
            vec![
                raw_command!["bw", "rate", "20"],
                raw_command!["iops", "rate", "50"],
                raw_command!["bw", "rate", "50"],
                raw_command!["iops", "rate", "30"],
            ],
        )
        .with_test_case(
            "Throttle Each Volume with Different Value",
            vec![
                raw_command!["bw", vec!["3"], vec!["50"]],
                raw_command!["iops", vec!["1-2", "4-5"], vec!["10", "20"]],
                raw_command!["bw", vec!["3"], vec!["50"]],
            ],
        );

    run(builder)?;

    Ok(())
}
