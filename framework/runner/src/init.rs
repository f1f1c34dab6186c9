use crate::cli::QosTunnelCli;
use clap::Parser;

/// Initialise the CLI and logging for the QoS Tunnel runner.
pub fn init() -> QosTunnelCli {
    env_logger::init();

    QosTunnelCli::parse()
}
