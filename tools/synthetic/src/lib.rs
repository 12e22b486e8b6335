pub mod config;
pub mod distribution;
pub mod engine;
pub mod protocols;
pub mod report;
pub mod schedule;
pub mod server;
pub mod trace;
pub mod transport;

pub use config::{Cli, Mode, ProtocolKind, SyntheticConfig, Transport, Workload};
pub use report::LoadTestReport;
pub use server::Server;

pub async fn run_load_test(config: SyntheticConfig) -> anyhow::Result<LoadTestReport> {
    engine::run(config).await
}
