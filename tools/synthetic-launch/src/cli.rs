use std::iter;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::launch::NumaPolicy;

pub const DEFAULT_NUMA_NODE: u32 = 0;
pub const DEFAULT_NUMACTL: &str = "numactl";
pub const DEFAULT_BINARY: &str = "synthetic";

/// Everything before the server address configures the launcher; the
/// address and everything after it is handed to the load generator untouched.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "synthetic-launch",
    about = "Run the synthetic load generator pinned to a NUMA node"
)]
pub struct Cli {
    /// NUMA node to run on (`numactl -N`)
    #[arg(short = 'N', long, env = "SYNTHETIC_NUMA_NODE", default_value_t = DEFAULT_NUMA_NODE)]
    pub numa_node: u32,
    /// also bind memory allocations to the node (`numactl -m`)
    #[arg(long)]
    pub membind: bool,
    /// run the generator directly, without numactl
    #[arg(long, conflicts_with_all = ["numa_node", "membind"])]
    pub no_numa: bool,
    #[arg(long, env = "SYNTHETIC_NUMACTL", default_value = DEFAULT_NUMACTL)]
    pub numactl: PathBuf,
    /// load generator binary
    #[arg(long, env = "SYNTHETIC_BIN", default_value = DEFAULT_BINARY)]
    pub binary: PathBuf,
    /// validate the generator arguments before spawning
    #[arg(long)]
    pub check: bool,
    /// print the command instead of running it
    #[arg(long)]
    pub dry_run: bool,
    /// set the log level. All valid RUST_LOG arguments are accepted
    #[arg(long, env = "SYNTHETIC_LOG", default_value = "info")]
    pub log: String,
    #[arg(long, env = "LOG_FORMAT", default_value = "standard")]
    pub log_format: String,
    /// load generator arguments, starting with the server address
    #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl Cli {
    pub fn numa_policy(&self) -> NumaPolicy {
        if self.no_numa {
            NumaPolicy::Disabled
        } else {
            NumaPolicy::Node {
                node: self.numa_node,
                membind: self.membind,
                numactl: self.numactl.clone(),
            }
        }
    }

    /// Parse the forwarded arguments the way the generator will, so a bad
    /// invocation fails here instead of after NUMA setup.
    pub fn check_args(&self) -> Result<synthetic::SyntheticConfig> {
        let cli = synthetic::Cli::try_parse_from(
            iter::once(DEFAULT_BINARY).chain(self.args.iter().map(String::as_str)),
        )?;
        synthetic::SyntheticConfig::try_from(cli)
    }
}
