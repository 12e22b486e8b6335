use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::distribution::Distribution;

pub const DEFAULT_THREADS: usize = 1;
/// 10 seconds
pub const DEFAULT_RUNTIME_NS: u64 = 10_000_000_000;
pub const DEFAULT_RAMPUP_NS: u64 = 0;
pub const DEFAULT_DISTRIBUTION: &str = "zero";
/// mean service time in microseconds
pub const DEFAULT_MEAN_US: f64 = 167.0;
pub const DEFAULT_SAMPLES: usize = 1;
pub const DEFAULT_MPPS: f64 = 0.02;
pub const DEFAULT_START_MPPS: f64 = 0.0;
pub const DEFAULT_SEED: u64 = 1;
/// every scheduled packet is held in memory for the whole sample
pub const MAX_PACKETS_PER_SAMPLE: f64 = 100_000_000.0;
/// default log level. Can use this argument or SYNTHETIC_LOG env var
pub const DEFAULT_SYNTHETIC_LOG: &str = "info";
/// log as "json", "pretty" or "standard" (unstructured)
pub const DEFAULT_LOG_FORMAT: &str = "standard";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    RuntimeClient,
    LinuxServer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Synthetic,
    Memcached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Udp,
    Tcp,
}

/// Key/value mix used by the memcached protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Workload {
    Usr,
    Etc,
}

#[derive(Debug, Clone, PartialEq, Parser)]
#[command(
    name = "synthetic",
    about = "Open-loop synthetic network load generator"
)]
pub struct Cli {
    /// server address, `host:port`
    pub addr: String,
    /// client configuration file, forwarded as-is and never parsed
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub threads: Option<usize>,
    #[arg(long, value_enum)]
    pub mode: Option<Mode>,
    #[arg(long, value_enum)]
    pub protocol: Option<ProtocolKind>,
    #[arg(long, value_enum)]
    pub transport: Option<Transport>,
    #[arg(long, value_enum)]
    pub workload: Option<Workload>,
    /// length of each sample in nanoseconds
    #[arg(long)]
    pub runtime: Option<u64>,
    /// warm-up window at the start of each sample in nanoseconds
    #[arg(long)]
    pub rampup: Option<u64>,
    /// service time distribution: zero, constant, exponential, bimodal1, bimodal2
    #[arg(short = 'd', long = "distribution")]
    pub distribution: Option<String>,
    /// mean service time in microseconds
    #[arg(long)]
    pub mean: Option<f64>,
    #[arg(long)]
    pub samples: Option<usize>,
    /// target rate of the last sample, millions of packets per second
    #[arg(long)]
    pub mpps: Option<f64>,
    /// rate of the first sample when ramping
    #[arg(long = "start_mpps")]
    pub start_mpps: Option<f64>,
    /// accepted for command-line compatibility; recorded in the report only
    #[arg(short = 's')]
    pub s_switch: bool,
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long)]
    pub json: bool,
    /// set the log level. All valid RUST_LOG arguments are accepted
    #[arg(long, env = "SYNTHETIC_LOG", default_value = DEFAULT_SYNTHETIC_LOG)]
    pub log: String,
    #[arg(long, env = "LOG_FORMAT", default_value = DEFAULT_LOG_FORMAT)]
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub addr: SocketAddr,
    pub config_path: Option<PathBuf>,
    pub threads: usize,
    pub mode: Mode,
    pub protocol: ProtocolKind,
    pub transport: Transport,
    pub workload: Workload,
    pub runtime_ns: u64,
    pub rampup_ns: u64,
    pub distribution: Distribution,
    pub mean_us: f64,
    pub samples: usize,
    pub mpps: f64,
    pub start_mpps: f64,
    pub s_switch: bool,
    pub seed: u64,
    pub json: bool,
}

impl SyntheticConfig {
    pub fn runtime(&self) -> Duration {
        Duration::from_nanos(self.runtime_ns)
    }

    pub fn rampup(&self) -> Duration {
        Duration::from_nanos(self.rampup_ns)
    }
}

impl TryFrom<Cli> for SyntheticConfig {
    type Error = anyhow::Error;

    fn try_from(args: Cli) -> Result<Self> {
        let threads = args.threads.unwrap_or(DEFAULT_THREADS);
        if threads == 0 {
            bail!("--threads must be greater than 0");
        }
        let runtime_ns = args.runtime.unwrap_or(DEFAULT_RUNTIME_NS);
        if runtime_ns == 0 {
            bail!("--runtime must be greater than 0");
        }
        let rampup_ns = args.rampup.unwrap_or(DEFAULT_RAMPUP_NS);
        if rampup_ns >= runtime_ns {
            bail!("--rampup must be shorter than --runtime");
        }
        let samples = args.samples.unwrap_or(DEFAULT_SAMPLES);
        if samples == 0 {
            bail!("--samples must be greater than 0");
        }
        let mpps = args.mpps.unwrap_or(DEFAULT_MPPS);
        if !mpps.is_finite() || mpps <= 0.0 {
            bail!("--mpps must be greater than 0");
        }
        let start_mpps = args.start_mpps.unwrap_or(DEFAULT_START_MPPS);
        if !(0.0..=mpps).contains(&start_mpps) {
            bail!("--start_mpps must be between 0 and --mpps");
        }
        let expected_packets = mpps * 1e6 * Duration::from_nanos(runtime_ns).as_secs_f64();
        if expected_packets > MAX_PACKETS_PER_SAMPLE {
            bail!(
                "--mpps {mpps} over --runtime {runtime_ns}ns schedules ~{expected_packets:.0} packets per sample, more than the {MAX_PACKETS_PER_SAMPLE:.0} limit"
            );
        }
        let mean_us = args.mean.unwrap_or(DEFAULT_MEAN_US);
        if !mean_us.is_finite() || mean_us < 0.0 {
            bail!("--mean must be a non-negative number");
        }

        let name = args
            .distribution
            .unwrap_or_else(|| DEFAULT_DISTRIBUTION.to_owned());
        let distribution = Distribution::parse(&name, mean_us)
            .with_context(|| format!("invalid distribution `{name}`"))?;

        let addr = resolve_addr(&args.addr)
            .with_context(|| format!("failed to resolve server address `{}`", args.addr))?;

        Ok(Self {
            addr,
            config_path: args.config,
            threads,
            mode: args.mode.unwrap_or(Mode::RuntimeClient),
            protocol: args.protocol.unwrap_or(ProtocolKind::Synthetic),
            transport: args.transport.unwrap_or(Transport::Udp),
            workload: args.workload.unwrap_or(Workload::Usr),
            runtime_ns,
            rampup_ns,
            distribution,
            mean_us,
            samples,
            mpps,
            start_mpps,
            s_switch: args.s_switch,
            seed: args.seed.unwrap_or(DEFAULT_SEED),
            json: args.json,
        })
    }
}

fn resolve_addr(raw: &str) -> Result<SocketAddr> {
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Ok(addr);
    }
    raw.to_socket_addrs()?
        .next()
        .with_context(|| format!("no addresses found for `{raw}`"))
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Mode, ProtocolKind, SyntheticConfig, Transport};
    use crate::distribution::Distribution;

    #[test]
    fn parse_runtime_client_line() {
        let cli = Cli::try_parse_from([
            "synthetic",
            "10.100.100.102:5190",
            "--config",
            "client.config",
            "--threads",
            "16",
            "--mode",
            "runtime-client",
            "--protocol",
            "synthetic",
            "--transport",
            "udp",
            "--runtime",
            "1000000000",
            "--rampup",
            "100000000",
            "-d",
            "bimodal1",
            "--mean",
            "10",
            "--samples",
            "20",
            "--mpps",
            "1.6",
            "--start_mpps",
            "0.1",
            "-s",
        ])
        .expect("cli should parse");
        let cfg = SyntheticConfig::try_from(cli).expect("config should build");

        assert_eq!(cfg.addr, "10.100.100.102:5190".parse().expect("addr"));
        assert_eq!(cfg.threads, 16);
        assert_eq!(cfg.mode, Mode::RuntimeClient);
        assert_eq!(cfg.protocol, ProtocolKind::Synthetic);
        assert_eq!(cfg.transport, Transport::Udp);
        assert_eq!(cfg.runtime_ns, 1_000_000_000);
        assert_eq!(cfg.rampup_ns, 100_000_000);
        assert_eq!(cfg.distribution, Distribution::Bimodal1 { mean_ns: 10_000.0 });
        assert_eq!(cfg.samples, 20);
        assert!(cfg.s_switch);
        assert_eq!(
            cfg.config_path.as_deref(),
            Some(std::path::Path::new("client.config"))
        );
    }

    #[test]
    fn defaults_apply() {
        let cli = Cli::try_parse_from(["synthetic", "127.0.0.1:5190"]).expect("cli should parse");
        let cfg = SyntheticConfig::try_from(cli).expect("config should build");

        assert_eq!(cfg.threads, 1);
        assert_eq!(cfg.mode, Mode::RuntimeClient);
        assert_eq!(cfg.samples, 1);
        assert_eq!(cfg.distribution, Distribution::Zero);
        assert!(!cfg.s_switch);
    }

    #[test]
    fn reject_start_above_target() {
        let cli = Cli::try_parse_from([
            "synthetic",
            "127.0.0.1:5190",
            "--mpps",
            "0.5",
            "--start_mpps",
            "0.6",
        ])
        .expect("cli should parse");
        let err = SyntheticConfig::try_from(cli).expect_err("expected start_mpps error");

        assert!(err.to_string().contains("--start_mpps"));
    }

    #[test]
    fn reject_rampup_longer_than_runtime() {
        let cli = Cli::try_parse_from([
            "synthetic",
            "127.0.0.1:5190",
            "--runtime",
            "1000",
            "--rampup",
            "1000",
        ])
        .expect("cli should parse");
        let err = SyntheticConfig::try_from(cli).expect_err("expected rampup error");

        assert!(err.to_string().contains("--rampup"));
    }

    #[test]
    fn reject_oversized_schedule() {
        let cli = Cli::try_parse_from([
            "synthetic",
            "127.0.0.1:5190",
            "--mpps",
            "20",
            "--runtime",
            "10000000000",
        ])
        .expect("cli should parse");
        let err = SyntheticConfig::try_from(cli).expect_err("expected schedule size error");

        assert!(err.to_string().contains("--mpps"));
    }

    #[test]
    fn reject_unknown_distribution() {
        let cli = Cli::try_parse_from(["synthetic", "127.0.0.1:5190", "-d", "trimodal"])
            .expect("cli should parse");
        let err = SyntheticConfig::try_from(cli).expect_err("expected distribution error");

        assert!(format!("{err:#}").contains("trimodal"));
    }
}
