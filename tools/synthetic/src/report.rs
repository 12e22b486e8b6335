use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::{Mode, ProtocolKind, SyntheticConfig, Transport, Workload};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfigSnapshot {
    pub addr: String,
    pub config_path: Option<PathBuf>,
    pub threads: usize,
    pub mode: Mode,
    pub protocol: ProtocolKind,
    pub transport: Transport,
    pub workload: Workload,
    pub runtime_ns: u64,
    pub rampup_ns: u64,
    pub distribution: String,
    pub mean_us: f64,
    pub samples: usize,
    pub mpps: f64,
    pub start_mpps: f64,
    pub s_switch: bool,
    pub seed: u64,
}

impl From<&SyntheticConfig> for RunConfigSnapshot {
    fn from(config: &SyntheticConfig) -> Self {
        Self {
            addr: config.addr.to_string(),
            config_path: config.config_path.clone(),
            threads: config.threads,
            mode: config.mode,
            protocol: config.protocol,
            transport: config.transport,
            workload: config.workload,
            runtime_ns: config.runtime_ns,
            rampup_ns: config.rampup_ns,
            distribution: config.distribution.name().to_owned(),
            mean_us: config.mean_us,
            samples: config.samples,
            mpps: config.mpps,
            start_mpps: config.start_mpps,
            s_switch: config.s_switch,
            seed: config.seed,
        }
    }
}

/// Latency percentiles in microseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub p50_us: Option<f64>,
    pub p90_us: Option<f64>,
    pub p99_us: Option<f64>,
    pub p999_us: Option<f64>,
    pub p9999_us: Option<f64>,
}

impl LatencySummary {
    /// `latencies_ns` must be sorted ascending.
    pub fn from_sorted(latencies_ns: &[u64]) -> Self {
        let at = |p| percentile(latencies_ns, p).map(|ns| ns as f64 / 1_000.0);
        Self {
            p50_us: at(0.50),
            p90_us: at(0.90),
            p99_us: at(0.99),
            p999_us: at(0.999),
            p9999_us: at(0.9999),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub step: usize,
    pub target_mpps: f64,
    pub target_pps: f64,
    /// responses per second over the measured window
    pub achieved_pps: f64,
    /// packets scheduled inside the measured window
    pub scheduled: usize,
    pub sent: usize,
    pub received: usize,
    pub dropped: usize,
    pub never_sent: usize,
    pub errors: usize,
    pub latency: LatencySummary,
    /// wall clock start of the step, milliseconds since the unix epoch
    pub started_unix_ms: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestReport {
    pub config: RunConfigSnapshot,
    pub passed: bool,
    pub steps: Vec<StepReport>,
}

impl LoadTestReport {
    pub fn new(config: &SyntheticConfig, steps: Vec<StepReport>) -> Self {
        let passed = !steps.is_empty() && steps.iter().all(|step| step.received > 0);
        Self {
            config: RunConfigSnapshot::from(config),
            passed,
            steps,
        }
    }

    pub fn human_summary(&self) -> String {
        let mut output = String::new();
        output.push_str(&format!(
            "synthetic {} {:?}/{:?} -> {} ({} threads)\n",
            if self.passed { "PASS" } else { "FAIL" },
            self.config.protocol,
            self.config.transport,
            self.config.addr,
            self.config.threads,
        ));
        output.push_str(
            "Distribution, Target, Actual, Dropped, Never Sent, Median, 90th, 99th, 99.9th, 99.99th, Start\n",
        );
        for step in &self.steps {
            output.push_str(&format!(
                "{}, {:.0}, {:.0}, {}, {}, {}, {}, {}, {}, {}, {}\n",
                self.config.distribution,
                step.target_pps,
                step.achieved_pps,
                step.dropped,
                step.never_sent,
                fmt_us(step.latency.p50_us),
                fmt_us(step.latency.p90_us),
                fmt_us(step.latency.p99_us),
                fmt_us(step.latency.p999_us),
                fmt_us(step.latency.p9999_us),
                step.started_unix_ms,
            ));
        }
        output
    }
}

fn fmt_us(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_owned(), |us| format!("{us:.1}"))
}

pub fn percentile(values: &[u64], p: f64) -> Option<u64> {
    if values.is_empty() {
        return None;
    }
    let index = ((values.len() - 1) as f64 * p).round() as usize;
    values.get(index).copied()
}

#[cfg(test)]
mod tests {
    use super::{LatencySummary, percentile};

    #[test]
    fn percentile_picks_nearest_rank() {
        let values = (1..=100).collect::<Vec<u64>>();
        assert_eq!(percentile(&values, 0.0), Some(1));
        assert_eq!(percentile(&values, 0.5), Some(51));
        assert_eq!(percentile(&values, 0.99), Some(99));
        assert_eq!(percentile(&values, 1.0), Some(100));
        assert_eq!(percentile(&[], 0.5), None);
    }

    #[test]
    fn summary_converts_to_micros() {
        let summary = LatencySummary::from_sorted(&[1_000, 2_000, 3_000]);
        assert_eq!(summary.p50_us, Some(2.0));
        assert_eq!(summary.p9999_us, Some(3.0));
        assert_eq!(LatencySummary::from_sorted(&[]), LatencySummary::default());
    }
}
