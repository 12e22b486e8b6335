use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::distribution::Distribution;

/// One scheduled request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub index: u32,
    /// offset from the start of the sample, in nanoseconds
    pub target_start: u64,
    /// service time the server should spend, in nanoseconds
    pub work: u64,
    pub randomness: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepPlan {
    pub step: usize,
    pub target_mpps: f64,
}

impl StepPlan {
    pub fn target_pps(&self) -> f64 {
        self.target_mpps * 1_000_000.0
    }
}

/// Rates for each sample of a run. A single sample runs at `mpps`; more
/// samples ramp linearly toward it, starting at `start_mpps`, or at the first
/// even step above zero when no start is given.
pub fn ramp_steps(start_mpps: f64, mpps: f64, samples: usize) -> Vec<StepPlan> {
    if samples <= 1 {
        return vec![StepPlan {
            step: 0,
            target_mpps: mpps,
        }];
    }
    (0..samples)
        .map(|step| {
            let target_mpps = if start_mpps > 0.0 {
                start_mpps + (mpps - start_mpps) * step as f64 / (samples - 1) as f64
            } else {
                mpps * (step + 1) as f64 / samples as f64
            };
            StepPlan { step, target_mpps }
        })
        .collect()
}

/// Generate an open-loop schedule of Poisson arrivals at `rate_pps` covering
/// `runtime`.
pub fn gen_schedule<R: Rng + ?Sized>(
    rate_pps: f64,
    runtime: Duration,
    distribution: &Distribution,
    rng: &mut R,
) -> Vec<Packet> {
    if rate_pps <= 0.0 {
        return Vec::new();
    }
    let runtime_ns = runtime.as_nanos().min(u64::MAX as u128) as u64;
    let interarrival = Distribution::Exponential {
        mean_ns: 1e9 / rate_pps,
    };

    let mut packets = Vec::with_capacity((rate_pps * runtime.as_secs_f64()) as usize + 1);
    let mut last = 0u64;
    loop {
        last = last.saturating_add(interarrival.sample_u64(rng));
        if last >= runtime_ns || packets.len() >= u32::MAX as usize {
            break;
        }
        packets.push(Packet {
            index: packets.len() as u32,
            target_start: last,
            work: distribution.sample_u64(rng),
            randomness: rng.r#gen(),
        });
    }
    packets
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::{gen_schedule, ramp_steps};
    use crate::distribution::Distribution;

    fn rates(steps: &[super::StepPlan]) -> Vec<f64> {
        steps.iter().map(|s| (s.target_mpps * 1000.0).round() / 1000.0).collect()
    }

    #[test]
    fn single_sample_uses_target() {
        assert_eq!(rates(&ramp_steps(0.1, 1.0, 1)), vec![1.0]);
    }

    #[test]
    fn ramp_from_start() {
        assert_eq!(rates(&ramp_steps(0.2, 1.0, 5)), vec![0.2, 0.4, 0.6, 0.8, 1.0]);
    }

    #[test]
    fn ramp_from_zero_skips_zero() {
        assert_eq!(rates(&ramp_steps(0.0, 1.0, 4)), vec![0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn schedule_is_ordered_and_bounded() {
        let mut rng = StdRng::seed_from_u64(1);
        let runtime = Duration::from_millis(100);
        let packets = gen_schedule(100_000.0, runtime, &Distribution::Zero, &mut rng);

        // ~10k expected
        assert!((9_000..11_000).contains(&packets.len()), "{}", packets.len());
        assert!(packets.windows(2).all(|w| w[0].target_start <= w[1].target_start));
        assert!(packets.iter().all(|p| p.target_start < 100_000_000));
        assert!(packets.iter().enumerate().all(|(i, p)| p.index as usize == i));
    }

    #[test]
    fn schedule_is_deterministic_per_seed() {
        let dist = Distribution::Bimodal1 { mean_ns: 1_000.0 };
        let a = gen_schedule(
            10_000.0,
            Duration::from_millis(10),
            &dist,
            &mut StdRng::seed_from_u64(9),
        );
        let b = gen_schedule(
            10_000.0,
            Duration::from_millis(10),
            &dist,
            &mut StdRng::seed_from_u64(9),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn zero_rate_is_empty() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(gen_schedule(0.0, Duration::from_secs(1), &Distribution::Zero, &mut rng).is_empty());
    }
}
