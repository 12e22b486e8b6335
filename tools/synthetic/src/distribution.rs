//! Service-time and size distributions

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DistributionError {
    #[error("unknown distribution `{0}`")]
    Unknown(String),
    #[error("mean must be a finite non-negative number, got {0}")]
    InvalidMean(f64),
}

/// A distribution of work. Values are in nanoseconds when used for service
/// time, and in bytes when used for key/value sizes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Distribution {
    Zero,
    Constant { value_ns: f64 },
    Exponential { mean_ns: f64 },
    /// 90% at half the mean, 10% at 5.5x the mean
    Bimodal1 { mean_ns: f64 },
    /// 99.9% at half the mean, 0.1% at 500.5x the mean
    Bimodal2 { mean_ns: f64 },
    /// generalized extreme value
    Gev { loc: f64, scale: f64, shape: f64 },
    /// generalized pareto
    GPareto { loc: f64, scale: f64, shape: f64 },
}

impl Distribution {
    /// Build a distribution from its command-line name and a mean in
    /// microseconds.
    pub fn parse(name: &str, mean_us: f64) -> Result<Self, DistributionError> {
        if !mean_us.is_finite() || mean_us < 0.0 {
            return Err(DistributionError::InvalidMean(mean_us));
        }
        let mean_ns = mean_us * 1_000.0;
        Ok(match name {
            "zero" => Self::Zero,
            "constant" => Self::Constant { value_ns: mean_ns },
            "exponential" => Self::Exponential { mean_ns },
            "bimodal1" => Self::Bimodal1 { mean_ns },
            "bimodal2" => Self::Bimodal2 { mean_ns },
            other => return Err(DistributionError::Unknown(other.to_owned())),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Zero => "zero",
            Self::Constant { .. } => "constant",
            Self::Exponential { .. } => "exponential",
            Self::Bimodal1 { .. } => "bimodal1",
            Self::Bimodal2 { .. } => "bimodal2",
            Self::Gev { .. } => "gev",
            Self::GPareto { .. } => "gpareto",
        }
    }

    /// Analytic mean where one is cheap to state.
    pub fn mean(&self) -> Option<f64> {
        match *self {
            Self::Zero => Some(0.0),
            Self::Constant { value_ns } => Some(value_ns),
            Self::Exponential { mean_ns } | Self::Bimodal1 { mean_ns } | Self::Bimodal2 { mean_ns } => {
                Some(mean_ns)
            }
            Self::GPareto { loc, scale, shape } if shape < 1.0 => Some(loc + scale / (1.0 - shape)),
            Self::Gev { .. } | Self::GPareto { .. } => None,
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            Self::Zero => 0.0,
            Self::Constant { value_ns } => value_ns,
            Self::Exponential { mean_ns } => -mean_ns * open_unit(rng).ln(),
            Self::Bimodal1 { mean_ns } => {
                if rng.gen_bool(0.1) {
                    mean_ns * 5.5
                } else {
                    mean_ns * 0.5
                }
            }
            Self::Bimodal2 { mean_ns } => {
                if rng.gen_bool(0.001) {
                    mean_ns * 500.5
                } else {
                    mean_ns * 0.5
                }
            }
            Self::Gev { loc, scale, shape } => {
                let y = -open_unit(rng).ln();
                if shape == 0.0 {
                    loc - scale * y.ln()
                } else {
                    loc + scale * (y.powf(-shape) - 1.0) / shape
                }
            }
            Self::GPareto { loc, scale, shape } => {
                let u = open_unit(rng);
                if shape == 0.0 {
                    loc - scale * u.ln()
                } else {
                    loc + scale * (u.powf(-shape) - 1.0) / shape
                }
            }
        }
    }

    /// Sample rounded to a whole, non-negative quantity.
    pub fn sample_u64<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        let value = self.sample(rng);
        if value.is_finite() && value > 0.0 {
            value.round() as u64
        } else {
            0
        }
    }
}

// uniform on (0, 1], keeps ln() and negative powers finite
fn open_unit<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    1.0 - rng.r#gen::<f64>()
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::{Distribution, DistributionError};

    fn empirical_mean(dist: Distribution, n: usize) -> f64 {
        let mut rng = StdRng::seed_from_u64(7);
        (0..n).map(|_| dist.sample(&mut rng)).sum::<f64>() / n as f64
    }

    #[test]
    fn parse_known_names() {
        assert_eq!(Distribution::parse("zero", 10.0), Ok(Distribution::Zero));
        assert_eq!(
            Distribution::parse("bimodal2", 2.5),
            Ok(Distribution::Bimodal2 { mean_ns: 2_500.0 })
        );
        assert_eq!(
            Distribution::parse("pareto", 1.0),
            Err(DistributionError::Unknown("pareto".to_owned()))
        );
        assert_eq!(
            Distribution::parse("constant", -1.0),
            Err(DistributionError::InvalidMean(-1.0))
        );
    }

    #[test]
    fn bimodal1_preserves_mean() {
        let mean = empirical_mean(Distribution::Bimodal1 { mean_ns: 10_000.0 }, 200_000);
        assert!((mean - 10_000.0).abs() < 300.0, "mean was {mean}");
    }

    #[test]
    fn bimodal2_preserves_mean() {
        let mean = empirical_mean(Distribution::Bimodal2 { mean_ns: 10_000.0 }, 1_000_000);
        assert!((mean - 10_000.0).abs() < 1_000.0, "mean was {mean}");
    }

    #[test]
    fn bimodal_takes_two_values() {
        let dist = Distribution::Bimodal1 { mean_ns: 1_000.0 };
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..10_000 {
            let v = dist.sample_u64(&mut rng);
            assert!(v == 500 || v == 5_500, "unexpected sample {v}");
        }
    }

    #[test]
    fn exponential_mean() {
        let mean = empirical_mean(Distribution::Exponential { mean_ns: 1_000.0 }, 200_000);
        assert!((mean - 1_000.0).abs() < 20.0, "mean was {mean}");
    }

    #[test]
    fn gpareto_never_below_location() {
        let dist = Distribution::GPareto {
            loc: 15.0,
            scale: 214.476,
            shape: 0.348238,
        };
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..10_000 {
            assert!(dist.sample(&mut rng) >= 15.0);
        }
    }
}
