//! Statistical generators shaping entity selection and think-time.

use rand::Rng;
use rand_distr::{Distribution, Pareto, Zeta};

/// Invalid distribution parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum StatsError {
    EmptyCandidates,
    InvalidParameter { name: &'static str, value: f64 },
}

impl std::fmt::Display for StatsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatsError::EmptyCandidates => write!(f, "entity sampler needs at least one candidate"),
            StatsError::InvalidParameter { name, value } => write!(f, "invalid {name}: {value}"),
        }
    }
}

impl std::error::Error for StatsError {}

/// Zipfian selection over an ordered candidate list.
///
/// Draws an unbounded rank `r >= 1` and maps it to index `(r - 1) mod N`, so
/// callers must order hot items first.
#[derive(Debug, Clone)]
pub struct EntitySampler<T> {
    items: Vec<T>,
    ranks: Zeta<f64>,
}

impl<T: Clone> EntitySampler<T> {
    pub fn new(items: Vec<T>, alpha: f64) -> Result<Self, StatsError> {
        if items.is_empty() {
            return Err(StatsError::EmptyCandidates);
        }
        let ranks = Zeta::new(alpha).map_err(|_| StatsError::InvalidParameter {
            name: "zipf alpha",
            value: alpha,
        })?;
        Ok(Self { items, ranks })
    }

    pub fn sample(&self, rng: &mut impl Rng) -> T {
        self.items[self.sample_index(rng)].clone()
    }

    pub fn sample_index(&self, rng: &mut impl Rng) -> usize {
        // Float-to-int casts saturate, so an infinite rank still lands in range.
        let rank = self.ranks.sample(rng) as u64;
        (rank.saturating_sub(1) % self.items.len() as u64) as usize
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Heavy-tailed think-time: `Lomax(alpha) * mode + min` seconds.
#[derive(Debug, Clone, Copy)]
pub struct DelayGenerator {
    min: f64,
    mode: f64,
    tail: Pareto<f64>,
}

impl DelayGenerator {
    pub fn new(min: f64, mode: f64, alpha: f64) -> Result<Self, StatsError> {
        if !min.is_finite() || min < 0.0 {
            return Err(StatsError::InvalidParameter {
                name: "delay min",
                value: min,
            });
        }
        if !mode.is_finite() || mode <= 0.0 {
            return Err(StatsError::InvalidParameter {
                name: "delay mode",
                value: mode,
            });
        }
        let tail = Pareto::new(1.0, alpha).map_err(|_| StatsError::InvalidParameter {
            name: "pareto alpha",
            value: alpha,
        })?;
        Ok(Self { min, mode, tail })
    }

    /// Returns a delay in seconds; unbounded above, callers clamp if needed.
    pub fn sample_secs(&self, rng: &mut impl Rng) -> f64 {
        let lomax = (self.tail.sample(rng) - 1.0).max(0.0);
        lomax * self.mode + self.min
    }

    pub fn min(&self) -> f64 {
        self.min
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn zipf_prefers_head_of_list() {
        let items: Vec<u64> = (1..=100).collect();
        let sampler = EntitySampler::new(items, 1.2).expect("sampler");
        let mut rng = StdRng::seed_from_u64(11);
        let mut counts = vec![0_u32; 100];
        for _ in 0..10_000 {
            counts[sampler.sample_index(&mut rng)] += 1;
        }
        assert!(counts[0] > counts[49]);
        assert!(counts[0] > counts[1]);
    }

    #[test]
    fn zipf_rejects_bad_input() {
        assert_eq!(
            EntitySampler::<u64>::new(Vec::new(), 1.2).err(),
            Some(StatsError::EmptyCandidates)
        );
        assert!(EntitySampler::new(vec![1_u64], 1.0).is_err());
    }

    #[test]
    fn pareto_has_heavy_tail() {
        let delays = DelayGenerator::new(2.0, 15.0, 1.5).expect("delays");
        let mut rng = StdRng::seed_from_u64(5);
        let mut draws: Vec<f64> = (0..10_000).map(|_| delays.sample_secs(&mut rng)).collect();
        draws.sort_by(|a, b| a.partial_cmp(b).expect("finite"));
        let median = draws[5_000];
        let p99 = draws[9_900];
        assert!(draws[0] >= 2.0);
        assert!(p99 >= 3.0 * median, "p99={p99} median={median}");
    }

    #[test]
    fn pareto_rejects_bad_parameters() {
        assert!(DelayGenerator::new(-1.0, 15.0, 1.5).is_err());
        assert!(DelayGenerator::new(2.0, 0.0, 1.5).is_err());
        assert!(DelayGenerator::new(2.0, 15.0, 0.0).is_err());
    }
}
