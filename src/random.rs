//! Random number streams for the stochastic pair forces.

use crate::Real;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Distribution of the per-pair random number zeta. Fixed for a whole run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RandomDistribution {
    #[default]
    Gaussian,
    /// Uniform on [-sqrt(3), sqrt(3)]: zero mean, unit variance.
    Uniform,
}

const SQRT_3: Real = 1.732_050_807_568_877_2;

impl RandomDistribution {
    #[inline]
    pub fn draw<R: Rng>(self, rng: &mut R) -> Real {
        match self {
            RandomDistribution::Gaussian => StandardNormal.sample(rng),
            RandomDistribution::Uniform => rng.random_range(-SQRT_3..SQRT_3),
        }
    }
}

/// Hands out stream seeds from one base seed and an atomic counter, so the
/// set of streams is reproducible for a given seed and construction order.
pub struct SeedSequence {
    base: u64,
    counter: AtomicU64,
}

impl SeedSequence {
    pub fn new(base: u64) -> Self {
        Self {
            base,
            counter: AtomicU64::new(0),
        }
    }

    pub fn next_seed(&self) -> u64 {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        splitmix64(self.base ^ splitmix64(n.wrapping_add(0x9E37_79B9_7F4A_7C15)))
    }

    pub fn next_stream(&self) -> StdRng {
        StdRng::seed_from_u64(self.next_seed())
    }
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
