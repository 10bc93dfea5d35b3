//! Deterministic weighted random choice (§9 Design Notes).
//!
//! The original throws away a `ZeroDivisionError` when asked to weight an
//! empty candidate list; here "no candidates" is just `None`. The sampler is
//! seeded per tick so property tests are reproducible; production reseeds
//! from system entropy via `WeightedSampler::from_entropy`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct WeightedSampler {
    rng: StdRng,
}

impl WeightedSampler {
    pub fn from_seed(seed: u64) -> Self {
        WeightedSampler { rng: StdRng::seed_from_u64(seed) }
    }

    pub fn from_entropy() -> Self {
        WeightedSampler { rng: StdRng::from_entropy() }
    }

    /// Picks an index into `weights` proportionally to its value. Zero and
    /// negative weights never win. Returns `None` if every weight is zero
    /// (or the slice is empty) instead of raising, per the design note above.
    pub fn choose(&mut self, weights: &[f64]) -> Option<usize> {
        let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
        if total <= 0.0 {
            return None;
        }
        let mut draw = self.rng.gen::<f64>() * total;
        for (idx, weight) in weights.iter().enumerate() {
            if *weight <= 0.0 {
                continue;
            }
            if draw < *weight {
                return Some(idx);
            }
            draw -= weight;
        }
        weights.iter().rposition(|w| *w > 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_weights_return_none() {
        let mut sampler = WeightedSampler::from_seed(1);
        assert_eq!(sampler.choose(&[]), None);
        assert_eq!(sampler.choose(&[0.0, 0.0]), None);
    }

    #[test]
    fn only_positive_weight_always_wins() {
        let mut sampler = WeightedSampler::from_seed(42);
        for _ in 0..50 {
            assert_eq!(sampler.choose(&[0.0, 5.0, 0.0]), Some(1));
        }
    }

    #[test]
    fn same_seed_is_reproducible() {
        let mut a = WeightedSampler::from_seed(7);
        let mut b = WeightedSampler::from_seed(7);
        let weights = [1.0, 2.0, 3.0, 4.0];
        for _ in 0..20 {
            assert_eq!(a.choose(&weights), b.choose(&weights));
        }
    }
}
