// Copyright 2022 Lucas Javaudin
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Reproducible random streams.
//!
//! A [RandomStream] is re-seeded before each choice occasion from a pure function of a base
//! seed, a stable entity id and a small integer salt. No wall-clock or thread identity is ever
//! mixed in, so the sequence of draws of an entity does not depend on how the population is
//! partitioned between workers.
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rand_xorshift::XorShiftRng;

/// Golden-ratio increment of the splitmix64 generator.
const GOLDEN_GAMMA: u64 = 0x9e37_79b9_7f4a_7c15;

/// Values below this threshold are considered as zero for the log-normal parameters.
const TINY: f64 = 1e-12;

/// Finalizer of the splitmix64 generator.
const fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Returns the seed of the stream identified by `(base_seed, entity_id, salt)`.
///
/// Each component goes through its own mixing round so that, e.g., `(entity 1, salt 20)` and
/// `(entity 21, salt 0)` end up far apart.
pub const fn stream_seed(base_seed: u64, entity_id: u64, salt: u32) -> u64 {
    let mut h = mix64(base_seed.wrapping_add(GOLDEN_GAMMA));
    h = mix64(h ^ entity_id.wrapping_mul(GOLDEN_GAMMA));
    mix64(h ^ (salt as u64).wrapping_add(1).wrapping_mul(GOLDEN_GAMMA))
}

/// Deterministic pseudo-random source keyed by an entity id and a salt.
///
/// # Example
///
/// ```
/// use choice::RandomStream;
///
/// let mut stream = RandomStream::new(42);
/// stream.reset(1001, 20);
/// let first = stream.uniform01();
/// stream.reset(1001, 20);
/// assert_eq!(stream.uniform01(), first);
/// ```
#[derive(Clone, Debug)]
pub struct RandomStream {
    base_seed: u64,
    entity_id: u64,
    salt: u32,
    rng: XorShiftRng,
}

impl RandomStream {
    /// Creates a stream for the given base seed, positioned on entity 0 with salt 0.
    pub fn new(base_seed: u64) -> Self {
        RandomStream {
            base_seed,
            entity_id: 0,
            salt: 0,
            rng: XorShiftRng::seed_from_u64(stream_seed(base_seed, 0, 0)),
        }
    }

    /// Re-seeds the stream for a new choice occasion.
    pub fn reset(&mut self, entity_id: u64, salt: u32) {
        self.entity_id = entity_id;
        self.salt = salt;
        self.rng = XorShiftRng::seed_from_u64(stream_seed(self.base_seed, entity_id, salt));
    }

    /// Returns an independent stream for the same entity, keyed by an additional salt.
    ///
    /// The parent stream is not advanced.
    pub fn substream(&self, salt: u32) -> Self {
        let seed = mix64(
            stream_seed(self.base_seed, self.entity_id, self.salt)
                ^ (salt as u64).wrapping_add(1).wrapping_mul(GOLDEN_GAMMA),
        );
        RandomStream {
            base_seed: self.base_seed,
            entity_id: self.entity_id,
            salt: self.salt,
            rng: XorShiftRng::seed_from_u64(seed),
        }
    }

    /// Base seed of the stream.
    pub const fn base_seed(&self) -> u64 {
        self.base_seed
    }

    /// Entity id of the current occasion.
    pub const fn entity_id(&self) -> u64 {
        self.entity_id
    }

    /// Salt of the current occasion.
    pub const fn salt(&self) -> u32 {
        self.salt
    }

    /// Draws a uniform value in `[0, 1)`.
    pub fn uniform01(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Draws an integer uniformly in `[low, high)`.
    ///
    /// Returns `low` when the range is empty.
    pub fn int_in_range(&mut self, low: i64, high: i64) -> i64 {
        if high <= low {
            return low;
        }
        self.rng.gen_range(low..high)
    }

    /// Draws a value from a normal distribution.
    ///
    /// A non-positive or non-finite standard deviation yields the mean.
    pub fn normal(&mut self, mean: f64, std_dev: f64) -> f64 {
        match Normal::new(mean, std_dev) {
            Ok(dist) if std_dev > 0.0 => dist.sample(&mut self.rng),
            _ => mean,
        }
    }

    /// Draws a value from a log-normal distribution with the given mean and standard deviation
    /// (of the log-normal variable itself, not of its logarithm).
    ///
    /// Returns 0 if the mean or the standard deviation is not positive.
    pub fn log_normal(&mut self, mean: f64, std_dev: f64) -> f64 {
        if mean <= TINY || std_dev <= TINY {
            return 0.0;
        }
        let c2 = (std_dev / mean).powi(2);
        let mu = mean.ln() - 0.5 * (c2 + 1.0).ln();
        let sigma = (c2 + 1.0).ln().sqrt();
        self.normal(mu, sigma).exp()
    }

    /// Shuffles a slice in place (Fisher-Yates).
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        slice.shuffle(&mut self.rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draws(stream: &mut RandomStream, n: usize) -> Vec<f64> {
        (0..n).map(|_| stream.uniform01()).collect()
    }

    #[test]
    fn reset_is_reproducible_test() {
        let mut a = RandomStream::new(7);
        let mut b = RandomStream::new(7);
        // Advance `b` so that its state differs before the reset.
        b.reset(3, 1);
        draws(&mut b, 17);
        a.reset(1001, 20);
        b.reset(1001, 20);
        assert_eq!(draws(&mut a, 10), draws(&mut b, 10));
    }

    #[test]
    fn salts_and_entities_do_not_collide_test() {
        let mut stream = RandomStream::new(7);
        stream.reset(1, 20);
        let x = draws(&mut stream, 5);
        stream.reset(1, 21);
        let y = draws(&mut stream, 5);
        stream.reset(21, 0);
        let z = draws(&mut stream, 5);
        assert_ne!(x, y);
        assert_ne!(x, z);
        assert_ne!(stream_seed(7, 1, 20), stream_seed(7, 21, 0));
        assert_ne!(stream_seed(7, 1, 0), stream_seed(8, 1, 0));
    }

    #[test]
    fn substream_does_not_advance_parent_test() {
        let mut parent = RandomStream::new(3);
        parent.reset(5, 2);
        let mut child = parent.substream(1);
        let expected = {
            let mut clone = parent.clone();
            clone.uniform01()
        };
        draws(&mut child, 3);
        assert_eq!(parent.uniform01(), expected);
        let mut child2 = parent.substream(2);
        let mut child1 = parent.substream(1);
        assert_ne!(child1.uniform01(), child2.uniform01());
    }

    #[test]
    fn uniform_and_integer_ranges_test() {
        let mut stream = RandomStream::new(11);
        stream.reset(99, 0);
        for _ in 0..1000 {
            let u = stream.uniform01();
            assert!((0.0..1.0).contains(&u));
            let i = stream.int_in_range(-3, 4);
            assert!((-3..4).contains(&i));
        }
        assert_eq!(stream.int_in_range(5, 5), 5);
        assert_eq!(stream.int_in_range(5, 2), 5);
    }

    #[test]
    fn normal_and_log_normal_test() {
        let mut stream = RandomStream::new(1);
        stream.reset(1, 0);
        assert_eq!(stream.normal(2.0, 0.0), 2.0);
        assert_eq!(stream.log_normal(0.0, 1.0), 0.0);
        let n = 20_000;
        let mean = (0..n).map(|_| stream.log_normal(10.0, 2.0)).sum::<f64>() / n as f64;
        assert!((mean - 10.0).abs() < 0.2, "mean = {mean}");
    }
}
