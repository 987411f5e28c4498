use rand::{Error as RandError, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp};

/// Seeded RNG; the same seed always yields the same stream.
#[derive(Clone)]
pub struct DeterministicRng {
    rng: ChaCha8Rng,
}

impl DeterministicRng {
    pub fn new(seed: u64) -> Self {
        DeterministicRng {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Independent stream for component `index` of a run seeded with `seed`.
    pub fn derive(seed: u64, index: u64) -> Self {
        // splitmix64 step so neighbouring indices land far apart
        let mut z = seed ^ index.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        Self::new(z ^ (z >> 31))
    }

    pub fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        min + (self.rng.next_u64() % (max - min))
    }

    pub fn gen_bool(&mut self, probability: f64) -> bool {
        let val = self.rng.next_u64() as f64 / u64::MAX as f64;
        val < probability
    }

    /// Exponentially distributed sample with the given mean, truncated to
    /// whole ticks. A non-positive mean yields 0.
    pub fn exp_ticks(&mut self, mean: f64) -> u64 {
        match Exp::new(1.0 / mean) {
            Ok(dist) if mean > 0.0 => dist.sample(&mut self.rng) as u64,
            _ => 0,
        }
    }
}

impl RngCore for DeterministicRng {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), RandError> {
        self.rng.try_fill_bytes(dest)
    }
}
