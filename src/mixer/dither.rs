//! Triangular dither
//!
//! The difference of two successive single-bit draws has a triangular
//! distribution over -1..=1 and a first-order high-pass spectrum.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Explicitly seeded two-tap noise source
#[derive(Debug, Clone)]
pub struct TriangularDither {
    rng: SmallRng,
    seed: u64,
    previous: i32,
}

impl TriangularDither {
    /// Create a noise source; equal seeds give equal sequences
    pub fn new(seed: u64) -> Self {
        TriangularDither {
            rng: SmallRng::seed_from_u64(seed),
            seed,
            previous: 0,
        }
    }

    /// Next dither value in -1..=1
    #[inline]
    pub fn next_value(&mut self) -> i32 {
        let current = self.rng.random::<bool>() as i32;
        let value = current - self.previous;
        self.previous = current;
        value
    }

    /// Restart the sequence from the original seed
    pub fn reset(&mut self) {
        self.rng = SmallRng::seed_from_u64(self.seed);
        self.previous = 0;
    }
}
