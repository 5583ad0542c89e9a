//! xorshift64* random number generator
//!
//! Same seed → same sequence. Each phase with variance enabled gets its own
//! stream derived from the run seed and the phase id, so adding a phase does
//! not perturb the arrivals of the others.

use serde::{Deserialize, Serialize};

/// Poisson means above this are sampled as a sum of smaller draws.
/// Knuth's method multiplies `mean` uniforms and underflows for large means;
/// the sum of independent Poisson draws is again Poisson.
const POISSON_CHUNK: f64 = 30.0;

/// Deterministic random number generator using xorshift64*
///
/// # Example
/// ```
/// use phase_scheduler_core::RngManager;
///
/// let mut rng = RngManager::new(12345);
/// let value = rng.next_f64();
/// assert!((0.0..1.0).contains(&value));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RngManager {
    /// Internal state (never zero)
    state: u64,
}

impl RngManager {
    /// Create a new RNG with given seed
    pub fn new(seed: u64) -> Self {
        // xorshift state must never be zero
        let state = if seed == 0 { 1 } else { seed };
        Self { state }
    }

    /// Create an independent stream for `stream` (e.g. a phase id) from a run seed
    ///
    /// The stream index is mixed with splitmix64 so neighbouring ids do not
    /// yield correlated sequences.
    ///
    /// # Example
    /// ```
    /// use phase_scheduler_core::RngManager;
    ///
    /// let mut a = RngManager::for_stream(42, 0);
    /// let mut b = RngManager::for_stream(42, 1);
    /// assert_ne!(a.next(), b.next());
    /// ```
    pub fn for_stream(seed: u64, stream: u64) -> Self {
        let mut z = seed ^ stream.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        Self::new(z ^ (z >> 31))
    }

    /// Generate next random u64 value
    pub fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Generate random f64 in range [0.0, 1.0)
    pub fn next_f64(&mut self) -> f64 {
        let value = self.next();
        (value >> 11) as f64 * (1.0 / ((1u64 << 53) as f64))
    }

    /// Sample a Poisson-distributed count with the given mean
    ///
    /// Non-positive or non-finite means yield zero.
    ///
    /// # Example
    /// ```
    /// use phase_scheduler_core::RngManager;
    ///
    /// let mut rng = RngManager::new(7);
    /// assert_eq!(rng.poisson(0.0), 0);
    /// let total: u64 = (0..1000).map(|_| rng.poisson(2.0)).sum();
    /// assert!(total > 1500 && total < 2500);
    /// ```
    pub fn poisson(&mut self, mean: f64) -> u64 {
        if !mean.is_finite() || mean <= 0.0 {
            return 0;
        }
        let mut remaining = mean;
        let mut count = 0;
        while remaining > POISSON_CHUNK {
            count += self.poisson_knuth(POISSON_CHUNK);
            remaining -= POISSON_CHUNK;
        }
        count + self.poisson_knuth(remaining)
    }

    fn poisson_knuth(&mut self, mean: f64) -> u64 {
        let limit = (-mean).exp();
        let mut product = self.next_f64();
        let mut count = 0;
        while product > limit {
            count += 1;
            product *= self.next_f64();
        }
        count
    }

    /// Get current RNG state
    pub fn get_state(&self) -> u64 {
        self.state
    }
}
