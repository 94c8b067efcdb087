//! # RNG Module
//!
//! Tiny deterministic RNG for workload generation (instruction counts,
//! memory footprints).
//!
//! ## Design Choices
//!
//! **Generator**: XorShift64. Same seed, same workload: a generated run can
//! be replayed exactly.
//!
//! **Bounded sampling**: Lemire's multiply-high method with a bitmask fast
//! path for power-of-two bounds.
//!
//! **No `Copy`**: copying an RNG duplicates the stream. Use `clone()`
//! explicitly when that is really wanted.

/// Deterministic XorShift64 generator.
///
/// NOT thread-safe; each owner keeps its own instance.
#[derive(Clone, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    /// Create a generator from `seed`. Seed 0 is remapped (all-zero state
    /// never advances).
    #[inline]
    pub fn new(seed: u64) -> Self {
        let seed = if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed };
        Self { state: seed }
    }

    /// Seed from the wall clock and a stack address.
    pub fn from_entropy() -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let marker = 0u8;
        let addr = &marker as *const u8 as u64;
        Self::new(nanos ^ addr.rotate_left(32))
    }

    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform value in `[0, upper)`.
    ///
    /// # Panics
    /// Debug-panics if `upper` is 0.
    #[inline]
    pub fn next_u32(&mut self, upper: u32) -> u32 {
        debug_assert!(upper > 0, "upper bound must be > 0");
        if upper.is_power_of_two() {
            // High bits: XorShift's low bits are weaker.
            return ((self.next_u64() >> 32) as u32) & (upper - 1);
        }
        self.bounded_u64(upper as u64) as u32
    }

    /// Uniform value in `[lo, hi]` (inclusive). Returns `lo` if `hi <= lo`.
    #[inline]
    pub fn range_inclusive(&mut self, lo: u32, hi: u32) -> u32 {
        if hi <= lo {
            return lo;
        }
        let span = hi - lo;
        if span == u32::MAX {
            return (self.next_u64() >> 32) as u32;
        }
        lo + self.next_u32(span + 1)
    }

    /// Lemire's nearly-divisionless bounded sampling.
    #[inline]
    fn bounded_u64(&mut self, upper: u64) -> u64 {
        let threshold = upper.wrapping_neg() % upper;
        loop {
            let m = (self.next_u64() as u128) * (upper as u128);
            if (m as u64) >= threshold {
                return (m >> 64) as u64;
            }
        }
    }
}
