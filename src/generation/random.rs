//! Deterministic random numbers for generators

/// Largest value returned by `PseudoRandom::next`
pub const RANDOM_MAX: u32 = 32767;

/// Small seeded RNG; the same seed always yields the same sequence
#[derive(Clone, Debug)]
pub struct PseudoRandom {
    state: u64,
}

impl PseudoRandom {
    pub fn new(seed: u64) -> Self {
        Self { state: seed.wrapping_add(1) }
    }

    /// Advance state and return next u32
    pub fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let mut h = (self.state >> 32) as u32;
        h = h.wrapping_mul(0x45d9f3b);
        h ^= h >> 16;
        h = h.wrapping_mul(0x45d9f3b);
        h ^= h >> 16;
        h
    }

    /// Next value in `0..=RANDOM_MAX`
    pub fn next(&mut self) -> u32 {
        self.next_u32() % (RANDOM_MAX + 1)
    }

    /// Uniform integer in `min..=max`
    pub fn range(&mut self, min: i32, max: i32) -> i32 {
        if max <= min {
            return min;
        }
        let span = (max as i64 - min as i64 + 1) as u64;
        (min as i64 + (self.next_u32() as u64 % span) as i64) as i32
    }

    /// f32 in [0, 1)
    pub fn next_float(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 / (1u32 << 24) as f32
    }

    /// f32 in [min, max)
    pub fn range_f32(&mut self, min: f32, max: f32) -> f32 {
        min + self.next_float() * (max - min)
    }
}
