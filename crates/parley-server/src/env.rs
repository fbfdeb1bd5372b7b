//! Environment abstraction for deterministic testing.
//!
//! Decouples server logic from wall-clock time and randomness, so identity
//! allocation and response timestamps are reproducible under a seeded
//! simulation environment.

/// Abstract environment providing time and randomness.
///
/// # Invariants
///
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - Given the same seed, a simulation environment produces the same byte
///   sequence
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current unix time in seconds.
    fn wall_clock_secs(&self) -> i64;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Generates a random `u128`.
    ///
    /// Used for identity ids.
    fn random_u128(&self) -> u128 {
        let mut bytes = [0u8; 16];
        self.random_bytes(&mut bytes);
        u128::from_be_bytes(bytes)
    }
}
