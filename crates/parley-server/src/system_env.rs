//! Production environment using the system clock and OS RNG.

use crate::env::Environment;

/// Production environment.
///
/// Time comes from `SystemTime`, randomness from getrandom (OS-level
/// cryptographic RNG), suitable for identity ids.
///
/// # Panics
///
/// Panics if the OS RNG fails. A server that cannot draw unpredictable ids
/// cannot hand out identities safely.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::disallowed_methods)]
    fn wall_clock_secs(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_secs() as i64)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}
