//! Chaotic store wrapper for fault injection testing
//!
//! Wraps another store and fails operations at a configurable rate, so tests
//! can check that every caller handles storage faults without corrupting
//! session or membership state.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{Arc, Mutex};

use super::{IdentityStore, StorageError};
use crate::identity::{Group, Identity, IdentityId, Room};

/// Store wrapper that randomly injects failures
///
/// Delegates to an underlying store but fails operations with probability
/// `failure_rate`. The rate can be changed at runtime, so a test can bootstrap
/// cleanly and then turn chaos on. Clones share RNG and rate.
#[derive(Clone)]
pub struct ChaoticStore<S: IdentityStore> {
    inner: S,
    chaos: Arc<Mutex<ChaosState>>,
}

struct ChaosState {
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    rng: ChaoticRng,
    operations: usize,
    failures: usize,
}

/// Linear congruential generator, reproducible for a given seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: IdentityStore> ChaoticStore<S> {
    /// Wrap a store with a fixed default seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Wrap a store with an explicit seed for reproducible chaos.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert_rate(failure_rate);
        Self {
            inner,
            chaos: Arc::new(Mutex::new(ChaosState {
                failure_rate,
                rng: ChaoticRng { state: seed },
                operations: 0,
                failures: 0,
            })),
        }
    }

    /// Change the failure rate for every clone of this store.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    #[allow(clippy::expect_used)]
    pub fn set_failure_rate(&self, failure_rate: f64) {
        assert_rate(failure_rate);
        self.chaos.lock().expect("ChaosState mutex poisoned").failure_rate = failure_rate;
    }

    /// Underlying store (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total operations attempted.
    #[allow(clippy::expect_used)]
    pub fn operation_count(&self) -> usize {
        self.chaos.lock().expect("ChaosState mutex poisoned").operations
    }

    /// Operations that were failed on purpose.
    #[allow(clippy::expect_used)]
    pub fn failure_count(&self) -> usize {
        self.chaos.lock().expect("ChaosState mutex poisoned").failures
    }

    /// Count the operation and decide whether it fails.
    #[allow(clippy::expect_used)]
    fn roll(&self, operation: &'static str) -> Result<(), StorageError> {
        let mut chaos = self.chaos.lock().expect("ChaosState mutex poisoned");
        chaos.operations += 1;
        let rate = chaos.failure_rate;
        if chaos.rng.next() < rate {
            chaos.failures += 1;
            return Err(StorageError::Io(format!("chaotic failure injection in {operation}")));
        }
        Ok(())
    }
}

fn assert_rate(failure_rate: f64) {
    assert!(
        (0.0..=1.0).contains(&failure_rate),
        "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
    );
}

impl<S: IdentityStore> IdentityStore for ChaoticStore<S> {
    fn exists(&self, id: IdentityId) -> Result<bool, StorageError> {
        self.roll("exists")?;
        self.inner.exists(id)
    }

    fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, StorageError> {
        self.roll("keys_matching")?;
        self.inner.keys_matching(pattern)
    }

    fn read_identity(&self, id: IdentityId) -> Result<Option<Identity>, StorageError> {
        self.roll("read_identity")?;
        self.inner.read_identity(id)
    }

    fn write_identity(&self, identity: &Identity) -> Result<(), StorageError> {
        self.roll("write_identity")?;
        self.inner.write_identity(identity)
    }

    fn delete_identity(&self, id: IdentityId) -> Result<(), StorageError> {
        self.roll("delete_identity")?;
        self.inner.delete_identity(id)
    }

    fn read_group(&self, title: &str) -> Result<Option<Group>, StorageError> {
        self.roll("read_group")?;
        self.inner.read_group(title)
    }

    fn write_group(&self, group: &Group) -> Result<(), StorageError> {
        self.roll("write_group")?;
        self.inner.write_group(group)
    }

    fn read_room(&self, group: &str, room: &str) -> Result<Option<Room>, StorageError> {
        self.roll("read_room")?;
        self.inner.read_room(group, room)
    }

    fn write_room(&self, room: &Room) -> Result<(), StorageError> {
        self.roll("write_room")?;
        self.inner.write_room(room)
    }

    fn next_unique_sequence(&self) -> Result<i64, StorageError> {
        self.roll("next_unique_sequence")?;
        self.inner.next_unique_sequence()
    }
}
