//! Striped key locks.
//!
//! A `KeyLocks` table holds a fixed number of mutexes. Every key hashes to
//! exactly one stripe, so two callers working on the same key always
//! serialize, while callers on different keys usually proceed in parallel
//! (they only contend when their keys share a stripe).
//!
//! Callers must never hold two guards from the same table at once.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

/// Fixed-size table of mutex stripes.
pub struct KeyLocks {
    name: &'static str,
    stripes: Box<[Mutex<()>]>,
}

impl KeyLocks {
    /// Create a table with `stripes` mutexes (at least one).
    pub fn new(name: &'static str, stripes: usize) -> Self {
        let stripes = (0..stripes.max(1)).map(|_| Mutex::new(())).collect();
        Self { name, stripes }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// Index of the stripe guarding `key`.
    pub fn stripe_of<K: Hash + ?Sized>(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    /// Block until the stripe for `key` is held.
    ///
    /// A poisoned stripe is recovered: it guards no data, so the only
    /// consequence of a panic while holding it is the lost critical section.
    pub fn lock<K: Hash + ?Sized>(&self, key: &K) -> KeyGuard<'_> {
        let stripe = self.stripe_of(key);
        let guard = match self.stripes[stripe].lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(table = self.name, stripe, "Recovered poisoned key lock");
                poisoned.into_inner()
            }
        };
        KeyGuard {
            _guard: guard,
            stripe,
        }
    }
}

impl fmt::Debug for KeyLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyLocks")
            .field("name", &self.name)
            .field("stripes", &self.stripes.len())
            .finish()
    }
}

/// Held stripe; released on drop.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    _guard: MutexGuard<'a, ()>,
    stripe: usize,
}

impl KeyGuard<'_> {
    pub fn stripe(&self) -> usize {
        self.stripe
    }
}
