//! Versioned, atomically replaceable configuration snapshots.
//!
//! Readers take one `Arc<Versioned<T>>` and work from it; a concurrent
//! `store` never exposes a half-updated value.

use std::sync::Arc;

use arc_swap::ArcSwap;

/// An immutable configuration snapshot tagged with a version.
#[derive(Debug)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// Holder for hot-swappable settings shared by many readers.
#[derive(Debug)]
pub struct HotSwap<T> {
    current: ArcSwap<Versioned<T>>,
}

impl<T> HotSwap<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: ArcSwap::from_pointee(Versioned { version: 1, value }),
        }
    }

    /// Load the current snapshot.
    pub fn load(&self) -> Arc<Versioned<T>> {
        self.current.load_full()
    }

    pub fn version(&self) -> u64 {
        self.current.load().version
    }
}

impl<T: Clone> HotSwap<T> {
    /// Replace the snapshot; returns the new version.
    pub fn store(&self, value: T) -> u64 {
        // rcu may retry under contention, hence the clone per attempt.
        let prev = self.current.rcu(|prev| Versioned {
            version: prev.version + 1,
            value: value.clone(),
        });
        prev.version + 1
    }
}

impl<T: Default> Default for HotSwap<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
