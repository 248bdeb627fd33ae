//! Last-known-good storage for graceful degradation.
//!
//! When a source fails, dependent UI should show the most recent successful
//! payload with a staleness indicator rather than an error screen. Each rate
//! source feeds this store on success and reads it back from its fallback
//! path.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

struct Stored<T> {
    value: T,
    stored_at: Instant,
}

/// Shared cell holding the most recent successful payload.
pub struct LastKnownGood<T> {
    slot: Mutex<Option<Stored<T>>>,
}

impl<T: Clone> LastKnownGood<T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Replace the stored payload with a fresh one.
    pub fn store(&self, value: T) {
        *self.slot.lock() = Some(Stored {
            value,
            stored_at: Instant::now(),
        });
    }

    /// Copy of the stored payload and its age, if anything was ever stored.
    pub fn stale_copy(&self) -> Option<(T, Duration)> {
        self.slot
            .lock()
            .as_ref()
            .map(|stored| (stored.value.clone(), stored.stored_at.elapsed()))
    }

    /// Whether a payload has been stored.
    pub fn is_primed(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl<T: Clone> Default for LastKnownGood<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_store_has_nothing() {
        let store: LastKnownGood<f64> = LastKnownGood::new();
        assert!(!store.is_primed());
        assert!(store.stale_copy().is_none());
    }

    #[test]
    fn stores_and_ages() {
        let store = LastKnownGood::new();
        store.store(191.5);

        let (value, age) = store.stale_copy().unwrap();
        assert_eq!(value, 191.5);
        assert!(age < Duration::from_secs(1));
    }

    #[test]
    fn newer_value_replaces_older() {
        let store = LastKnownGood::new();
        store.store(191.5);
        store.store(192.0);

        let (value, _) = store.stale_copy().unwrap();
        assert_eq!(value, 192.0);
    }
}
