use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// Map of independently locked slots.
///
/// The outer lock is held only long enough to fetch (or insert) a slot, so work on
/// one key never blocks another key.
pub(crate) struct KeyedSlots<T> {
    slots: Mutex<HashMap<String, Arc<Mutex<T>>>>,
}

impl<T: Default> KeyedSlots<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn slot(&self, key: &str) -> Arc<Mutex<T>> {
        let mut slots = lock(&self.slots);
        Arc::clone(slots.entry(key.to_string()).or_default())
    }
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lazily seeded sequence per key.
///
/// The first `next` for a key runs `seed` under that key's lock; later calls only
/// increment. Seeding failures leave the slot unseeded so the next call retries.
pub(crate) struct Sequences {
    slots: KeyedSlots<Option<u64>>,
}

impl Sequences {
    pub(crate) fn new() -> Self {
        Self {
            slots: KeyedSlots::new(),
        }
    }

    pub(crate) fn next<E>(&self, key: &str, seed: impl FnOnce() -> Result<u64, E>) -> Result<u64, E> {
        let slot = self.slots.slot(key);
        let mut counter = lock(&slot);
        let value = match *counter {
            Some(v) => v,
            None => seed()?,
        };
        *counter = Some(value + 1);
        Ok(value)
    }
}
