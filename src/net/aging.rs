//! Key/value table with lazily expiring entries
//!
//! Backs the ARP cache, the pending-resolution slots and the UDP port table.
//! Nothing runs in the background: an entry older than the TTL is dropped the
//! next time it is looked at.

use alloc::collections::BTreeMap;
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgingMapError {
    /// Capacity reached and no expired entry could be evicted
    MapFull,
}

impl fmt::Display for AgingMapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgingMapError::MapFull => write!(f, "Map is full"),
        }
    }
}

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    inserted_at: u64,
}

/// Map whose entries become invisible `ttl_secs` after insertion
#[derive(Debug, Clone)]
pub struct AgingMap<K, V> {
    entries: BTreeMap<K, Slot<V>>,
    /// `None` means entries never expire
    ttl_secs: Option<u64>,
    capacity: Option<usize>,
}

impl<K: Ord + Copy, V> AgingMap<K, V> {
    pub const fn new(ttl_secs: Option<u64>, capacity: Option<usize>) -> Self {
        Self {
            entries: BTreeMap::new(),
            ttl_secs,
            capacity,
        }
    }

    fn is_expired(&self, inserted_at: u64, now: u64) -> bool {
        match self.ttl_secs {
            Some(ttl) => now.saturating_sub(inserted_at) >= ttl,
            None => false,
        }
    }

    /// Drop `key` if its entry has aged out; returns whether a live entry remains
    fn refresh(&mut self, key: &K, now: u64) -> bool {
        let expired = match self.entries.get(key) {
            Some(slot) => self.is_expired(slot.inserted_at, now),
            None => return false,
        };
        if expired {
            self.entries.remove(key);
        }
        !expired
    }

    /// Look up a live entry
    pub fn get(&mut self, key: &K, now: u64) -> Option<&V> {
        if !self.refresh(key, now) {
            return None;
        }
        self.entries.get(key).map(|slot| &slot.value)
    }

    pub fn contains(&mut self, key: &K, now: u64) -> bool {
        self.refresh(key, now)
    }

    /// Insert or refresh an entry, stamping it with `now`
    pub fn set(&mut self, key: K, value: V, now: u64) -> Result<(), AgingMapError> {
        if let Some(capacity) = self.capacity {
            if !self.entries.contains_key(&key) && self.entries.len() >= capacity {
                self.purge_expired(now);
                if self.entries.len() >= capacity {
                    return Err(AgingMapError::MapFull);
                }
            }
        }

        self.entries.insert(key, Slot { value, inserted_at: now });
        Ok(())
    }

    /// Swap the value of a live entry, keeping its original timestamp
    ///
    /// Returns the previous value, or gives `value` back if there is no live entry.
    pub fn replace(&mut self, key: &K, value: V, now: u64) -> Result<V, V> {
        if !self.refresh(key, now) {
            return Err(value);
        }
        match self.entries.get_mut(key) {
            Some(slot) => Ok(core::mem::replace(&mut slot.value, value)),
            None => Err(value),
        }
    }

    /// Remove and return a live entry; an aged-out entry is discarded instead
    pub fn take(&mut self, key: &K, now: u64) -> Option<V> {
        if !self.refresh(key, now) {
            return None;
        }
        self.remove(key)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|slot| slot.value)
    }

    /// Remove every aged-out entry, returning how many were dropped
    pub fn purge_expired(&mut self, now: u64) -> usize {
        let ttl = match self.ttl_secs {
            Some(ttl) => ttl,
            None => return 0,
        };
        let before = self.entries.len();
        self.entries
            .retain(|_, slot| now.saturating_sub(slot.inserted_at) < ttl);
        before - self.entries.len()
    }

    /// Live entries as `(key, value, inserted_at)`
    pub fn iter(&self, now: u64) -> impl Iterator<Item = (&K, &V, u64)> + '_ {
        self.entries
            .iter()
            .filter(move |(_, slot)| !self.is_expired(slot.inserted_at, now))
            .map(|(key, slot)| (key, &slot.value, slot.inserted_at))
    }

    /// Number of stored entries, expired ones included until purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
