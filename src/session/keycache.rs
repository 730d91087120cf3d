//! Skipped-message-key cache
//!
//! Message keys derived for sequence numbers that have not arrived yet,
//! keyed by the header key of the epoch they belong to and then by message
//! number. The outer key is the 32-byte header key *value*, not a
//! reference into the session: the session's receive header key is
//! overwritten on every DH step while cached entries must keep working.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Saved keys older than this are dropped by the sweep that runs on merge.
const SAVED_KEY_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// A message key retained for a message that has not been received, with
/// the time we learned of the gap.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(crate) struct SavedKey {
    pub(crate) key: [u8; 32],
    #[zeroize(skip)]
    pub(crate) created_at: i64,
}

/// Keys harvested by one chain walk, all under a single header key.
///
/// Kept separate from the cache proper so a decrypt can stage its harvest
/// and only merge it once the payload authenticates.
pub(crate) struct SavedKeyBatch {
    pub(crate) header_key: [u8; 32],
    pub(crate) keys: BTreeMap<u32, SavedKey>,
}

/// The cache itself. `BTreeMap` at both levels keeps iteration and
/// serialization order deterministic.
#[derive(Default)]
pub(crate) struct KeyCache {
    entries: BTreeMap<[u8; 32], BTreeMap<u32, SavedKey>>,
}

impl KeyCache {
    /// Iterate over `(header_key, message keys)` groups.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&[u8; 32], &BTreeMap<u32, SavedKey>)> {
        self.entries.iter()
    }

    /// Remove one consumed entry, dropping the group once it is empty.
    pub(crate) fn remove(&mut self, header_key: &[u8; 32], num: u32) {
        if let Some(keys) = self.entries.get_mut(header_key) {
            keys.remove(&num);
            if keys.is_empty() {
                self.entries.remove(header_key);
            }
        }
    }

    /// Merge a staged harvest into the cache. Entries for a header key that
    /// already has a group are unioned in, newer keys overwriting older
    /// ones for the same message number. Expired keys are swept afterwards.
    pub(crate) fn merge(&mut self, batch: Option<SavedKeyBatch>) {
        let Some(batch) = batch else { return };
        self.entries
            .entry(batch.header_key)
            .or_default()
            .extend(batch.keys);
        self.sweep(unix_now());
    }

    /// Insert a group as-is. Loader path: empty groups are preserved.
    pub(crate) fn insert_group(&mut self, header_key: [u8; 32], keys: BTreeMap<u32, SavedKey>) {
        self.entries.insert(header_key, keys);
    }

    /// Drop keys past their lifetime. Groups emptied by the sweep itself
    /// are removed; groups that were already empty are left alone.
    fn sweep(&mut self, now: i64) {
        let cutoff = now - SAVED_KEY_TTL_SECS;
        let mut emptied = Vec::new();
        for (header_key, keys) in self.entries.iter_mut() {
            if keys.is_empty() {
                continue;
            }
            keys.retain(|_, saved| saved.created_at >= cutoff);
            if keys.is_empty() {
                emptied.push(*header_key);
            }
        }
        for header_key in emptied {
            self.entries.remove(&header_key);
        }
    }
}

/// Current time as unix seconds; clamped to zero if the clock is before
/// the epoch.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(header_key: [u8; 32], nums: &[u32], created_at: i64) -> Option<SavedKeyBatch> {
        let keys = nums
            .iter()
            .map(|&n| {
                let mut key = [0u8; 32];
                key[0] = n as u8;
                (n, SavedKey { key, created_at })
            })
            .collect();
        Some(SavedKeyBatch { header_key, keys })
    }

    #[test]
    fn test_merge_unions_groups() {
        let mut cache = KeyCache::default();
        let hk = [9u8; 32];
        let now = unix_now();

        cache.merge(batch(hk, &[1, 2], now));
        cache.merge(batch(hk, &[3], now));

        let (_, keys) = cache.iter().next().unwrap();
        assert_eq!(keys.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_later_entries_overwrite() {
        let mut cache = KeyCache::default();
        let hk = [9u8; 32];
        let now = unix_now();

        cache.merge(batch(hk, &[1], now));
        let mut newer = batch(hk, &[1], now).unwrap();
        newer.keys.get_mut(&1).unwrap().key = [0xaa; 32];
        cache.merge(Some(newer));

        let (_, keys) = cache.iter().next().unwrap();
        assert_eq!(keys[&1].key, [0xaa; 32]);
    }

    #[test]
    fn test_remove_drops_empty_group() {
        let mut cache = KeyCache::default();
        let hk = [9u8; 32];

        cache.merge(batch(hk, &[5], unix_now()));
        cache.remove(&hk, 5);

        assert_eq!(cache.iter().count(), 0);
    }

    #[test]
    fn test_sweep_expires_old_keys() {
        let mut cache = KeyCache::default();
        let stale_hk = [1u8; 32];
        let fresh_hk = [2u8; 32];
        let now = unix_now();

        cache.merge(batch(stale_hk, &[1], now - SAVED_KEY_TTL_SECS - 60));
        cache.merge(batch(fresh_hk, &[1], now));

        let groups: Vec<_> = cache.iter().map(|(hk, _)| *hk).collect();
        assert_eq!(groups, vec![fresh_hk]);
    }

    #[test]
    fn test_loaded_empty_group_survives_sweep() {
        let mut cache = KeyCache::default();
        let empty_hk = [1u8; 32];

        cache.insert_group(empty_hk, BTreeMap::new());
        cache.merge(batch([2u8; 32], &[1], unix_now()));

        assert!(cache.iter().any(|(hk, keys)| *hk == empty_hk && keys.is_empty()));
    }
}
