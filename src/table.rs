/*!
 * Keyed Mutex Table
 *
 * Coarse-grained keyed mutual exclusion: at most one holder per key,
 * unrelated keys fully parallel. A single short-held table mutex protects
 * the key map and per-entry reference counts; the potentially long wait on
 * a key's own lock always happens after that guard is released.
 *
 * # Design
 *
 * Each live key maps to a `LockEntry` pairing a raw (non-RAII) mutex with a
 * count of holders-plus-waiters. The count is the lifecycle: it is bumped
 * under the table guard before any acquire attempt and dropped under the
 * same guard at release, and the entry is deleted in the same critical
 * section that drops it to zero. No caller can ever observe a zero-count
 * entry in the map.
 *
 * # Performance
 *
 * - Table guard hold is a map lookup plus integer bookkeeping
 * - Contended waits park on the per-key mutex, not the table
 * - Released keys leave nothing behind (no growth across workloads)
 */

use ahash::RandomState;
use parking_lot::lock_api::RawMutex as _;
use parking_lot::{Mutex, RawMutex};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use tracing::trace;

/// Lock state for a single key.
///
/// The `Arc` around the raw mutex is the handle callers block on after the
/// table guard is dropped. It stays valid independent of the entry's later
/// removal from the map, so an in-flight release always reaches the same
/// primitive it acquired.
struct LockEntry {
    lock: Arc<RawMutex>,
    refs: usize,
}

impl LockEntry {
    fn new() -> Self {
        Self {
            lock: Arc::new(RawMutex::INIT),
            refs: 0,
        }
    }
}

/// Keyed mutex with per-key granularity and automatic entry cleanup.
///
/// Locks are **not reentrant**: a thread re-locking a key it already holds
/// blocks forever, exactly like relocking a plain mutex. There is no guard
/// object and no scoped release. `unlock` is an explicit operation, and a
/// panic inside a critical section leaves the key locked until someone
/// releases it.
///
/// Instances are plain values; independent tables do not share any state.
///
/// # Example
///
/// ```
/// use keymutex::KeyedMutex;
///
/// let table = KeyedMutex::new();
///
/// table.lock("user-42");
/// assert!(table.is_locked("user-42"));
/// assert!(!table.try_lock("user-42"));
/// table.unlock("user-42");
///
/// // Released keys are evicted entirely
/// assert!(table.is_empty());
/// ```
pub struct KeyedMutex<K> {
    table: Mutex<HashMap<K, LockEntry, RandomState>>,
}

impl<K> KeyedMutex<K>
where
    K: Eq + Hash + fmt::Debug,
{
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::with_hasher(RandomState::new())),
        }
    }

    /// Create an empty table sized for `capacity` simultaneously live keys.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            table: Mutex::new(HashMap::with_capacity_and_hasher(
                capacity,
                RandomState::new(),
            )),
        }
    }

    /// Acquire the lock for `key`, blocking until it is available.
    ///
    /// The table guard is held only for the find-or-insert and the count
    /// bump; the wait itself contends exclusively with other users of the
    /// same key.
    pub fn lock(&self, key: K) {
        let handle = {
            let mut table = self.table.lock();
            let entry = match table.entry(key) {
                Entry::Occupied(occupied) => occupied.into_mut(),
                Entry::Vacant(vacant) => {
                    trace!(key = ?vacant.key(), "inserting lock entry");
                    vacant.insert(LockEntry::new())
                }
            };
            entry.refs += 1;
            Arc::clone(&entry.lock)
        };
        handle.lock();
    }

    /// Acquire the lock for `key` without blocking.
    ///
    /// Returns `false` if the key is held or has waiters; no interest is
    /// registered in that case. Returns `true` with the lock held
    /// otherwise. The whole attempt runs under the table guard, closing the
    /// window between the occupancy check and the acquisition.
    pub fn try_lock(&self, key: K) -> bool {
        let mut table = self.table.lock();
        let entry = match table.entry(key) {
            Entry::Occupied(occupied) => {
                if occupied.get().refs > 0 {
                    return false;
                }
                // Zero-count entries are deleted under this same guard in
                // `unlock`; reuse one anyway rather than assume.
                occupied.into_mut()
            }
            Entry::Vacant(vacant) => {
                trace!(key = ?vacant.key(), "inserting lock entry");
                vacant.insert(LockEntry::new())
            }
        };
        entry.refs += 1;
        // Count went 0 -> 1 under the table guard, so no other caller holds
        // or is waiting on this raw mutex.
        let acquired = entry.lock.try_lock();
        assert!(acquired, "freshly referenced lock entry is already held");
        true
    }

    /// Release the lock for `key`.
    ///
    /// Must be paired 1:1 with a prior successful [`lock`](Self::lock) or
    /// [`try_lock`](Self::try_lock) by the caller.
    ///
    /// # Panics
    ///
    /// Panics if `key` has no live entry: an unlock of a never-locked or
    /// already fully released key is a caller bug and is surfaced loudly
    /// rather than ignored.
    pub fn unlock(&self, key: K) {
        let mut table = self.table.lock();
        let mut occupied = match table.entry(key) {
            Entry::Occupied(occupied) => occupied,
            Entry::Vacant(vacant) => {
                panic!("unlock of unlocked key: {:?}", vacant.key())
            }
        };
        occupied.get_mut().refs -= 1;
        let handle = if occupied.get().refs == 0 {
            trace!(key = ?occupied.key(), "removing lock entry");
            occupied.remove().lock
        } else {
            Arc::clone(&occupied.get().lock)
        };
        // Removal only affects future lookups; every current waiter blocks
        // on this same handle.
        // Safety: paired with a successful lock()/try_lock() by the caller,
        // so the raw mutex is held.
        unsafe { handle.unlock() };
    }

    /// Whether `key` is currently held (or has waiters).
    ///
    /// This is a snapshot: with concurrent lockers the answer can be stale
    /// by the time the caller acts on it.
    pub fn is_locked(&self, key: K) -> bool {
        let table = self.table.lock();
        table.get(&key).map_or(false, |entry| entry.refs > 0)
    }

    /// Number of live keys (held or with waiters).
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Check if no key is held or waited on.
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }
}

impl<K> Default for KeyedMutex<K>
where
    K: Eq + Hash + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for KeyedMutex<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.table.try_lock() {
            Some(table) => f
                .debug_struct("KeyedMutex")
                .field("keys", &table.len())
                .finish(),
            None => f.write_str("KeyedMutex { <locked> }"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lock_unlock_removes_entry() {
        let table = KeyedMutex::new();

        table.lock("alpha");
        assert_eq!(table.len(), 1);

        table.unlock("alpha");
        assert_eq!(table.len(), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn test_try_lock_sequence() {
        let table = KeyedMutex::new();

        assert!(table.try_lock("alpha"));
        assert!(!table.try_lock("alpha"));

        table.unlock("alpha");
        assert!(table.try_lock("alpha"));
        table.unlock("alpha");
    }

    #[test]
    fn test_is_locked_lifecycle() {
        let table = KeyedMutex::new();

        assert!(!table.is_locked("alpha"));
        table.lock("alpha");
        assert!(table.is_locked("alpha"));
        table.unlock("alpha");
        assert!(!table.is_locked("alpha"));
    }

    #[test]
    fn test_keys_are_independent() {
        let table = KeyedMutex::new();

        table.lock("alpha");
        assert!(table.try_lock("beta"));
        assert!(table.is_locked("alpha"));
        assert!(table.is_locked("beta"));

        table.unlock("alpha");
        assert!(table.is_locked("beta"));
        table.unlock("beta");
    }

    #[test]
    fn test_owned_string_keys() {
        let table = KeyedMutex::new();

        table.lock("record-7".to_string());
        assert!(table.is_locked("record-7".to_string()));
        table.unlock("record-7".to_string());
        assert!(table.is_empty());
    }

    #[test]
    fn test_waiter_keeps_entry_alive() {
        let table = Arc::new(KeyedMutex::new());
        table.lock("alpha");

        let table_clone = table.clone();
        let waiter = thread::spawn(move || {
            table_clone.lock("alpha");
            table_clone.unlock("alpha");
        });

        // Give the waiter time to park on the entry
        thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(table.len(), 1);

        table.unlock("alpha");
        waiter.join().unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_with_capacity_and_default() {
        let table: KeyedMutex<&str> = KeyedMutex::with_capacity(64);
        assert!(table.is_empty());

        let table: KeyedMutex<String> = KeyedMutex::default();
        assert!(table.is_empty());
    }

    #[test]
    fn test_debug_reports_live_keys() {
        let table = KeyedMutex::new();
        table.lock("alpha");

        let rendered = format!("{:?}", table);
        assert_eq!(rendered, "KeyedMutex { keys: 1 }");

        table.unlock("alpha");
    }
}
