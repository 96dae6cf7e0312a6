/*!
 * Keyed Mutex
 *
 * Mutual exclusion per string (or any hashable) key: independent keys
 * proceed fully in parallel, callers on the same key serialize. Built for
 * components that must serialize work per logical resource (per user, per
 * record) without paying for one global lock.
 *
 * Locks are non-reentrant and there is no guard object: release is an
 * explicit `unlock`, and an unmatched release panics. Entries for released
 * keys are evicted eagerly, so the table never grows beyond the set of keys
 * currently held or waited on.
 *
 * # Example
 *
 * ```
 * use keymutex::KeyedMutex;
 *
 * let table = KeyedMutex::new();
 *
 * table.lock("user-42");
 * // ... critical section for user-42 ...
 * assert!(!table.try_lock("user-42")); // second acquire fails
 * assert!(table.try_lock("user-43"));  // unrelated key is free
 *
 * table.unlock("user-42");
 * table.unlock("user-43");
 * assert!(table.is_empty());
 * ```
 */

mod table;

// Re-exports
pub use table::KeyedMutex;
