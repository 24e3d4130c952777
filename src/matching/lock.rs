use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

struct LockEntry {
    holder: Uuid,
    expires_at: Instant,
}

/// Per-ride mutual exclusion for accept evaluation. Acquire is atomic on
/// the ride key; the TTL bounds how long a crashed holder can wedge a
/// ride. Each acquisition is tagged with a holder token so a stale holder
/// releasing after its TTL lapsed cannot evict whoever re-acquired the
/// lock in the meantime. In a multi-instance deployment this store sits
/// behind the shared single-key CAS store; the semantics here are
/// identical.
pub struct LockStore {
    locks: DashMap<Uuid, LockEntry>,
    ttl: Duration,
}

impl LockStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            ttl,
        }
    }

    /// Non-blocking acquire. Returns the holder token, or `None` when
    /// another holder has the lock and its TTL has not lapsed.
    pub fn try_acquire(&self, ride_id: Uuid) -> Option<Uuid> {
        self.try_acquire_at(ride_id, Instant::now())
    }

    fn try_acquire_at(&self, ride_id: Uuid, now: Instant) -> Option<Uuid> {
        let entry = LockEntry {
            holder: Uuid::new_v4(),
            expires_at: now + self.ttl,
        };
        let holder = entry.holder;
        match self.locks.entry(ride_id) {
            Entry::Occupied(mut held) => {
                if held.get().expires_at <= now {
                    held.insert(entry);
                    Some(holder)
                } else {
                    None
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Some(holder)
            }
        }
    }

    /// Releases only when `holder` still owns the lock; a late release
    /// from a lapsed holder is a no-op.
    pub fn release(&self, ride_id: Uuid, holder: Uuid) {
        self.locks
            .remove_if(&ride_id, |_, entry| entry.holder == holder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let store = LockStore::new(Duration::from_secs(10));
        let ride = Uuid::new_v4();

        let holder = store.try_acquire(ride).unwrap();
        assert!(store.try_acquire(ride).is_none());

        store.release(ride, holder);
        assert!(store.try_acquire(ride).is_some());
    }

    #[test]
    fn locks_are_per_ride() {
        let store = LockStore::new(Duration::from_secs(10));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(store.try_acquire(a).is_some());
        assert!(store.try_acquire(b).is_some());
    }

    #[test]
    fn expired_lock_can_be_reacquired() {
        let store = LockStore::new(Duration::from_secs(0));
        let ride = Uuid::new_v4();

        assert!(store.try_acquire(ride).is_some());
        assert!(store.try_acquire(ride).is_some());
    }

    #[test]
    fn stale_release_does_not_evict_current_holder() {
        let store = LockStore::new(Duration::from_millis(50));
        let ride = Uuid::new_v4();
        let start = Instant::now();

        let stale = store.try_acquire_at(ride, start).unwrap();

        // The first holder's TTL lapses and a second holder takes over.
        let later = start + Duration::from_millis(100);
        let current = store.try_acquire_at(ride, later).unwrap();

        // The lapsed holder's release must not open the lock.
        store.release(ride, stale);
        assert!(store.try_acquire_at(ride, later).is_none());

        store.release(ride, current);
        assert!(store.try_acquire_at(ride, later).is_some());
    }
}
