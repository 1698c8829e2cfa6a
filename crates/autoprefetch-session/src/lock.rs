//! Prefetch locks.
//!
//! A prefetch lock marks a (record, relation) pair whose batched load is in
//! flight. While it is held the record is never selected as a batching
//! target again for that relation, and an access that lands on it falls
//! back to an individual load. Locks are only ever taken through
//! [`PrefetchLocks::acquire`], and the returned [`PrefetchGuard`] releases
//! them when dropped, so every exit path (error return or unwinding panic)
//! clears them.
//!
//! # Example
//!
//! ```ignore
//! let locks = PrefetchLocks::new();
//! {
//!     let _guard = locks.acquire(&candidates, "prefetching:books");
//!     loader.load_batch(session, relation, &candidates)?;
//! } // released here, whether or not the load succeeded
//! assert!(locks.is_empty());
//! ```

use autoprefetch_core::RecordId;
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

type LockKey = (RecordId, String);

/// Table of held prefetch locks for one session.
#[derive(Debug, Clone, Default)]
pub struct PrefetchLocks {
    held: Rc<RefCell<HashSet<LockKey>>>,
}

impl PrefetchLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether `lock_name` is held for `id`.
    #[must_use]
    pub fn is_locked(&self, id: RecordId, lock_name: &str) -> bool {
        self.held
            .borrow()
            .iter()
            .any(|(held_id, held_name)| *held_id == id && held_name == lock_name)
    }

    /// Lock `lock_name` on every record in `ids`.
    ///
    /// Pairs that are already locked are left alone and are not released by
    /// the returned guard; it only releases what it set.
    #[must_use = "locks are released as soon as the guard is dropped"]
    pub fn acquire(&self, ids: &[RecordId], lock_name: &str) -> PrefetchGuard {
        let mut held = self.held.borrow_mut();
        let acquired = ids
            .iter()
            .copied()
            .filter(|id| held.insert((*id, lock_name.to_string())))
            .collect();

        PrefetchGuard {
            held: Rc::clone(&self.held),
            lock_name: lock_name.to_string(),
            ids: acquired,
        }
    }

    /// Number of held (record, relation) locks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.held.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.borrow().is_empty()
    }
}

/// Scoped ownership of a set of prefetch locks.
#[derive(Debug)]
pub struct PrefetchGuard {
    held: Rc<RefCell<HashSet<LockKey>>>,
    lock_name: String,
    ids: Vec<RecordId>,
}

impl PrefetchGuard {
    /// Records locked by this guard.
    #[must_use]
    pub fn records(&self) -> &[RecordId] {
        &self.ids
    }
}

impl Drop for PrefetchGuard {
    fn drop(&mut self) {
        let mut held = self.held.borrow_mut();
        for id in self.ids.drain(..) {
            held.remove(&(id, self.lock_name.clone()));
        }
    }
}
