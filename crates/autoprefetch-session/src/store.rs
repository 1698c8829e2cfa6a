//! Session-owned record store.
//!
//! The store is the single owner of every materialized [`Record`]. Everything
//! else (peer groups, relation caches, loaders) refers to records by
//! [`RecordId`]. Removing a record from the store is what ends its life: any
//! peer group that still names it simply stops resolving it.
//!
//! # Example
//!
//! ```ignore
//! let mut store = RecordStore::new();
//!
//! let id = store.insert(Record::new("book", 1_i64));
//! assert!(store.contains(id));
//!
//! // Released records drop out of every peer group naming them
//! store.remove(id);
//! assert!(store.get(id).is_none());
//! ```

use autoprefetch_core::{Record, RecordId};
use std::collections::HashMap;

/// Owner of a session's records, keyed by [`RecordId`].
#[derive(Debug)]
pub struct RecordStore {
    /// Live records.
    records: HashMap<RecordId, Record>,
    /// Next identity to hand out. Identities are never reused.
    next_id: u64,
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            next_id: 1,
        }
    }

    /// Take ownership of a record and return its new identity.
    pub fn insert(&mut self, record: Record) -> RecordId {
        let id = RecordId::new(self.next_id);
        self.next_id += 1;
        self.records.insert(id, record);
        id
    }

    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.records.get(&id)
    }

    pub fn get_mut(&mut self, id: RecordId) -> Option<&mut Record> {
        self.records.get_mut(&id)
    }

    /// Check if a record is still held.
    #[must_use]
    pub fn contains(&self, id: RecordId) -> bool {
        self.records.contains_key(&id)
    }

    /// Release a record, returning it if it was held.
    pub fn remove(&mut self, id: RecordId) -> Option<Record> {
        self.records.remove(&id)
    }

    /// Release every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over all held records (unordered).
    pub fn iter(&self) -> impl Iterator<Item = (RecordId, &Record)> {
        self.records.iter().map(|(id, record)| (*id, record))
    }
}
