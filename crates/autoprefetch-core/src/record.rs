//! Materialized records and their relation caches.
//!
//! A [`Record`] is one realized row of a model. Besides its primary key and
//! the local column values the engine needs (foreign keys), it carries:
//!
//! - a [`RelationCache`] that loaders fill and relation access reads, and
//! - an optional [`PeerGroupRef`] naming the records it was materialized with.
//!
//! Neither the cache nor the group reference survives serialization: a
//! persisted or transmitted record always comes back ungrouped and uncached.

use crate::peer::PeerGroupRef;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Opaque identity of a record inside a session's store.
///
/// Identities are never reused within a store, so a stale id held by a peer
/// group can never resolve to a different record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(u64);

impl RecordId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A loaded relation value as stored in a record's cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Loaded {
    /// Single-valued relation; `None` records a loaded "no referent".
    One(Option<RecordId>),
    /// Collection relation; an empty vector is a loaded empty collection.
    Many(Vec<RecordId>),
}

impl Loaded {
    /// Whether this is a collection value.
    #[must_use]
    pub const fn is_collection(&self) -> bool {
        matches!(self, Loaded::Many(_))
    }
}

/// Per-record cache of loaded relations, keyed by cache name.
///
/// Entries are written once per load cycle: [`RelationCache::insert`] never
/// overwrites, so a batch that races an individual load for the same record
/// keeps whichever value landed first. Explicit expiry goes through
/// [`RelationCache::remove`] or [`RelationCache::clear`].
#[derive(Debug, Clone, Default)]
pub struct RelationCache {
    entries: HashMap<String, Loaded>,
}

impl RelationCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a relation is cached under `cache_name`.
    #[must_use]
    pub fn contains(&self, cache_name: &str) -> bool {
        self.entries.contains_key(cache_name)
    }

    #[must_use]
    pub fn get(&self, cache_name: &str) -> Option<&Loaded> {
        self.entries.get(cache_name)
    }

    /// Cache a loaded value.
    ///
    /// Returns `false` (and leaves the existing value in place) if the
    /// relation was already cached.
    pub fn insert(&mut self, cache_name: impl Into<String>, value: Loaded) -> bool {
        match self.entries.entry(cache_name.into()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    /// Drop a cached relation so the next access reloads it.
    pub fn remove(&mut self, cache_name: &str) -> Option<Loaded> {
        self.entries.remove(cache_name)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of all cached relations (unordered).
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// One materialized row of a model.
#[derive(Serialize, Deserialize)]
pub struct Record {
    model: String,
    pk: Value,
    #[serde(default)]
    fields: BTreeMap<String, Value>,
    #[serde(skip)]
    cache: RelationCache,
    #[serde(skip)]
    peers: Option<PeerGroupRef>,
}

impl Record {
    /// Create a record of `model` with the given primary key value.
    pub fn new(model: impl Into<String>, pk: impl Into<Value>) -> Self {
        Self {
            model: model.into(),
            pk: pk.into(),
            fields: BTreeMap::new(),
            cache: RelationCache::new(),
            peers: None,
        }
    }

    /// Builder-style column assignment.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(column.into(), value.into());
        self
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn pk(&self) -> &Value {
        &self.pk
    }

    /// Get a column value. Missing columns read as NULL.
    #[must_use]
    pub fn field(&self, column: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.fields.get(column).unwrap_or(&NULL)
    }

    pub fn set_field(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(column.into(), value.into());
    }

    #[must_use]
    pub fn cache(&self) -> &RelationCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut RelationCache {
        &mut self.cache
    }

    /// The peer group this record was materialized into, if any.
    #[must_use]
    pub fn peers(&self) -> Option<&PeerGroupRef> {
        self.peers.as_ref()
    }

    /// Assign the record's peer group.
    ///
    /// Membership is set once, at materialization. Returns the group back as
    /// `Err` if the record already belongs to one.
    pub fn assign_peers(&mut self, group: PeerGroupRef) -> Result<(), PeerGroupRef> {
        if self.peers.is_some() {
            return Err(group);
        }
        self.peers = Some(group);
        Ok(())
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("model", &self.model)
            .field("pk", &self.pk)
            .field("fields", &self.fields)
            .field("cached", &self.cache.len())
            .field("peers", &self.peers.as_ref().map(|g| g.len()))
            .finish()
    }
}
