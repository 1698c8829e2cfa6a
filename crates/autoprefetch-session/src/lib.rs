//! Peer-aware relation loading for autoprefetch.
//!
//! `autoprefetch-session` is the **batching layer**. A [`Session`] owns every
//! record it materializes, remembers which records were realized together,
//! and turns the first access to a lazy relation on any of them into one
//! batched load across the whole group.
//!
//! # Role In The Architecture
//!
//! - **Record store**: owns records; peer groups only name them by id.
//! - **Descriptors**: per-shape policy deciding when an access batches.
//! - **Prefetch locks**: keep a batch in flight from re-triggering itself.
//! - **Loader seam**: storage stays behind [`RelationLoader`].
//!
//! # Example
//!
//! ```ignore
//! let registry = Arc::new(
//!     Registry::builder()
//!         .model(ModelDef::new("author"))
//!         .model(ModelDef::new("book").field(RelationField::foreign_key("author", "author")))
//!         .build()?,
//! );
//! let mut session = Session::new(registry);
//!
//! let books = session.materialize(rows_from_storage)?;
//!
//! // First access loads the authors of every book in one call
//! for book in &books {
//!     let author = session.get_one(&mut loader, *book, "author")?;
//! }
//! ```

pub mod descriptor;
pub mod lock;
pub mod n1_detection;
pub mod peers;
pub mod registry;
pub mod store;

pub use descriptor::{
    Descriptor, ForwardManyToOneDescriptor, ForwardOneToOneDescriptor, ManyToManyDescriptor,
    RelationDescriptor, ReverseManyToOneDescriptor, ReverseOneToOneDescriptor,
};
pub use lock::{PrefetchGuard, PrefetchLocks};
pub use n1_detection::{CallSite, N1QueryTracker, N1Stats};
pub use registry::{CheckLevel, CheckMessage, Registry, RegistryBuilder};
pub use store::RecordStore;

use autoprefetch_core::{
    Error, Loaded, NotFoundError, PrefetchConfig, Record, RecordId, RelationInfo, Result,
    SchemaError, SchemaErrorKind, StorageError,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

// ============================================================================
// Loader seam
// ============================================================================

/// Storage-side loading of relations.
///
/// Implementations fetch related rows, realize them with
/// [`Session::materialize`] (so they form their own peer groups) and store
/// the results with [`Session::fill_cache`]. Errors are propagated to the
/// caller of the triggering access unchanged.
pub trait RelationLoader {
    /// Load `relation` for a single record.
    fn load_one(
        &mut self,
        session: &mut Session,
        relation: &RelationInfo,
        record: RecordId,
    ) -> Result<()>;

    /// Load `relation` for every record in `records` with one aggregate
    /// fetch, caching a value (including "no referent" and empty
    /// collections) for each of them.
    fn load_batch(
        &mut self,
        session: &mut Session,
        relation: &RelationInfo,
        records: &[RecordId],
    ) -> Result<()>;
}

/// The value of a relation access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Related {
    /// The referent of a single-valued relation.
    One(RecordId),
    /// The members of a collection relation.
    Many(Vec<RecordId>),
}

impl Related {
    #[must_use]
    pub fn as_one(&self) -> Option<RecordId> {
        match self {
            Related::One(id) => Some(*id),
            Related::Many(_) => None,
        }
    }

    #[must_use]
    pub fn as_many(&self) -> Option<&[RecordId]> {
        match self {
            Related::One(_) => None,
            Related::Many(ids) => Some(ids),
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// Owner of materialized records and the entry point for relation access.
///
/// A session is single-threaded: records, peer groups and the lock table are
/// reference counted without atomics.
#[derive(Debug)]
pub struct Session {
    store: RecordStore,
    registry: Arc<Registry>,
    config: PrefetchConfig,
    locks: PrefetchLocks,
    n1_tracker: Option<N1QueryTracker>,
}

impl Session {
    /// Create a session with the default configuration.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_config(registry, PrefetchConfig::default())
    }

    #[must_use]
    pub fn with_config(registry: Arc<Registry>, config: PrefetchConfig) -> Self {
        Self {
            store: RecordStore::new(),
            registry,
            config,
            locks: PrefetchLocks::new(),
            n1_tracker: None,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &PrefetchConfig {
        &self.config
    }

    /// Mutable access to the configuration; changes apply to the next access.
    pub fn config_mut(&mut self) -> &mut PrefetchConfig {
        &mut self.config
    }

    pub fn set_config(&mut self, config: PrefetchConfig) {
        tracing::debug!(
            target: "autoprefetch::config",
            enable_for_related_fields = config.enable_for_related_fields,
            "Prefetch configuration replaced"
        );
        self.config = config;
    }

    // ========================================================================
    // Records
    // ========================================================================

    /// Take ownership of one result set.
    ///
    /// Records are stored in order; the records of each model that has peer
    /// groups enabled form one group when there are at least two of them.
    /// Every record must belong to a registered model.
    pub fn materialize<I>(&mut self, records: I) -> Result<Vec<RecordId>>
    where
        I: IntoIterator<Item = Record>,
    {
        let records: Vec<Record> = records.into_iter().collect();
        for record in &records {
            self.require_model(record.model())?;
        }

        let mut ids = Vec::with_capacity(records.len());
        let mut by_model: BTreeMap<String, Vec<RecordId>> = BTreeMap::new();
        for record in records {
            let model = record.model().to_string();
            let id = self.store.insert(record);
            ids.push(id);
            by_model.entry(model).or_default().push(id);
        }

        for (model, members) in &by_model {
            let grouped = self
                .registry
                .model(model)
                .is_some_and(|def| def.peer_groups);
            if grouped {
                peers::form_group(&mut self.store, members);
            }
        }

        tracing::debug!(
            target: "autoprefetch::batch",
            records = ids.len(),
            models = by_model.len(),
            "Materialized result set"
        );
        Ok(ids)
    }

    pub fn record(&self, id: RecordId) -> Result<&Record> {
        self.store.get(id).ok_or(Error::UnknownRecord(id))
    }

    pub fn record_mut(&mut self, id: RecordId) -> Result<&mut Record> {
        self.store.get_mut(id).ok_or(Error::UnknownRecord(id))
    }

    #[must_use]
    pub fn contains(&self, id: RecordId) -> bool {
        self.store.contains(id)
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Drop a record from the session.
    ///
    /// The record leaves its peer group; remaining peers keep batching among
    /// themselves.
    pub fn release(&mut self, id: RecordId) -> Option<Record> {
        self.store.remove(id)
    }

    /// Live members of the record's peer group (including the record), or an
    /// empty list if it was materialized alone.
    pub fn peers_of(&self, id: RecordId) -> Result<Vec<RecordId>> {
        Ok(self
            .record(id)?
            .peers()
            .map(|group| peers::live_members(&self.store, group).collect())
            .unwrap_or_default())
    }

    // ========================================================================
    // Relation access
    // ========================================================================

    /// Read `relation` on record `id`, loading it if needed.
    ///
    /// When the record has live peers and the relation is eligible, the
    /// first access loads it for every uncached peer in one
    /// [`RelationLoader::load_batch`] call. Otherwise the record is loaded on
    /// its own.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for a single-valued relation with no referent
    /// - whatever the loader returned, after the prefetch locks are released
    /// - [`Error::UnknownRecord`] / [`Error::UnknownRelation`]
    #[track_caller]
    pub fn get<L>(&mut self, loader: &mut L, id: RecordId, relation: &str) -> Result<Related>
    where
        L: RelationLoader + ?Sized,
    {
        let registry = Arc::clone(&self.registry);
        let descriptor = registry.descriptor(self.record(id)?.model(), relation)?;

        if self.should_batch(descriptor, id)? {
            self.batch_load(loader, descriptor, id)?;
        }
        self.base_get(loader, descriptor, id)
    }

    /// Read a single-valued relation.
    #[track_caller]
    pub fn get_one<L>(
        &mut self,
        loader: &mut L,
        id: RecordId,
        relation: &str,
    ) -> Result<RecordId>
    where
        L: RelationLoader + ?Sized,
    {
        self.require_shape(id, relation, false)?;
        match self.get(loader, id, relation)? {
            Related::One(related) => Ok(related),
            Related::Many(_) => Err(self.shape_mismatch(id, relation, false)),
        }
    }

    /// Read a collection relation.
    #[track_caller]
    pub fn get_many<L>(
        &mut self,
        loader: &mut L,
        id: RecordId,
        relation: &str,
    ) -> Result<Vec<RecordId>>
    where
        L: RelationLoader + ?Sized,
    {
        self.require_shape(id, relation, true)?;
        match self.get(loader, id, relation)? {
            Related::Many(related) => Ok(related),
            Related::One(_) => Err(self.shape_mismatch(id, relation, true)),
        }
    }

    /// Load `relation` for an explicit set of records in one batch.
    ///
    /// This is manual prefetching: it ignores peer groups, the collection
    /// switch and per-field opt-outs. Records that already have the relation
    /// cached, or whose lock is held, are skipped. Returns the number of
    /// records the loader was asked for; the loader is not called when that
    /// is zero.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(relation = relation, records = ids.len())
    )]
    pub fn prefetch<L>(
        &mut self,
        loader: &mut L,
        ids: &[RecordId],
        relation: &str,
    ) -> Result<usize>
    where
        L: RelationLoader + ?Sized,
    {
        let Some(first) = ids.first() else {
            return Ok(0);
        };
        let model = self.record(*first)?.model().to_string();
        let registry = Arc::clone(&self.registry);
        let descriptor = registry.descriptor(&model, relation)?;

        let mut seen = HashSet::new();
        let mut candidates = Vec::with_capacity(ids.len());
        for id in ids {
            let record = self.record(*id)?;
            if record.model() != model {
                return Err(Error::Custom(format!(
                    "cannot prefetch {relation} across models {model} and {}",
                    record.model()
                )));
            }
            if seen.insert(*id)
                && !descriptor.is_cached(record)
                && !self.locks.is_locked(*id, descriptor.lock_name())
            {
                candidates.push(*id);
            }
        }
        if candidates.is_empty() {
            return Ok(0);
        }

        self.run_batch(loader, descriptor, &candidates)?;
        Ok(candidates.len())
    }

    /// Store a loaded relation value on a record.
    ///
    /// Called by loaders. Returns `false` if the relation was already cached
    /// on the record (the existing value is kept).
    ///
    /// # Errors
    ///
    /// A [`SchemaErrorKind::ShapeMismatch`] error if the value's shape does
    /// not match the relation or the record belongs to another model.
    pub fn fill_cache(
        &mut self,
        id: RecordId,
        relation: &RelationInfo,
        value: Loaded,
    ) -> Result<bool> {
        let record = self.record_mut(id)?;
        if record.model() != relation.model {
            return Err(SchemaError::new(
                SchemaErrorKind::ShapeMismatch,
                format!(
                    "record {id} is a {}, {} belongs to {}",
                    record.model(),
                    relation.name,
                    relation.model
                ),
            )
            .on_model(record.model())
            .into());
        }
        if value.is_collection() != relation.is_collection() {
            return Err(SchemaError::new(
                SchemaErrorKind::ShapeMismatch,
                format!(
                    "{} cannot hold a {} value",
                    relation.qualified_name(),
                    if value.is_collection() { "collection" } else { "single" }
                ),
            )
            .on_model(relation.model.clone())
            .into());
        }
        Ok(record
            .cache_mut()
            .insert(relation.cache_name.clone(), value))
    }

    /// Drop cached relations so the next access reloads them.
    ///
    /// With `relation == None` every cached relation on the record expires.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn expire(&mut self, id: RecordId, relation: Option<&str>) -> Result<()> {
        let cache_name = match relation {
            Some(relation) => {
                let model = self.record(id)?.model();
                Some(self.registry.descriptor(model, relation)?.cache_name().to_string())
            }
            None => None,
        };

        let cache = self.record_mut(id)?.cache_mut();
        match cache_name {
            Some(name) => {
                cache.remove(&name);
            }
            None => cache.clear(),
        }
        Ok(())
    }

    /// Whether a batched load of `relation` covering record `id` is in flight.
    pub fn is_prefetching(&self, id: RecordId, relation: &str) -> Result<bool> {
        let descriptor = self.registry.descriptor(self.record(id)?.model(), relation)?;
        Ok(self.locks.is_locked(id, descriptor.lock_name()))
    }

    /// Number of prefetch locks currently held.
    #[must_use]
    pub fn held_locks(&self) -> usize {
        self.locks.len()
    }

    // ========================================================================
    // Serialization boundary
    // ========================================================================

    /// Serialize a record to JSON. Cached relations and peers are not written.
    pub fn dump_record(&self, id: RecordId) -> Result<String> {
        Ok(serde_json::to_string(self.record(id)?)?)
    }

    /// Take ownership of a record deserialized from JSON.
    ///
    /// The record starts out uncached and without peers, so its relations
    /// always load individually.
    pub fn load_record(&mut self, json: &str) -> Result<RecordId> {
        let record: Record = serde_json::from_str(json)?;
        self.require_model(record.model())?;
        Ok(self.store.insert(record))
    }

    // ========================================================================
    // N+1 Detection
    // ========================================================================

    /// Start counting individual loads, warning once a relation reaches
    /// `threshold` of them.
    pub fn enable_n1_detection(&mut self, threshold: usize) {
        self.n1_tracker = Some(N1QueryTracker::new().with_threshold(threshold));
    }

    /// Disable N+1 detection and clear the tracker.
    pub fn disable_n1_detection(&mut self) {
        self.n1_tracker = None;
    }

    #[must_use]
    pub fn n1_detection_enabled(&self) -> bool {
        self.n1_tracker.is_some()
    }

    #[must_use]
    pub fn n1_tracker(&self) -> Option<&N1QueryTracker> {
        self.n1_tracker.as_ref()
    }

    #[must_use]
    pub fn n1_stats(&self) -> Option<N1Stats> {
        self.n1_tracker.as_ref().map(N1QueryTracker::stats)
    }

    pub fn reset_n1_tracking(&mut self) {
        if let Some(tracker) = &mut self.n1_tracker {
            tracker.reset();
        }
    }

    /// Snapshot of the session's bookkeeping.
    #[must_use]
    pub fn debug_state(&self) -> SessionDebugInfo {
        let mut info = SessionDebugInfo {
            records: self.store.len(),
            grouped: 0,
            cached_relations: 0,
            held_locks: self.locks.len(),
        };
        for (_, record) in self.store.iter() {
            if record.peers().is_some() {
                info.grouped += 1;
            }
            info.cached_relations += record.cache().len();
        }
        info
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn require_model(&self, model: &str) -> Result<()> {
        if self.registry.contains_model(model) {
            Ok(())
        } else {
            Err(SchemaError::new(
                SchemaErrorKind::UnknownModel,
                "record belongs to an unregistered model",
            )
            .on_model(model)
            .into())
        }
    }

    fn require_shape(&self, id: RecordId, relation: &str, collection: bool) -> Result<()> {
        let descriptor = self.registry.descriptor(self.record(id)?.model(), relation)?;
        if descriptor.info().is_collection() == collection {
            Ok(())
        } else {
            Err(self.shape_mismatch(id, relation, collection))
        }
    }

    fn shape_mismatch(&self, id: RecordId, relation: &str, collection: bool) -> Error {
        let model = self
            .record(id)
            .map(|record| record.model().to_string())
            .unwrap_or_default();
        let (expected, actual) = if collection {
            ("collection", "single-valued")
        } else {
            ("single-valued", "collection")
        };
        SchemaError::new(
            SchemaErrorKind::ShapeMismatch,
            format!("{relation} was read as {expected} but is {actual}"),
        )
        .on_model(model)
        .into()
    }

    fn should_batch(&self, descriptor: &Descriptor, id: RecordId) -> Result<bool> {
        let record = self.record(id)?;
        let live_peers = record
            .peers()
            .map_or(0, |group| peers::live_len(&self.store, group));
        let locked = self.locks.is_locked(id, descriptor.lock_name());
        let batch = descriptor.should_batch(record, live_peers, locked, &self.config);

        tracing::trace!(
            target: "autoprefetch::batch",
            relation = %descriptor.info().qualified_name(),
            record = %id,
            live_peers,
            locked,
            batch,
            "Batch decision"
        );
        Ok(batch)
    }

    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(relation = %descriptor.info().qualified_name(), record = %id)
    )]
    fn batch_load<L>(
        &mut self,
        loader: &mut L,
        descriptor: &Descriptor,
        id: RecordId,
    ) -> Result<()>
    where
        L: RelationLoader + ?Sized,
    {
        let Some(group) = self.record(id)?.peers().cloned() else {
            return Ok(());
        };
        let candidates = descriptor.collect_candidates(&self.store, &group, &self.locks);
        self.run_batch(loader, descriptor, &candidates)
    }

    /// Lock `candidates`, hand them to the loader and release the locks on
    /// every exit path before reporting the loader's result.
    fn run_batch<L>(
        &mut self,
        loader: &mut L,
        descriptor: &Descriptor,
        candidates: &[RecordId],
    ) -> Result<()>
    where
        L: RelationLoader + ?Sized,
    {
        let info = descriptor.info();
        tracing::debug!(
            target: "autoprefetch::batch",
            relation = %info.qualified_name(),
            candidates = candidates.len(),
            "Batch loading relation"
        );

        let guard = self.locks.acquire(candidates, descriptor.lock_name());
        let result = loader.load_batch(self, info, candidates);
        drop(guard);

        if let Some(tracker) = &mut self.n1_tracker {
            tracker.record_batch(&info.model, &info.name);
        }
        if let Err(e) = &result {
            tracing::debug!(
                target: "autoprefetch::batch",
                relation = %info.qualified_name(),
                error = %e,
                "Batch load failed"
            );
        }
        result
    }

    /// Single-record access: read the cache, loading the record on its own
    /// when the relation is missing.
    #[track_caller]
    fn base_get<L>(
        &mut self,
        loader: &mut L,
        descriptor: &Descriptor,
        id: RecordId,
    ) -> Result<Related>
    where
        L: RelationLoader + ?Sized,
    {
        let info = descriptor.info();
        let record = self.record(id)?;
        if !descriptor.is_cached(record) {
            if info.shape.holds_local_key() && record.field(&info.column).is_null() {
                self.record_mut(id)?
                    .cache_mut()
                    .insert(info.cache_name.clone(), Loaded::One(None));
            } else {
                if let Some(tracker) = &mut self.n1_tracker {
                    tracker.record_load(&info.model, &info.name);
                }
                tracing::trace!(
                    target: "autoprefetch::batch",
                    relation = %info.qualified_name(),
                    record = %id,
                    "Loading relation for a single record"
                );
                loader.load_one(self, info, id)?;
            }
        }

        match self.record(id)?.cache().get(&info.cache_name) {
            Some(Loaded::One(Some(related))) => Ok(Related::One(*related)),
            Some(Loaded::One(None)) => Err(NotFoundError {
                model: info.model.clone(),
                relation: info.name.clone(),
                record: id,
            }
            .into()),
            Some(Loaded::Many(related)) => Ok(Related::Many(related.clone())),
            None => Err(StorageError::new(format!(
                "loader did not populate {} on record {id}",
                info.qualified_name()
            ))
            .into()),
        }
    }
}

/// Debug information about session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDebugInfo {
    /// Records held.
    pub records: usize,
    /// Records that belong to a peer group.
    pub grouped: usize,
    /// Cached relation entries across all records.
    pub cached_relations: usize,
    /// Prefetch locks currently held.
    pub held_locks: usize,
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use autoprefetch_core::{ModelDef, RelationField, Value};

    /// Caches "no referent" (or an empty collection) and counts calls.
    #[derive(Default)]
    struct EmptyLoader {
        single: usize,
        batches: Vec<usize>,
    }

    impl EmptyLoader {
        fn empty(relation: &RelationInfo) -> Loaded {
            if relation.is_collection() {
                Loaded::Many(Vec::new())
            } else {
                Loaded::One(None)
            }
        }
    }

    impl RelationLoader for EmptyLoader {
        fn load_one(
            &mut self,
            session: &mut Session,
            relation: &RelationInfo,
            record: RecordId,
        ) -> Result<()> {
            self.single += 1;
            session.fill_cache(record, relation, Self::empty(relation))?;
            Ok(())
        }

        fn load_batch(
            &mut self,
            session: &mut Session,
            relation: &RelationInfo,
            records: &[RecordId],
        ) -> Result<()> {
            self.batches.push(records.len());
            for record in records {
                session.fill_cache(*record, relation, Self::empty(relation))?;
            }
            Ok(())
        }
    }

    /// Never caches anything.
    struct ForgetfulLoader;

    impl RelationLoader for ForgetfulLoader {
        fn load_one(&mut self, _: &mut Session, _: &RelationInfo, _: RecordId) -> Result<()> {
            Ok(())
        }

        fn load_batch(&mut self, _: &mut Session, _: &RelationInfo, _: &[RecordId]) -> Result<()> {
            Ok(())
        }
    }

    fn session() -> Session {
        let registry = Registry::builder()
            .model(ModelDef::new("author"))
            .model(
                ModelDef::new("book")
                    .field(RelationField::foreign_key("author", "author").related_name("books")),
            )
            .model(
                ModelDef::new("note")
                    .peer_groups(false)
                    .field(RelationField::foreign_key("author", "author").related_name("notes")),
            )
            .build()
            .unwrap();
        Session::new(Arc::new(registry))
    }

    fn book(pk: i64, author: Option<i64>) -> Record {
        Record::new("book", pk).with("author_id", author)
    }

    #[test]
    fn test_materialize_groups_by_model() {
        let mut session = session();
        let ids = session
            .materialize(vec![
                book(1, Some(1)),
                Record::new("author", 1_i64),
                book(2, Some(1)),
                Record::new("note", 1_i64),
                Record::new("note", 2_i64),
            ])
            .unwrap();

        assert_eq!(ids.len(), 5);
        assert_eq!(session.peers_of(ids[0]).unwrap(), vec![ids[0], ids[2]]);
        assert!(session.peers_of(ids[1]).unwrap().is_empty());
        assert!(session.peers_of(ids[3]).unwrap().is_empty());

        let state = session.debug_state();
        assert_eq!(state.records, 5);
        assert_eq!(state.grouped, 2);
    }

    #[test]
    fn test_materialize_rejects_unknown_model() {
        let mut session = session();
        let err = session
            .materialize(vec![book(1, Some(1)), Record::new("publisher", 1_i64)])
            .unwrap_err();
        assert!(matches!(err, Error::Schema(ref e) if e.kind == SchemaErrorKind::UnknownModel));
        assert!(session.is_empty());
    }

    #[test]
    fn test_first_access_batches_across_peers() {
        let mut session = session();
        let mut loader = EmptyLoader::default();
        let ids = session
            .materialize((1..=4).map(|pk| book(pk, Some(pk))))
            .unwrap();

        for id in &ids {
            let err = session.get(&mut loader, *id, "author").unwrap_err();
            assert!(err.is_not_found());
        }

        assert_eq!(loader.batches, vec![4]);
        assert_eq!(loader.single, 0);
        assert_eq!(session.held_locks(), 0);
    }

    #[test]
    fn test_null_local_key_never_loads() {
        let mut session = session();
        let mut loader = EmptyLoader::default();
        let ids = session
            .materialize(vec![book(1, None), book(2, None)])
            .unwrap();

        let err = session.get_one(&mut loader, ids[0], "author").unwrap_err();
        assert!(err.is_not_found());
        assert!(loader.batches.is_empty());
        assert_eq!(loader.single, 0);
    }

    #[test]
    fn test_loader_that_caches_nothing_is_an_error() {
        let mut session = session();
        let id = session.materialize(vec![book(1, Some(1))]).unwrap()[0];
        let err = session.get(&mut ForgetfulLoader, id, "author").unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[test]
    fn test_shape_checked_before_loading() {
        let mut session = session();
        let mut loader = EmptyLoader::default();
        let author = session.materialize(vec![Record::new("author", 1_i64)]).unwrap()[0];

        let err = session.get_one(&mut loader, author, "books").unwrap_err();
        assert!(matches!(err, Error::Schema(ref e) if e.kind == SchemaErrorKind::ShapeMismatch));
        assert_eq!(loader.single, 0);

        assert!(session.get_many(&mut loader, author, "books").unwrap().is_empty());
        assert_eq!(loader.single, 1);
    }

    #[test]
    fn test_fill_cache_validates_value() {
        let mut session = session();
        let ids = session
            .materialize(vec![book(1, Some(1)), Record::new("author", 1_i64)])
            .unwrap();
        let info = session
            .registry()
            .descriptor("book", "author")
            .unwrap()
            .info()
            .clone();

        assert!(session.fill_cache(ids[0], &info, Loaded::Many(vec![])).is_err());
        assert!(session.fill_cache(ids[1], &info, Loaded::One(None)).is_err());
        assert!(session.fill_cache(ids[0], &info, Loaded::One(Some(ids[1]))).unwrap());
        assert!(!session.fill_cache(ids[0], &info, Loaded::One(None)).unwrap());

        let mut loader = EmptyLoader::default();
        assert_eq!(session.get_one(&mut loader, ids[0], "author").unwrap(), ids[1]);
    }

    #[test]
    fn test_expire_reloads() {
        let mut session = session();
        let mut loader = EmptyLoader::default();
        let id = session.materialize(vec![book(1, Some(1))]).unwrap()[0];

        assert!(session.get(&mut loader, id, "author").is_err());
        session.expire(id, Some("author")).unwrap();
        assert!(session.get(&mut loader, id, "author").is_err());
        assert_eq!(loader.single, 2);

        session.expire(id, None).unwrap();
        assert_eq!(session.debug_state().cached_relations, 0);
        assert!(session.expire(id, Some("publisher")).is_err());
    }

    #[test]
    fn test_release_unknown_record() {
        let mut session = session();
        let mut loader = EmptyLoader::default();
        let id = session.materialize(vec![book(1, Some(1))]).unwrap()[0];

        assert!(session.release(id).is_some());
        assert!(matches!(
            session.get(&mut loader, id, "author"),
            Err(Error::UnknownRecord(_))
        ));
    }

    #[test]
    fn test_dump_and_load_record() {
        let mut session = session();
        let ids = session
            .materialize(vec![book(1, Some(7)), book(2, Some(8))])
            .unwrap();
        let mut loader = EmptyLoader::default();
        let _ = session.get(&mut loader, ids[0], "author");

        let json = session.dump_record(ids[0]).unwrap();
        let restored = session.load_record(&json).unwrap();

        let record = session.record(restored).unwrap();
        assert_eq!(record.field("author_id"), &Value::BigInt(7));
        assert!(record.cache().is_empty());
        assert!(record.peers().is_none());

        assert!(session.load_record("{\"model\":\"nope\",\"pk\":1}").is_err());
        assert!(matches!(session.load_record("not json"), Err(Error::Serde(_))));
    }

    #[test]
    fn test_prefetch_skips_cached() {
        let mut session = session();
        let mut loader = EmptyLoader::default();
        let ids = session
            .materialize((1..=3).map(|pk| book(pk, Some(pk))))
            .unwrap();

        assert_eq!(session.prefetch(&mut loader, &ids[..1], "author").unwrap(), 1);
        assert_eq!(session.prefetch(&mut loader, &ids, "author").unwrap(), 2);
        assert_eq!(session.prefetch(&mut loader, &ids, "author").unwrap(), 0);
        assert_eq!(session.prefetch(&mut loader, &[], "author").unwrap(), 0);
        assert_eq!(loader.batches, vec![1, 2]);
    }

    #[test]
    fn test_n1_detection_counts_individual_loads() {
        let mut session = session();
        let mut loader = EmptyLoader::default();
        session.enable_n1_detection(2);
        let notes = session
            .materialize(vec![
                Record::new("note", 1_i64).with("author_id", 1_i64),
                Record::new("note", 2_i64).with("author_id", 1_i64),
            ])
            .unwrap();

        for note in &notes {
            let _ = session.get(&mut loader, *note, "author");
        }

        let stats = session.n1_stats().unwrap();
        assert_eq!(stats.total_loads, 2);
        assert_eq!(stats.potential_n1, 1);
        assert_eq!(stats.batch_loads, 0);

        session.reset_n1_tracking();
        assert_eq!(session.n1_stats().unwrap().total_loads, 0);
        session.disable_n1_detection();
        assert!(session.n1_stats().is_none());
    }
}
