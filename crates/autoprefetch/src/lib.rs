//! autoprefetch - automatic peer-batched loading of lazy relations.
//!
//! Iterating a result set and touching a lazy relation on every record
//! normally costs one load per record. autoprefetch remembers which records
//! were materialized together and turns the first such access into a single
//! batched load for the whole set:
//!
//! - Records materialized together form a **peer group**
//! - The first access to an unloaded relation on any member loads it for
//!   every unloaded member in one [`RelationLoader::load_batch`] call
//! - The remaining members are served from their caches
//!
//! Storage stays outside the crate, behind [`RelationLoader`].
//!
//! # Quick Start
//!
//! ```ignore
//! use autoprefetch::prelude::*;
//! use std::sync::Arc;
//!
//! let registry = Registry::builder()
//!     .model(ModelDef::new("author"))
//!     .model(
//!         ModelDef::new("book")
//!             .field(RelationField::foreign_key("author", "author").related_name("books")),
//!     )
//!     .build()?;
//!
//! let mut session = Session::new(Arc::new(registry));
//! let books = session.materialize(rows)?;
//!
//! for book in &books {
//!     // One load_batch call for all books, then cache hits
//!     let author = session.get_one(&mut loader, *book, "author")?;
//! }
//!
//! // Collection relations batch once the switch is on
//! session.config_mut().enable_for_related_fields = true;
//! ```
//!
//! # Relation shapes
//!
//! | Accessor | Batches when |
//! |---|---|
//! | `book.author` (forward foreign key) | the local key is set |
//! | `restaurant.place` (forward one-to-one) | the local key is set |
//! | `place.restaurant` (reverse one-to-one) | always |
//! | `author.books` (reverse foreign key) | `enable_for_related_fields` |
//! | `club.members` / `person.club_set` | `enable_for_related_fields` |
//!
//! Fields declared with `.prefetch(false)` and models declared with
//! `.peer_groups(false)` always load record by record.

pub use autoprefetch_core::{
    ConfigError, Direction, ENABLE_FOR_RELATED_FIELDS_ENV, Error, LOCK_PREFIX, Loaded, ModelDef,
    NotFoundError, PeerGroup, PeerGroupRef, PrefetchConfig, Record, RecordId, RelationCache,
    RelationField, RelationInfo, RelationKind, RelationShape, Result, SchemaError,
    SchemaErrorKind, StorageError, Value, cache_name, lock_name,
};
pub use autoprefetch_session::{
    CallSite, CheckLevel, CheckMessage, Descriptor, ForwardManyToOneDescriptor,
    ForwardOneToOneDescriptor, ManyToManyDescriptor, N1QueryTracker, N1Stats, PrefetchGuard,
    PrefetchLocks, RecordStore, Registry, RegistryBuilder, Related, RelationDescriptor,
    RelationLoader, ReverseManyToOneDescriptor, ReverseOneToOneDescriptor, Session,
    SessionDebugInfo,
};

/// Build a registry and run its advisory checks, logging every message.
///
/// Returns the registry together with the check messages so callers can
/// decide whether to refuse startup on errors.
pub fn build_checked(builder: RegistryBuilder) -> Result<(Registry, Vec<CheckMessage>)> {
    let registry = builder.build()?;
    let messages = registry.check();
    for message in &messages {
        match message.level {
            CheckLevel::Error => tracing::error!(
                target: "autoprefetch::check",
                id = message.id,
                model = %message.model,
                "{}",
                message
            ),
            CheckLevel::Warning => tracing::warn!(
                target: "autoprefetch::check",
                id = message.id,
                model = %message.model,
                "{}",
                message
            ),
        }
    }
    Ok((registry, messages))
}

/// Prelude module for convenient imports.
///
/// ```ignore
/// use autoprefetch::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Error, Loaded, ModelDef, PrefetchConfig, Record, RecordId, Registry, Related,
        RelationDescriptor, RelationField, RelationInfo, RelationLoader, Result, Session, Value,
    };
}
