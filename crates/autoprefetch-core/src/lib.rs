//! Core types for autoprefetch.
//!
//! This crate provides the data model shared by the batching engine and the
//! loaders that plug into it:
//!
//! - `Record` with its `RelationCache` and `PeerGroup` membership
//! - `RelationField` / `ModelDef` declarations
//! - `RelationInfo` with shape-specific cache and lock names
//! - `PrefetchConfig` for the collection batching switch
//! - `Error` / `Result`

pub mod config;
pub mod error;
pub mod field;
pub mod model;
pub mod peer;
pub mod record;
pub mod relationship;
pub mod value;

pub use config::{ENABLE_FOR_RELATED_FIELDS_ENV, PrefetchConfig};
pub use error::{
    ConfigError, Error, NotFoundError, Result, SchemaError, SchemaErrorKind, StorageError,
};
pub use field::{RelationField, RelationKind};
pub use model::ModelDef;
pub use peer::{PeerGroup, PeerGroupRef};
pub use record::{Loaded, Record, RecordId, RelationCache};
pub use relationship::{
    Direction, LOCK_PREFIX, RelationInfo, RelationShape, cache_name, lock_name,
};
pub use value::Value;
