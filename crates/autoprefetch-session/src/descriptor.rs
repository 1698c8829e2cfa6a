//! Relation descriptors.
//!
//! A descriptor sits between relation access on a record and the loader. It
//! owns the per-shape policy: which cache entry answers "already loaded",
//! whether a record is eligible for peer batching at all, and which peers
//! join a batch.
//!
//! | Shape | Cached under | Extra eligibility |
//! |---|---|---|
//! | forward many-to-one | field name | local key not null |
//! | forward one-to-one | field name | local key not null |
//! | reverse one-to-one | reverse accessor | none |
//! | reverse one-to-many | reverse accessor | collection switch on |
//! | many-to-many (forward) | field name | collection switch on |
//! | many-to-many (reverse) | related query name | collection switch on |
//!
//! The registry resolves one [`Descriptor`] per accessor when it is built.
//! Access-time code only goes through the [`RelationDescriptor`] trait.

use crate::lock::PrefetchLocks;
use crate::peers;
use crate::store::RecordStore;
use autoprefetch_core::{
    Direction, PeerGroup, PrefetchConfig, Record, RecordId, RelationField, RelationInfo,
    RelationShape,
};

// ============================================================================
// Trait
// ============================================================================

/// Access-time policy for one relation accessor.
pub trait RelationDescriptor {
    /// Resolved metadata of the accessor.
    fn info(&self) -> &RelationInfo;

    /// Shape-specific eligibility of `record` for peer batching.
    fn is_eligible(&self, record: &Record, config: &PrefetchConfig) -> bool;

    fn cache_name(&self) -> &str {
        &self.info().cache_name
    }

    fn lock_name(&self) -> &str {
        &self.info().lock_name
    }

    /// Whether the relation is already loaded on `record`.
    fn is_cached(&self, record: &Record) -> bool {
        record.cache().contains(self.cache_name())
    }

    /// Decide whether an access on `record` should trigger a batched load.
    ///
    /// `live_peers` is the number of group members still held by the
    /// session, `locked` whether this relation's prefetch lock is set on
    /// `record`.
    fn should_batch(
        &self,
        record: &Record,
        live_peers: usize,
        locked: bool,
        config: &PrefetchConfig,
    ) -> bool {
        record.peers().is_some()
            && !self.is_cached(record)
            && live_peers >= peers::MIN_PEERS
            && self.info().prefetch
            && self.is_eligible(record, config)
            && !locked
    }

    /// Live members of `group` that are neither cached nor locked for this
    /// relation, in materialization order.
    fn collect_candidates(
        &self,
        store: &RecordStore,
        group: &PeerGroup,
        locks: &PrefetchLocks,
    ) -> Vec<RecordId> {
        peers::live_members(store, group)
            .filter(|id| {
                store
                    .get(*id)
                    .is_some_and(|record| !self.is_cached(record))
                    && !locks.is_locked(*id, self.lock_name())
            })
            .collect()
    }
}

/// The local key of a forward single-valued relation is set.
fn has_local_key(info: &RelationInfo, record: &Record) -> bool {
    !record.field(&info.column).is_null()
}

// ============================================================================
// Single-valued shapes
// ============================================================================

/// `book.author`
#[derive(Debug, Clone)]
pub struct ForwardManyToOneDescriptor {
    info: RelationInfo,
}

impl RelationDescriptor for ForwardManyToOneDescriptor {
    fn info(&self) -> &RelationInfo {
        &self.info
    }

    fn is_eligible(&self, record: &Record, _config: &PrefetchConfig) -> bool {
        has_local_key(&self.info, record)
    }
}

/// `restaurant.place`
#[derive(Debug, Clone)]
pub struct ForwardOneToOneDescriptor {
    info: RelationInfo,
}

impl RelationDescriptor for ForwardOneToOneDescriptor {
    fn info(&self) -> &RelationInfo {
        &self.info
    }

    fn is_eligible(&self, record: &Record, _config: &PrefetchConfig) -> bool {
        has_local_key(&self.info, record)
    }
}

/// `place.restaurant`
///
/// Caches under the reverse accessor name of the paired forward field, which
/// is also where a batch over the forward side stores its back-references.
#[derive(Debug, Clone)]
pub struct ReverseOneToOneDescriptor {
    info: RelationInfo,
    forward: RelationInfo,
}

impl ReverseOneToOneDescriptor {
    /// The forward accessor this reverse side is paired with.
    #[must_use]
    pub fn forward(&self) -> &RelationInfo {
        &self.forward
    }
}

impl RelationDescriptor for ReverseOneToOneDescriptor {
    fn info(&self) -> &RelationInfo {
        &self.info
    }

    fn is_eligible(&self, _record: &Record, _config: &PrefetchConfig) -> bool {
        true
    }
}

// ============================================================================
// Collection shapes
// ============================================================================

/// `author.books`
#[derive(Debug, Clone)]
pub struct ReverseManyToOneDescriptor {
    info: RelationInfo,
}

impl RelationDescriptor for ReverseManyToOneDescriptor {
    fn info(&self) -> &RelationInfo {
        &self.info
    }

    fn is_eligible(&self, _record: &Record, config: &PrefetchConfig) -> bool {
        config.enable_for_related_fields
    }
}

/// Both sides of a many-to-many field.
#[derive(Debug, Clone)]
pub struct ManyToManyDescriptor {
    info: RelationInfo,
    reverse: bool,
}

impl ManyToManyDescriptor {
    #[must_use]
    pub const fn is_reverse(&self) -> bool {
        self.reverse
    }
}

impl RelationDescriptor for ManyToManyDescriptor {
    fn info(&self) -> &RelationInfo {
        &self.info
    }

    fn is_eligible(&self, _record: &Record, config: &PrefetchConfig) -> bool {
        config.enable_for_related_fields
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// A resolved descriptor of any shape.
#[derive(Debug, Clone)]
pub enum Descriptor {
    ForwardManyToOne(ForwardManyToOneDescriptor),
    ForwardOneToOne(ForwardOneToOneDescriptor),
    ReverseOneToOne(ReverseOneToOneDescriptor),
    ReverseManyToOne(ReverseManyToOneDescriptor),
    ManyToMany(ManyToManyDescriptor),
}

impl Descriptor {
    /// Resolve the descriptor for `field` declared on `model`, seen from
    /// `direction`.
    #[must_use]
    pub fn resolve(model: &str, field: &RelationField, direction: Direction) -> Self {
        let info = RelationInfo::resolve(model, field, direction);
        match info.shape {
            RelationShape::ForwardManyToOne => {
                Descriptor::ForwardManyToOne(ForwardManyToOneDescriptor { info })
            }
            RelationShape::ForwardOneToOne => {
                Descriptor::ForwardOneToOne(ForwardOneToOneDescriptor { info })
            }
            RelationShape::ReverseOneToOne => {
                let forward = RelationInfo::resolve(model, field, Direction::Forward);
                Descriptor::ReverseOneToOne(ReverseOneToOneDescriptor { info, forward })
            }
            RelationShape::ReverseManyToOne => {
                Descriptor::ReverseManyToOne(ReverseManyToOneDescriptor { info })
            }
            RelationShape::ForwardManyToMany => Descriptor::ManyToMany(ManyToManyDescriptor {
                info,
                reverse: false,
            }),
            RelationShape::ReverseManyToMany => Descriptor::ManyToMany(ManyToManyDescriptor {
                info,
                reverse: true,
            }),
        }
    }

    #[must_use]
    pub fn shape(&self) -> RelationShape {
        self.info().shape
    }

    fn inner(&self) -> &dyn RelationDescriptor {
        match self {
            Descriptor::ForwardManyToOne(d) => d,
            Descriptor::ForwardOneToOne(d) => d,
            Descriptor::ReverseOneToOne(d) => d,
            Descriptor::ReverseManyToOne(d) => d,
            Descriptor::ManyToMany(d) => d,
        }
    }
}

impl RelationDescriptor for Descriptor {
    fn info(&self) -> &RelationInfo {
        self.inner().info()
    }

    fn is_eligible(&self, record: &Record, config: &PrefetchConfig) -> bool {
        self.inner().is_eligible(record, config)
    }
}
