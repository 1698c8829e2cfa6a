//! Resolved relation metadata.
//!
//! Every [`RelationField`] declaration resolves into two [`RelationInfo`]s:
//! the forward accessor on the declaring model and the reverse accessor on
//! the target model. Each carries the shape-specific cache name and the
//! matching prefetch lock name, so access-time code never has to recompute
//! naming conventions.

use crate::field::{RelationField, RelationKind};

/// Prefix of every prefetch lock name.
pub const LOCK_PREFIX: &str = "prefetching:";

/// Which side of a declared field an accessor sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// On the declaring model.
    Forward,
    /// On the target model.
    Reverse,
}

/// The structural kind of a relation accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationShape {
    /// `book.author`: the reference is held by this record.
    ForwardManyToOne,
    /// `restaurant.place`
    ForwardOneToOne,
    /// `place.restaurant`
    ReverseOneToOne,
    /// `author.books`
    ReverseManyToOne,
    /// `club.members`
    ForwardManyToMany,
    /// `member.clubs`
    ReverseManyToMany,
}

impl RelationShape {
    /// Shape of the accessor on `direction` for a field of `kind`.
    #[must_use]
    pub const fn of(kind: RelationKind, direction: Direction) -> Self {
        match (kind, direction) {
            (RelationKind::ForeignKey, Direction::Forward) => RelationShape::ForwardManyToOne,
            (RelationKind::ForeignKey, Direction::Reverse) => RelationShape::ReverseManyToOne,
            (RelationKind::OneToOne, Direction::Forward) => RelationShape::ForwardOneToOne,
            (RelationKind::OneToOne, Direction::Reverse) => RelationShape::ReverseOneToOne,
            (RelationKind::ManyToMany, Direction::Forward) => RelationShape::ForwardManyToMany,
            (RelationKind::ManyToMany, Direction::Reverse) => RelationShape::ReverseManyToMany,
        }
    }

    #[must_use]
    pub const fn direction(self) -> Direction {
        match self {
            RelationShape::ForwardManyToOne
            | RelationShape::ForwardOneToOne
            | RelationShape::ForwardManyToMany => Direction::Forward,
            RelationShape::ReverseOneToOne
            | RelationShape::ReverseManyToOne
            | RelationShape::ReverseManyToMany => Direction::Reverse,
        }
    }

    /// Whether the accessor yields a collection.
    #[must_use]
    pub const fn is_collection(self) -> bool {
        matches!(
            self,
            RelationShape::ReverseManyToOne
                | RelationShape::ForwardManyToMany
                | RelationShape::ReverseManyToMany
        )
    }

    /// Whether the reference value lives on the accessing record itself.
    #[must_use]
    pub const fn holds_local_key(self) -> bool {
        matches!(
            self,
            RelationShape::ForwardManyToOne | RelationShape::ForwardOneToOne
        )
    }
}

/// Cache name of the accessor of `shape` for `field` declared on `model`.
///
/// Forward accessors cache under the field name. Reverse single-valued and
/// reverse one-to-many accessors cache under the reverse accessor name; the
/// reverse many-to-many side caches under the related query name.
#[must_use]
pub fn cache_name(shape: RelationShape, field: &RelationField, model: &str) -> String {
    match shape {
        RelationShape::ForwardManyToOne
        | RelationShape::ForwardOneToOne
        | RelationShape::ForwardManyToMany => field.name.to_string(),
        RelationShape::ReverseOneToOne | RelationShape::ReverseManyToOne => {
            field.related_accessor(model)
        }
        RelationShape::ReverseManyToMany => field.query_name(model),
    }
}

/// Lock name paired with a cache name.
#[must_use]
pub fn lock_name(cache_name: &str) -> String {
    format!("{LOCK_PREFIX}{cache_name}")
}

/// Resolved metadata for one relation accessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationInfo {
    /// Model the accessor lives on.
    pub model: String,
    /// Accessor name on `model`.
    pub name: String,
    pub shape: RelationShape,
    /// Model on the other end.
    pub related_model: String,
    /// Model that declares the underlying field.
    pub declared_on: String,
    /// Name of the declaring field.
    pub field: String,
    /// Foreign key column on the declaring model (empty for many-to-many).
    pub column: String,
    /// Link table for many-to-many.
    pub through: Option<String>,
    pub query_name: String,
    pub cache_name: String,
    pub lock_name: String,
    /// Whether access participates in peer batching.
    pub prefetch: bool,
}

impl RelationInfo {
    /// Resolve the accessor on `direction` for `field` declared on `model`.
    #[must_use]
    pub fn resolve(model: &str, field: &RelationField, direction: Direction) -> Self {
        let shape = RelationShape::of(field.kind, direction);
        let cache_name = cache_name(shape, field, model);
        let (owner, name, related) = match direction {
            Direction::Forward => (model.to_string(), field.name.to_string(), field.target),
            Direction::Reverse => (field.target.to_string(), field.related_accessor(model), model),
        };

        Self {
            model: owner,
            name,
            shape,
            related_model: related.to_string(),
            declared_on: model.to_string(),
            field: field.name.to_string(),
            column: field.column_name(),
            through: field.through_table(model),
            query_name: field.query_name(model),
            lock_name: lock_name(&cache_name),
            cache_name,
            prefetch: field.prefetch,
        }
    }

    /// Whether the accessor yields a collection.
    #[must_use]
    pub fn is_collection(&self) -> bool {
        self.shape.is_collection()
    }

    /// `model.name`, for logs and error messages.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.model, self.name)
    }
}
