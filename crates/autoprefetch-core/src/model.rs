//! Model declarations.

use crate::field::RelationField;

/// Declaration of a model: its name, primary key column and relation fields.
///
/// `peer_groups` decides whether materializing this model's rows forms peer
/// groups. A model with peer groups disabled behaves like a plain ORM model:
/// every relation access on it loads individually.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDef {
    /// Model name (also the default stem of reverse accessors)
    pub name: &'static str,
    /// Primary key column
    pub primary_key: &'static str,
    /// Whether materializations of this model form peer groups
    pub peer_groups: bool,
    /// Declared relation fields (forward side)
    pub fields: Vec<RelationField>,
}

impl ModelDef {
    /// Declare a model with primary key `id` and peer groups enabled.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            primary_key: "id",
            peer_groups: true,
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn primary_key(mut self, column: &'static str) -> Self {
        self.primary_key = column;
        self
    }

    #[must_use]
    pub fn peer_groups(mut self, value: bool) -> Self {
        self.peer_groups = value;
        self
    }

    /// Add a relation field.
    #[must_use]
    pub fn field(mut self, field: RelationField) -> Self {
        self.fields.push(field);
        self
    }

    /// Find a declared field by name.
    #[must_use]
    pub fn find_field(&self, name: &str) -> Option<&RelationField> {
        self.fields.iter().find(|f| f.name == name)
    }
}
