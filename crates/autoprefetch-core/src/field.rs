//! Relation field declarations.
//!
//! A [`RelationField`] is declared on the model that holds the forward side
//! of an association (the foreign key column, or the owning side of a
//! many-to-many). Registering it contributes a forward accessor to the
//! declaring model and a reverse accessor to the target model.

/// The kind of association a field declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelationKind {
    /// Many-to-one: many `Book`s point at one `Author`.
    #[default]
    ForeignKey,
    /// One-to-one: a `Place` has at most one `Restaurant`.
    OneToOne,
    /// Many-to-many through a link table.
    ManyToMany,
}

/// Declaration of a relation field on a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationField {
    /// Field (forward accessor) name on the declaring model
    pub name: &'static str,
    /// Kind of association
    pub kind: RelationKind,
    /// Target model name
    pub target: &'static str,
    /// Local column holding the foreign key (defaults to `<name>_id`)
    pub column: Option<&'static str>,
    /// Reverse accessor name on the target model
    pub related_name: Option<&'static str>,
    /// Name the reverse side is cached and queried under
    pub related_query_name: Option<&'static str>,
    /// Link table for many-to-many (defaults to `<model>_<name>`)
    pub through: Option<&'static str>,
    /// Whether access to this field participates in peer batching
    pub prefetch: bool,
}

impl RelationField {
    const fn new(name: &'static str, kind: RelationKind, target: &'static str) -> Self {
        Self {
            name,
            kind,
            target,
            column: None,
            related_name: None,
            related_query_name: None,
            through: None,
            prefetch: true,
        }
    }

    /// Declare a many-to-one field.
    #[must_use]
    pub const fn foreign_key(name: &'static str, target: &'static str) -> Self {
        Self::new(name, RelationKind::ForeignKey, target)
    }

    /// Declare a one-to-one field.
    #[must_use]
    pub const fn one_to_one(name: &'static str, target: &'static str) -> Self {
        Self::new(name, RelationKind::OneToOne, target)
    }

    /// Declare a many-to-many field.
    #[must_use]
    pub const fn many_to_many(name: &'static str, target: &'static str) -> Self {
        Self::new(name, RelationKind::ManyToMany, target)
    }

    /// Set the local foreign key column.
    #[must_use]
    pub const fn column(mut self, column: &'static str) -> Self {
        self.column = Some(column);
        self
    }

    /// Set the reverse accessor name on the target model.
    #[must_use]
    pub const fn related_name(mut self, name: &'static str) -> Self {
        self.related_name = Some(name);
        self
    }

    #[must_use]
    pub const fn related_query_name(mut self, name: &'static str) -> Self {
        self.related_query_name = Some(name);
        self
    }

    /// Set the many-to-many link table.
    #[must_use]
    pub const fn through(mut self, table: &'static str) -> Self {
        self.through = Some(table);
        self
    }

    /// Opt this field in or out of peer batching (both directions).
    #[must_use]
    pub const fn prefetch(mut self, value: bool) -> Self {
        self.prefetch = value;
        self
    }

    /// Local foreign key column. Empty for many-to-many fields.
    #[must_use]
    pub fn column_name(&self) -> String {
        match (self.kind, self.column) {
            (RelationKind::ManyToMany, _) => String::new(),
            (_, Some(column)) => column.to_string(),
            (_, None) => format!("{}_id", self.name),
        }
    }

    /// Reverse accessor name contributed to the target model.
    #[must_use]
    pub fn related_accessor(&self, model: &str) -> String {
        if let Some(name) = self.related_name {
            return name.to_string();
        }
        match self.kind {
            RelationKind::OneToOne => model.to_lowercase(),
            RelationKind::ForeignKey | RelationKind::ManyToMany => {
                format!("{}_set", model.to_lowercase())
            }
        }
    }

    /// Name the reverse side is queried (and, for many-to-many, cached) under.
    #[must_use]
    pub fn query_name(&self, model: &str) -> String {
        self.related_query_name
            .or(self.related_name)
            .map_or_else(|| model.to_lowercase(), str::to_string)
    }

    /// Link table name for many-to-many fields.
    #[must_use]
    pub fn through_table(&self, model: &str) -> Option<String> {
        match self.kind {
            RelationKind::ManyToMany => Some(
                self.through
                    .map_or_else(|| format!("{}_{}", model.to_lowercase(), self.name), str::to_string),
            ),
            RelationKind::ForeignKey | RelationKind::OneToOne => None,
        }
    }
}
