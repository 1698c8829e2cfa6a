//! Model registry.
//!
//! The registry is built once from [`ModelDef`] declarations. Building it
//! resolves a forward [`Descriptor`] on the declaring model and a reverse
//! [`Descriptor`] on the target model for every relation field, and rejects
//! structural mistakes up front:
//!
//! - duplicate model names
//! - relation targets that are not registered
//! - names that are not plain identifiers
//! - two accessors on one model sharing an accessor or cache name
//!
//! # Example
//!
//! ```ignore
//! let registry = Registry::builder()
//!     .model(ModelDef::new("author"))
//!     .model(
//!         ModelDef::new("book")
//!             .field(RelationField::foreign_key("author", "author").related_name("books")),
//!     )
//!     .build()?;
//!
//! let books = registry.descriptor("author", "books")?;
//! assert_eq!(books.cache_name(), "books");
//! ```

use crate::descriptor::{Descriptor, RelationDescriptor};
use autoprefetch_core::{
    Direction, Error, ModelDef, RelationField, Result, SchemaError, SchemaErrorKind,
};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::OnceLock;

const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

fn identifier_regex() -> Option<&'static Regex> {
    static IDENTIFIER: OnceLock<Option<Regex>> = OnceLock::new();
    IDENTIFIER
        .get_or_init(|| Regex::new(IDENTIFIER_PATTERN).ok())
        .as_ref()
}

fn validate_identifier(model: &str, what: &str, name: &str) -> Result<()> {
    let Some(regex) = identifier_regex() else {
        return Err(SchemaError::new(
            SchemaErrorKind::InvalidName,
            "identifier pattern failed to compile",
        )
        .into());
    };
    if regex.is_match(name) {
        Ok(())
    } else {
        Err(SchemaError::new(
            SchemaErrorKind::InvalidName,
            format!("{what} {name:?} is not a valid identifier"),
        )
        .on_model(model)
        .into())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Resolved models and their relation descriptors.
#[derive(Debug, Default)]
pub struct Registry {
    models: HashMap<String, ModelDef>,
    descriptors: HashMap<String, BTreeMap<String, Descriptor>>,
}

impl Registry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Get a model declaration by name.
    #[must_use]
    pub fn model(&self, name: &str) -> Option<&ModelDef> {
        self.models.get(name)
    }

    #[must_use]
    pub fn contains_model(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Registered model names, sorted.
    #[must_use]
    pub fn model_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Look up the descriptor of `relation` on `model`.
    ///
    /// This is the type-level access path: it hands back the descriptor
    /// itself, without any record involved.
    pub fn descriptor(&self, model: &str, relation: &str) -> Result<&Descriptor> {
        self.descriptors
            .get(model)
            .and_then(|relations| relations.get(relation))
            .ok_or_else(|| Error::UnknownRelation {
                model: model.to_string(),
                relation: relation.to_string(),
            })
    }

    /// All descriptors of `model`, ordered by accessor name.
    pub fn relations(&self, model: &str) -> impl Iterator<Item = &Descriptor> {
        self.descriptors
            .get(model)
            .into_iter()
            .flat_map(BTreeMap::values)
    }

    /// Run the advisory model checks.
    #[must_use]
    pub fn check(&self) -> Vec<CheckMessage> {
        let mut messages = Vec::new();
        for name in self.model_names() {
            let Some(model) = self.models.get(name) else {
                continue;
            };
            let prefetch_fields = model.fields.iter().filter(|f| f.prefetch).count();
            if !model.peer_groups && prefetch_fields > 0 {
                messages.push(CheckMessage {
                    level: CheckLevel::Error,
                    id: "autoprefetch.E001",
                    model: model.name.to_string(),
                    message: format!(
                        "{} declares {} prefetch-aware relation field(s) but never forms peer groups",
                        model.name, prefetch_fields
                    ),
                    hint: Some(
                        "Enable peer groups on the model, or mark its fields with .prefetch(false)."
                            .to_string(),
                    ),
                });
            }
        }
        messages
    }
}

// ============================================================================
// Checks
// ============================================================================

/// Severity of a check message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckLevel {
    Warning,
    Error,
}

/// A diagnostic produced by [`Registry::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckMessage {
    pub level: CheckLevel,
    /// Stable identifier, e.g. `autoprefetch.E001`
    pub id: &'static str,
    /// Model the message is about
    pub model: String,
    pub message: String,
    pub hint: Option<String>,
}

impl fmt::Display for CheckMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ({}) {}", self.model, self.id, self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, "\n\tHINT: {hint}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Collects model declarations for [`Registry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    models: Vec<ModelDef>,
}

impl RegistryBuilder {
    /// Add a model declaration.
    #[must_use]
    pub fn model(mut self, model: ModelDef) -> Self {
        self.models.push(model);
        self
    }

    /// Validate the declarations and resolve every descriptor.
    pub fn build(self) -> Result<Registry> {
        let mut registry = Registry::default();

        for model in self.models {
            validate_identifier(model.name, "model name", model.name)?;
            validate_identifier(model.name, "primary key", model.primary_key)?;
            if registry.models.contains_key(model.name) {
                return Err(SchemaError::new(
                    SchemaErrorKind::DuplicateModel,
                    "model is registered twice",
                )
                .on_model(model.name)
                .into());
            }
            registry.descriptors.insert(model.name.to_string(), BTreeMap::new());
            registry.models.insert(model.name.to_string(), model);
        }

        let mut declarations: Vec<(&'static str, RelationField)> = registry
            .models
            .values()
            .flat_map(|model| model.fields.iter().map(|field| (model.name, field.clone())))
            .collect();
        declarations.sort_by_key(|(model, field)| (*model, field.name));

        for (model, field) in &declarations {
            validate_field(&registry, model, field)?;
            add_descriptor(&mut registry, Descriptor::resolve(model, field, Direction::Forward))?;
            add_descriptor(&mut registry, Descriptor::resolve(model, field, Direction::Reverse))?;
        }

        tracing::debug!(
            target: "autoprefetch::registry",
            models = registry.models.len(),
            relations = registry.descriptors.values().map(BTreeMap::len).sum::<usize>(),
            "Registry built"
        );
        Ok(registry)
    }
}

fn validate_field(registry: &Registry, model: &str, field: &RelationField) -> Result<()> {
    validate_identifier(model, "field name", field.name)?;
    for (what, name) in [
        ("column", field.column),
        ("related name", field.related_name),
        ("related query name", field.related_query_name),
        ("through table", field.through),
    ] {
        if let Some(name) = name {
            validate_identifier(model, what, name)?;
        }
    }
    if !registry.contains_model(field.target) {
        return Err(SchemaError::new(
            SchemaErrorKind::UnknownModel,
            format!(
                "field {:?} targets unregistered model {:?}",
                field.name, field.target
            ),
        )
        .on_model(model)
        .into());
    }
    Ok(())
}

fn add_descriptor(registry: &mut Registry, descriptor: Descriptor) -> Result<()> {
    let info = descriptor.info();
    let owner = info.model.clone();
    let Some(relations) = registry.descriptors.get_mut(&owner) else {
        return Err(SchemaError::new(
            SchemaErrorKind::UnknownModel,
            format!("accessor {:?} lands on unregistered model", info.name),
        )
        .on_model(owner)
        .into());
    };

    if let Some(existing) = relations.get(&info.name) {
        return Err(SchemaError::new(
            SchemaErrorKind::AccessorClash,
            format!(
                "accessor {:?} is declared by both {}.{} and {}.{}",
                info.name,
                existing.info().declared_on,
                existing.info().field,
                info.declared_on,
                info.field
            ),
        )
        .on_model(owner)
        .into());
    }
    if let Some(existing) = relations
        .values()
        .find(|other| other.cache_name() == descriptor.cache_name())
    {
        return Err(SchemaError::new(
            SchemaErrorKind::CacheNameClash,
            format!(
                "accessors {:?} and {:?} both cache under {:?}",
                existing.info().name,
                info.name,
                info.cache_name
            ),
        )
        .on_model(owner)
        .into());
    }

    relations.insert(info.name.clone(), descriptor);
    Ok(())
}
