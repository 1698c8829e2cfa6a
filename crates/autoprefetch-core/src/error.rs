//! Error types for relation access and registry setup.

use crate::record::RecordId;
use std::fmt;

/// The primary error type for all autoprefetch operations.
#[derive(Debug)]
pub enum Error {
    /// A single-valued relation has no referent
    NotFound(NotFoundError),
    /// Errors raised by a relation loader (storage round-trips)
    Storage(StorageError),
    /// Structural misconfiguration detected while building the registry
    Schema(SchemaError),
    /// Configuration errors
    Config(ConfigError),
    /// The record is not (or no longer) held by the session
    UnknownRecord(RecordId),
    /// The model has no relation registered under this accessor name
    UnknownRelation { model: String, relation: String },
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug, Clone)]
pub struct NotFoundError {
    pub model: String,
    pub relation: String,
    pub record: RecordId,
}

#[derive(Debug)]
pub struct StorageError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StorageError {
    /// Create a storage error with a message and no underlying cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

#[derive(Debug, Clone)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub model: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Two models registered under the same name
    DuplicateModel,
    /// A relation points at a model that was never registered
    UnknownModel,
    /// A model, field or accessor name is not a valid identifier
    InvalidName,
    /// Two relations on one model resolve to the same accessor name
    AccessorClash,
    /// Two relations on one model resolve to the same cache (and lock) name
    CacheNameClash,
    /// A relation was read as the wrong shape (single vs collection)
    ShapeMismatch,
}

impl SchemaError {
    pub fn new(kind: SchemaErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            model: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn on_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Is this the "no referent" condition of a single-valued relation?
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Is this a setup-time error rather than a runtime access error?
    pub fn is_misconfiguration(&self) -> bool {
        match self {
            Error::Schema(e) => e.kind != SchemaErrorKind::ShapeMismatch,
            Error::Config(_) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound(e) => write!(f, "Not found: {}", e),
            Error::Storage(e) => write!(f, "Storage error: {}", e.message),
            Error::Schema(e) => write!(f, "Schema error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::UnknownRecord(id) => write!(f, "Record {} is not held by this session", id),
            Error::UnknownRelation { model, relation } => {
                write!(f, "Model '{}' has no relation '{}'", model, relation)
            }
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Storage(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} has no related object (record {})",
            self.model, self.relation, self.record
        )
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model {
            Some(model) => write!(f, "{}: {}", model, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<NotFoundError> for Error {
    fn from(err: NotFoundError) -> Self {
        Error::NotFound(err)
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::Storage(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
