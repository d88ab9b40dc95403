//! Contracts the pipeline needs from a target datastore.
//!
//! The pipeline never stores or validates anything itself. It resolves a
//! [`Schema`] once, asks an [`EntityFactory`] for an empty [`Record`] per row,
//! and hands the filled record to a [`WriteSink`].

use async_trait::async_trait;
use thiserror::Error;

use crate::record::Record;
use crate::source::csv::Header;

pub mod debug;
pub mod memory;

/// Message suffix a datastore uses when a uniqueness constraint rejects a write.
pub const UNIQUE_VIOLATION_SUFFIX: &str = "Value must be unique.";

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure reported by a [`WriteSink`].
#[derive(Error, Debug)]
#[error("{message}")]
pub struct WriteError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl WriteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn unique_violation(field: &str) -> Self {
        Self::new(format!("{field}: {UNIQUE_VIOLATION_SUFFIX}"))
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_unique_violation(&self) -> bool {
        self.message.ends_with(UNIQUE_VIOLATION_SUFFIX)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("collection {0:?} not found")]
pub struct SchemaNotFound(pub String);

/// Whether a write runs through the datastore's validation rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    Validate,
    SkipValidation,
}

impl WriteMode {
    pub fn from_validating(validating: bool) -> Self {
        if validating {
            Self::Validate
        } else {
            Self::SkipValidation
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub required: bool,
    pub unique: bool,
}

impl FieldSpec {
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            unique: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Shape of a target collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    name: String,
    fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }
}

#[async_trait]
pub trait SchemaResolver: Send + Sync {
    async fn resolve(&self, collection: &str) -> Result<Schema, SchemaNotFound>;
}

pub trait EntityFactory: Send + Sync {
    /// An empty record for `schema`; the pipeline fills it from one row.
    fn new_record(&self, schema: &Schema, _header: &Header) -> Record {
        Record::new(schema.name())
    }
}

#[async_trait]
pub trait WriteSink: Send + Sync {
    async fn write(&self, record: Record, mode: WriteMode) -> Result<(), WriteError>;

    /// Errors for which the row counts as already imported.
    fn is_duplicate(&self, err: &WriteError) -> bool {
        err.is_unique_violation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violation_is_matched_by_suffix() {
        assert!(WriteError::unique_violation("email").is_unique_violation());
        assert!(WriteError::new("Failed to create record. email: Value must be unique.")
            .is_unique_violation());
        assert!(!WriteError::new("Value must be unique. (retry later)").is_unique_violation());
        assert!(!WriteError::new("disk full").is_unique_violation());
    }
}
