use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::record::Record;
use crate::store::{
    EntityFactory, Schema, SchemaNotFound, SchemaResolver, WriteError, WriteMode, WriteSink,
};

/// In-process datastore with per-collection schemas.
///
/// Unique fields are enforced in every write mode (they model a database
/// index); required fields are only checked by validating writes. Empty values
/// never take part in uniqueness.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Collection>>,
}

struct Collection {
    schema: Schema,
    records: Vec<Record>,
    seen: HashMap<String, HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(self, schema: Schema) -> Self {
        self.create_collection(schema);
        self
    }

    /// Register `schema`, replacing any collection of the same name.
    pub fn create_collection(&self, schema: Schema) {
        let seen = schema
            .fields()
            .iter()
            .filter(|f| f.unique)
            .map(|f| (f.name.clone(), HashSet::new()))
            .collect();
        self.lock().insert(
            schema.name().to_owned(),
            Collection {
                schema,
                records: Vec::new(),
                seen,
            },
        );
    }

    /// Number of stored records, or 0 for an unknown collection.
    pub fn len(&self, collection: &str) -> usize {
        self.lock()
            .get(collection)
            .map_or(0, |c| c.records.len())
    }

    pub fn records(&self, collection: &str) -> Vec<Record> {
        self.lock()
            .get(collection)
            .map(|c| c.records.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Collection>> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Collection {
    fn insert(&mut self, record: Record, mode: WriteMode) -> Result<(), WriteError> {
        if mode == WriteMode::Validate {
            for field in self.schema.fields().iter().filter(|f| f.required) {
                if record.get(&field.name).map_or(true, str::is_empty) {
                    return Err(WriteError::new(format!(
                        "Failed to create record. {}: Cannot be blank.",
                        field.name
                    )));
                }
            }
        }

        for (field, values) in &self.seen {
            if let Some(v) = record.get(field).filter(|v| !v.is_empty()) {
                if values.contains(v) {
                    return Err(WriteError::new(format!(
                        "Failed to create record. {}",
                        WriteError::unique_violation(field)
                    )));
                }
            }
        }

        for (field, values) in &mut self.seen {
            if let Some(v) = record.get(field).filter(|v| !v.is_empty()) {
                values.insert(v.to_owned());
            }
        }
        self.records.push(record);
        Ok(())
    }
}

#[async_trait]
impl SchemaResolver for MemoryStore {
    async fn resolve(&self, collection: &str) -> Result<Schema, SchemaNotFound> {
        self.lock()
            .get(collection)
            .map(|c| c.schema.clone())
            .ok_or_else(|| SchemaNotFound(collection.to_owned()))
    }
}

impl EntityFactory for MemoryStore {}

#[async_trait]
impl WriteSink for MemoryStore {
    async fn write(&self, record: Record, mode: WriteMode) -> Result<(), WriteError> {
        let mut collections = self.lock();
        let Some(collection) = collections.get_mut(record.collection()) else {
            return Err(WriteError::with_source(
                "Failed to create record.",
                SchemaNotFound(record.collection().to_owned()),
            ));
        };
        collection.insert(record, mode)
    }
}
