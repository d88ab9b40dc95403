use async_trait::async_trait;

use crate::record::Record;
use crate::store::{EntityFactory, Schema, SchemaNotFound, SchemaResolver, WriteError, WriteMode, WriteSink};

/// Prints every record as one JSON line instead of storing it.
///
/// Resolves any collection name to an empty schema, so it can stand in for a
/// real datastore when checking how a file maps onto records.
pub struct DebugSink;

#[async_trait]
impl WriteSink for DebugSink {
    async fn write(&self, record: Record, _mode: WriteMode) -> Result<(), WriteError> {
        let line = serde_json::to_string(&record)
            .map_err(|e| WriteError::with_source("failed to encode record", e))?;
        println!("{line}");
        Ok(())
    }
}

#[async_trait]
impl SchemaResolver for DebugSink {
    async fn resolve(&self, collection: &str) -> Result<Schema, SchemaNotFound> {
        Ok(Schema::new(collection))
    }
}

impl EntityFactory for DebugSink {}

impl Default for DebugSink {
    fn default() -> Self {
        Self
    }
}
