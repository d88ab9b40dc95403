use std::collections::BTreeMap;

use serde::Serialize;

/// One entity bound for a collection, built from a single row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Record {
    collection: String,
    fields: BTreeMap<String, String>,
}

impl Record {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Copy `values[i]` into the field named `columns[i]`.
    ///
    /// Stops at whichever side runs out first: surplus values are dropped and
    /// columns without a value stay unset.
    pub fn assign_row<C, V>(&mut self, columns: &[C], values: &[V])
    where
        C: AsRef<str>,
        V: AsRef<str>,
    {
        for (i, column) in columns.iter().enumerate() {
            if i >= values.len() {
                break;
            }
            self.set(column.as_ref(), values[i].as_ref());
        }
    }
}
