//! Row representation and its JSON snapshot format.
//!
//! Each row is a JSON object of column values plus storage metadata used for
//! version tracking. When the store is flushed to disk, rows are written in a
//! flat format with `_`-prefixed metadata fields:
//!
//! ```text
//! {
//!   "_pk": "01hz...",
//!   "_version": 1,
//!   "_created_at": "2024-01-01T00:00:00+00:00",
//!   "_updated_at": "2024-01-01T00:00:00+00:00",
//!   "name": "abc",
//!   "email": "abc@example.com"
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::RowKey;

/// a db row with metadata and user data
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// primary key
    pub key: RowKey,
    /// bumped on every update
    pub version: u64,
    /// creation timestamp (RFC 3339)
    pub created_at: String,
    /// last update timestamp (RFC 3339)
    pub updated_at: String,
    /// data (column values)
    pub data: BTreeMap<String, Value>,
}

impl Row {
    /// creates a new row with key & data
    ///
    /// sets v1 and current time
    pub fn new(key: RowKey, data: BTreeMap<String, Value>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            key,
            version: 1,
            created_at: now.clone(),
            updated_at: now,
            data,
        }
    }

    /// create a new row from a JSON value (typically a serialized entity)
    pub fn from_value(key: RowKey, value: Value) -> StorageResult<Self> {
        let data = match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => {
                return Err(StorageError::SchemaViolation(
                    "row data must be a JSON object".to_string(),
                ))
            }
        };
        Ok(Self::new(key, data))
    }

    /// the column values as a JSON object
    pub fn to_value(&self) -> Value {
        Value::Object(self.data.clone().into_iter().collect())
    }

    /// merge new data into existing data (for partial updates)
    ///
    /// increments version and updates the timestamp
    pub fn merge_data(&mut self, updates: BTreeMap<String, Value>) {
        for (k, v) in updates {
            self.data.insert(k, v);
        }
        self.version += 1;
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }

    /// get a column value by name
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.data.get(column)
    }

    /// get a column as a string slice, if it holds a string
    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.data.get(column).and_then(Value::as_str)
    }
}

/// on-disk format of a single row
///
/// uses `_` prefix for metadata fields to avoid conflicts with user columns
#[derive(Serialize, Deserialize)]
pub(crate) struct RowJson {
    #[serde(rename = "_pk")]
    pk: String,
    #[serde(rename = "_version")]
    version: u64,
    #[serde(rename = "_created_at")]
    created_at: String,
    #[serde(rename = "_updated_at")]
    updated_at: String,
    #[serde(flatten)]
    data: BTreeMap<String, Value>,
}

impl From<&Row> for RowJson {
    fn from(row: &Row) -> Self {
        Self {
            pk: row.key.as_str().to_string(),
            version: row.version,
            created_at: row.created_at.clone(),
            updated_at: row.updated_at.clone(),
            data: row.data.clone(),
        }
    }
}

impl TryFrom<RowJson> for Row {
    type Error = StorageError;

    fn try_from(json: RowJson) -> StorageResult<Self> {
        Ok(Row {
            key: RowKey::new(json.pk)?,
            version: json.version,
            created_at: json.created_at,
            updated_at: json.updated_at,
            data: json.data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_creation() {
        let key = RowKey::new("test123").unwrap();
        let mut data = BTreeMap::new();
        data.insert("name".to_string(), Value::String("Alice".to_string()));
        data.insert("age".to_string(), Value::Number(30.into()));

        let row = Row::new(key.clone(), data);

        assert_eq!(row.key, key);
        assert_eq!(row.version, 1);
        assert_eq!(row.get_str("name"), Some("Alice"));
        assert_eq!(row.get("age"), Some(&Value::Number(30.into())));
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        let key = RowKey::new("k").unwrap();
        let result = Row::from_value(key, Value::Array(vec![]));
        assert!(matches!(result, Err(StorageError::SchemaViolation(_))));
    }

    #[test]
    fn test_merge_bumps_version() {
        let key = RowKey::new("test").unwrap();
        let mut row = Row::new(key, BTreeMap::new());

        let mut updates = BTreeMap::new();
        updates.insert("name".to_string(), Value::String("Bob".to_string()));
        row.merge_data(updates);

        assert_eq!(row.version, 2);
        assert_eq!(row.get_str("name"), Some("Bob"));
    }

    #[test]
    fn test_snapshot_format() {
        let key = RowKey::new("abc").unwrap();
        let mut data = BTreeMap::new();
        data.insert("b_field".to_string(), Value::Number(2.into()));

        let row = Row::new(key, data);
        let json = serde_json::to_value(RowJson::from(&row)).unwrap();

        assert_eq!(json.get("_pk"), Some(&Value::String("abc".to_string())));
        assert_eq!(json.get("_version"), Some(&Value::Number(1.into())));
        assert_eq!(json.get("b_field"), Some(&Value::Number(2.into())));

        let parsed: RowJson = serde_json::from_value(json).unwrap();
        let restored = Row::try_from(parsed).unwrap();
        assert_eq!(restored, row);
    }
}
