//! Cache command implementation.

use super::{open_store, CommandResult, Format};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tillsync_core::{CachedRecord, CachedValue, DurableStore, RecordOrigin, Timestamp};

/// One cached record, as printed.
#[derive(Debug, Serialize)]
pub struct RecordRow {
    /// `resource/id`.
    pub key: String,
    /// Server truth or optimistic write.
    pub origin: RecordOrigin,
    /// True for an unconfirmed deletion.
    pub tombstone: bool,
    /// The snapshot; null for tombstones.
    pub value: Value,
    /// Last confirmation.
    pub synced_at: Option<Timestamp>,
    /// Last local change.
    pub updated_at: Timestamp,
}

impl From<CachedRecord> for RecordRow {
    fn from(record: CachedRecord) -> Self {
        let (tombstone, value) = match record.value {
            CachedValue::Present(value) => (false, value),
            CachedValue::Tombstone => (true, Value::Null),
        };
        Self {
            key: record.key.to_string(),
            origin: record.origin,
            tombstone,
            value,
            synced_at: record.synced_at,
            updated_at: record.updated_at,
        }
    }
}

/// Returns the cached records, optionally of one resource type.
pub fn rows(store: &DurableStore, resource: Option<&str>) -> Vec<RecordRow> {
    store
        .records(resource)
        .into_iter()
        .map(RecordRow::from)
        .collect()
}

/// Runs the cache command.
pub fn run(path: &Path, resource: Option<&str>, format: Format) -> CommandResult {
    let store = open_store(path)?;
    let rows = rows(&store, resource);

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        Format::Text => {
            if rows.is_empty() {
                println!("No cached records");
            }
            for row in &rows {
                let value = if row.tombstone {
                    "<deleted>".to_string()
                } else {
                    row.value.to_string()
                };
                println!("{:<24} {:<13} {}", row.key, row.origin.to_string(), value);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::seeded;
    use serde_json::json;

    #[test]
    fn lists_records_by_resource() {
        let seeded = seeded();
        let store = open_store(&seeded.path()).unwrap();

        let products = rows(&store, Some("products"));
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].key, "products/P-1");
        assert_eq!(products[0].origin, RecordOrigin::Server);
        assert_eq!(products[0].value, json!({"name": "Soap", "stock": 13}));

        assert!(rows(&store, Some("customers")).is_empty());
        assert_eq!(rows(&store, None).len(), 1);
    }

    #[test]
    fn tombstones_print_as_null() {
        let row = RecordRow::from(CachedRecord {
            key: tillsync_core::RecordKey::new("products", "P-9"),
            value: CachedValue::Tombstone,
            origin: RecordOrigin::LocalPending,
            synced_at: None,
            updated_at: Timestamp::from_millis(5),
        });
        assert!(row.tombstone);
        assert_eq!(row.value, Value::Null);
        assert_eq!(serde_json::to_value(&row).unwrap()["origin"], "local-pending");
    }
}
