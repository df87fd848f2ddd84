//! Local mirror of the OVSDB tables the driver cares about
//!
//! Seeded from the initial reply of a `monitor` request and kept current by
//! the `update` notifications that follow it. Rows are stored exactly as
//! ovsdb-server sends them, keyed by table name and row UUID.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

type Rows = HashMap<String, Value>;

/// Read cache of OVSDB rows (table -> uuid -> row)
#[derive(Default)]
pub struct TableCache {
    tables: RwLock<HashMap<String, Rows>>,
    seeded: AtomicBool,
}

impl TableCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once an initial monitor reply has been applied and the
    /// notification stream is still alive
    pub fn is_seeded(&self) -> bool {
        self.seeded.load(Ordering::Acquire)
    }

    /// Replace the whole cache with the initial `monitor` reply
    pub async fn seed(&self, initial: &Value) {
        let mut tables = self.tables.write().await;
        tables.clear();
        apply_table_updates(&mut tables, initial);
        self.seeded.store(true, Ordering::Release);
    }

    /// Apply a `<table-updates>` object from an `update` notification
    pub async fn apply_update(&self, updates: &Value) {
        let mut tables = self.tables.write().await;
        apply_table_updates(&mut tables, updates);
    }

    /// Mark the cache stale, e.g. after the monitor connection dropped
    pub async fn invalidate(&self) {
        self.seeded.store(false, Ordering::Release);
        self.tables.write().await.clear();
    }

    pub async fn row(&self, table: &str, uuid: &str) -> Option<Value> {
        let tables = self.tables.read().await;
        tables.get(table).and_then(|rows| rows.get(uuid)).cloned()
    }

    /// Find a row by its `name` column
    pub async fn find_by_name(&self, table: &str, name: &str) -> Option<(String, Value)> {
        let tables = self.tables.read().await;
        tables.get(table)?.iter().find_map(|(uuid, row)| {
            (row.get("name").and_then(Value::as_str) == Some(name))
                .then(|| (uuid.clone(), row.clone()))
        })
    }

    /// All `name` values of a table, sorted
    pub async fn names(&self, table: &str) -> Vec<String> {
        let tables = self.tables.read().await;
        let mut names: Vec<String> = tables
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter_map(|row| row.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Names of the ports attached to a bridge
    pub async fn bridge_ports(&self, bridge: &str) -> Option<Vec<String>> {
        let (_, row) = self.find_by_name("Bridge", bridge).await?;
        let port_uuids = uuid_set(row.get("ports").unwrap_or(&Value::Null));

        let tables = self.tables.read().await;
        let ports = tables.get("Port");
        let mut names: Vec<String> = port_uuids
            .iter()
            .filter_map(|uuid| ports.and_then(|rows| rows.get(uuid)))
            .filter_map(|row| row.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        names.sort();
        Some(names)
    }
}

fn apply_table_updates(tables: &mut HashMap<String, Rows>, updates: &Value) {
    let Some(updates) = updates.as_object() else {
        return;
    };
    for (table, rows) in updates {
        let Some(rows) = rows.as_object() else {
            continue;
        };
        let cached = tables.entry(table.clone()).or_default();
        for (uuid, change) in rows {
            match change.get("new") {
                Some(new) => {
                    cached.insert(uuid.clone(), new.clone());
                }
                None => {
                    cached.remove(uuid);
                }
            }
        }
    }
}

/// Decode an OVSDB set of UUIDs.
///
/// A set with exactly one member is sent as the bare atom `["uuid", "..."]`
/// instead of `["set", [...]]`.
pub fn uuid_set(value: &Value) -> Vec<String> {
    fn atom(value: &Value) -> Option<String> {
        match value.as_array()?.as_slice() {
            [kind, uuid] if kind == "uuid" => uuid.as_str().map(str::to_string),
            _ => None,
        }
    }

    match value.as_array().map(Vec::as_slice) {
        Some([kind, members]) if kind == "set" => members
            .as_array()
            .map(|members| members.iter().filter_map(atom).collect())
            .unwrap_or_default(),
        Some(_) => atom(value).into_iter().collect(),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn initial() -> Value {
        json!({
            "Bridge": {
                "b1": {"new": {"name": "ovsbr-abcde", "ports": ["set", [["uuid", "p1"], ["uuid", "p2"]]]}},
                "b2": {"new": {"name": "ovsbr-fghij", "ports": ["uuid", "p3"]}}
            },
            "Port": {
                "p1": {"new": {"name": "ovsbr-abcde"}},
                "p2": {"new": {"name": "ovs-veth0-12345"}},
                "p3": {"new": {"name": "ovsbr-fghij"}}
            }
        })
    }

    #[tokio::test]
    async fn test_seed_and_lookup() {
        let cache = TableCache::new();
        assert!(!cache.is_seeded());
        cache.seed(&initial()).await;

        assert!(cache.is_seeded());
        assert_eq!(cache.names("Bridge").await, vec!["ovsbr-abcde", "ovsbr-fghij"]);
        let (uuid, _) = cache.find_by_name("Bridge", "ovsbr-fghij").await.unwrap();
        assert_eq!(uuid, "b2");
        assert_eq!(
            cache.bridge_ports("ovsbr-abcde").await.unwrap(),
            vec!["ovs-veth0-12345", "ovsbr-abcde"]
        );
        assert_eq!(cache.bridge_ports("ovsbr-fghij").await.unwrap(), vec!["ovsbr-fghij"]);
        assert!(cache.bridge_ports("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_update_modify_and_delete() {
        let cache = TableCache::new();
        cache.seed(&initial()).await;

        cache
            .apply_update(&json!({
                "Bridge": {
                    "b1": {"old": {"ports": []}, "new": {"name": "ovsbr-abcde", "ports": ["uuid", "p1"]}},
                    "b2": {"old": {"name": "ovsbr-fghij"}}
                },
                "Port": {"p2": {"old": {"name": "ovs-veth0-12345"}}}
            }))
            .await;

        assert_eq!(cache.names("Bridge").await, vec!["ovsbr-abcde"]);
        assert_eq!(cache.bridge_ports("ovsbr-abcde").await.unwrap(), vec!["ovsbr-abcde"]);
        assert!(cache.row("Port", "p2").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_clears_rows() {
        let cache = TableCache::new();
        cache.seed(&initial()).await;
        cache.invalidate().await;
        assert!(!cache.is_seeded());
        assert!(cache.names("Bridge").await.is_empty());
    }

    #[test]
    fn test_uuid_set_shapes() {
        assert_eq!(uuid_set(&json!(["set", []])), Vec::<String>::new());
        assert_eq!(uuid_set(&json!(["uuid", "a"])), vec!["a"]);
        assert_eq!(
            uuid_set(&json!(["set", [["uuid", "a"], ["uuid", "b"]]])),
            vec!["a", "b"]
        );
        assert!(uuid_set(&json!("nonsense")).is_empty());
    }
}
