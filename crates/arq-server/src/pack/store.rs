// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-process key/value store.
//!
//! Keys live under a namespace. The default namespace for a caller is
//! `tenant:<tenant_id>`, which makes cross-tenant aliasing impossible by
//! construction: two tenants writing the "same" key write different rows.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::RwLock;

/// Namespaced key/value rows.
#[derive(Debug, Default)]
pub struct KvStore {
    rows: RwLock<HashMap<(String, String), Value>>,
}

impl KvStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The default namespace for a tenant.
    #[must_use]
    pub fn tenant_namespace(tenant_id: &str) -> String {
        format!("tenant:{tenant_id}")
    }

    /// Write a value. Returns `true` iff the key already existed.
    pub async fn set(&self, namespace: &str, key: &str, value: Value) -> bool {
        self.rows
            .write()
            .await
            .insert((namespace.to_string(), key.to_string()), value)
            .is_some()
    }

    /// Read a value.
    pub async fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        self.rows
            .read()
            .await
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
    }

    /// Sorted keys within a namespace.
    pub async fn list(&self, namespace: &str) -> Vec<String> {
        let rows = self.rows.read().await;
        let mut keys: Vec<String> = rows
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Delete a key. Returns `true` iff it existed.
    pub async fn delete(&self, namespace: &str, key: &str) -> bool {
        self.rows
            .write()
            .await
            .remove(&(namespace.to_string(), key.to_string()))
            .is_some()
    }
}
