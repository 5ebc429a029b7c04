// SPDX-License-Identifier: MIT OR Apache-2.0
//! `op.store.*` — the in-process key/value pack.

use arq_core::JsonMap;
use serde_json::json;

use super::{CommandError, CommandResult, optional_str, required_str};
use crate::bus::SocketBus;
use crate::pack::KvStore;

impl SocketBus {
    /// Resolve the namespace for a store call. An explicit `namespace`
    /// argument is honored; the default is tenant-scoped so two tenants
    /// can never alias each other's rows.
    async fn store_namespace(&self, args: &JsonMap, client_id: &str, _is_admin: bool) -> String {
        match optional_str(args, "namespace") {
            Some(namespace) => namespace.to_string(),
            None => KvStore::tenant_namespace(&self.tenant_of(client_id).await),
        }
    }

    pub(crate) async fn cmd_store_set(
        &self,
        args: &JsonMap,
        client_id: &str,
        is_admin: bool,
    ) -> CommandResult {
        let key = required_str(args, "key")?;
        let value = args
            .get("value")
            .cloned()
            .ok_or_else(|| CommandError::validation("missing required argument: value"))?;
        let namespace = self.store_namespace(args, client_id, is_admin).await;

        let updated = self.core().store.set(&namespace, key, value).await;
        Ok(json!({ "updated": updated }))
    }

    pub(crate) async fn cmd_store_get(
        &self,
        args: &JsonMap,
        client_id: &str,
        is_admin: bool,
    ) -> CommandResult {
        let key = required_str(args, "key")?;
        let namespace = self.store_namespace(args, client_id, is_admin).await;

        Ok(match self.core().store.get(&namespace, key).await {
            Some(value) => json!({ "found": true, "value": value }),
            None => json!({ "found": false }),
        })
    }

    pub(crate) async fn cmd_store_list(
        &self,
        args: &JsonMap,
        client_id: &str,
        is_admin: bool,
    ) -> CommandResult {
        let namespace = self.store_namespace(args, client_id, is_admin).await;
        let keys = self.core().store.list(&namespace).await;
        Ok(json!({ "count": keys.len(), "keys": keys }))
    }

    pub(crate) async fn cmd_store_delete(
        &self,
        args: &JsonMap,
        client_id: &str,
        is_admin: bool,
    ) -> CommandResult {
        let key = required_str(args, "key")?;
        let namespace = self.store_namespace(args, client_id, is_admin).await;
        let deleted = self.core().store.delete(&namespace, key).await;
        Ok(json!({ "deleted": deleted }))
    }
}
