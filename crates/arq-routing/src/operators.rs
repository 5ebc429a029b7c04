// SPDX-License-Identifier: MIT OR Apache-2.0
//! Operator capability groups.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Whether operator registration requires a bearer token.
#[derive(Debug, Clone, Default)]
pub struct OperatorAuthPolicy {
    /// Registration requires a matching token.
    pub required: bool,
    /// The expected token.
    pub token: Option<String>,
}

impl OperatorAuthPolicy {
    /// Policy from the `ARQONBUS_OPERATOR_AUTH_*` environment.
    #[must_use]
    pub fn from_env() -> Self {
        let required = std::env::var("ARQONBUS_OPERATOR_AUTH_REQUIRED")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let token = std::env::var("ARQONBUS_OPERATOR_AUTH_TOKEN").ok();
        Self { required, token }
    }

    fn permits(&self, presented: Option<&str>) -> bool {
        if !self.required {
            return true;
        }
        match (&self.token, presented) {
            (Some(expected), Some(got)) => expected == got,
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
struct CapabilityGroup {
    members: Vec<String>,
    cursor: usize,
}

/// Capability name → operator group with a round-robin cursor.
#[derive(Debug, Default)]
pub struct OperatorRegistry {
    groups: RwLock<HashMap<String, CapabilityGroup>>,
    auth: OperatorAuthPolicy,
}

impl OperatorRegistry {
    /// Registry with no auth requirement.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry enforcing the given auth policy.
    #[must_use]
    pub fn with_auth(auth: OperatorAuthPolicy) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            auth,
        }
    }

    /// Register an operator under a capability. Returns false when auth
    /// fails; duplicate registrations are idempotent.
    pub async fn register_operator(
        &self,
        client_id: &str,
        capability: &str,
        auth_token: Option<&str>,
    ) -> bool {
        if !self.auth.permits(auth_token) {
            warn!(client_id, capability, "operator registration denied");
            return false;
        }
        let mut groups = self.groups.write().await;
        let group = groups.entry(capability.to_string()).or_default();
        if !group.members.iter().any(|m| m == client_id) {
            group.members.push(client_id.to_string());
        }
        debug!(client_id, capability, "operator registered");
        true
    }

    /// Remove an operator from one capability group.
    pub async fn unregister_operator(&self, client_id: &str, capability: &str) -> bool {
        let mut groups = self.groups.write().await;
        let Some(group) = groups.get_mut(capability) else {
            return false;
        };
        let before = group.members.len();
        group.members.retain(|m| m != client_id);
        if group.cursor >= group.members.len() {
            group.cursor = 0;
        }
        group.members.len() < before
    }

    /// Remove a disconnected client from every group.
    pub async fn remove_client(&self, client_id: &str) {
        let mut groups = self.groups.write().await;
        for group in groups.values_mut() {
            group.members.retain(|m| m != client_id);
            if group.cursor >= group.members.len() {
                group.cursor = 0;
            }
        }
    }

    /// Every operator in a capability group, registration order.
    pub async fn get_operators(&self, capability: &str) -> Vec<String> {
        self.groups
            .read()
            .await
            .get(capability)
            .map(|g| g.members.clone())
            .unwrap_or_default()
    }

    /// The next operator under round-robin, advancing the cursor.
    pub async fn next_round_robin(&self, capability: &str) -> Option<String> {
        let mut groups = self.groups.write().await;
        let group = groups.get_mut(capability)?;
        if group.members.is_empty() {
            return None;
        }
        let picked = group.members[group.cursor % group.members.len()].clone();
        group.cursor = (group.cursor + 1) % group.members.len();
        Some(picked)
    }

    /// Sorted capability names with at least one member.
    pub async fn capabilities(&self) -> Vec<String> {
        let groups = self.groups.read().await;
        let mut names: Vec<String> = groups
            .iter()
            .filter(|(_, g)| !g.members.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registration_without_auth_policy_is_open() {
        let registry = OperatorRegistry::new();
        assert!(registry.register_operator("op-default", "group.test", None).await);
        assert_eq!(registry.get_operators("group.test").await, vec!["op-default"]);
    }

    #[tokio::test]
    async fn auth_policy_gates_registration() {
        let registry = OperatorRegistry::with_auth(OperatorAuthPolicy {
            required: true,
            token: Some("secret-token".to_string()),
        });

        assert!(!registry.register_operator("op-denied", "group.test", Some("wrong")).await);
        assert!(!registry.register_operator("op-denied", "group.test", None).await);
        assert!(
            registry
                .register_operator("op-allowed", "group.test", Some("secret-token"))
                .await
        );
        assert_eq!(registry.get_operators("group.test").await, vec!["op-allowed"]);
    }

    #[tokio::test]
    async fn round_robin_cursor_advances_and_wraps() {
        let registry = OperatorRegistry::new();
        for op in ["op1", "op2", "op3"] {
            registry.register_operator(op, "code.python", None).await;
        }

        assert_eq!(registry.next_round_robin("code.python").await.as_deref(), Some("op1"));
        assert_eq!(registry.next_round_robin("code.python").await.as_deref(), Some("op2"));
        assert_eq!(registry.next_round_robin("code.python").await.as_deref(), Some("op3"));
        assert_eq!(registry.next_round_robin("code.python").await.as_deref(), Some("op1"));
    }

    #[tokio::test]
    async fn disconnect_removes_from_every_group() {
        let registry = OperatorRegistry::new();
        registry.register_operator("op1", "a", None).await;
        registry.register_operator("op1", "b", None).await;
        registry.register_operator("op2", "a", None).await;

        registry.remove_client("op1").await;
        assert_eq!(registry.get_operators("a").await, vec!["op2"]);
        assert!(registry.get_operators("b").await.is_empty());
        assert_eq!(registry.capabilities().await, vec!["a"]);
    }
}
