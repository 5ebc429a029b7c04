// SPDX-License-Identifier: MIT OR Apache-2.0
//! Webhook rules and delivery.
//!
//! Rules are matched against every outbound broadcast; matches POST
//! `{sender_client_id, envelope}` to the registered URL. Delivery is
//! fire-and-forget with a hard deadline — a dead endpoint can never stall
//! or fail the message path.

use std::collections::HashMap;
use std::time::Duration;

use arq_core::Envelope;
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// One registered webhook.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookRule {
    /// Server-assigned rule id (`hook_…`).
    pub rule_id: String,
    /// Target URL.
    pub url: String,
    /// Room filter; `*` matches any room.
    pub room: String,
    /// Channel filter; `*` matches any channel.
    pub channel: String,
    /// Owning tenant. Rules outlive the registering connection.
    pub tenant_id: String,
    /// Client that registered the rule.
    pub owner_client_id: String,
}

impl WebhookRule {
    fn matches(&self, room: &str, channel: &str) -> bool {
        (self.room == "*" || self.room == room) && (self.channel == "*" || self.channel == channel)
    }
}

/// Rule registry plus the delivery client.
#[derive(Debug)]
pub struct WebhookHub {
    rules: RwLock<HashMap<String, WebhookRule>>,
    http: reqwest::Client,
}

impl Default for WebhookHub {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookHub {
    /// Hub with the default 5 s delivery deadline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            http: reqwest::Client::builder()
                .timeout(DELIVERY_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Register a rule, returning its id.
    pub async fn register(
        &self,
        url: &str,
        room: &str,
        channel: &str,
        tenant_id: &str,
        owner_client_id: &str,
    ) -> String {
        let rule_id = format!("hook_{}", Uuid::new_v4().simple());
        let rule = WebhookRule {
            rule_id: rule_id.clone(),
            url: url.to_string(),
            room: room.to_string(),
            channel: channel.to_string(),
            tenant_id: tenant_id.to_string(),
            owner_client_id: owner_client_id.to_string(),
        };
        self.rules.write().await.insert(rule_id.clone(), rule);
        rule_id
    }

    /// Rules owned by a tenant, sorted by id.
    pub async fn list(&self, tenant_id: &str) -> Vec<WebhookRule> {
        let rules = self.rules.read().await;
        let mut out: Vec<WebhookRule> = rules
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
        out
    }

    /// Remove a rule. Non-admin callers may only remove their own
    /// tenant's rules.
    pub async fn unregister(&self, rule_id: &str, tenant_id: &str, is_admin: bool) -> bool {
        let mut rules = self.rules.write().await;
        match rules.get(rule_id) {
            Some(rule) if is_admin || rule.tenant_id == tenant_id => {
                rules.remove(rule_id);
                true
            }
            _ => false,
        }
    }

    /// Whether any rule matches `(room, channel)`.
    pub async fn has_match(&self, room: &str, channel: &str) -> bool {
        self.rules
            .read()
            .await
            .values()
            .any(|r| r.matches(room, channel))
    }

    /// Deliver a broadcast to every matching rule. Failures are logged
    /// and swallowed.
    pub async fn dispatch(&self, envelope: &Envelope, sender_client_id: &str) {
        let (room, channel) = (
            envelope.room.as_deref().unwrap_or(""),
            envelope.channel.as_deref().unwrap_or(""),
        );

        let targets: Vec<WebhookRule> = {
            let rules = self.rules.read().await;
            rules
                .values()
                .filter(|r| r.matches(room, channel))
                .cloned()
                .collect()
        };
        if targets.is_empty() {
            return;
        }

        let body = json!({
            "sender_client_id": sender_client_id,
            "envelope": envelope,
        });

        for rule in targets {
            match self.http.post(&rule.url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(rule_id = %rule.rule_id, url = %rule.url, "webhook delivered");
                }
                Ok(response) => {
                    warn!(
                        rule_id = %rule.rule_id,
                        url = %rule.url,
                        status = response.status().as_u16(),
                        "webhook endpoint answered with an error status"
                    );
                }
                Err(err) => {
                    warn!(rule_id = %rule.rule_id, url = %rule.url, error = %err, "webhook delivery failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wildcard_rules_match_any_room_and_channel() {
        let hub = WebhookHub::new();
        hub.register("http://127.0.0.1:1/hook", "*", "*", "default", "c1").await;
        assert!(hub.has_match("science", "general").await);
        assert!(hub.has_match("ops", "events").await);
    }

    #[tokio::test]
    async fn exact_rules_only_match_their_pair() {
        let hub = WebhookHub::new();
        hub.register("http://127.0.0.1:1/hook", "science", "general", "default", "c1").await;
        assert!(hub.has_match("science", "general").await);
        assert!(!hub.has_match("science", "other").await);
        assert!(!hub.has_match("ops", "general").await);
    }

    #[tokio::test]
    async fn unregister_is_tenant_scoped() {
        let hub = WebhookHub::new();
        let rule_id = hub
            .register("http://127.0.0.1:1/hook", "science", "general", "tenant-a", "c1")
            .await;

        assert!(!hub.unregister(&rule_id, "tenant-b", false).await);
        assert!(hub.unregister(&rule_id, "tenant-b", true).await);
        assert!(hub.list("tenant-a").await.is_empty());
    }

    #[tokio::test]
    async fn list_filters_by_tenant() {
        let hub = WebhookHub::new();
        hub.register("http://a/h", "*", "*", "tenant-a", "c1").await;
        hub.register("http://b/h", "*", "*", "tenant-b", "c2").await;
        assert_eq!(hub.list("tenant-a").await.len(), 1);
        assert_eq!(hub.list("tenant-b").await.len(), 1);
        assert_eq!(hub.list("tenant-c").await.len(), 0);
    }
}
