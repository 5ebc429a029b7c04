// SPDX-License-Identifier: MIT OR Apache-2.0
//! The standard operator pack: in-process key/value store, webhook
//! fan-out, and the delayed-message scheduler.

/// One-shot delayed message scheduling.
pub mod cron;
/// Tenant-scoped key/value store.
pub mod store;
/// Webhook rules and delivery.
pub mod webhook;

pub use cron::{CronJob, CronScheduler};
pub use store::KvStore;
pub use webhook::{WebhookHub, WebhookRule};
