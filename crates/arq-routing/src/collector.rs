// SPDX-License-Identifier: MIT OR Apache-2.0
//! Result collection for competing dispatch.
//!
//! A pending selection is keyed by task id. Results arrive as
//! `operator_result`/`response` envelopes; the pending entry resolves
//! early once every dispatched operator has answered, or at the deadline
//! with whatever arrived. With a selection function installed the future
//! yields the winning action, otherwise the raw result set.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arq_core::{Envelope, ResponseStatus};
use serde_json::{Value, json};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Default window operators have to answer a competing task.
pub const DEFAULT_SELECTION_TIMEOUT: Duration = Duration::from_millis(2000);

/// Picks a winning action from the accumulated results. Results arrive
/// already total-ordered by sender id for deterministic output.
pub type SelectionFn = Arc<dyn Fn(&str, &[Envelope]) -> Value + Send + Sync>;

/// What a resolved selection future carries.
#[derive(Debug, Clone)]
pub enum SelectionResolution {
    /// The selection function's winning action.
    Winner(Value),
    /// Raw results (no selection function installed).
    Results(Vec<Envelope>),
}

/// Pending handle returned by competing dispatch.
#[derive(Debug)]
pub struct SelectionFuture {
    task_id: String,
    rx: oneshot::Receiver<SelectionResolution>,
}

impl SelectionFuture {
    /// Task this future belongs to.
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Wait for resolution. `None` when the collector was shut down.
    pub async fn resolve(self) -> Option<SelectionResolution> {
        self.rx.await.ok()
    }
}

struct Pending {
    expected: usize,
    results: Vec<Envelope>,
    tx: oneshot::Sender<SelectionResolution>,
    deadline: JoinHandle<()>,
}

struct CollectorInner {
    pending: Mutex<HashMap<String, Pending>>,
    timeout: Duration,
    selection: Option<SelectionFn>,
}

impl CollectorInner {
    /// Resolve and remove a pending entry.
    async fn finalize(&self, task_id: &str) {
        let Some(entry) = self.pending.lock().await.remove(task_id) else {
            return;
        };
        entry.deadline.abort();

        let mut results = entry.results;
        // Total order by sender for stable selection output.
        results.sort_by(|a, b| a.sender.cmp(&b.sender).then_with(|| a.id.cmp(&b.id)));

        let resolution = match &self.selection {
            Some(select) => SelectionResolution::Winner(select(task_id, &results)),
            None => SelectionResolution::Results(results),
        };
        if entry.tx.send(resolution).is_err() {
            debug!(task_id, "selection future dropped before resolution");
        }
    }
}

/// Gathers operator results per task until count or deadline. Clones
/// share one pending table.
#[derive(Clone)]
pub struct ResultCollector {
    inner: Arc<CollectorInner>,
}

impl Default for ResultCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultCollector {
    /// Collector with the default timeout and no selection function.
    #[must_use]
    pub fn new() -> Self {
        Self::build(DEFAULT_SELECTION_TIMEOUT, None)
    }

    fn build(timeout: Duration, selection: Option<SelectionFn>) -> Self {
        Self {
            inner: Arc::new(CollectorInner {
                pending: Mutex::new(HashMap::new()),
                timeout,
                selection,
            }),
        }
    }

    /// Override the collection deadline. Construction-time only.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self::build(timeout, self.inner.selection.clone())
    }

    /// Install a selection function. Construction-time only.
    #[must_use]
    pub fn with_selection(self, selection: SelectionFn) -> Self {
        Self::build(self.inner.timeout, Some(selection))
    }

    /// Open a pending entry for `task_id` expecting `expected` results and
    /// return its future. The entry resolves early at `expected` results
    /// or at the deadline.
    pub async fn register(&self, task_id: &str, expected: usize) -> SelectionFuture {
        let (tx, rx) = oneshot::channel();

        let deadline = {
            let inner = Arc::clone(&self.inner);
            let task_id = task_id.to_string();
            let timeout = self.inner.timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                inner.finalize(&task_id).await;
            })
        };

        let mut pending = self.inner.pending.lock().await;
        pending.insert(
            task_id.to_string(),
            Pending {
                expected: expected.max(1),
                results: Vec::new(),
                tx,
                deadline,
            },
        );

        SelectionFuture {
            task_id: task_id.to_string(),
            rx,
        }
    }

    /// Whether a task still has a pending entry.
    pub async fn has_pending(&self, task_id: &str) -> bool {
        self.inner.pending.lock().await.contains_key(task_id)
    }

    /// Feed one result in. Returns false when no entry is pending for the
    /// task (late or unsolicited results are dropped by the caller).
    pub async fn add_result(&self, task_id: &str, result: Envelope) -> bool {
        let complete = {
            let mut pending = self.inner.pending.lock().await;
            let Some(entry) = pending.get_mut(task_id) else {
                return false;
            };
            entry.results.push(result);
            entry.results.len() >= entry.expected
        };

        if complete {
            self.inner.finalize(task_id).await;
        }
        true
    }

    /// Drop every pending entry; outstanding futures resolve to `None`.
    pub async fn cancel_all(&self) {
        let mut pending = self.inner.pending.lock().await;
        for (_, entry) in pending.drain() {
            entry.deadline.abort();
        }
    }
}

impl std::fmt::Debug for ResultCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCollector")
            .field("timeout", &self.inner.timeout)
            .field("has_selection", &self.inner.selection.is_some())
            .finish()
    }
}

/// Default selection: results are total-ordered by sender id; the first
/// non-error result wins and is promoted. If every result failed, the
/// first one is surfaced with a failing verdict.
#[must_use]
pub fn default_selection(task_id: &str, results: &[Envelope]) -> Value {
    let Some(winner) = results
        .iter()
        .find(|r| r.status != Some(ResponseStatus::Error))
        .or_else(|| results.first())
    else {
        return json!({
            "verdict": "FAIL",
            "decision": "DISCARD",
            "reason": format!("TIMEOUT/NO_RESULTS for task {task_id}"),
            "task_id": task_id,
        });
    };

    let sender = winner.sender.clone().unwrap_or_default();
    let action = winner
        .payload
        .get("actions")
        .and_then(|a| a.as_array())
        .and_then(|a| a.first())
        .cloned()
        .unwrap_or(Value::Null);

    if winner.status == Some(ResponseStatus::Error) {
        json!({
            "verdict": "FAIL",
            "decision": "DISCARD",
            "reason": format!("FAILURE/OPERATOR {sender} reported an error for task {task_id}"),
            "task_id": task_id,
            "sender": sender,
        })
    } else {
        json!({
            "verdict": "PASS",
            "decision": "PROMOTE_CANDIDATE",
            "reason": format!("SUCCESS/OPERATOR {sender} selected deterministically by sender order"),
            "task_id": task_id,
            "sender": sender,
            "action": action,
        })
    }
}
