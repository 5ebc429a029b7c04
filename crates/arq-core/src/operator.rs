// SPDX-License-Identifier: MIT OR Apache-2.0
//! The SAM operator contract.
//!
//! Operators are background workers registered under capability groups.
//! They receive a task envelope, derive a [`State`] from its payload,
//! produce one or more [`Action`]s, and answer with a single
//! `operator_result` envelope whose `request_id` equals the task id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::envelope::{Envelope, EnvelopeBuilder, EnvelopeType, JsonMap, ResponseStatus};

/// Kind of improvement an action proposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    /// A code patch.
    Patch,
    /// A performance tuning change.
    Perf,
    /// A safety guardrail.
    Safety,
    /// A configuration adjustment.
    Config,
}

/// A single proposed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Improvement category.
    #[serde(rename = "type")]
    pub action_type: ActionType,
    /// Action-specific payload.
    pub payload: JsonMap,
    /// Human-readable summary.
    pub description: String,
    /// Reference to supporting evidence (hash, run id, …).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub witness_ref: Option<String>,
}

/// Input handed to [`Operator::process`], derived from the task payload.
#[derive(Debug, Clone, Default)]
pub struct State {
    /// Id of the task envelope.
    pub task_id: String,
    /// Task payload, verbatim.
    pub context: JsonMap,
}

/// Error raised by an operator while processing a task.
#[derive(Debug, Error)]
pub enum OperatorError {
    /// The task context is missing something the operator needs.
    #[error("missing task context: {0}")]
    MissingContext(String),
    /// Processing failed.
    #[error("operator failed: {0}")]
    Failed(String),
}

/// A capability-registered background worker.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Stable operator identity, used as the result sender.
    fn operator_id(&self) -> &str;

    /// Capability groups this operator serves.
    fn capabilities(&self) -> &[String];

    /// Produce actions for the given state.
    async fn process(&self, state: State) -> Result<Vec<Action>, OperatorError>;

    /// Run the full loop for one task: derive state, process, and wrap
    /// the outcome in an `operator_result` envelope correlated to the
    /// task id. Errors become `status=error` results, never panics.
    async fn on_task(&self, task: &Envelope) -> Envelope {
        let state = State {
            task_id: task.id.clone(),
            context: task.payload.clone(),
        };

        let builder = EnvelopeBuilder::new(EnvelopeType::OperatorResult)
            .sender(self.operator_id())
            .request_id(task.id.clone());

        match self.process(state).await {
            Ok(actions) => builder
                .status(ResponseStatus::Success)
                .payload_entry("actions", json!(actions))
                .build(),
            Err(err) => builder
                .status(ResponseStatus::Error)
                .payload_entry("error", json!(err.to_string()))
                .build(),
        }
    }
}

/// Reference operator used by the dispatcher tests and the competing
/// dispatch examples: proposes a guardrail or a tuning action depending on
/// the `variant` hint in the task context.
#[derive(Debug)]
pub struct SynthesisOperator {
    id: String,
    capabilities: Vec<String>,
}

impl SynthesisOperator {
    /// New operator with the given identity and capability list.
    #[must_use]
    pub fn new(id: impl Into<String>, capabilities: Vec<String>) -> Self {
        Self {
            id: id.into(),
            capabilities,
        }
    }
}

#[async_trait]
impl Operator for SynthesisOperator {
    fn operator_id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    async fn process(&self, state: State) -> Result<Vec<Action>, OperatorError> {
        let variant = state
            .context
            .get("variant")
            .and_then(|v| v.as_str())
            .unwrap_or("speed");

        let action = match variant {
            "safety" => Action {
                action_type: ActionType::Safety,
                payload: JsonMap::from([
                    ("assert".to_string(), json!("error_rate < 0.02")),
                    ("window".to_string(), json!("5m")),
                ]),
                description: "Safety: add error-rate guardrail assertion".to_string(),
                witness_ref: Some(format!("task:{}", state.task_id)),
            },
            _ => Action {
                action_type: ActionType::Perf,
                payload: JsonMap::from([
                    ("param".to_string(), json!("dispatch_batch_size")),
                    ("from".to_string(), json!(16)),
                    ("to".to_string(), json!(32)),
                ]),
                description: "Performance: widen dispatch batch size".to_string(),
                witness_ref: Some(format!("task:{}", state.task_id)),
            },
        };

        Ok(vec![action])
    }
}
