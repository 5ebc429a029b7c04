// SPDX-License-Identifier: MIT OR Apache-2.0
//! Task dispatch strategies over capability groups.

use std::sync::Arc;

use arq_core::Envelope;
use async_trait::async_trait;
use tracing::debug;

use crate::collector::{ResultCollector, SelectionFuture};
use crate::operators::OperatorRegistry;

/// Anything that can deliver an envelope to one client. The socket bus
/// router implements this; tests substitute a capture.
#[async_trait]
pub trait DirectRouter: Send + Sync {
    /// Deliver `envelope` to `target_client_id`. True on success.
    async fn route_direct_message(&self, envelope: &Envelope, target_client_id: &str) -> bool;
}

/// How a task reaches its capability group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStrategy {
    /// Exactly one operator; the group cursor advances.
    RoundRobin,
    /// Every operator races the same task.
    Competing,
}

impl DispatchStrategy {
    /// Parse the wire form (`round_robin` / `competing`).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "round_robin" => Some(Self::RoundRobin),
            "competing" => Some(Self::Competing),
            _ => None,
        }
    }
}

/// Routes task envelopes to operator groups.
pub struct TaskDispatcher {
    operators: Arc<OperatorRegistry>,
    router: Arc<dyn DirectRouter>,
    collector: Arc<ResultCollector>,
}

impl TaskDispatcher {
    /// Dispatcher over a registry, router, and collector.
    #[must_use]
    pub fn new(
        operators: Arc<OperatorRegistry>,
        router: Arc<dyn DirectRouter>,
        collector: Arc<ResultCollector>,
    ) -> Self {
        Self {
            operators,
            router,
            collector,
        }
    }

    /// The collector gathering results for competing dispatch.
    #[must_use]
    pub fn collector(&self) -> &Arc<ResultCollector> {
        &self.collector
    }

    /// Deliver a task to a capability group. Returns the number of
    /// operators actually written to (1 or 0 for round-robin).
    pub async fn dispatch_task(
        &self,
        envelope: &Envelope,
        capability: &str,
        strategy: DispatchStrategy,
    ) -> usize {
        match strategy {
            DispatchStrategy::RoundRobin => {
                let Some(target) = self.operators.next_round_robin(capability).await else {
                    debug!(capability, "no operators for round-robin dispatch");
                    return 0;
                };
                usize::from(self.router.route_direct_message(envelope, &target).await)
            }
            DispatchStrategy::Competing => {
                let members = self.operators.get_operators(capability).await;
                let mut delivered = 0;
                for target in &members {
                    if self.router.route_direct_message(envelope, target).await {
                        delivered += 1;
                    }
                }
                delivered
            }
        }
    }

    /// Competing dispatch that returns a pending selection handle instead
    /// of a count. The pending entry is opened before delivery so no
    /// result can race past the collector.
    pub async fn dispatch_task_with_future(
        &self,
        envelope: &Envelope,
        capability: &str,
    ) -> SelectionFuture {
        let members = self.operators.get_operators(capability).await;
        let future = self
            .collector
            .register(&envelope.id, members.len().max(1))
            .await;

        for target in &members {
            self.router.route_direct_message(envelope, target).await;
        }
        future
    }
}

impl std::fmt::Debug for TaskDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::SelectionResolution;
    use arq_core::{EnvelopeBuilder, EnvelopeType, JsonMap, ResponseStatus};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct CaptureRouter {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl DirectRouter for CaptureRouter {
        async fn route_direct_message(&self, envelope: &Envelope, target: &str) -> bool {
            self.sent
                .lock()
                .await
                .push((envelope.id.clone(), target.to_string()));
            true
        }
    }

    async fn dispatcher_with_operators(ops: &[&str]) -> (TaskDispatcher, Arc<CaptureRouter>) {
        let registry = Arc::new(OperatorRegistry::new());
        for op in ops {
            registry.register_operator(op, "code.python", None).await;
        }
        let router = Arc::new(CaptureRouter::default());
        let dispatcher = TaskDispatcher::new(
            registry,
            Arc::clone(&router) as Arc<dyn DirectRouter>,
            Arc::new(ResultCollector::new()),
        );
        (dispatcher, router)
    }

    fn task(id: &str) -> Envelope {
        EnvelopeBuilder::new(EnvelopeType::Command)
            .id(id)
            .command("rsi.improve")
            .build()
    }

    #[tokio::test]
    async fn competing_sends_to_all_operators() {
        let (dispatcher, router) = dispatcher_with_operators(&["op1", "op2", "op3"]).await;
        let count = dispatcher
            .dispatch_task(&task("arq_1700000000000000000_1_aaaaaa"), "code.python", DispatchStrategy::Competing)
            .await;
        assert_eq!(count, 3);
        assert_eq!(router.sent.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn round_robin_sends_to_exactly_one() {
        let (dispatcher, router) = dispatcher_with_operators(&["op1", "op2", "op3"]).await;
        let count = dispatcher
            .dispatch_task(&task("arq_1700000000000000000_2_bbbbbb"), "code.python", DispatchStrategy::RoundRobin)
            .await;
        assert_eq!(count, 1);
        let sent = router.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "op1");
    }

    #[tokio::test]
    async fn no_operators_means_zero_deliveries() {
        let (dispatcher, router) = dispatcher_with_operators(&[]).await;
        let count = dispatcher
            .dispatch_task(&task("arq_1700000000000000000_3_cccccc"), "code.python", DispatchStrategy::Competing)
            .await;
        assert_eq!(count, 0);
        assert!(router.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn competing_future_is_opt_in_and_collects_results() {
        let (dispatcher, _router) = dispatcher_with_operators(&["op1", "op2"]).await;
        let task = task("arq_1700000000000000000_4_dddddd");

        // Default competing dispatch returns a count, no pending entry.
        let count = dispatcher
            .dispatch_task(&task, "code.python", DispatchStrategy::Competing)
            .await;
        assert_eq!(count, 2);
        assert!(!dispatcher.collector().has_pending(&task.id).await);

        // Opt-in future path registers the pending entry.
        let future = dispatcher.dispatch_task_with_future(&task, "code.python").await;
        assert!(dispatcher.collector().has_pending(&task.id).await);

        for op in ["op1", "op2"] {
            let result = EnvelopeBuilder::new(EnvelopeType::OperatorResult)
                .sender(op)
                .request_id(task.id.clone())
                .status(ResponseStatus::Success)
                .payload(JsonMap::new())
                .build();
            dispatcher.collector().add_result(&task.id, result).await;
        }

        let Some(SelectionResolution::Results(results)) = future.resolve().await else {
            panic!("expected results");
        };
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn strategy_parse_accepts_wire_names() {
        assert_eq!(DispatchStrategy::parse("round_robin"), Some(DispatchStrategy::RoundRobin));
        assert_eq!(DispatchStrategy::parse("COMPETING"), Some(DispatchStrategy::Competing));
        assert_eq!(DispatchStrategy::parse("speculate"), None);
    }
}
