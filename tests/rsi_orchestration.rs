// SPDX-License-Identifier: MIT OR Apache-2.0
//! Competing dispatch end to end: two synthesis operators race one task
//! and the selection future promotes a deterministic winner.

use std::sync::Arc;

use arq_core::{Envelope, EnvelopeBuilder, EnvelopeType, Operator, SynthesisOperator};
use arq_routing::{
    DirectRouter, DispatchStrategy, OperatorRegistry, ResultCollector, SelectionResolution,
    TaskDispatcher, default_selection,
};
use async_trait::async_trait;
use tokio::sync::Mutex;

#[derive(Default)]
struct CaptureRouter {
    sent: Mutex<Vec<(Envelope, String)>>,
}

#[async_trait]
impl DirectRouter for CaptureRouter {
    async fn route_direct_message(&self, envelope: &Envelope, target: &str) -> bool {
        self.sent
            .lock()
            .await
            .push((envelope.clone(), target.to_string()));
        true
    }
}

#[tokio::test]
async fn parallel_speculation_resolves_to_promoted_winner() {
    let registry = Arc::new(OperatorRegistry::new());
    registry.register_operator("op_speed", "synthesis", None).await;
    registry.register_operator("op_safety", "synthesis", None).await;

    let router = Arc::new(CaptureRouter::default());
    let collector = Arc::new(
        ResultCollector::new().with_selection(Arc::new(default_selection)),
    );
    let dispatcher = TaskDispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&router) as Arc<dyn DirectRouter>,
        Arc::clone(&collector),
    );

    let task = EnvelopeBuilder::new(EnvelopeType::Command)
        .command("rsi.improve")
        .payload_entry("target", serde_json::json!("core.rs"))
        .build();

    let future = dispatcher.dispatch_task_with_future(&task, "synthesis").await;
    assert_eq!(router.sent.lock().await.len(), 2);

    // Operators run their SAM loops and push results back.
    let op_speed = SynthesisOperator::new("op_speed", vec!["synthesis".to_string()]);
    let op_safety = SynthesisOperator::new("op_safety", vec!["synthesis".to_string()]);

    let mut speed_task = task.clone();
    speed_task
        .payload
        .insert("variant".to_string(), serde_json::json!("speed"));
    let mut safety_task = task.clone();
    safety_task
        .payload
        .insert("variant".to_string(), serde_json::json!("safety"));

    collector.add_result(&task.id, op_speed.on_task(&speed_task).await).await;
    collector.add_result(&task.id, op_safety.on_task(&safety_task).await).await;

    let Some(SelectionResolution::Winner(winner)) = future.resolve().await else {
        panic!("expected a selected winner");
    };
    assert_eq!(winner["verdict"], "PASS");
    assert_eq!(winner["decision"], "PROMOTE_CANDIDATE");
    assert!(winner["reason"].as_str().unwrap().contains("SUCCESS/OPERATOR"));
    // Total order by sender id: op_safety sorts first.
    assert_eq!(winner["sender"], "op_safety");
}

#[tokio::test]
async fn round_robin_walks_the_group_cursor() {
    let registry = Arc::new(OperatorRegistry::new());
    for op in ["op1", "op2"] {
        registry.register_operator(op, "code.patch", None).await;
    }
    let router = Arc::new(CaptureRouter::default());
    let dispatcher = TaskDispatcher::new(
        registry,
        Arc::clone(&router) as Arc<dyn DirectRouter>,
        Arc::new(ResultCollector::new()),
    );

    for _ in 0..3 {
        let task = EnvelopeBuilder::new(EnvelopeType::Command)
            .command("rsi.improve")
            .build();
        let delivered = dispatcher
            .dispatch_task(&task, "code.patch", DispatchStrategy::RoundRobin)
            .await;
        assert_eq!(delivered, 1);
    }

    let sent = router.sent.lock().await;
    let targets: Vec<&str> = sent.iter().map(|(_, t)| t.as_str()).collect();
    assert_eq!(targets, vec!["op1", "op2", "op1"]);
}
