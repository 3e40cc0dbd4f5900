use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use timegate::{
    ComparisonOperator, ContextMap, DebugGateManager, GateCondition, GateEvent, GateManagerConfig,
    GateOptions, GateOutcome, GateStatus,
};

fn manager(timeout_ms: u64) -> Arc<DebugGateManager> {
    let config = GateManagerConfig {
        enabled: true,
        default_timeout_ms: timeout_ms,
    };
    Arc::new(DebugGateManager::new(config).unwrap())
}

fn context(value: serde_json::Value) -> ContextMap {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn test_triggered_event_precedes_release() {
    let gates = manager(5_000);
    let mut events = gates.subscribe();
    let gate = gates.create_gate("trace-1", "handler", None);

    let request = {
        let gates = gates.clone();
        tokio::spawn(async move { gates.check_gate("trace-1", "handler", None).await })
    };

    match events.recv().await.unwrap() {
        GateEvent::Triggered {
            gate_id,
            trace_id,
            stage,
        } => {
            assert_eq!(gate_id, gate.id);
            assert_eq!(trace_id, "trace-1");
            assert_eq!(stage, "handler");
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(!request.is_finished());
    assert_eq!(gates.get_gate(&gate.id).unwrap().status, GateStatus::Triggered);

    assert!(gates.release_gate(&gate.id));
    assert_eq!(request.await.unwrap(), GateOutcome::Released);
    assert_eq!(gates.get_gate(&gate.id).unwrap().status, GateStatus::Released);
}

#[tokio::test]
async fn test_structured_condition_gates_matching_user_only() {
    let gates = manager(5_000);
    let condition = GateCondition::All(vec![
        GateCondition::compare("userId", ComparisonOperator::StrictEqual, json!("123")),
        GateCondition::Not(Box::new(GateCondition::compare(
            "role",
            ComparisonOperator::StrictEqual,
            json!("admin"),
        ))),
    ]);
    let gate = gates.create_gate("trace-1", "handler", Some(condition));

    let start = Instant::now();
    let admin = context(json!({"userId": "123", "role": "admin"}));
    assert_eq!(
        gates.check_gate("trace-1", "handler", Some(&admin)).await,
        GateOutcome::Passed
    );
    let other = context(json!({"userId": "456"}));
    assert_eq!(
        gates.check_gate("trace-1", "handler", Some(&other)).await,
        GateOutcome::Passed
    );
    assert!(start.elapsed() < Duration::from_millis(10));
    assert_eq!(gates.get_gate(&gate.id).unwrap().hit_count, 0);

    let request = {
        let gates = gates.clone();
        tokio::spawn(async move {
            let user = context(json!({"userId": "123", "role": "viewer"}));
            gates.check_gate("trace-1", "handler", Some(&user)).await
        })
    };
    let mut events = gates.subscribe();
    if gates.waiter_count() == 0 {
        events.recv().await.unwrap();
    }
    assert!(gates.release_gate(&gate.id));
    assert_eq!(request.await.unwrap(), GateOutcome::Released);
}

#[tokio::test]
async fn test_timeout_resolves_within_window() {
    let gates = manager(50);
    let mut events = gates.subscribe();
    let gate = gates.create_gate("trace-1", "handler", None);

    let start = Instant::now();
    let outcome = gates.check_gate("trace-1", "handler", None).await;
    let elapsed = start.elapsed();

    assert_eq!(outcome, GateOutcome::TimedOut);
    assert!(elapsed >= Duration::from_millis(50), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(100), "elapsed {:?}", elapsed);
    assert_eq!(gates.get_gate(&gate.id).unwrap().status, GateStatus::Released);

    assert!(matches!(events.recv().await.unwrap(), GateEvent::Triggered { .. }));
    assert_eq!(
        events.recv().await.unwrap(),
        GateEvent::Released { gate_id: gate.id }
    );
}

#[tokio::test]
async fn test_gates_on_different_traces_are_independent() {
    let gates = manager(5_000);
    let a = gates.create_gate("trace-a", "handler", None);
    let b = gates.create_gate_with(
        "trace-b",
        "handler",
        GateOptions::default().timeout(Duration::from_millis(30)),
    );

    let held_a = {
        let gates = gates.clone();
        tokio::spawn(async move { gates.check_gate("trace-a", "handler", None).await })
    };
    assert_eq!(
        gates.check_gate("trace-b", "handler", None).await,
        GateOutcome::TimedOut
    );
    assert_eq!(gates.get_gate(&b.id).unwrap().status, GateStatus::Released);
    assert_eq!(gates.get_gate(&a.id).unwrap().status, GateStatus::Triggered);

    assert!(gates.release_gate(&a.id));
    assert_eq!(held_a.await.unwrap(), GateOutcome::Released);
}

#[tokio::test]
async fn test_remove_gate_does_not_leave_waiter_to_time_out() {
    let gates = manager(60_000);
    let mut events = gates.subscribe();
    let gate = gates.create_gate("trace-1", "handler", None);
    let request = {
        let gates = gates.clone();
        tokio::spawn(async move { gates.check_gate("trace-1", "handler", None).await })
    };
    assert!(matches!(events.recv().await.unwrap(), GateEvent::Triggered { .. }));

    assert!(gates.remove_gate(&gate.id));
    let outcome = tokio::time::timeout(Duration::from_secs(1), request)
        .await
        .expect("waiter should resolve promptly")
        .unwrap();
    assert_eq!(outcome, GateOutcome::Released);
    assert_eq!(gates.waiter_count(), 0);
}
