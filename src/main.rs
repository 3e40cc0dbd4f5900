use std::error::Error;
use std::time::Duration;

use serde_json::json;
use timegate::{
    diff_stages, ContextMap, DebugRuntime, DebugRuntimeConfig, GateCondition, GateEvent,
    GateOutcome, LocalContext, RequestDescriptor, ResponseDescriptor, TraceFilter,
};

async fn handle_request(
    runtime: DebugRuntime,
    trace_id: String,
    user_id: &str,
) -> GateOutcome {
    let mut request = RequestDescriptor::new("GET", format!("/users/{}", user_id));
    request.headers.insert("x-user-id".into(), user_id.into());
    runtime.begin_request(request, &trace_id);

    let mut local = LocalContext::new(format!("req-{}", user_id), "demo-client");
    runtime.enter_stage(&trace_id, "auth", None, None).await;
    local.set("user", json!({ "id": user_id }));
    runtime.capture(&trace_id, &local);
    runtime.exit_stage(&trace_id);

    let mut gate_context = ContextMap::new();
    gate_context.insert("userId".into(), json!(user_id));
    let outcome = runtime
        .enter_stage(&trace_id, "handler", None, Some(&gate_context))
        .await;
    local.set("user", json!({ "id": user_id, "loaded": true }));
    local.set("cacheHit", json!(false));
    runtime.capture(&trace_id, &local);
    runtime.exit_stage(&trace_id);

    runtime.finish_request(
        &trace_id,
        Some(ResponseDescriptor::new(200).with_body(json!({ "id": user_id }))),
        None,
    );
    outcome
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("=== Timegate time-travel debugging demo ===\n");

    let config = match std::env::args().nth(1) {
        Some(path) => DebugRuntimeConfig::from_file(path)?,
        None => DebugRuntimeConfig::default(),
    };
    let runtime = DebugRuntime::builder().config(config).sweeper(true).build()?;

    // Hold only user 123 at the handler stage, then release it from the event stream.
    let gate = runtime.gates().create_gate(
        "trace-123",
        "handler",
        Some(GateCondition::parse(r#"userId === "123""#)?),
    );
    let mut events = runtime.gates().subscribe();
    let releaser = {
        let runtime = runtime.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let GateEvent::Triggered { gate_id, stage, .. } = event {
                    println!("gate {} holding request at {}", gate_id, stage);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    runtime.gates().release_gate(&gate_id);
                    break;
                }
            }
        })
    };

    let held = tokio::spawn(handle_request(runtime.clone(), "trace-123".into(), "123"));
    let free = tokio::spawn(handle_request(runtime.clone(), "trace-456".into(), "456"));
    println!("trace-456: {:?}", free.await?);
    println!("trace-123: {:?}", held.await?);
    releaser.await?;

    if let Some(gate) = runtime.gates().get_gate(&gate.id) {
        println!("gate {} is {:?} after {} hit(s)", gate.id, gate.status, gate.hit_count);
    }

    println!("\n=== Archived traces ===");
    for trace in runtime.storage().list_traces(&TraceFilter::default()) {
        println!(
            "  {} {} {} ({} stages, {:?})",
            trace.id,
            trace.request.method,
            trace.request.path,
            trace.stage_count(),
            trace.status
        );
        if let Some(diff) = diff_stages(&trace, "auth", "handler") {
            println!("    auth -> handler: {}", serde_json::to_string(&diff)?);
        }
    }
    println!("\nstats: {}", serde_json::to_string(&runtime.storage().get_stats())?);

    runtime.shutdown();
    Ok(())
}
