//! Pipeline facade over the gate manager, collector and storage.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::DebugRuntimeConfig;
use crate::core::runtime_context::RuntimeContext;
use crate::debug::{ContextMap, DebugGateManager, GateOutcome};
use crate::error::ConfigResult;
use crate::trace::{
    LocalContext, RequestDescriptor, RequestTrace, ResponseDescriptor, TraceCollector, TraceError,
    TraceStorage,
};

/// The three debugging components, explicitly constructed and shared.
///
/// Use [`DebugRuntime::builder()`](Self::builder) to obtain a
/// [`DebugRuntimeBuilder`]. Cloning is cheap; every clone drives the same
/// registry, in-flight map and archive.
#[derive(Clone)]
pub struct DebugRuntime {
    gates: Arc<DebugGateManager>,
    collector: Arc<TraceCollector>,
    storage: Arc<TraceStorage>,
}

impl DebugRuntime {
    pub fn builder() -> DebugRuntimeBuilder {
        DebugRuntimeBuilder {
            config: DebugRuntimeConfig::default(),
            context: RuntimeContext::default(),
            sweeper: false,
        }
    }

    pub fn gates(&self) -> &Arc<DebugGateManager> {
        &self.gates
    }

    pub fn collector(&self) -> &Arc<TraceCollector> {
        &self.collector
    }

    pub fn storage(&self) -> &Arc<TraceStorage> {
        &self.storage
    }

    /// Open a trace for an incoming request.
    pub fn begin_request(&self, request: RequestDescriptor, trace_id: &str) {
        self.collector.start_trace(request, trace_id);
    }

    /// Record the stage, then hold the caller if a gate for it is armed.
    pub async fn enter_stage(
        &self,
        trace_id: &str,
        stage: &str,
        metadata: Option<Map<String, Value>>,
        gate_context: Option<&ContextMap>,
    ) -> GateOutcome {
        self.collector.capture_stage(trace_id, stage, metadata);
        self.gates.check_gate(trace_id, stage, gate_context).await
    }

    /// Attach a snapshot of the request-local state to the current stage.
    pub fn capture(&self, trace_id: &str, local_context: &LocalContext) {
        self.collector.capture_snapshot(trace_id, local_context);
    }

    pub fn exit_stage(&self, trace_id: &str) {
        self.collector.complete_stage(trace_id);
    }

    /// Close the trace and archive it. Returns the finished trace as stored.
    pub fn finish_request(
        &self,
        trace_id: &str,
        response: Option<ResponseDescriptor>,
        error: Option<TraceError>,
    ) -> Option<RequestTrace> {
        let trace = self.collector.end_trace(trace_id, response, error)?;
        self.storage.store_trace(trace);
        self.storage.get_trace(trace_id)
    }

    /// Release every held request and stop the background sweep.
    pub fn shutdown(&self) {
        self.gates.clear();
        self.storage.shutdown();
    }
}

/// Builder for configuring a [`DebugRuntime`].
pub struct DebugRuntimeBuilder {
    config: DebugRuntimeConfig,
    context: RuntimeContext,
    sweeper: bool,
}

impl DebugRuntimeBuilder {
    pub fn config(mut self, config: DebugRuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Clock and id source shared by all three components.
    pub fn context(mut self, context: RuntimeContext) -> Self {
        self.context = context;
        self
    }

    /// Start the storage sweep on build. Needs a running tokio runtime.
    pub fn sweeper(mut self, enabled: bool) -> Self {
        self.sweeper = enabled;
        self
    }

    pub fn build(self) -> ConfigResult<DebugRuntime> {
        self.config.validate()?;
        let gates = DebugGateManager::with_context(self.config.gates, self.context.clone())?;
        let collector = TraceCollector::with_context(self.config.collector, self.context.clone())?;
        let storage = TraceStorage::with_context(self.config.storage, self.context)?;

        if self.sweeper {
            if tokio::runtime::Handle::try_current().is_ok() {
                storage.start_sweeper();
            } else {
                tracing::warn!("no tokio runtime available; trace sweep not started");
            }
        }

        tracing::debug!(
            gates_enabled = gates.is_enabled(),
            collector_enabled = collector.is_enabled(),
            sweeping = storage.is_sweeping(),
            "debug runtime built"
        );
        Ok(DebugRuntime {
            gates: Arc::new(gates),
            collector: Arc::new(collector),
            storage: Arc::new(storage),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GateManagerConfig;
    use crate::core::runtime_context::{FakeIdGenerator, FakeTimeProvider};
    use crate::debug::GateStatus;
    use crate::diff::diff_stages;
    use crate::trace::{TraceFilter, TraceStatus};
    use serde_json::json;
    use std::time::Duration;

    fn runtime() -> DebugRuntime {
        DebugRuntime::builder()
            .config(DebugRuntimeConfig {
                gates: GateManagerConfig::default().with_default_timeout(Duration::from_secs(5)),
                ..Default::default()
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = DebugRuntimeConfig::default();
        config.storage.max_traces = 0;
        assert!(DebugRuntime::builder().config(config).build().is_err());
    }

    #[tokio::test]
    async fn test_request_lifecycle_is_archived() {
        let rt = runtime();
        rt.begin_request(RequestDescriptor::new("GET", "/users/1"), "trace-1");

        let outcome = rt.enter_stage("trace-1", "auth", None, None).await;
        assert_eq!(outcome, GateOutcome::Passed);
        let mut local = LocalContext::new("req-1", "client-1");
        local.set("user", json!({"id": 1}));
        rt.capture("trace-1", &local);
        rt.exit_stage("trace-1");

        rt.enter_stage("trace-1", "handler", None, None).await;
        local.set("user", json!({"id": 1, "loaded": true}));
        rt.capture("trace-1", &local);
        rt.exit_stage("trace-1");

        let trace = rt
            .finish_request("trace-1", Some(ResponseDescriptor::new(200)), None)
            .unwrap();
        assert_eq!(trace.status, TraceStatus::Success);
        assert_eq!(trace.stage_count(), 2);
        assert_eq!(rt.collector().get_active_count(), 0);
        assert_eq!(rt.storage().list_traces(&TraceFilter::default()).len(), 1);

        let diff = diff_stages(&trace, "auth", "handler").unwrap();
        assert_eq!(diff.paths().collect::<Vec<_>>(), vec!["state.user.loaded"]);
    }

    #[tokio::test]
    async fn test_enter_stage_holds_until_release() {
        let rt = runtime();
        rt.begin_request(RequestDescriptor::new("POST", "/orders"), "trace-1");
        let gate = rt.gates().create_gate("trace-1", "handler", None);

        let held = {
            let rt = rt.clone();
            tokio::spawn(async move { rt.enter_stage("trace-1", "handler", None, None).await })
        };
        for _ in 0..200 {
            if rt.gates().waiter_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        // The stage is recorded before the caller is held.
        let active = rt.collector().get_active_trace("trace-1").unwrap();
        assert!(active.find_stage("handler").is_some());

        assert!(rt.gates().release_gate(&gate.id));
        assert_eq!(held.await.unwrap(), GateOutcome::Released);
        assert_eq!(
            rt.gates().get_gate(&gate.id).unwrap().status,
            GateStatus::Released
        );
    }

    #[tokio::test]
    async fn test_finish_request_records_error() {
        let rt = DebugRuntime::builder()
            .context(
                RuntimeContext::default()
                    .with_time_provider(Arc::new(FakeTimeProvider::new(1_000)))
                    .with_id_generator(Arc::new(FakeIdGenerator::new("gate"))),
            )
            .build()
            .unwrap();
        rt.begin_request(RequestDescriptor::new("GET", "/boom"), "trace-9");
        rt.enter_stage("trace-9", "handler", None, None).await;

        let trace = rt
            .finish_request(
                "trace-9",
                Some(ResponseDescriptor::new(500)),
                Some(TraceError::new("exploded").with_code("E_BOOM")),
            )
            .unwrap();
        assert_eq!(trace.status, TraceStatus::Error);
        assert_eq!(trace.timestamp, 1_000);
        assert!(trace.stages[0].end_time.is_some());
        assert!(rt.gates().create_gate("t", "s", None).id.starts_with("gate-"));
    }

    #[tokio::test]
    async fn test_sweeper_started_on_build() {
        let rt = DebugRuntime::builder().sweeper(true).build().unwrap();
        assert!(rt.storage().is_sweeping());
        rt.shutdown();
        assert!(!rt.storage().is_sweeping());
    }

    #[test]
    fn test_sweeper_skipped_without_runtime() {
        let rt = DebugRuntime::builder().sweeper(true).build().unwrap();
        assert!(!rt.storage().is_sweeping());
    }
}
