use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Point-in-time capture of a request's local state.
///
/// Never mutated after capture; diffing and patching produce new values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotToken {
    pub request_id: String,
    pub trace_id: String,
    pub client_id: String,
    pub timestamp: i64,
    pub last_hook_index: i64,
    pub phase: String,
    #[serde(default)]
    pub state: Map<String, Value>,
    #[serde(default)]
    pub outstanding_promises: Vec<String>,
}

impl SnapshotToken {
    /// Snapshot with empty metadata, for tooling that only cares about `state`.
    pub fn from_state(state: Map<String, Value>) -> Self {
        Self {
            request_id: String::new(),
            trace_id: String::new(),
            client_id: String::new(),
            timestamp: 0,
            last_hook_index: -1,
            phase: String::new(),
            state,
            outstanding_promises: Vec::new(),
        }
    }
}

/// Request-local context as maintained by the request-context component.
///
/// The collector only reads it: [`LocalContext::snapshot`] deep-copies the
/// state so later mutations of the context never reach a captured snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalContext {
    pub request_id: String,
    pub client_id: String,
    pub last_hook_index: i64,
    pub phase: String,
    #[serde(default)]
    pub state: Map<String, Value>,
    #[serde(default)]
    pub outstanding_promises: Vec<String>,
}

impl LocalContext {
    pub fn new(request_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            client_id: client_id.into(),
            last_hook_index: -1,
            ..Self::default()
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.state.insert(key.into(), value);
    }

    pub fn snapshot(&self, trace_id: &str, now_millis: i64) -> SnapshotToken {
        SnapshotToken {
            request_id: self.request_id.clone(),
            trace_id: trace_id.to_string(),
            client_id: self.client_id.clone(),
            timestamp: now_millis,
            last_hook_index: self.last_hook_index,
            phase: self.phase.clone(),
            state: self.state.clone(),
            outstanding_promises: self.outstanding_promises.clone(),
        }
    }
}

/// Originating request as seen by the ingress collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDescriptor {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub query: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl RequestDescriptor {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDescriptor {
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl ResponseDescriptor {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Structured error attached to a failed trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl TraceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Capture an error's message, using its `source()` chain as the stack.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut frames = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            frames.push(format!("caused by: {}", cause));
            source = cause.source();
        }
        Self {
            message: err.to_string(),
            stack: if frames.is_empty() {
                None
            } else {
                Some(frames.join("\n"))
            },
            code: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Pending,
    Success,
    Error,
}

/// One node of a request's stage tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceStage {
    pub name: String,
    pub start_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    pub snapshot_id: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub children: Vec<TraceStage>,
}

impl TraceStage {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn duration(&self) -> Option<u64> {
        self.end_time
            .map(|end| end.saturating_sub(self.start_time).max(0) as u64)
    }

    fn find(&self, name: &str) -> Option<&TraceStage> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    fn count(&self) -> usize {
        1 + self.children.iter().map(TraceStage::count).sum::<usize>()
    }
}

/// Aggregate record of one request's progress and outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestTrace {
    pub id: String,
    pub timestamp: i64,
    pub request: RequestDescriptor,
    #[serde(default)]
    pub stages: Vec<TraceStage>,
    #[serde(default)]
    pub snapshots: HashMap<String, SnapshotToken>,
    pub duration: u64,
    pub status: TraceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TraceError>,
}

impl RequestTrace {
    pub fn new(id: impl Into<String>, request: RequestDescriptor, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            timestamp,
            request,
            stages: Vec::new(),
            snapshots: HashMap::new(),
            duration: 0,
            status: TraceStatus::Pending,
            response: None,
            error: None,
        }
    }

    /// First stage with the given name, depth-first in call order.
    pub fn find_stage(&self, name: &str) -> Option<&TraceStage> {
        self.stages.iter().find_map(|s| s.find(name))
    }

    pub fn snapshot_for_stage(&self, name: &str) -> Option<&SnapshotToken> {
        self.find_stage(name)
            .and_then(|stage| self.snapshots.get(&stage.snapshot_id))
    }

    pub fn stage_count(&self) -> usize {
        self.stages.iter().map(TraceStage::count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stage(name: &str, snapshot_id: &str, children: Vec<TraceStage>) -> TraceStage {
        TraceStage {
            name: name.to_string(),
            start_time: 10,
            end_time: Some(25),
            snapshot_id: snapshot_id.to_string(),
            metadata: Map::new(),
            children,
        }
    }

    #[test]
    fn test_local_context_snapshot_is_detached() {
        let mut ctx = LocalContext::new("req-1", "client-1");
        ctx.set("user", json!({"id": 1}));
        let snap = ctx.snapshot("trace-1", 100);
        ctx.set("user", json!({"id": 2}));

        assert_eq!(snap.state["user"], json!({"id": 1}));
        assert_eq!(snap.trace_id, "trace-1");
        assert_eq!(snap.request_id, "req-1");
        assert_eq!(snap.timestamp, 100);
    }

    #[test]
    fn test_find_stage_depth_first() {
        let mut trace = RequestTrace::new("t", RequestDescriptor::new("GET", "/"), 0);
        trace.stages.push(stage(
            "handler",
            "s1",
            vec![stage("module", "s2", vec![]), stage("render", "s3", vec![])],
        ));
        trace.snapshots.insert(
            "s2".to_string(),
            SnapshotToken::from_state(Map::new()),
        );

        assert_eq!(trace.find_stage("render").unwrap().snapshot_id, "s3");
        assert!(trace.find_stage("missing").is_none());
        assert!(trace.snapshot_for_stage("module").is_some());
        assert!(trace.snapshot_for_stage("render").is_none());
        assert_eq!(trace.stage_count(), 3);
        assert_eq!(trace.stages[0].duration(), Some(15));
    }

    #[test]
    fn test_trace_error_from_error_chain() {
        #[derive(Debug, thiserror::Error)]
        #[error("outer failure")]
        struct Outer(#[source] std::io::Error);

        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
        let captured = TraceError::from_error(&err);
        assert_eq!(captured.message, "outer failure");
        assert!(captured.stack.unwrap().contains("disk gone"));

        let plain = TraceError::new("boom").with_code("E_BOOM");
        assert_eq!(plain.code.as_deref(), Some("E_BOOM"));
    }

    #[test]
    fn test_trace_serializes_camel_case() {
        let trace = RequestTrace::new("t1", RequestDescriptor::new("POST", "/api"), 5);
        let json = serde_json::to_value(&trace).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["request"]["path"], "/api");
        assert!(json.get("response").is_none());
    }
}
