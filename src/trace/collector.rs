//! Live, per-request stage tree builder.
//!
//! Stages nest by call order: [`TraceCollector::capture_stage`] opens a child of
//! the innermost open stage, [`TraceCollector::complete_stage`] closes it.
//! Calls past a point of imbalance are no-ops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::config::CollectorConfig;
use crate::core::runtime_context::RuntimeContext;
use crate::error::ConfigResult;

use super::types::{
    LocalContext, RequestDescriptor, RequestTrace, ResponseDescriptor, TraceError, TraceStage,
    TraceStatus,
};

struct ActiveTrace {
    trace: RequestTrace,
    started_at: i64,
    /// Insertion sequence; breaks ties between traces started in the same millisecond.
    seq: u64,
    /// Index paths (root index, child index, ...) of the currently open stages.
    open: Vec<Vec<usize>>,
}

impl ActiveTrace {
    fn stage_mut(&mut self, path: &[usize]) -> Option<&mut TraceStage> {
        let (first, rest) = path.split_first()?;
        let mut stage = self.trace.stages.get_mut(*first)?;
        for idx in rest {
            stage = stage.children.get_mut(*idx)?;
        }
        Some(stage)
    }

    fn innermost_mut(&mut self) -> Option<&mut TraceStage> {
        let path = self.open.last()?.clone();
        self.stage_mut(&path)
    }

    fn close_innermost(&mut self, now: i64) -> bool {
        let Some(path) = self.open.pop() else {
            return false;
        };
        if let Some(stage) = self.stage_mut(&path) {
            stage.end_time = Some(now);
        }
        true
    }
}

pub struct TraceCollector {
    active: Mutex<HashMap<String, ActiveTrace>>,
    enabled: AtomicBool,
    max_active: usize,
    seq: AtomicU64,
    context: RuntimeContext,
}

impl TraceCollector {
    pub fn new(config: CollectorConfig) -> ConfigResult<Self> {
        Self::with_context(config, RuntimeContext::default())
    }

    pub fn with_context(config: CollectorConfig, context: RuntimeContext) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            active: Mutex::new(HashMap::new()),
            enabled: AtomicBool::new(config.enabled),
            max_active: config.max_active_traces,
            seq: AtomicU64::new(0),
            context,
        })
    }

    pub fn start_trace(&self, request: RequestDescriptor, trace_id: &str) {
        if !self.is_enabled() {
            return;
        }
        let now = self.context.now_millis();
        let entry = ActiveTrace {
            trace: RequestTrace::new(trace_id, request, now),
            started_at: now,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            open: Vec::new(),
        };

        let mut active = self.active.lock();
        active.insert(trace_id.to_string(), entry);
        tracing::debug!(trace_id = %trace_id, active = active.len(), "trace started");

        while active.len() > self.max_active {
            let Some(oldest) = active
                .iter()
                .min_by_key(|(_, t)| (t.started_at, t.seq))
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            active.remove(&oldest);
            tracing::warn!(
                trace_id = %oldest,
                max_active = self.max_active,
                "active trace limit exceeded; dropping oldest trace"
            );
        }
    }

    pub fn capture_stage(
        &self,
        trace_id: &str,
        stage_name: &str,
        metadata: Option<Map<String, Value>>,
    ) {
        if !self.is_enabled() {
            return;
        }
        let now = self.context.now_millis();
        let snapshot_id = self.context.next_id();
        let mut active = self.active.lock();
        let Some(entry) = active.get_mut(trace_id) else {
            return;
        };

        let stage = TraceStage {
            name: stage_name.to_string(),
            start_time: now,
            end_time: None,
            snapshot_id,
            metadata: metadata.unwrap_or_default(),
            children: Vec::new(),
        };

        let path = match entry.open.last().cloned() {
            Some(parent_path) => {
                let Some(parent) = entry.stage_mut(&parent_path) else {
                    return;
                };
                parent.children.push(stage);
                let mut path = parent_path;
                path.push(parent.children.len() - 1);
                path
            }
            None => {
                entry.trace.stages.push(stage);
                vec![entry.trace.stages.len() - 1]
            }
        };
        entry.open.push(path);
    }

    /// Attach a metadata entry to the innermost open stage.
    pub fn annotate_stage(&self, trace_id: &str, key: &str, value: Value) {
        if !self.is_enabled() {
            return;
        }
        let mut active = self.active.lock();
        if let Some(stage) = active.get_mut(trace_id).and_then(|e| e.innermost_mut()) {
            stage.metadata.insert(key.to_string(), value);
        }
    }

    /// Store a snapshot of `local_context` under the innermost open stage.
    pub fn capture_snapshot(&self, trace_id: &str, local_context: &LocalContext) {
        if !self.is_enabled() {
            return;
        }
        let now = self.context.now_millis();
        let mut active = self.active.lock();
        let Some(entry) = active.get_mut(trace_id) else {
            return;
        };
        let Some(snapshot_id) = entry.innermost_mut().map(|s| s.snapshot_id.clone()) else {
            return;
        };
        let snapshot = local_context.snapshot(trace_id, now);
        entry.trace.snapshots.insert(snapshot_id, snapshot);
    }

    pub fn complete_stage(&self, trace_id: &str) {
        if !self.is_enabled() {
            return;
        }
        let now = self.context.now_millis();
        let mut active = self.active.lock();
        if let Some(entry) = active.get_mut(trace_id) {
            entry.close_innermost(now);
        }
    }

    /// Finalize and hand back a trace. Stages still open are closed at `now`.
    pub fn end_trace(
        &self,
        trace_id: &str,
        response: Option<ResponseDescriptor>,
        error: Option<TraceError>,
    ) -> Option<RequestTrace> {
        if !self.is_enabled() {
            return None;
        }
        let now = self.context.now_millis();
        let mut entry = self.active.lock().remove(trace_id)?;
        while entry.close_innermost(now) {}

        let mut trace = entry.trace;
        trace.duration = now.saturating_sub(entry.started_at).max(0) as u64;
        trace.response = response;
        trace.status = if error.is_some() {
            TraceStatus::Error
        } else {
            TraceStatus::Success
        };
        trace.error = error;
        tracing::debug!(
            trace_id = %trace_id,
            duration_ms = trace.duration,
            status = ?trace.status,
            "trace finished"
        );
        Some(trace)
    }

    pub fn get_active_trace(&self, trace_id: &str) -> Option<RequestTrace> {
        self.active.lock().get(trace_id).map(|e| e.trace.clone())
    }

    pub fn get_active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Drop every in-flight trace without finalizing it.
    pub fn clear(&self) {
        self.active.lock().clear();
    }
}
