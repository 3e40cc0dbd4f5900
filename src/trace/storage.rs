//! Expiring, size-bounded archive of completed traces.
//!
//! Every entry carries an absolute `expires_at`. Reads evict expired entries
//! lazily and an optional background sweep removes them periodically. When the
//! archive grows past `max_traces`, the entries that would expire soonest go
//! first.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::StorageConfig;
use crate::core::runtime_context::RuntimeContext;
use crate::error::ConfigResult;

use super::types::{RequestTrace, TraceStatus};

/// Response bodies longer than this many characters are truncated on store.
pub const MAX_BODY_CHARS: usize = 1000;
/// Appended to a truncated body.
pub const TRUNCATION_MARKER: &str = "...[truncated]";

#[derive(Debug, Clone)]
pub struct StoredTrace {
    pub trace: RequestTrace,
    pub expires_at: i64,
    pub compressed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub count: usize,
    /// Sum of the serialized JSON byte lengths of all stored traces.
    pub size: usize,
}

/// Query over the archive. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TraceFilter {
    pub status: Option<TraceStatus>,
    /// Substring of the request path.
    pub path: Option<String>,
    /// Inclusive lower bound on the trace timestamp.
    pub start_time: Option<i64>,
    /// Inclusive upper bound on the trace timestamp.
    pub end_time: Option<i64>,
    pub limit: Option<usize>,
}

impl TraceFilter {
    pub fn status(mut self, status: TraceStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn between(mut self, start_time: i64, end_time: i64) -> Self {
        self.start_time = Some(start_time);
        self.end_time = Some(end_time);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, trace: &RequestTrace) -> bool {
        if let Some(status) = self.status {
            if trace.status != status {
                return false;
            }
        }
        if let Some(path) = &self.path {
            if !trace.request.path.contains(path.as_str()) {
                return false;
            }
        }
        if let Some(start) = self.start_time {
            if trace.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if trace.timestamp > end {
                return false;
            }
        }
        true
    }
}

struct StorageInner {
    entries: DashMap<String, StoredTrace>,
    config: StorageConfig,
    context: RuntimeContext,
}

impl StorageInner {
    fn is_expired(&self, entry: &StoredTrace, now: i64) -> bool {
        entry.expires_at <= now
    }

    fn sweep_expired(&self) -> usize {
        let now = self.context.now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::trace!(removed, "swept expired traces");
        }
        removed
    }

    fn evict_over_capacity(&self) {
        while self.entries.len() > self.config.max_traces {
            let Some(victim) = self
                .entries
                .iter()
                .min_by_key(|e| (e.expires_at, e.trace.timestamp))
                .map(|e| e.key().clone())
            else {
                break;
            };
            self.entries.remove(&victim);
            tracing::warn!(
                trace_id = %victim,
                max_traces = self.config.max_traces,
                "trace archive full; evicting soonest-expiring trace"
            );
        }
    }
}

pub struct TraceStorage {
    inner: Arc<StorageInner>,
    sweeper: Mutex<Option<CancellationToken>>,
}

impl TraceStorage {
    pub fn new(config: StorageConfig) -> ConfigResult<Self> {
        Self::with_context(config, RuntimeContext::default())
    }

    pub fn with_context(config: StorageConfig, context: RuntimeContext) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(StorageInner {
                entries: DashMap::new(),
                config,
                context,
            }),
            sweeper: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    pub fn store_trace(&self, mut trace: RequestTrace) {
        let compressed = self.inner.config.compression && compress_response_body(&mut trace);
        let expires_at = self
            .inner
            .context
            .now_millis()
            .saturating_add(i64::try_from(self.inner.config.ttl_ms).unwrap_or(i64::MAX));
        let id = trace.id.clone();
        self.inner.entries.insert(
            id.clone(),
            StoredTrace {
                trace,
                expires_at,
                compressed,
            },
        );
        tracing::debug!(trace_id = %id, compressed, expires_at, "trace stored");
        self.inner.evict_over_capacity();
    }

    pub fn get_trace(&self, id: &str) -> Option<RequestTrace> {
        self.get_entry(id).map(|e| e.trace)
    }

    /// Stored record including expiry metadata.
    pub fn get_entry(&self, id: &str) -> Option<StoredTrace> {
        let now = self.inner.context.now_millis();
        {
            let entry = self.inner.entries.get(id)?;
            if !self.inner.is_expired(entry.value(), now) {
                return Some(entry.value().clone());
            }
        }
        // The sweeper may have raced us to it; remove_if keeps this idempotent.
        self.inner
            .entries
            .remove_if(id, |_, e| self.inner.is_expired(e, now));
        None
    }

    /// Matching traces, newest first, truncated to `filter.limit`.
    pub fn list_traces(&self, filter: &TraceFilter) -> Vec<RequestTrace> {
        self.inner.sweep_expired();
        let mut traces: Vec<RequestTrace> = self
            .inner
            .entries
            .iter()
            .filter(|e| filter.matches(&e.trace))
            .map(|e| e.trace.clone())
            .collect();
        traces.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            traces.truncate(limit);
        }
        traces
    }

    pub fn delete_trace(&self, id: &str) -> bool {
        self.inner.entries.remove(id).is_some()
    }

    pub fn clear(&self) {
        self.inner.entries.clear();
    }

    pub fn get_stats(&self) -> StorageStats {
        let size = self
            .inner
            .entries
            .iter()
            .map(|e| serde_json::to_vec(&e.trace).map(|b| b.len()).unwrap_or(0))
            .sum();
        StorageStats {
            count: self.inner.entries.len(),
            size,
        }
    }

    /// Remove every expired entry now. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.inner.sweep_expired()
    }

    /// Spawn the periodic sweep on the current tokio runtime. Idempotent.
    ///
    /// The task holds only a weak reference, so dropping the storage also ends it.
    pub fn start_sweeper(&self) {
        let mut guard = self.sweeper.lock();
        if guard.is_some() {
            return;
        }
        let token = CancellationToken::new();
        let weak: Weak<StorageInner> = Arc::downgrade(&self.inner);
        let interval = self.inner.config.sweep_interval();
        let cancel = token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        inner.sweep_expired();
                    }
                }
            }
        });
        *guard = Some(token);
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper.lock().is_some()
    }

    pub fn shutdown(&self) {
        if let Some(token) = self.sweeper.lock().take() {
            token.cancel();
        }
    }
}

impl Drop for TraceStorage {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Truncate an oversized response body in place. Returns true if it was cut.
fn compress_response_body(trace: &mut RequestTrace) -> bool {
    let Some(body) = trace.response.as_mut().and_then(|r| r.body.as_mut()) else {
        return false;
    };
    let text = match &mut *body {
        Value::String(s) => {
            if s.chars().count() <= MAX_BODY_CHARS {
                return false;
            }
            std::mem::take(s)
        }
        other => {
            let serialized = other.to_string();
            if serialized.chars().count() <= MAX_BODY_CHARS {
                return false;
            }
            serialized
        }
    };
    let mut truncated: String = text.chars().take(MAX_BODY_CHARS).collect();
    truncated.push_str(TRUNCATION_MARKER);
    *body = Value::String(truncated);
    true
}
