//! Conditional stage checkpoints that hold in-flight requests.
//!
//! Each [`DebugGateManager::check_gate`] call that hits an open gate becomes an
//! independent waiter with its own wake channel and timeout. Releasing a gate
//! wakes every waiter on it; a timeout retires only the waiter it belongs to.
//! The gate's status is derived from its waiters: `Triggered` while any remain,
//! `Released` once the last one has left.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::config::GateManagerConfig;
use crate::core::event_bus::{EventBus, EventReceiver, GateEvent};
use crate::core::runtime_context::RuntimeContext;
use crate::error::ConfigResult;

use super::condition::{ContextMap, GateCondition};
use super::types::{Gate, GateOptions, GateOutcome, GateStatus};

struct GateEntry {
    gate: Gate,
    /// Creation order; the first open gate for a (trace, stage) pair wins.
    seq: u64,
    waiters: HashMap<u64, oneshot::Sender<()>>,
}

impl GateEntry {
    /// Wake every waiter and mark the gate released. Returns false if nobody was held.
    fn release_all(&mut self, now: i64) -> bool {
        if self.gate.status != GateStatus::Triggered {
            return false;
        }
        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.send(());
        }
        self.gate.waiting = 0;
        self.gate.status = GateStatus::Released;
        self.gate.released_at = Some(now);
        true
    }
}

#[derive(Default)]
struct Registry {
    gates: HashMap<String, GateEntry>,
    next_seq: u64,
}

impl Registry {
    fn first_open(&self, trace_id: &str, stage: &str) -> Option<&GateEntry> {
        self.gates
            .values()
            .filter(|e| e.gate.matches(trace_id, stage))
            .min_by_key(|e| e.seq)
    }
}

/// Removes a waiter if its `check_gate` future ends without being released,
/// whether by timeout or by the caller dropping the future.
struct WaiterGuard<'a> {
    manager: &'a DebugGateManager,
    gate_id: String,
    waiter_id: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.manager.retire_waiter(&self.gate_id, self.waiter_id);
    }
}

pub struct DebugGateManager {
    registry: Mutex<Registry>,
    enabled: AtomicBool,
    default_timeout: Duration,
    next_waiter: AtomicU64,
    events: EventBus,
    context: RuntimeContext,
}

impl DebugGateManager {
    pub fn new(config: GateManagerConfig) -> ConfigResult<Self> {
        Self::with_context(config, RuntimeContext::default())
    }

    pub fn with_context(config: GateManagerConfig, context: RuntimeContext) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            registry: Mutex::new(Registry::default()),
            enabled: AtomicBool::new(config.enabled),
            default_timeout: config.default_timeout(),
            next_waiter: AtomicU64::new(0),
            events: EventBus::new(),
            context,
        })
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn create_gate(
        &self,
        trace_id: &str,
        stage: &str,
        condition: Option<GateCondition>,
    ) -> Gate {
        self.create_gate_with(
            trace_id,
            stage,
            GateOptions {
                condition,
                timeout: None,
            },
        )
    }

    /// Create a gate with a per-gate timeout. A zero timeout falls back to the default.
    pub fn create_gate_with(&self, trace_id: &str, stage: &str, options: GateOptions) -> Gate {
        let gate = Gate {
            id: self.context.next_id(),
            trace_id: trace_id.to_string(),
            stage: stage.to_string(),
            condition: options.condition,
            timeout: options.timeout.filter(|t| !t.is_zero()),
            status: GateStatus::Active,
            created_at: self.context.now_millis(),
            triggered_at: None,
            released_at: None,
            hit_count: 0,
            waiting: 0,
        };

        let mut registry = self.registry.lock();
        let seq = registry.next_seq;
        registry.next_seq += 1;
        registry.gates.insert(
            gate.id.clone(),
            GateEntry {
                gate: gate.clone(),
                seq,
                waiters: HashMap::new(),
            },
        );
        tracing::debug!(
            gate_id = %gate.id,
            trace_id = %trace_id,
            stage = %stage,
            conditional = gate.condition.is_some(),
            "gate created"
        );
        gate
    }

    /// Suspend the caller if an open gate matches (trace_id, stage) and its
    /// condition holds for `context`. Never fails; faults pass through.
    pub async fn check_gate(
        &self,
        trace_id: &str,
        stage: &str,
        context: Option<&ContextMap>,
    ) -> GateOutcome {
        if !self.is_enabled() {
            return GateOutcome::Passed;
        }

        let (gate_id, condition) = {
            let registry = self.registry.lock();
            match registry.first_open(trace_id, stage) {
                Some(entry) => (entry.gate.id.clone(), entry.gate.condition.clone()),
                None => return GateOutcome::Passed,
            }
        };

        // Evaluated outside the lock so a predicate can never stall the registry.
        if let Some(condition) = condition {
            let empty = ContextMap::new();
            match condition.evaluate(context.unwrap_or(&empty)) {
                Ok(true) => {}
                Ok(false) => return GateOutcome::Passed,
                Err(err) => {
                    tracing::warn!(
                        gate_id = %gate_id,
                        trace_id = %trace_id,
                        stage = %stage,
                        error = %err,
                        "gate condition failed to evaluate; passing through"
                    );
                    return GateOutcome::Passed;
                }
            }
        }

        let waiter_id = self.next_waiter.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let timeout = {
            let mut registry = self.registry.lock();
            let Some(entry) = registry.gates.get_mut(&gate_id) else {
                return GateOutcome::Passed;
            };
            if !entry.gate.is_open() {
                return GateOutcome::Passed;
            }
            entry.waiters.insert(waiter_id, tx);
            entry.gate.waiting = entry.waiters.len();
            entry.gate.hit_count += 1;
            entry.gate.status = GateStatus::Triggered;
            entry.gate.triggered_at.get_or_insert(self.context.now_millis());
            entry.gate.timeout.unwrap_or(self.default_timeout)
        };

        tracing::info!(
            gate_id = %gate_id,
            trace_id = %trace_id,
            stage = %stage,
            timeout_ms = timeout.as_millis() as u64,
            "gate triggered; holding request"
        );
        self.events.emit(GateEvent::Triggered {
            gate_id: gate_id.clone(),
            trace_id: trace_id.to_string(),
            stage: stage.to_string(),
        });

        let _guard = WaiterGuard {
            manager: self,
            gate_id,
            waiter_id,
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(_) => GateOutcome::Released,
            Err(_) => GateOutcome::TimedOut,
        }
    }

    /// Let go of every caller held on the gate.
    ///
    /// False if the gate does not exist or is not currently triggered.
    pub fn release_gate(&self, id: &str) -> bool {
        let now = self.context.now_millis();
        let released = {
            let mut registry = self.registry.lock();
            match registry.gates.get_mut(id) {
                Some(entry) => entry.release_all(now),
                None => false,
            }
        };
        if released {
            tracing::info!(gate_id = %id, "gate released");
            self.events.emit(GateEvent::Released {
                gate_id: id.to_string(),
            });
        }
        released
    }

    /// Delete a gate, first releasing anyone it holds.
    pub fn remove_gate(&self, id: &str) -> bool {
        let now = self.context.now_millis();
        let Some(mut entry) = self.registry.lock().gates.remove(id) else {
            return false;
        };
        if entry.release_all(now) {
            tracing::info!(gate_id = %id, "gate released on removal");
            self.events.emit(GateEvent::Released {
                gate_id: id.to_string(),
            });
        }
        true
    }

    pub fn list_gates(&self, trace_id: Option<&str>) -> Vec<Gate> {
        let registry = self.registry.lock();
        let mut entries: Vec<&GateEntry> = registry
            .gates
            .values()
            .filter(|e| trace_id.map_or(true, |t| e.gate.trace_id == t))
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.gate.clone()).collect()
    }

    pub fn get_gate(&self, id: &str) -> Option<Gate> {
        self.registry.lock().gates.get(id).map(|e| e.gate.clone())
    }

    /// Release every held caller and empty the registry.
    pub fn clear(&self) {
        let now = self.context.now_millis();
        let drained: Vec<(String, GateEntry)> = self.registry.lock().gates.drain().collect();
        for (id, mut entry) in drained {
            if entry.release_all(now) {
                self.events.emit(GateEvent::Released { gate_id: id });
            }
        }
        tracing::debug!("gate registry cleared");
    }

    /// Total callers currently suspended across all gates.
    pub fn waiter_count(&self) -> usize {
        self.registry
            .lock()
            .gates
            .values()
            .map(|e| e.waiters.len())
            .sum()
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

    fn retire_waiter(&self, gate_id: &str, waiter_id: u64) {
        let now = self.context.now_millis();
        let released = {
            let mut registry = self.registry.lock();
            let Some(entry) = registry.gates.get_mut(gate_id) else {
                return;
            };
            if entry.waiters.remove(&waiter_id).is_none() {
                return;
            }
            entry.gate.waiting = entry.waiters.len();
            if entry.waiters.is_empty() {
                entry.gate.status = GateStatus::Released;
                entry.gate.released_at = Some(now);
                true
            } else {
                false
            }
        };
        if released {
            tracing::info!(gate_id = %gate_id, "gate timed out; released");
            self.events.emit(GateEvent::Released {
                gate_id: gate_id.to_string(),
            });
        }
    }
}
