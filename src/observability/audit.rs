//! Append-only audit trail.
//!
//! Events are typed, fields are free-form JSON. Persisting them is up to the
//! sink; the default one writes to tracing under the `slayer::audit` target
//! so it can be routed separately from diagnostic logs.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    RequestCompleted,
    RequestFailed,
    CircuitTransition,
    LoadTestStarted,
    LoadTestCompleted,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::RequestCompleted => "request_completed",
            AuditEvent::RequestFailed => "request_failed",
            AuditEvent::CircuitTransition => "circuit_transition",
            AuditEvent::LoadTestStarted => "load_test_started",
            AuditEvent::LoadTestCompleted => "load_test_completed",
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn record_event(&self, event: AuditEvent, fields: Value);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record_event(&self, event: AuditEvent, fields: Value) {
        tracing::info!(target: "slayer::audit", event = event.as_str(), fields = %fields, "audit");
    }
}

/// Keeps events in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<(AuditEvent, Value)>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(AuditEvent, Value)> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: AuditEvent) -> usize {
        self.events.lock().iter().filter(|(e, _)| *e == event).count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record_event(&self, event: AuditEvent, fields: Value) {
        self.events.lock().push((event, fields));
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAudit;

impl AuditSink for NoopAudit {
    fn record_event(&self, _event: AuditEvent, _fields: Value) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_sink_keeps_order() {
        let sink = MemoryAuditSink::new();
        sink.record_event(AuditEvent::LoadTestStarted, json!({"concurrency": 2}));
        sink.record_event(AuditEvent::RequestCompleted, json!({"status": 200}));
        sink.record_event(AuditEvent::LoadTestCompleted, json!({}));

        let events = sink.events();
        assert_eq!(events[0].0, AuditEvent::LoadTestStarted);
        assert_eq!(events[1].1["status"], 200);
        assert_eq!(sink.count(AuditEvent::RequestCompleted), 1);
    }
}
