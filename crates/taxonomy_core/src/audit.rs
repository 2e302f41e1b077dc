//! Mutation audit trail.
//!
//! # Responsibility
//! - Describe every successful mutation as an [`AuditEvent`] with
//!   before/after JSON snapshots.
//! - Hand events to a pluggable [`AuditSink`]; delivery is fire-and-forget.
//!
//! # Invariants
//! - Sinks never fail the mutation that produced the event.
//! - Snapshots are taken after validation, so `after` reflects stored state.

use crate::context::RequestContext;
use log::{info, warn};
use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;
use uuid::Uuid;

/// Kind of mutation recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Move,
    StatusChange,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Move => "move",
            Self::StatusChange => "status_change",
        }
    }
}

/// Kind of record an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntity {
    Namespace,
    Taxonomy,
    Category,
    Classification,
}

impl AuditEntity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::Taxonomy => "taxonomy",
            Self::Category => "category",
            Self::Classification => "classification",
        }
    }
}

/// One recorded mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub tenant_id: String,
    pub actor: String,
    pub action: AuditAction,
    pub entity: AuditEntity,
    pub entity_id: Uuid,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub at: i64,
}

impl AuditEvent {
    pub fn new(
        ctx: &RequestContext,
        action: AuditAction,
        entity: AuditEntity,
        entity_id: Uuid,
        at: i64,
    ) -> Self {
        Self {
            tenant_id: ctx.tenant_id().to_string(),
            actor: ctx.user_id().to_string(),
            action,
            entity,
            entity_id,
            before: None,
            after: None,
            at,
        }
    }

    pub fn before<T: Serialize>(mut self, value: &T) -> Self {
        self.before = snapshot(value);
        self
    }

    pub fn after<T: Serialize>(mut self, value: &T) -> Self {
        self.after = snapshot(value);
        self
    }
}

fn snapshot<T: Serialize>(value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(json) => Some(json),
        Err(err) => {
            warn!("event=audit_snapshot module=audit status=error error={err}");
            None
        }
    }
}

/// Receiver of audit events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes one metadata-only log line per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, event: AuditEvent) {
        info!(
            "event=audit module=audit status=ok action={} entity={} entity_id={} tenant_id={} actor={}",
            event.action.as_str(),
            event.entity.as_str(),
            event.entity_id,
            event.tenant_id,
            event.actor
        );
    }
}

/// Keeps events in memory; used by tests and embedders that batch events.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every recorded event in arrival order.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::{AuditAction, AuditEntity, AuditEvent, AuditSink, MemoryAuditSink};
    use crate::context::RequestContext;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn memory_sink_keeps_snapshots_in_order() {
        let ctx = RequestContext::admin("tenant-a", "alice").unwrap();
        let sink = MemoryAuditSink::new();
        let id = Uuid::new_v4();

        sink.record(
            AuditEvent::new(&ctx, AuditAction::Create, AuditEntity::Category, id, 10)
                .after(&json!({"slug": "rock"})),
        );
        sink.record(
            AuditEvent::new(&ctx, AuditAction::Delete, AuditEntity::Category, id, 20)
                .before(&json!({"slug": "rock"})),
        );

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, AuditAction::Create);
        assert_eq!(events[0].after, Some(json!({"slug": "rock"})));
        assert_eq!(events[0].tenant_id, "tenant-a");
        assert_eq!(events[1].before, Some(json!({"slug": "rock"})));
        assert!(events[1].after.is_none());
    }
}
