//! Best-effort audit trail for protect and unprotect operations
//!
//! Audit emission is fire-and-forget: it never blocks the codec path and
//! a failing sink never fails the operation that produced the event.

use crate::types::SensitivityClass;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

/// The codec operation that touched a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuditAction {
    /// Field sealed on the send path
    Protect,
    /// Field opened on the receive path
    Unprotect,
}

/// How the operation ended for this field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuditOutcome {
    /// Field processed successfully
    Success,
    /// Caller lacked an authorized role
    Denied,
    /// Key lookup or cipher operation failed
    Failed,
}

/// One audit record per field touched by the codec
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Unique event identifier (aud-<uuid>)
    pub id: String,

    /// Dotted path of the field touched
    pub field_path: String,

    /// Sensitivity class of the field
    pub class: SensitivityClass,

    /// Operation performed
    pub action: AuditAction,

    /// Identity of the caller
    pub caller: String,

    /// Outcome for this field
    pub outcome: AuditOutcome,

    /// Unix timestamp in milliseconds
    pub timestamp: u64,
}

impl AuditEvent {
    /// Create a new audit event with auto-generated id and timestamp
    pub fn new(
        field_path: impl Into<String>,
        class: SensitivityClass,
        action: AuditAction,
        caller: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            id: format!("aud-{}", uuid::Uuid::new_v4()),
            field_path: field_path.into(),
            class,
            action,
            caller: caller.into(),
            outcome,
            timestamp: now_millis(),
        }
    }
}

/// Trait for audit sinks
///
/// `emit` is infallible by contract. Implementations that forward to an
/// external system must absorb their own errors (log and drop).
pub trait AuditSink: Send + Sync {
    /// Record an audit event, best effort
    fn emit(&self, event: AuditEvent);
}

/// Audit sink that writes structured tracing events
#[derive(Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        match event.outcome {
            AuditOutcome::Success => tracing::info!(
                audit_id = %event.id,
                field = %event.field_path,
                class = %event.class,
                action = ?event.action,
                caller = %event.caller,
                "Field protection audit"
            ),
            AuditOutcome::Denied | AuditOutcome::Failed => tracing::warn!(
                audit_id = %event.id,
                field = %event.field_path,
                class = %event.class,
                action = ?event.action,
                caller = %event.caller,
                outcome = ?event.outcome,
                "Field protection audit"
            ),
        }
    }
}

/// In-memory audit sink for development and testing
///
/// Stores events in a `Vec` with configurable max capacity; oldest events
/// are dropped once the cap is exceeded.
pub struct MemoryAuditSink {
    events: RwLock<Vec<AuditEvent>>,
    max_events: usize,
}

impl MemoryAuditSink {
    /// Create a new in-memory sink
    pub fn new(max_events: usize) -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            max_events,
        }
    }

    /// Number of buffered events
    pub fn count(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Most recent events first
    pub fn list(&self, limit: usize) -> Vec<AuditEvent> {
        self.events
            .read()
            .map(|events| events.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl AuditSink for MemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        // Best effort: a poisoned lock drops the event rather than failing
        // the codec path
        let Ok(mut events) = self.events.write() else {
            return;
        };
        events.push(event);

        if self.max_events > 0 && events.len() > self.max_events {
            let drain_count = events.len() - self.max_events;
            events.drain(..drain_count);
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
