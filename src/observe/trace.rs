use super::{AuditAction, ChangeSet};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{Level, event};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEvent {
    /// Enter/exit of one Create or Save.
    ModelActivity {
        entity_type: String,
        entity_id: String,
        action: AuditAction,
    },
    /// Enter/exit of one convergence pass.
    Iteration {
        entity_type: String,
        entity_id: String,
        pass: u32,
    },
    /// Enter/exit of one handler dispatch.
    Callback {
        entity_type: String,
        handler: String,
        entity_id: String,
        skipped: bool,
        forced: bool,
        triggered: ChangeSet,
    },
    /// Changes a handler made to the proposed record, and how long it ran.
    CallbackComplete {
        entity_type: String,
        handler: String,
        entity_id: String,
        duration: Duration,
        changes: ChangeSet,
    },
}

impl TraceEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ModelActivity { .. } => "model_activity",
            Self::Iteration { .. } => "iteration",
            Self::Callback { .. } => "callback",
            Self::CallbackComplete { .. } => "callback_complete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(pub u64);

/// Structured, hierarchical trace destination.
///
/// Every `enter` is paired with exactly one `exit`, including on error paths.
pub trait TraceSink: Send + Sync {
    fn enter(&self, event: TraceEvent) -> SpanId;
    fn exit(&self, span: SpanId);
    fn add(&self, event: TraceEvent);
}

/// Open trace span; exits on drop.
pub struct TraceScope {
    sink: Arc<dyn TraceSink>,
    span: SpanId,
}

impl TraceScope {
    pub fn enter(sink: &Arc<dyn TraceSink>, event: TraceEvent) -> Self {
        let span = sink.enter(event);
        Self {
            sink: Arc::clone(sink),
            span,
        }
    }

    pub fn span(&self) -> SpanId {
        self.span
    }
}

impl Drop for TraceScope {
    fn drop(&mut self) {
        self.sink.exit(self.span);
    }
}

/// Forwards trace events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink {
    next_span: AtomicU64,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(event: &TraceEvent, phase: &'static str) {
        match event {
            TraceEvent::ModelActivity {
                entity_type,
                entity_id,
                action,
            } => event!(
                Level::DEBUG,
                phase,
                entity_type = %entity_type,
                entity_id = %entity_id,
                action = action.as_str(),
                "model activity"
            ),
            TraceEvent::Iteration {
                entity_type,
                entity_id,
                pass,
            } => event!(
                Level::TRACE,
                phase,
                entity_type = %entity_type,
                entity_id = %entity_id,
                pass,
                "convergence pass"
            ),
            TraceEvent::Callback {
                handler,
                entity_id,
                skipped,
                forced,
                triggered,
                ..
            } => event!(
                Level::DEBUG,
                phase,
                handler = %handler,
                entity_id = %entity_id,
                skipped,
                forced,
                triggered = ?triggered.fields(),
                "before-save handler"
            ),
            TraceEvent::CallbackComplete {
                handler,
                entity_id,
                duration,
                changes,
                ..
            } => event!(
                Level::DEBUG,
                handler = %handler,
                entity_id = %entity_id,
                duration_us = duration.as_micros() as u64,
                changed = ?changes.fields(),
                "before-save handler complete"
            ),
        }
    }
}

impl TraceSink for TracingSink {
    fn enter(&self, event: TraceEvent) -> SpanId {
        Self::emit(&event, "enter");
        SpanId(self.next_span.fetch_add(1, Ordering::Relaxed))
    }

    fn exit(&self, span: SpanId) {
        event!(Level::TRACE, span = span.0, "trace span exit");
    }

    fn add(&self, event: TraceEvent) {
        Self::emit(&event, "add");
    }
}

/// One recorded trace entry.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub event: TraceEvent,
    /// Number of enclosing open spans when the entry was recorded.
    pub depth: usize,
    /// Whether the entry was opened with `enter` (as opposed to `add`).
    pub is_span: bool,
    /// Whether a span entry is still waiting for its `exit`.
    pub open: bool,
}

#[derive(Debug, Default)]
struct TraceTree {
    entries: Vec<TraceEntry>,
    stack: Vec<usize>,
}

/// In-memory hierarchical trace recorder.
#[derive(Debug, Default)]
pub struct TraceRegistry {
    tree: Mutex<TraceTree>,
}

impl TraceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TraceTree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn entries(&self) -> Vec<TraceEntry> {
        self.lock().entries.clone()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.lock()
            .entries
            .iter()
            .map(|entry| entry.event.clone())
            .collect()
    }

    /// `Callback` events in dispatch order.
    pub fn callbacks(&self) -> Vec<TraceEvent> {
        self.lock()
            .entries
            .iter()
            .filter(|entry| matches!(entry.event, TraceEvent::Callback { .. }))
            .map(|entry| entry.event.clone())
            .collect()
    }

    /// Spans entered but not yet exited.
    pub fn open_spans(&self) -> usize {
        self.lock().entries.iter().filter(|entry| entry.open).count()
    }

    pub fn clear(&self) {
        let mut tree = self.lock();
        tree.entries.clear();
        tree.stack.clear();
    }
}

impl TraceSink for TraceRegistry {
    fn enter(&self, event: TraceEvent) -> SpanId {
        let mut tree = self.lock();
        let depth = tree.stack.len();
        let index = tree.entries.len();
        tree.entries.push(TraceEntry {
            event,
            depth,
            is_span: true,
            open: true,
        });
        tree.stack.push(index);
        SpanId(index as u64)
    }

    fn exit(&self, span: SpanId) {
        let mut tree = self.lock();
        let index = span.0 as usize;
        if let Some(entry) = tree.entries.get_mut(index) {
            entry.open = false;
        }
        tree.stack.retain(|open| *open != index);
    }

    fn add(&self, event: TraceEvent) {
        let mut tree = self.lock();
        let depth = tree.stack.len();
        tree.entries.push(TraceEntry {
            event,
            depth,
            is_span: false,
            open: false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass(pass: u32) -> TraceEvent {
        TraceEvent::Iteration {
            entity_type: "invoice".into(),
            entity_id: "inv-1".into(),
            pass,
        }
    }

    #[test]
    fn scopes_nest_and_close_on_drop() {
        let registry = Arc::new(TraceRegistry::new());
        let sink: Arc<dyn TraceSink> = registry.clone();
        {
            let _outer = TraceScope::enter(
                &sink,
                TraceEvent::ModelActivity {
                    entity_type: "invoice".into(),
                    entity_id: "inv-1".into(),
                    action: AuditAction::Update,
                },
            );
            let _inner = TraceScope::enter(&sink, pass(1));
            sink.add(pass(2));
            assert_eq!(registry.open_spans(), 2);
        }

        let entries = registry.entries();
        assert_eq!(registry.open_spans(), 0);
        assert_eq!(
            entries.iter().map(|entry| entry.depth).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(!entries[2].is_span);
    }

    #[test]
    fn scope_exits_when_unwinding_through_error() {
        let registry = Arc::new(TraceRegistry::new());
        let sink: Arc<dyn TraceSink> = registry.clone();

        let failing = || -> Result<(), String> {
            let _scope = TraceScope::enter(&sink, pass(1));
            Err("handler failed".to_string())
        };
        assert!(failing().is_err());
        assert_eq!(registry.open_spans(), 0);
    }

    #[test]
    fn tracing_sink_hands_out_distinct_spans() {
        let sink = TracingSink::new();
        let a = sink.enter(pass(1));
        let b = sink.enter(pass(2));
        assert_ne!(a, b);
        sink.exit(b);
        sink.exit(a);
    }
}
