pub mod audit;
pub mod notify;
pub mod trace;

pub use audit::{AuditAction, AuditRecord, AuditSink, ChangeSet, FieldChange};
pub use notify::{BroadcastNotifier, ChangeNotice, Notifier, NullNotifier};
pub use trace::{SpanId, TraceEntry, TraceEvent, TraceRegistry, TraceScope, TraceSink, TracingSink};
