// ============================================================================
// convergedb Library
// ============================================================================
//
// Records are created and saved through a registry of field-triggered
// before-save handlers. Each operation re-runs the handlers whose trigger
// fields changed until the record stops changing, then writes it with an
// optimistic version bump, a change notification and an audit record.
//
// ============================================================================

extern crate self as convergedb;

pub mod callbacks;
pub mod core;
pub mod observe;
pub mod persist;
pub mod prelude;
pub mod storage;
pub mod transaction;

pub use callbacks::{
    Actor, BeforeSave, CallbackSpecifier, DeferredFuture, FnHandler, HandlerContext, HandlerRegistry,
    HistoryLog, OperationOptions, OverrideSet,
};
pub use self::core::{
    DbError, Entity, EntitySchema, FieldDef, FieldMask, FieldRole, FieldType, Result, Row, Value,
    field_type_error,
};
pub use observe::{
    AuditAction, AuditRecord, AuditSink, BroadcastNotifier, ChangeNotice, ChangeSet, FieldChange,
    Notifier, NullNotifier, TraceEvent, TraceRegistry, TraceSink, TracingSink,
};
pub use persist::{Engine, EngineBuilder, EngineConfig, RetryPolicy, Session};
pub use storage::{MemoryStore, Store};
pub use transaction::TransactionId;

pub use convergedb_derive::Entity;

#[doc(hidden)]
pub mod __private {
    pub use lazy_static::lazy_static;
}
