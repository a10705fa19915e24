pub mod context;
pub mod deferred;
pub mod history;
pub mod overrides;
pub mod registry;

pub use context::{Actor, HandlerContext, OperationOptions};
pub use deferred::{DeferredFuture, DeferredQueue};
pub use history::{HistoryEntry, HistoryLog};
pub use overrides::{CallbackSpecifier, OverrideSet, SpecifierList};
pub use registry::{BeforeSave, FnHandler, Handler, HandlerRegistry};
