//! Everything needed to declare entities, register handlers and run
//! operations.
//!
//! ```ignore
//! use convergedb::prelude::*;
//! ```

pub use crate::{
    Actor, BeforeSave, CallbackSpecifier, DbError, Engine, EngineBuilder, EngineConfig, Entity,
    FieldMask, HandlerContext, HandlerRegistry, MemoryStore, OperationOptions, Result, Session,
    Value,
};
pub use async_trait::async_trait;
pub use futures::FutureExt;
