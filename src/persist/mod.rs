use crate::callbacks::{Actor, HandlerRegistry, OperationOptions, OverrideSet};
use crate::core::{DbError, Result};
use crate::observe::{AuditSink, Notifier, NullNotifier, TraceSink, TracingSink};
use crate::storage::{MemoryStore, Store};
use std::sync::Arc;
use tracing::{Level, event};

pub mod config;
mod converge;
mod retry;
mod session;

pub use config::{EngineConfig, RetryPolicy};
pub use session::Session;

pub(crate) struct EngineInner {
    pub registry: HandlerRegistry,
    pub store: Arc<dyn Store>,
    pub audit: Arc<dyn AuditSink>,
    pub notifier: Arc<dyn Notifier>,
    pub trace: Arc<dyn TraceSink>,
    pub config: EngineConfig,
}

/// Entry point for creating and saving records through the before-save
/// handlers. Cheap to clone; every clone shares registry and collaborators.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn builder(store: Arc<dyn Store>, audit: Arc<dyn AuditSink>) -> EngineBuilder {
        EngineBuilder::new(store, audit)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    /// Opens a session: one store transaction plus the override and history
    /// state shared by every operation run through it.
    pub async fn begin(&self, actor: Actor, options: OperationOptions) -> Result<Session> {
        let tx = self
            .inner
            .store
            .begin()
            .await
            .map_err(|err| DbError::persistence("begin", err))?;
        let overrides = OverrideSet::new(options.skip.clone(), options.force.clone());
        event!(Level::TRACE, txn = %tx, actor = %actor.actor_id, "session opened");
        Ok(Session::new(self.clone(), tx, actor, options, overrides))
    }

    pub(crate) fn inner(&self) -> &EngineInner {
        &self.inner
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.inner.registry)
            .field("config", &self.inner.config)
            .finish()
    }
}

pub struct EngineBuilder {
    registry: HandlerRegistry,
    store: Arc<dyn Store>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn Notifier>,
    trace: Arc<dyn TraceSink>,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new(store: Arc<dyn Store>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            registry: HandlerRegistry::new(),
            store,
            audit,
            notifier: Arc::new(NullNotifier),
            trace: Arc::new(TracingSink::new()),
            config: EngineConfig::default(),
        }
    }

    /// Uses `store` for both rows and audit records.
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self::new(store.clone(), store)
    }

    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn trace(mut self, trace: Arc<dyn TraceSink>) -> Self {
        self.trace = trace;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Engine> {
        if self.config.max_passes == 0 {
            return Err(DbError::Validation("max_passes must be at least 1".into()));
        }
        if self.config.retry.max_attempts == 0 {
            return Err(DbError::Validation("retry.max_attempts must be at least 1".into()));
        }
        event!(
            Level::DEBUG,
            handlers = self.registry.len(),
            max_passes = self.config.max_passes,
            "engine built"
        );
        Ok(Engine {
            inner: Arc::new(EngineInner {
                registry: self.registry,
                store: self.store,
                audit: self.audit,
                notifier: self.notifier,
                trace: self.trace,
                config: self.config,
            }),
        })
    }
}
