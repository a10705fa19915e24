#![allow(dead_code)]

use convergedb::{
    Actor, BroadcastNotifier, Engine, EngineBuilder, EngineConfig, Entity, HandlerRegistry,
    MemoryStore, OperationOptions, Session, Store, TraceEvent, TraceRegistry,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct Invoice {
    #[entity(id)]
    pub id: String,
    #[entity(one_of("open", "voided", "paid"))]
    pub status: String,
    pub total: i64,
    pub customer_id: String,
    pub note: String,
    #[entity(version)]
    pub version: i64,
}

impl Invoice {
    pub fn new(id: &str, status: &str, total: i64, version: i64) -> Self {
        Self {
            id: id.to_string(),
            status: status.to_string(),
            total,
            customer_id: "cust-1".to_string(),
            note: String::new(),
            version,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct Customer {
    #[entity(id)]
    pub id: String,
    pub name: String,
    pub balance: i64,
    #[entity(version)]
    pub version: i64,
}

pub struct Harness {
    pub engine: Engine,
    pub store: Arc<MemoryStore>,
    pub trace: Arc<TraceRegistry>,
    pub notifier: Arc<BroadcastNotifier>,
}

impl Harness {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    pub fn with_config(registry: HandlerRegistry, config: EngineConfig) -> Self {
        init_tracing();
        let store = Arc::new(MemoryStore::new());
        let trace = Arc::new(TraceRegistry::new());
        let notifier = Arc::new(BroadcastNotifier::new(64));
        let engine = EngineBuilder::memory(store.clone())
            .registry(registry)
            .trace(trace.clone())
            .notifier(notifier.clone())
            .config(config)
            .build()
            .unwrap();
        Self {
            engine,
            store,
            trace,
            notifier,
        }
    }

    pub async fn session(&self, options: OperationOptions) -> Session {
        self.engine
            .begin(Actor::new("alice"), options)
            .await
            .unwrap()
    }

    /// Writes a row directly, bypassing handlers and stamping.
    pub async fn seed<E: Entity>(&self, record: E) {
        let tx = self.store.begin().await.unwrap();
        self.store
            .insert_row(tx, E::entity_type(), &record.record_id(), record.to_row())
            .await
            .unwrap();
        self.store.commit(tx).await.unwrap();
    }

    pub async fn committed<E: Entity>(&self, id: &str) -> Option<E> {
        self.store
            .committed_row(E::entity_type(), id)
            .await
            .map(|row| E::from_row(row).unwrap())
    }

    pub fn passes(&self) -> usize {
        self.trace
            .events()
            .iter()
            .filter(|event| matches!(event, TraceEvent::Iteration { .. }))
            .count()
    }

    /// `(handler, skipped, forced)` for every dispatched callback.
    pub fn callbacks(&self) -> Vec<(String, bool, bool)> {
        self.trace
            .callbacks()
            .into_iter()
            .filter_map(|event| match event {
                TraceEvent::Callback {
                    handler,
                    skipped,
                    forced,
                    ..
                } => Some((handler, skipped, forced)),
                _ => None,
            })
            .collect()
    }
}

/// Routes engine events to the captured test output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}
