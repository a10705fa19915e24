use super::Engine;
use super::converge::Convergence;
use crate::callbacks::{Actor, DeferredQueue, HistoryLog, OperationOptions, OverrideSet};
use crate::core::{DbError, Entity, FieldMask, FieldRole, Result, Value};
use crate::observe::{AuditAction, AuditRecord, ChangeNotice, ChangeSet, TraceEvent, TraceScope};
use crate::transaction::TransactionId;
use chrono::Utc;
use tracing::{Instrument, Level, event, info_span};
use uuid::Uuid;

/// One logical call chain inside one store transaction.
///
/// Every create and save run through a session shares its skip/force
/// overrides and its handler history, including nested operations issued
/// by deferred work. Finish with [`commit`](Session::commit) or
/// [`rollback`](Session::rollback).
pub struct Session {
    engine: Engine,
    transaction_id: Option<TransactionId>,
    tx: TransactionId,
    actor: Actor,
    options: OperationOptions,
    overrides: OverrideSet,
    history: HistoryLog,
}

impl Session {
    pub(crate) fn new(
        engine: Engine,
        tx: TransactionId,
        actor: Actor,
        options: OperationOptions,
        overrides: OverrideSet,
    ) -> Self {
        Self {
            engine,
            transaction_id: Some(tx),
            tx,
            actor,
            options,
            overrides,
            history: HistoryLog::new(),
        }
    }

    pub fn tx(&self) -> TransactionId {
        self.tx
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn options(&self) -> &OperationOptions {
        &self.options
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Reads a record as this session's transaction sees it.
    pub async fn fetch<E: Entity>(&self, id: &str) -> Result<Option<E>> {
        let row = self
            .engine
            .inner()
            .store
            .fetch_row(self.tx, E::entity_type(), id)
            .await
            .map_err(|err| DbError::persistence("fetch", err))?;
        row.map(E::from_row).transpose()
    }

    async fn reload<E: Entity>(&self, id: &str) -> Result<E> {
        self.fetch::<E>(id).await?.ok_or_else(|| not_found::<E>(id))
    }

    /// Inserts a new record after running the handlers against an empty
    /// baseline. Always writes.
    pub async fn create<E: Entity>(&mut self, record: E) -> Result<E> {
        let span = info_span!(
            "persist.create",
            entity_type = E::entity_type(),
            entity_id = %record.record_id()
        );
        self.create_record(record).instrument(span).await
    }

    /// Updates an existing record. Writes only when the converged record
    /// differs from the stored one in a settable field; otherwise returns
    /// `record` as given.
    pub async fn save<E: Entity>(&mut self, record: E) -> Result<E> {
        let span = info_span!(
            "persist.save",
            entity_type = E::entity_type(),
            entity_id = %record.record_id()
        );
        self.save_record(record).instrument(span).await
    }

    /// Saves records one after another; stops at the first failure.
    pub async fn save_many<E: Entity>(&mut self, records: Vec<E>) -> Result<Vec<E>> {
        let mut saved = Vec::with_capacity(records.len());
        for record in records {
            saved.push(self.save(record).await?);
        }
        Ok(saved)
    }

    /// Loads `id`, applies `transform` and saves the result.
    pub async fn find_and_modify<E, F>(&mut self, id: &str, transform: F) -> Result<E>
    where
        E: Entity,
        F: FnOnce(&mut E) -> Result<()>,
    {
        let mut record = self.reload::<E>(id).await?;
        transform(&mut record)?;
        self.save(record).await
    }

    pub async fn commit(mut self) -> Result<()> {
        let tx = self.finish()?;
        self.engine
            .inner()
            .store
            .commit(tx)
            .await
            .map_err(|err| DbError::persistence("commit", err))?;
        event!(Level::DEBUG, txn = %tx, handlers_run = self.history.len(), "session committed");
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        let tx = self.finish()?;
        self.engine
            .inner()
            .store
            .rollback(tx)
            .await
            .map_err(|err| DbError::persistence("rollback", err))?;
        event!(Level::DEBUG, txn = %tx, "session rolled back");
        Ok(())
    }

    fn finish(&mut self) -> Result<TransactionId> {
        self.transaction_id
            .take()
            .ok_or_else(|| DbError::ExecutionError(format!("session {} already finished", self.tx)))
    }

    async fn create_record<E: Entity>(&mut self, mut record: E) -> Result<E> {
        let engine = self.engine.clone();
        let inner = engine.inner();
        let schema = E::schema();
        let entity_type = E::entity_type();

        if record.record_id().is_empty() {
            if !inner.config.assign_missing_ids {
                return Err(DbError::Validation(format!("{} requires an identifier", entity_type)));
            }
            record.set_field(schema.identifier_index()?, Value::Text(Uuid::new_v4().to_string()))?;
        }
        schema.check_row(&record.to_row())?;
        match record.version() {
            None | Some(0) | Some(1) => {}
            Some(version) => {
                return Err(DbError::Validation(format!(
                    "{} cannot be created with version {}",
                    entity_type, version
                )));
            }
        }

        let id = record.record_id();
        let _activity = TraceScope::enter(
            &inner.trace,
            TraceEvent::ModelActivity {
                entity_type: entity_type.to_string(),
                entity_id: id.clone(),
                action: AuditAction::Create,
            },
        );

        let mut deferred = DeferredQueue::new();
        let passes = Convergence {
            handlers: inner.registry.handlers::<E>(),
            trace: &inner.trace,
            store: &inner.store,
            tx: self.tx,
            actor: &self.actor,
            options: &self.options,
            overrides: &mut self.overrides,
            history: &mut self.history,
            deferred: &mut deferred,
            max_passes: inner.config.max_passes,
        }
        .run(E::default(), &mut record, false)
        .await?;
        schema.check_row(&record.to_row())?;

        let now = Value::Timestamp(Utc::now());
        let by = Value::Text(self.actor.effective_actor_id.clone());
        stamp(&mut record, FieldRole::Version, Value::Integer(1))?;
        stamp(&mut record, FieldRole::CreatedAt, now.clone())?;
        stamp(&mut record, FieldRole::UpdatedAt, now)?;
        stamp(&mut record, FieldRole::CreatedBy, by.clone())?;
        stamp(&mut record, FieldRole::UpdatedBy, by)?;

        inner
            .store
            .insert_row(self.tx, entity_type, &id, record.to_row())
            .await
            .map_err(|err| DbError::persistence("insert", err))?;
        inner
            .notifier
            .announce(ChangeNotice {
                entity_type: entity_type.to_string(),
                id: id.clone(),
                version: record.version(),
            })
            .await
            .map_err(|err| DbError::persistence("notify", err))?;

        let written = FieldMask::diff(&E::default(), &record);
        inner
            .audit
            .record(
                self.tx,
                AuditRecord::new(
                    self.actor.actor_id.clone(),
                    self.actor.effective_actor_id.clone(),
                    AuditAction::Create,
                    entity_type,
                    id.clone(),
                    ChangeSet::from_mask(&written, None, &record),
                ),
            )
            .await
            .map_err(|err| DbError::persistence("audit", err))?;
        event!(Level::DEBUG, passes, fields = ?written.fields_set(schema), "record created");

        self.drain(deferred).await?;
        self.reload(&id).await
    }

    async fn save_record<E: Entity>(&mut self, record: E) -> Result<E> {
        let engine = self.engine.clone();
        let inner = engine.inner();
        let schema = E::schema();
        let entity_type = E::entity_type();

        schema.check_row(&record.to_row())?;
        let id = record.record_id();
        if id.is_empty() {
            return Err(DbError::Validation(format!("{} requires an identifier", entity_type)));
        }

        let persisted = self.reload::<E>(&id).await?;
        if schema.is_versioned() {
            match (record.version(), persisted.version()) {
                (Some(expected), Some(actual)) if expected != actual => {
                    event!(Level::DEBUG, expected, actual, "stale version rejected");
                    return Err(DbError::VersionMismatch {
                        entity_type: entity_type.to_string(),
                        id,
                        expected,
                        actual,
                    });
                }
                (Some(_), Some(_)) => {}
                (None, _) => {
                    return Err(DbError::Validation(format!(
                        "{} '{}' must carry its version to be saved",
                        entity_type, id
                    )));
                }
                (Some(_), None) => {
                    return Err(DbError::Validation(format!(
                        "stored {} '{}' has no version",
                        entity_type, id
                    )));
                }
            }
        }

        let _activity = TraceScope::enter(
            &inner.trace,
            TraceEvent::ModelActivity {
                entity_type: entity_type.to_string(),
                entity_id: id.clone(),
                action: AuditAction::Update,
            },
        );

        let mut proposed = record.clone();
        let mut deferred = DeferredQueue::new();
        let mut convergence = Convergence {
            handlers: inner.registry.handlers::<E>(),
            trace: &inner.trace,
            store: &inner.store,
            tx: self.tx,
            actor: &self.actor,
            options: &self.options,
            overrides: &mut self.overrides,
            history: &mut self.history,
            deferred: &mut deferred,
            max_passes: inner.config.max_passes,
        };
        let force_pending = convergence.force_pending(&id);
        let passes = convergence
            .run(persisted.clone(), &mut proposed, force_pending)
            .await?;
        schema.check_row(&proposed.to_row())?;

        let mut changed = FieldMask::diff(&persisted, &proposed);
        changed.retain(|index| schema.is_settable(index));
        if changed.is_empty() {
            event!(Level::DEBUG, passes, "nothing to write");
            if self.drain(deferred).await? == 0 {
                return Ok(record);
            }
            return self.reload(&id).await;
        }

        let version = persisted.version().map(|version| version + 1);
        if let Some(version) = version {
            stamp(&mut proposed, FieldRole::Version, Value::Integer(version))?;
        }
        stamp(&mut proposed, FieldRole::UpdatedAt, Value::Timestamp(Utc::now()))?;
        stamp(
            &mut proposed,
            FieldRole::UpdatedBy,
            Value::Text(self.actor.effective_actor_id.clone()),
        )?;

        let mut written = FieldMask::diff(&persisted, &proposed);
        written.retain(|index| schema.is_writable(index));
        let changes = written
            .iter()
            .map(|index| (index, proposed.field(index)))
            .collect();

        inner
            .store
            .update_row(self.tx, entity_type, &id, changes)
            .await
            .map_err(|err| DbError::persistence("update", err))?;
        inner
            .notifier
            .announce(ChangeNotice {
                entity_type: entity_type.to_string(),
                id: id.clone(),
                version,
            })
            .await
            .map_err(|err| DbError::persistence("notify", err))?;
        inner
            .audit
            .record(
                self.tx,
                AuditRecord::new(
                    self.actor.actor_id.clone(),
                    self.actor.effective_actor_id.clone(),
                    AuditAction::Update,
                    entity_type,
                    id.clone(),
                    ChangeSet::from_mask(&written, Some(&persisted), &proposed),
                ),
            )
            .await
            .map_err(|err| DbError::persistence("audit", err))?;
        event!(Level::DEBUG, passes, fields = ?written.fields_set(schema), "record updated");

        self.drain(deferred).await?;
        self.reload(&id).await
    }

    async fn drain(&mut self, deferred: DeferredQueue) -> Result<usize> {
        if deferred.is_empty() {
            return Ok(0);
        }
        event!(Level::DEBUG, actions = ?deferred.labels(), "draining deferred work");
        deferred.drain(self).await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(tx) = self.transaction_id.take() else {
            return;
        };
        event!(Level::WARN, txn = %tx, "session dropped without commit or rollback, rolling back");

        let store = self.engine.inner().store.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = store.rollback(tx).await {
                        event!(Level::WARN, txn = %tx, error = %err, "rollback of dropped session failed");
                    }
                });
            }
            Err(_) => {
                event!(Level::ERROR, txn = %tx, "no runtime to roll back dropped session");
            }
        }
    }
}

fn stamp<E: Entity>(record: &mut E, role: FieldRole, value: Value) -> Result<()> {
    match E::schema().role_index(role) {
        Some(index) => record.set_field(index, value),
        None => Ok(()),
    }
}

fn not_found<E: Entity>(id: &str) -> DbError {
    DbError::NotFound {
        entity_type: E::entity_type().to_string(),
        id: id.to_string(),
    }
}
