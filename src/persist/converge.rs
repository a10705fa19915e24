use crate::callbacks::{Actor, DeferredQueue, Handler, HandlerContext, HistoryLog, OperationOptions, OverrideSet};
use crate::core::{DbError, Entity, FieldMask, Result};
use crate::observe::{ChangeSet, TraceEvent, TraceScope, TraceSink};
use crate::storage::Store;
use crate::transaction::TransactionId;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Level, event};

/// One run of the before-save handlers over a proposed record.
///
/// Each pass diffs the proposed record against the state the previous pass
/// started from, dispatches every handler whose trigger intersects that
/// diff, and repeats until a pass starts with nothing changed.
pub(crate) struct Convergence<'a, E: Entity> {
    pub handlers: &'a [Handler<E>],
    pub trace: &'a Arc<dyn TraceSink>,
    pub store: &'a Arc<dyn Store>,
    pub tx: TransactionId,
    pub actor: &'a Actor,
    pub options: &'a OperationOptions,
    pub overrides: &'a mut OverrideSet,
    pub history: &'a mut HistoryLog,
    pub deferred: &'a mut DeferredQueue,
    pub max_passes: u32,
}

impl<E: Entity> Convergence<'_, E> {
    /// Whether a live force selector would run some handler on `id` that
    /// has not already run in this session.
    pub fn force_pending(&self, id: &str) -> bool {
        let entity_type = E::entity_type();
        self.handlers.iter().any(|handler| {
            !self.history.contains(entity_type, handler.name(), id)
                && self.overrides.force.matches(entity_type, handler.name(), id)
        })
    }

    /// Drives `proposed` to a fixed point starting from `baseline` and
    /// returns the number of passes that dispatched handlers.
    ///
    /// With `run_first_pass` set the first pass runs even if `proposed`
    /// equals `baseline`, so forced handlers get their chance.
    pub async fn run(&mut self, mut baseline: E, proposed: &mut E, run_first_pass: bool) -> Result<u32> {
        let entity_type = E::entity_type();
        let schema = E::schema();
        let id = proposed.record_id();
        let mut pass = 0u32;

        loop {
            let mask = FieldMask::diff(&baseline, proposed);
            if mask.is_empty() && !(pass == 0 && run_first_pass) {
                return Ok(pass);
            }

            let snapshot_before = std::mem::replace(&mut baseline, proposed.clone());
            pass += 1;
            if pass > self.max_passes {
                event!(
                    Level::ERROR,
                    limit = self.max_passes,
                    changed = ?mask.fields_set(schema),
                    "before-save handlers did not converge"
                );
                return Err(DbError::IterationLimitExceeded {
                    entity_type: entity_type.to_string(),
                    id,
                    limit: self.max_passes,
                });
            }

            let _iteration = TraceScope::enter(
                self.trace,
                TraceEvent::Iteration {
                    entity_type: entity_type.to_string(),
                    entity_id: id.clone(),
                    pass,
                },
            );
            event!(Level::DEBUG, pass, changed = ?mask.fields_set(schema), "convergence pass");

            for handler in self.handlers {
                let triggered = handler.triggered_by(&mask);
                let skipped = self.overrides.skip.match_consume(entity_type, handler.name(), &id);
                let forced = !self.history.contains(entity_type, handler.name(), &id)
                    && self.overrides.force.match_consume(entity_type, handler.name(), &id);
                if triggered.is_empty() && !forced {
                    continue;
                }

                let _callback = TraceScope::enter(
                    self.trace,
                    TraceEvent::Callback {
                        entity_type: entity_type.to_string(),
                        handler: handler.name().to_string(),
                        entity_id: id.clone(),
                        skipped,
                        forced,
                        triggered: ChangeSet::from_mask(&triggered, Some(&snapshot_before), proposed),
                    },
                );
                if skipped && !forced {
                    event!(Level::DEBUG, handler = handler.qualified_name(), "handler skipped");
                    continue;
                }

                self.history.record(entity_type, handler.name(), &id);
                let entry = proposed.clone();
                let started = Instant::now();
                let mut cx = HandlerContext::new(
                    self.tx,
                    self.actor,
                    self.options,
                    self.store,
                    &mut *self.deferred,
                    pass,
                );
                if let Err(err) = handler
                    .function()
                    .before_save(&mut cx, &snapshot_before, proposed)
                    .await
                {
                    event!(Level::ERROR, handler = handler.qualified_name(), error = %err, "handler failed");
                    return Err(DbError::handler(handler.qualified_name(), id, err));
                }

                self.trace.add(TraceEvent::CallbackComplete {
                    entity_type: entity_type.to_string(),
                    handler: handler.name().to_string(),
                    entity_id: id.clone(),
                    duration: started.elapsed(),
                    changes: ChangeSet::between(&entry, proposed),
                });

                if proposed.record_id() != id {
                    return Err(DbError::Validation(format!(
                        "handler {} changed the identifier of {} '{}'",
                        handler.qualified_name(),
                        entity_type,
                        id
                    )));
                }
            }
        }
    }
}
