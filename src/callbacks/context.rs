use super::{CallbackSpecifier, DeferredFuture, DeferredQueue};
use crate::core::{Entity, Result, serde_to_db_error};
use crate::persist::Session;
use crate::storage::Store;
use crate::transaction::TransactionId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Who is performing an operation. `effective_actor_id` differs from
/// `actor_id` when one user acts on behalf of another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub actor_id: String,
    pub effective_actor_id: String,
}

impl Actor {
    pub fn new(actor_id: impl Into<String>) -> Self {
        let actor_id = actor_id.into();
        Self {
            effective_actor_id: actor_id.clone(),
            actor_id,
        }
    }

    pub fn impersonating(actor_id: impl Into<String>, effective_actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            effective_actor_id: effective_actor_id.into(),
        }
    }

    pub fn system() -> Self {
        Self::new("system")
    }
}

/// Per-request options: skip/force selectors plus free-form flags that are
/// handed to every handler untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationOptions {
    pub skip: Vec<CallbackSpecifier>,
    pub force: Vec<CallbackSpecifier>,
    pub flags: serde_json::Map<String, serde_json::Value>,
}

impl OperationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(document: serde_json::Value) -> Result<Self> {
        serde_json::from_value(document).map_err(|err| serde_to_db_error("operation options", err))
    }

    pub fn skip(mut self, specifier: CallbackSpecifier) -> Self {
        self.skip.push(specifier);
        self
    }

    pub fn force(mut self, specifier: CallbackSpecifier) -> Self {
        self.force.push(specifier);
        self
    }

    pub fn flag(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.flags.insert(name.into(), value.into());
        self
    }
}

/// What a handler sees besides the records themselves.
pub struct HandlerContext<'a> {
    tx: TransactionId,
    actor: &'a Actor,
    options: &'a OperationOptions,
    store: &'a Arc<dyn Store>,
    deferred: &'a mut DeferredQueue,
    pass: u32,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(
        tx: TransactionId,
        actor: &'a Actor,
        options: &'a OperationOptions,
        store: &'a Arc<dyn Store>,
        deferred: &'a mut DeferredQueue,
        pass: u32,
    ) -> Self {
        Self {
            tx,
            actor,
            options,
            store,
            deferred,
            pass,
        }
    }

    pub fn tx(&self) -> TransactionId {
        self.tx
    }

    pub fn actor(&self) -> &Actor {
        self.actor
    }

    pub fn options(&self) -> &OperationOptions {
        self.options
    }

    pub fn flag(&self, name: &str) -> Option<&serde_json::Value> {
        self.options.flags.get(name)
    }

    /// Convergence pass the handler runs in, starting at 1.
    pub fn pass(&self) -> u32 {
        self.pass
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        self.store
    }

    /// Reads another record through the operation's transaction.
    pub async fn fetch<T: Entity>(&self, id: &str) -> Result<Option<T>> {
        match self.store.fetch_row(self.tx, T::entity_type(), id).await? {
            Some(row) => T::from_row(row).map(Some),
            None => Ok(None),
        }
    }

    /// Queues work to run after the current operation's write.
    pub fn defer<F>(&mut self, label: impl Into<String>, action: F)
    where
        F: for<'s> FnOnce(&'s mut Session) -> DeferredFuture<'s> + Send + Sync + 'static,
    {
        self.deferred.push(label, action);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn options_parse_from_request_document() {
        let options = OperationOptions::from_json(json!({
            "force": [{"handler": "recalc", "once": true}],
            "flags": {"source": "import"}
        }))
        .unwrap();

        assert!(options.skip.is_empty());
        assert_eq!(options.force.len(), 1);
        assert!(options.force[0].once);
        assert_eq!(options.flags.get("source"), Some(&json!("import")));
    }

    #[test]
    fn malformed_options_are_rejected() {
        assert!(OperationOptions::from_json(json!({"skip": "everything"})).is_err());
    }

    #[test]
    fn impersonation_keeps_both_identities() {
        let actor = Actor::impersonating("support-7", "alice");
        assert_eq!(actor.actor_id, "support-7");
        assert_eq!(actor.effective_actor_id, "alice");
        assert_eq!(Actor::new("bob").effective_actor_id, "bob");
    }
}
