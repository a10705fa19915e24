use crate::core::Result;
use crate::persist::Session;
use futures::future::BoxFuture;
use tracing::{Level, event};

pub type DeferredFuture<'a> = BoxFuture<'a, Result<()>>;

type DeferredAction = Box<dyn for<'a> FnOnce(&'a mut Session) -> DeferredFuture<'a> + Send + Sync>;

/// Follow-up work queued by handlers, drained once after the primary write.
///
/// Actions run in enqueue order against the session that queued them, so they
/// share its transaction, history and overrides.
#[derive(Default)]
pub struct DeferredQueue {
    actions: Vec<(String, DeferredAction)>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F>(&mut self, label: impl Into<String>, action: F)
    where
        F: for<'a> FnOnce(&'a mut Session) -> DeferredFuture<'a> + Send + Sync + 'static,
    {
        self.actions.push((label.into(), Box::new(action)));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.actions.iter().map(|(label, _)| label.as_str()).collect()
    }

    /// Runs every queued action; the first failure stops the drain.
    /// Returns the number of actions that ran.
    pub async fn drain(self, session: &mut Session) -> Result<usize> {
        let total = self.actions.len();
        for (label, action) in self.actions {
            if let Err(err) = action(session).await {
                event!(Level::ERROR, action = %label, error = %err, "deferred action failed");
                return Err(err);
            }
            event!(Level::DEBUG, action = %label, "deferred action complete");
        }
        Ok(total)
    }
}

impl std::fmt::Debug for DeferredQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredQueue")
            .field("actions", &self.labels())
            .finish()
    }
}
