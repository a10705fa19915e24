use super::Engine;
use crate::callbacks::{Actor, OperationOptions};
use crate::core::{Entity, Result};
use tracing::{Level, event};

impl Engine {
    /// Reads `id`, applies `transform`, saves and commits, each attempt in
    /// its own session.
    ///
    /// Version mismatches and commit conflicts roll the attempt back and
    /// retry after a linear backoff, up to `retry.max_attempts` attempts in
    /// total. Any other failure rolls back and is returned at once.
    pub async fn save_with_retry<E, F>(
        &self,
        actor: &Actor,
        options: &OperationOptions,
        id: &str,
        mut transform: F,
    ) -> Result<E>
    where
        E: Entity,
        F: FnMut(&mut E) -> Result<()>,
    {
        let policy = &self.config().retry;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let mut session = self.begin(actor.clone(), options.clone()).await?;
            let outcome = match session.find_and_modify::<E, _>(id, &mut transform).await {
                Ok(record) => session.commit().await.map(|()| record),
                Err(err) => {
                    if let Err(rollback_err) = session.rollback().await {
                        event!(Level::WARN, error = %rollback_err, "rollback after failed attempt failed");
                    }
                    Err(err)
                }
            };

            match outcome {
                Ok(record) => return Ok(record),
                Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                    let delay = policy.backoff(attempt);
                    event!(
                        Level::WARN,
                        entity_type = E::entity_type(),
                        entity_id = %id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying save after conflict"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
