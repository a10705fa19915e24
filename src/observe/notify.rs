use crate::core::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;

/// Announcement that a record was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeNotice {
    pub entity_type: String,
    pub id: String,
    pub version: Option<i64>,
}

/// Fire-and-forget change channel, invoked only after a successful write.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn announce(&self, notice: ChangeNotice) -> Result<()>;
}

/// Publishes notices to any number of in-process subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<ChangeNotice>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotice> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn announce(&self, notice: ChangeNotice) -> Result<()> {
        // No subscribers is not a failure.
        let _ = self.sender.send(notice);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn announce(&self, _notice: ChangeNotice) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(version: i64) -> ChangeNotice {
        ChangeNotice {
            entity_type: "invoice".into(),
            id: "inv-1".into(),
            version: Some(version),
        }
    }

    #[tokio::test]
    async fn broadcast_delivers_to_subscribers() {
        let notifier = BroadcastNotifier::new(8);
        let mut receiver = notifier.subscribe();

        notifier.announce(notice(4)).await.unwrap();
        assert_eq!(receiver.recv().await.unwrap(), notice(4));
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_ok() {
        let notifier = BroadcastNotifier::default();
        assert!(notifier.announce(notice(1)).await.is_ok());
    }
}
