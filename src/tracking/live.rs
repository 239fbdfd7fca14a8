use std::sync::Arc;

use tokio::sync::watch;

use crate::models::StepSnapshot;

/// Live-state channel. Owned by the supervisor so subscriptions outlive
/// individual service instances.
#[derive(Clone)]
pub struct StepBroadcaster {
    tx: Arc<watch::Sender<StepSnapshot>>,
}

impl StepBroadcaster {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StepSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<StepSnapshot> {
        self.tx.subscribe()
    }

    /// Never fails, with or without subscribers.
    pub fn publish(&self, snapshot: StepSnapshot) {
        self.tx.send_replace(snapshot);
    }

    pub fn current(&self) -> StepSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for StepBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
