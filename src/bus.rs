use std::sync::Arc;
use tokio::sync::broadcast;

use crate::registry::{MapId, MapStatus};

/// Broadcast topic with bounded capacity.
/// `T` must be `Send + Sync` because we hop across threads.
#[derive(Debug, Clone)]
pub struct Topic<T> {
    tx: broadcast::Sender<Arc<T>>,
}

impl<T: Send + Sync + 'static> Topic<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, msg: T) {
        let _ = self.tx.send(Arc::new(msg));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<T>> {
        self.tx.subscribe()
    }
}

/// A map changed state.
#[derive(Debug, Clone, PartialEq)]
pub struct MapEvent {
    pub map_id: MapId,
    pub status: MapStatus,
    /// Captured failure message when `status` is `Failed`.
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_published_messages() {
        let topic: Topic<u32> = Topic::new(4);
        let mut a = topic.subscribe();
        let mut b = topic.subscribe();
        topic.publish(7);
        assert_eq!(*a.recv().await.unwrap(), 7);
        assert_eq!(*b.recv().await.unwrap(), 7);
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let topic: Topic<u32> = Topic::new(1);
        topic.publish(1);
        topic.publish(2);
    }
}
