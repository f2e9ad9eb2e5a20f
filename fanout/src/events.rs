use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::correlation::BatchId;
use crate::item::{GroupId, WorkItemId, WorkItemRef};

/// Event name consumed by the per-item processor.
pub const PROCESS_WORK_ITEM_EVENT: &str = "work-item/process";

/// Payload of one dispatched event.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchPayload {
    pub work_item_id: WorkItemId,
    pub group_id: GroupId,
    pub batch_id: BatchId,
}

/// A message asking downstream to process one work item.
///
/// Created only to be published and never mutated afterwards.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DispatchEvent {
    pub name: String,
    pub data: DispatchPayload,
}

impl DispatchEvent {
    pub fn for_item(name: &str, item: &WorkItemRef, batch_id: BatchId) -> Self {
        Self {
            name: name.to_string(),
            data: DispatchPayload {
                work_item_id: item.id.clone(),
                group_id: item.group_id.clone(),
                batch_id,
            },
        }
    }
}

/// Transport that dispatched events are published to.
///
/// Publication is at-least-once: the step runtime may call `publish` again
/// with the same events after a failed or interrupted attempt.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a batch of events as one call.
    async fn publish(&self, events: &[DispatchEvent]) -> anyhow::Result<()>;
}

/// Trait for receiving dispatched events in-process.
pub trait EventSubscriber: Send + Sync {
    /// Subscribe to events, returning a broadcast receiver.
    ///
    /// Multiple subscribers can receive the same events (fan-out).
    fn subscribe(&self) -> broadcast::Receiver<DispatchEvent>;
}

/// In-process event bus using a tokio broadcast channel.
///
/// Every published event is delivered to all active subscribers; a
/// subscriber that falls behind receives `RecvError::Lagged` but never
/// blocks the publisher. Events published with no subscribers are dropped.
/// For an external bus, implement [`EventBus`] over its client instead.
pub struct InProcEventBus {
    sender: broadcast::Sender<DispatchEvent>,
    capacity: usize,
}

impl std::fmt::Debug for InProcEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl InProcEventBus {
    /// Create a bus buffering at most `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl EventBus for InProcEventBus {
    async fn publish(&self, events: &[DispatchEvent]) -> anyhow::Result<()> {
        for event in events {
            let _ = self.sender.send(event.clone());
        }
        Ok(())
    }
}

impl EventSubscriber for InProcEventBus {
    fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::RawWorkItem;
    use std::time::Duration;
    use tokio::time::timeout;

    fn event(i: usize, batch_id: BatchId) -> DispatchEvent {
        let item =
            WorkItemRef::try_from(RawWorkItem::new(format!("item-{i}"), "group")).unwrap();
        DispatchEvent::for_item(PROCESS_WORK_ITEM_EVENT, &item, batch_id)
    }

    #[test]
    fn test_event_wire_shape() {
        let batch_id = BatchId::new();
        let json = serde_json::to_value(event(7, batch_id)).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "name": "work-item/process",
                "data": {
                    "workItemId": "item-7",
                    "groupId": "group",
                    "batchId": batch_id.to_string(),
                }
            })
        );
    }

    #[tokio::test]
    async fn test_bus_broadcasts_to_multiple_subscribers() {
        let bus = InProcEventBus::new(100);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let batch_id = BatchId::new();
        let events: Vec<_> = (0..5).map(|i| event(i, batch_id)).collect();
        bus.publish(&events).await.unwrap();

        for expected in &events {
            let got1 = timeout(Duration::from_millis(100), rx1.recv())
                .await
                .unwrap()
                .unwrap();
            let got2 = timeout(Duration::from_millis(100), rx2.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(&got1, expected);
            assert_eq!(&got2, expected);
        }
    }

    #[tokio::test]
    async fn test_lagged_subscriber_doesnt_block_publisher() {
        let bus = InProcEventBus::new(2);
        let mut rx = bus.subscribe();

        let batch_id = BatchId::new();
        let events: Vec<_> = (0..5).map(|i| event(i, batch_id)).collect();
        bus.publish(&events).await.unwrap();

        match timeout(Duration::from_millis(100), rx.recv()).await.unwrap() {
            Err(broadcast::error::RecvError::Lagged(_)) | Ok(_) => {}
            Err(broadcast::error::RecvError::Closed) => {
                panic!("Channel should not be closed");
            }
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let bus = InProcEventBus::new(8);
        bus.publish(&[event(0, BatchId::new())]).await.unwrap();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_bus_debug_format() {
        let bus = InProcEventBus::new(100);
        let _rx = bus.subscribe();

        let debug_str = format!("{:?}", bus);
        assert!(debug_str.contains("InProcEventBus"));
        assert!(debug_str.contains("subscribers: 1"));
        assert!(debug_str.contains("capacity: 100"));
    }
}
