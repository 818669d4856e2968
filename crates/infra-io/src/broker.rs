// In-process broker: one bounded tokio channel per destination

use async_trait::async_trait;
use jobstore_core::domain::OutboundMessage;
use jobstore_core::error::{AppError, Result};
use jobstore_core::port::{MessageSender, MessageSource, SendError};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

/// Routes each message to the channel registered for its destination.
/// Sends never wait: a full channel is reported as [`SendError::Full`].
pub struct ChannelBroker {
    capacity: usize,
    destinations: RwLock<HashMap<String, mpsc::Sender<OutboundMessage>>>,
}

impl ChannelBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            destinations: RwLock::new(HashMap::new()),
        }
    }

    /// Open a destination, replacing any earlier consumer of it
    pub fn register(&self, destination: impl Into<String>) -> mpsc::Receiver<OutboundMessage> {
        let destination = destination.into();
        let (tx, rx) = mpsc::channel(self.capacity);
        info!(destination = %destination, capacity = self.capacity, "Destination registered");
        self.destinations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(destination, tx);
        rx
    }

    pub fn destinations(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .destinations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[async_trait]
impl MessageSender for ChannelBroker {
    async fn send(&self, message: OutboundMessage) -> std::result::Result<(), SendError> {
        let sender = self
            .destinations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&message.destination)
            .cloned()
            .ok_or_else(|| SendError::UnknownDestination(message.destination.clone()))?;

        let destination = message.destination.clone();
        sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full(destination.clone()),
            mpsc::error::TrySendError::Closed(_) => SendError::Closed(destination.clone()),
        })?;
        debug!(destination = %destination, "Message enqueued");
        Ok(())
    }
}

/// Receiving ends of registered destinations, drained by polling workers
#[derive(Default)]
pub struct Mailboxes {
    receivers: HashMap<String, Mutex<mpsc::Receiver<OutboundMessage>>>,
}

impl Mailboxes {
    /// Register every destination with the broker and keep its receiver
    pub fn open<I, S>(broker: &ChannelBroker, destinations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let receivers = destinations
            .into_iter()
            .map(|d| {
                let name = d.into();
                let rx = broker.register(name.clone());
                (name, Mutex::new(rx))
            })
            .collect();
        Self { receivers }
    }
}

#[async_trait]
impl MessageSource for Mailboxes {
    /// Highest priority first among the messages taken
    async fn poll(&self, destination: &str, max: usize) -> Result<Vec<OutboundMessage>> {
        let receiver = self
            .receivers
            .get(destination)
            .ok_or_else(|| AppError::NotFound(format!("Destination {}", destination)))?;

        let mut rx = receiver.lock().await;
        let mut messages = Vec::new();
        while messages.len() < max {
            match rx.try_recv() {
                Ok(message) => messages.push(message),
                Err(_) => break,
            }
        }
        // stable: equal priorities keep their send order
        messages.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobstore_core::domain::{MessagePayload, Priority};

    fn abort(destination: &str, job_id: i64, priority: Priority) -> OutboundMessage {
        OutboundMessage {
            destination: destination.to_string(),
            priority: priority.value(),
            payload: MessagePayload::JobAbort { job_id },
        }
    }

    #[tokio::test]
    async fn test_full_destination_is_reported_not_awaited() {
        let broker = ChannelBroker::new(1);
        let mut rx = broker.register("sink::a");

        broker.send(abort("sink::a", 1, Priority::Normal)).await.unwrap();
        let err = broker
            .send(abort("sink::a", 2, Priority::Normal))
            .await
            .unwrap_err();
        assert_eq!(err, SendError::Full("sink::a".to_string()));

        assert_eq!(rx.recv().await.unwrap(), abort("sink::a", 1, Priority::Normal));
    }

    #[tokio::test]
    async fn test_unknown_and_closed_destinations() {
        let broker = ChannelBroker::new(4);
        let err = broker
            .send(abort("nowhere", 1, Priority::Normal))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::UnknownDestination(_)));

        drop(broker.register("sink::gone"));
        let err = broker
            .send(abort("sink::gone", 1, Priority::Normal))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Closed(_)));
        assert_eq!(broker.destinations(), vec!["sink::gone".to_string()]);
    }

    #[tokio::test]
    async fn test_mailbox_poll_orders_by_priority() {
        let broker = ChannelBroker::new(8);
        let mailboxes = Mailboxes::open(&broker, ["processor::business"]);
        for (job_id, priority) in [(1, Priority::Low), (2, Priority::Highest), (3, Priority::Low)] {
            broker
                .send(abort("processor::business", job_id, priority))
                .await
                .unwrap();
        }

        let polled = mailboxes.poll("processor::business", 10).await.unwrap();
        let jobs: Vec<i64> = polled
            .iter()
            .map(|m| match m.payload {
                MessagePayload::JobAbort { job_id } => job_id,
                MessagePayload::Chunk(_) => unreachable!(),
            })
            .collect();
        assert_eq!(jobs, vec![2, 1, 3]);
        assert!(mailboxes.poll("processor::business", 10).await.unwrap().is_empty());
        tokio_test::assert_err!(mailboxes.poll("sink::none", 1).await);
    }
}
