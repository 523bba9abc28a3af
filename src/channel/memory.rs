//! In-process event queue
//!
//! Bounded, at-most-once, events are lost on a crash

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::events::LifecycleEvent;

use super::Error;
use super::EventConsumer;
use super::EventHandler;
use super::EventProducer;
use super::Result;

/// Create a queue holding at most `capacity` events
pub fn channel(capacity: usize) -> (MemoryProducer, MemoryConsumer) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));

    (MemoryProducer { sender }, MemoryConsumer { receiver })
}

/// Write side of the in-process queue
#[derive(Clone, Debug)]
pub struct MemoryProducer {
    sender: mpsc::Sender<LifecycleEvent>,
}

#[async_trait]
impl EventProducer for MemoryProducer {
    /// Never waits: a full queue drops the event and reports [`Error::Full`]
    async fn produce(&self, event: &LifecycleEvent) -> Result<()> {
        self.sender
            .try_send(event.clone())
            .map_err(|err| match err {
                TrySendError::Full(_) => Error::Full,
                TrySendError::Closed(_) => Error::Closed,
            })
    }
}

/// Read side of the in-process queue
#[derive(Debug)]
pub struct MemoryConsumer {
    receiver: mpsc::Receiver<LifecycleEvent>,
}

#[async_trait]
impl EventConsumer for MemoryConsumer {
    async fn consume(&mut self, handler: &dyn EventHandler) -> Result<()> {
        let event = self.receiver.recv().await.ok_or(Error::Closed)?;

        handler.handle(event).await;

        Ok(())
    }
}
