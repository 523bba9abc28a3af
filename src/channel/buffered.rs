//! Local buffer in front of a slow producer
//!
//! Events are queued without waiting, a spawned forwarder hands them to the wrapped producer
//! one at a time. A full buffer drops the event.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::LifecycleEvent;

use super::Error;
use super::EventProducer;
use super::Result;

/// Write side of the buffer
#[derive(Clone, Debug)]
pub struct BufferedProducer {
    sender: mpsc::Sender<LifecycleEvent>,
}

impl BufferedProducer {
    /// Buffer at most `capacity` events in front of `inner`
    ///
    /// The forwarder stops on `shutdown` or once every producer handle is dropped, events
    /// still buffered by then are lost
    pub fn spawn(
        name: &'static str,
        inner: Arc<dyn EventProducer>,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<LifecycleEvent>(capacity.max(1));

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;

                    () = shutdown.cancelled() => break,
                    event = receiver.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };

                tokio::select! {
                    () = shutdown.cancelled() => break,
                    result = inner.produce(&event) => {
                        if let Err(err) = result {
                            tracing::warn!(
                                forwarder = name,
                                event_id = %event.record().event_id,
                                "Dropped event: {err}"
                            );
                        }
                    }
                }
            }

            tracing::info!(forwarder = name, "Forwarder stopped");
        });

        (Self { sender }, handle)
    }
}

#[async_trait]
impl EventProducer for BufferedProducer {
    /// Never waits on the wrapped producer
    async fn produce(&self, event: &LifecycleEvent) -> Result<()> {
        self.sender
            .try_send(event.clone())
            .map_err(|err| match err {
                TrySendError::Full(_) => Error::Full,
                TrySendError::Closed(_) => Error::Closed,
            })
    }
}
