//! Event channels
//!
//! Carry lifecycle events from the lifecycle service to the consumers. Two realizations exist:
//! - [`memory`]: in-process queue, at-most-once, lost on crash
//! - `durable`: append-only log in Postgres, at-least-once, replayable
//!
//! A [`buffered`] producer keeps a slow producer off the caller's path

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::events::LifecycleEvent;

pub mod buffered;
pub mod memory;

pub use buffered::BufferedProducer;

#[cfg(feature = "postgres")]
pub mod durable;

/// Topic carrying `used` events
#[cfg_attr(not(feature = "postgres"), allow(dead_code))]
pub const USED_TOPIC: &str = "alias.used";

/// Topic carrying `expired` events
#[cfg_attr(not(feature = "postgres"), allow(dead_code))]
pub const EXPIRED_TOPIC: &str = "alias.expired";

/// Pause after a failing consume before trying again
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Event channel errors
#[derive(Debug, Error)]
pub enum Error {
    /// A bounded queue has no room left
    #[error("Channel is full")]
    Full,

    /// The other side of the channel is gone
    #[error("Channel is closed")]
    Closed,

    /// A delivered payload is not a known event
    #[error("Unknown event kind: {0}")]
    UnknownEventKind(String),

    /// A connection error with the broker
    #[error("Connection error: {0}")]
    Connection(String),
}

/// Result type for all channel interactions
pub type Result<T> = core::result::Result<T, Error>;

/// Write side of a channel, used by the lifecycle service
#[async_trait]
pub trait EventProducer: Send + Sync + 'static {
    /// Hand an event over without waiting on any consumer
    async fn produce(&self, event: &LifecycleEvent) -> Result<()>;
}

/// Side effects applied for every delivered event
///
/// Handlers log and swallow their own failures, a delivered event is never retried
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Apply the side effects of a single event
    async fn handle(&self, event: LifecycleEvent);
}

/// Read side of a channel, used by the consumer loops
#[async_trait]
pub trait EventConsumer: Send + 'static {
    /// Wait for the next event, hand it to `handler` and acknowledge it
    ///
    /// # Errors
    ///
    /// [`Error::Closed`] once no more events will arrive. A payload that can not be decoded
    /// is acknowledged and reported as [`Error::UnknownEventKind`]
    async fn consume(&mut self, handler: &dyn EventHandler) -> Result<()>;
}

/// Both ends of the `used` and `expired` channels
pub struct Channels {
    /// Producer for `used` events
    pub used_producer: Arc<dyn EventProducer>,

    /// Consumer of `used` events
    pub used_consumer: Box<dyn EventConsumer>,

    /// Producer for `expired` events
    pub expired_producer: Arc<dyn EventProducer>,

    /// Consumer of `expired` events
    pub expired_consumer: Box<dyn EventConsumer>,
}

impl Channels {
    /// In-process queues, each bounded to `capacity` events
    pub fn memory(capacity: usize) -> Self {
        let (used_producer, used_consumer) = memory::channel(capacity);
        let (expired_producer, expired_consumer) = memory::channel(capacity);

        Self {
            used_producer: Arc::new(used_producer),
            used_consumer: Box::new(used_consumer),
            expired_producer: Arc::new(expired_producer),
            expired_consumer: Box::new(expired_consumer),
        }
    }

    /// Durable log in Postgres, read as consumer group `group_id`
    #[cfg(feature = "postgres")]
    pub fn durable(connection_pool: &sqlx::PgPool, group_id: &str) -> Self {
        use durable::DurableConsumer;
        use durable::DurableProducer;

        Self {
            used_producer: Arc::new(DurableProducer::new(connection_pool.clone(), USED_TOPIC)),
            used_consumer: Box::new(DurableConsumer::new(
                connection_pool.clone(),
                group_id,
                USED_TOPIC,
            )),
            expired_producer: Arc::new(DurableProducer::new(
                connection_pool.clone(),
                EXPIRED_TOPIC,
            )),
            expired_consumer: Box::new(DurableConsumer::new(
                connection_pool.clone(),
                group_id,
                EXPIRED_TOPIC,
            )),
        }
    }
}

/// Serialize an event for a broker
///
/// # Errors
///
/// When the event can not be serialized, which does not happen for well-formed events
#[cfg_attr(not(feature = "postgres"), allow(dead_code))]
pub fn encode(event: &LifecycleEvent) -> Result<String> {
    serde_json::to_string(event).map_err(|err| Error::Connection(err.to_string()))
}

/// Deserialize an event delivered by a broker
///
/// # Errors
///
/// [`Error::UnknownEventKind`] for anything that is not a known event
#[cfg_attr(not(feature = "postgres"), allow(dead_code))]
pub fn decode(payload: &str) -> Result<LifecycleEvent> {
    serde_json::from_str(payload).map_err(|err| Error::UnknownEventKind(err.to_string()))
}

/// Consume events until `shutdown` is cancelled or the channel closes
///
/// Events still queued at shutdown are not drained
pub async fn run_consumer(
    name: &'static str,
    mut consumer: Box<dyn EventConsumer>,
    handler: Arc<dyn EventHandler>,
    shutdown: CancellationToken,
) {
    tracing::info!(consumer = name, "Consumer started");

    loop {
        tokio::select! {
            biased;

            () = shutdown.cancelled() => {
                tracing::info!(consumer = name, "Shutdown requested, consumer stops");
                break;
            }

            result = consumer.consume(handler.as_ref()) => match result {
                Ok(()) => {}
                Err(Error::Closed) => {
                    tracing::info!(consumer = name, "Channel closed, consumer stops");
                    break;
                }
                Err(err @ Error::UnknownEventKind(_)) => {
                    tracing::warn!(consumer = name, "Dropped message: {err}");
                }
                Err(err) => {
                    tracing::error!(consumer = name, "Could not consume: {err}");

                    tokio::select! {
                        () = shutdown.cancelled() => {}
                        () = tokio::time::sleep(RETRY_DELAY) => {}
                    }
                }
            },
        }
    }
}
