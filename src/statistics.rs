//! Expiry statistics collector

use std::sync::Arc;

use async_trait::async_trait;

use crate::channel::EventHandler;
use crate::events::LifecycleEvent;
use crate::storage::ExpiryRecord;
use crate::storage::StatsStore;

/// Writes an audit row for every `expired` event
pub struct ExpiryStatisticsCollector {
    stats: Arc<dyn StatsStore>,
}

impl ExpiryStatisticsCollector {
    /// Collector writing into `stats`
    pub fn new(stats: Arc<dyn StatsStore>) -> Self {
        Self { stats }
    }
}

#[async_trait]
impl EventHandler for ExpiryStatisticsCollector {
    async fn handle(&self, event: LifecycleEvent) {
        let kind = event.kind();

        let record = match event {
            LifecycleEvent::Expired(record) => ExpiryRecord::from_event_record(&record),
            LifecycleEvent::Used(record) => {
                tracing::warn!(
                    kind,
                    event_id = %record.event_id,
                    "Statistics got an unexpected event, dropped"
                );
                return;
            }
        };

        if let Err(err) = self.stats.push_expired(&record).await {
            tracing::error!(
                key = record.key,
                event_id = %record.event_id,
                "Could not record expiry: {err}"
            );
        } else {
            tracing::debug!(key = record.key, event_id = %record.event_id, "Recorded expiry");
        }
    }
}
