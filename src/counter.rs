//! Usage counter manager
//!
//! Takes a try off a limited alias for every `used` event

use std::sync::Arc;

use async_trait::async_trait;

use crate::channel::EventHandler;
use crate::events::LifecycleEvent;
use crate::storage;
use crate::storage::Directory;

/// Applies the delayed decrements
pub struct UsageCounterManager {
    directory: Arc<dyn Directory>,
}

impl UsageCounterManager {
    /// Manager decrementing in `directory`
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl EventHandler for UsageCounterManager {
    async fn handle(&self, event: LifecycleEvent) {
        let kind = event.kind();

        let record = match event {
            LifecycleEvent::Used(record) => record,
            LifecycleEvent::Expired(record) => {
                tracing::warn!(
                    kind,
                    event_id = %record.event_id,
                    "Usage counter got an unexpected event, dropped"
                );
                return;
            }
        };

        let key = record.alias.key.as_str();

        if record.alias.usage_policy.is_permanent() {
            return;
        }

        match self
            .directory
            .decrement_if_present_and_active(key, record.alias.id)
            .await
        {
            Ok(tries_left) => {
                tracing::debug!(key, tries_left, event_id = %record.event_id, "Took a try");
            }
            Err(storage::Error::AlreadyZero) => {
                tracing::debug!(key, event_id = %record.event_id, "Alias was already exhausted");
            }
            Err(storage::Error::NotFound) => {
                tracing::debug!(key, event_id = %record.event_id, "Alias is gone, nothing to take");
            }
            Err(err) => {
                tracing::error!(key, event_id = %record.event_id, "Could not take a try: {err}");
            }
        }
    }
}
