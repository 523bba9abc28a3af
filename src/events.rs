//! Lifecycle events
//!
//! Immutable facts about resolutions, handed from the lifecycle service to the consumers

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::aliases::Alias;

/// Snapshot of an alias at the moment something happened to it
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// Unique ID of the event, used to deduplicate redeliveries
    pub event_id: Uuid,

    /// When the event happened
    pub occurred_at: DateTime<Utc>,

    /// Alias as it was read when the event happened
    pub alias: Alias,
}

impl EventRecord {
    fn new(alias: Alias) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            alias,
        }
    }
}

/// Something that happened to an alias during a resolution
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum LifecycleEvent {
    /// A limited alias with tries left was resolved
    Used(EventRecord),

    /// A limited alias without tries left was resolved
    Expired(EventRecord),
}

impl LifecycleEvent {
    /// Alias was resolved successfully
    pub fn used(alias: Alias) -> Self {
        Self::Used(EventRecord::new(alias))
    }

    /// Alias was resolved after running out of tries
    pub fn expired(alias: Alias) -> Self {
        Self::Expired(EventRecord::new(alias))
    }

    /// Data carried by the event
    pub fn record(&self) -> &EventRecord {
        match self {
            Self::Used(record) | Self::Expired(record) => record,
        }
    }

    /// Short name of the event, used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Used(_) => "used",
            Self::Expired(_) => "expired",
        }
    }
}
