//! All things related to the storage of aliases and expiry statistics

use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::aliases::Alias;
use crate::aliases::UsagePolicy;
use crate::events::EventRecord;

pub use memory::Memory;
#[cfg(feature = "postgres")]
pub use postgres::Postgres;

mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

/// Storage errors
#[derive(Debug, Error)]
pub enum Error {
    /// No active record with the given key
    #[error("Alias not found")]
    NotFound,

    /// The decrement found the alias already at zero tries
    #[error("Alias has no tries left")]
    AlreadyZero,

    /// A key in the batch is already taken by an active alias
    ///
    /// The key is known when the storage can tell which one collided
    #[error("Duplicate key: {}", .0.as_deref().unwrap_or("unknown"))]
    DuplicateKey(Option<String>),

    /// A connection error with the storage
    #[error("Connection error: {0}")]
    Connection(String),
}

/// Result type for all storage interactions
pub type Result<T> = core::result::Result<T, Error>;

/// Values to create an alias
#[derive(Clone, Debug)]
pub struct CreateAliasValues {
    /// Generated key
    pub key: String,

    /// Target to resolve to
    pub target: Url,

    /// Usage limit
    pub usage_policy: UsagePolicy,
}

/// Audit row for a resolution against an exhausted alias
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiryRecord {
    /// The event the row was written for, unique
    pub event_id: Uuid,

    /// When the resolution happened
    pub occurred_at: DateTime<Utc>,

    /// Key of the exhausted alias
    pub key: String,

    /// Target of the exhausted alias
    pub target: Url,
}

impl ExpiryRecord {
    /// Build the audit row from an expired event
    pub fn from_event_record(record: &EventRecord) -> Self {
        Self {
            event_id: record.event_id,
            occurred_at: record.occurred_at,
            key: record.alias.key.clone(),
            target: record.alias.target.clone(),
        }
    }
}

/// The alias directory, single source of truth for alias records
#[async_trait]
pub trait Directory: Send + Sync + 'static {
    /// Save a batch of new, active aliases
    ///
    /// All or nothing: when any key collides nothing is saved
    async fn save_batch(&self, values: &[CreateAliasValues]) -> Result<Vec<Alias>>;

    /// Find the active alias with the given key
    ///
    /// Respects the soft-delete
    async fn find_active_by_key(&self, key: &str) -> Result<Option<Alias>>;

    /// Atomically take one try from an active, limited alias
    ///
    /// Only the alias `alias_id` is touched, a later alias reusing the key is left alone.
    /// Returns the tries left after the decrement, clamped at zero. Fails with
    /// [`Error::AlreadyZero`] when there was nothing left to take and with
    /// [`Error::NotFound`] when no active, limited alias `alias_id` has the key
    async fn decrement_if_present_and_active(&self, key: &str, alias_id: Uuid) -> Result<u64>;

    /// Soft-delete the active alias with the given key
    async fn soft_delete(&self, key: &str) -> Result<()>;
}

/// Store for expiry audit rows
#[async_trait]
pub trait StatsStore: Send + Sync + 'static {
    /// Append an audit row
    ///
    /// Rows are keyed by event ID, a redelivered event does not add a second row
    async fn push_expired(&self, record: &ExpiryRecord) -> Result<()>;

    /// All audit rows, oldest first
    async fn find_all_expired(&self) -> Result<Vec<ExpiryRecord>>;
}

/// Shared handles to the storage
#[derive(Clone)]
pub struct Storage {
    /// The alias directory
    pub directory: Arc<dyn Directory>,

    /// The expiry statistics
    pub stats: Arc<dyn StatsStore>,
}

impl Storage {
    /// Storage living in memory only
    pub fn memory() -> Self {
        let memory = Memory::new();

        Self {
            directory: Arc::new(memory.clone()),
            stats: Arc::new(memory),
        }
    }

    /// Storage backed by Postgres
    #[cfg(feature = "postgres")]
    pub fn postgres(connection_pool: sqlx::PgPool) -> Self {
        let postgres = Postgres::new_with_pool(connection_pool);

        Self {
            directory: Arc::new(postgres.clone()),
            stats: Arc::new(postgres),
        }
    }
}
