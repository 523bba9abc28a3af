//! Memory storage
//!
//! Will be destroyed on system shutdown

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::aliases::Alias;
use crate::aliases::UsagePolicy;

use super::CreateAliasValues;
use super::Directory;
use super::Error;
use super::ExpiryRecord;
use super::Result;
use super::StatsStore;

/// An in-memory storage
///
/// Will be destroyed on system shutdown
#[derive(Clone, Debug, Default)]
pub struct Memory {
    /// All aliases in storage, removed ones included
    aliases: Arc<Mutex<HashMap<Uuid, Alias>>>,

    /// Expiry audit rows
    expired: Arc<Mutex<ExpiredRows>>,
}

/// Audit rows in insertion order, with the event IDs already seen
#[derive(Debug, Default)]
struct ExpiredRows {
    rows: Vec<ExpiryRecord>,
    event_ids: HashSet<Uuid>,
}

impl Memory {
    /// Create a new empty Memory storage
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Directory for Memory {
    async fn save_batch(&self, values: &[CreateAliasValues]) -> Result<Vec<Alias>> {
        let mut aliases = self.aliases.lock().await;

        let mut taken = aliases
            .values()
            .filter(|alias| alias.active)
            .map(|alias| alias.key.as_str())
            .collect::<HashSet<_>>();

        for value in values {
            if !taken.insert(value.key.as_str()) {
                return Err(Error::DuplicateKey(Some(value.key.clone())));
            }
        }

        let created = values
            .iter()
            .map(|value| Alias {
                id: Uuid::new_v4(),
                key: value.key.clone(),
                target: value.target.clone(),
                active: true,
                usage_policy: value.usage_policy,
            })
            .collect::<Vec<_>>();

        for alias in &created {
            aliases.insert(alias.id, alias.clone());
        }

        Ok(created)
    }

    async fn find_active_by_key(&self, key: &str) -> Result<Option<Alias>> {
        Ok(self
            .aliases
            .lock()
            .await
            .values()
            .find(|alias| alias.key == key && alias.active)
            .cloned())
    }

    async fn decrement_if_present_and_active(&self, key: &str, alias_id: Uuid) -> Result<u64> {
        let mut aliases = self.aliases.lock().await;

        let alias = aliases
            .get_mut(&alias_id)
            .filter(|alias| alias.key == key && alias.active)
            .ok_or(Error::NotFound)?;

        match &mut alias.usage_policy {
            UsagePolicy::Permanent => Err(Error::NotFound),
            UsagePolicy::Limited { tries_left: 0 } => Err(Error::AlreadyZero),
            UsagePolicy::Limited { tries_left } => {
                *tries_left -= 1;

                Ok(*tries_left)
            }
        }
    }

    async fn soft_delete(&self, key: &str) -> Result<()> {
        let mut aliases = self.aliases.lock().await;

        let alias = aliases
            .values_mut()
            .find(|alias| alias.key == key && alias.active)
            .ok_or(Error::NotFound)?;

        alias.active = false;

        Ok(())
    }
}

#[async_trait]
impl StatsStore for Memory {
    async fn push_expired(&self, record: &ExpiryRecord) -> Result<()> {
        let mut expired = self.expired.lock().await;

        if expired.event_ids.insert(record.event_id) {
            expired.rows.push(record.clone());
        }

        Ok(())
    }

    async fn find_all_expired(&self) -> Result<Vec<ExpiryRecord>> {
        Ok(self.expired.lock().await.rows.clone())
    }
}
