//! Alias lifecycle service
//!
//! Creates, resolves and removes aliases. The service keeps no alias state of its own, every
//! call reads the directory before deciding.
//!
//! Resolving a limited alias does not write to the directory: a `used` event is handed to the
//! event channel and the usage counter manager takes the try later. Two resolutions racing on
//! the last try can therefore both succeed, the usage ceiling is approximate under concurrency.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use url::Url;

use crate::aliases::Alias;
use crate::aliases::CreateRequest;
use crate::aliases::UsagePolicy;
use crate::channel;
use crate::channel::EventProducer;
use crate::events::LifecycleEvent;
use crate::keygen::KeyGenerator;
use crate::storage;
use crate::storage::CreateAliasValues;
use crate::storage::Directory;

/// Key length used when none is configured
pub const DEFAULT_KEY_LENGTH: usize = 8;

/// Concurrent key generations per batch when none is configured
pub const DEFAULT_KEY_CONCURRENCY: usize = 10;

/// Attempts to save a batch, regenerating colliding keys in between
const MAX_SAVE_ATTEMPTS: usize = 3;

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum Error {
    /// The key is unknown or the alias is removed
    #[error("Alias not found")]
    NotFound,

    /// The limited alias has no tries left
    #[error("Alias expired")]
    Expired,

    /// Nothing from the batch was created
    #[error("Alias creation failed: {0}")]
    CreationFailed(String),

    /// The target is not a valid URL
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// The directory failed
    #[error("Storage failure: {0}")]
    InternalStorage(storage::Error),

    /// The expiry of an alias could not be recorded
    #[error("Could not record expiry: {0}")]
    EventChannel(channel::Error),
}

impl From<storage::Error> for Error {
    fn from(err: storage::Error) -> Self {
        match err {
            storage::Error::NotFound => Error::NotFound,
            err => Error::InternalStorage(err),
        }
    }
}

/// Result type for all lifecycle operations
pub type Result<T> = core::result::Result<T, Error>;

impl CreateRequest {
    /// Parse a target into a request
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTarget`] when the target is not an absolute URL
    pub fn parse<T>(target: T, usage_policy: UsagePolicy) -> Result<Self>
    where
        T: AsRef<str>,
    {
        let target =
            Url::parse(target.as_ref()).map_err(|err| Error::InvalidTarget(err.to_string()))?;

        Ok(Self {
            target,
            usage_policy,
        })
    }
}

/// The alias lifecycle service
pub struct LifecycleService {
    /// Source of truth for aliases
    directory: Arc<dyn Directory>,

    /// Where `used` events go
    used: Arc<dyn EventProducer>,

    /// Where `expired` events go
    expired: Arc<dyn EventProducer>,

    /// Source of new keys
    key_generator: Arc<dyn KeyGenerator>,

    /// Length of new keys
    key_length: usize,

    /// Ceiling of concurrent key generations in a batch
    key_concurrency: usize,
}

impl LifecycleService {
    /// Create the service with default key settings
    pub fn new(
        directory: Arc<dyn Directory>,
        used: Arc<dyn EventProducer>,
        expired: Arc<dyn EventProducer>,
        key_generator: Arc<dyn KeyGenerator>,
    ) -> Self {
        Self {
            directory,
            used,
            expired,
            key_generator,
            key_length: DEFAULT_KEY_LENGTH,
            key_concurrency: DEFAULT_KEY_CONCURRENCY,
        }
    }

    /// Use keys of `key_length` characters
    #[must_use]
    pub fn with_key_length(mut self, key_length: usize) -> Self {
        self.key_length = key_length;
        self
    }

    /// Generate at most `key_concurrency` keys at the same time
    #[must_use]
    pub fn with_key_concurrency(mut self, key_concurrency: usize) -> Self {
        self.key_concurrency = key_concurrency.max(1);
        self
    }

    /// Create an alias for every request, in request order
    ///
    /// All or nothing: a failing key generation or a failing save creates nothing. Dropping
    /// the returned future aborts the key generations still in flight.
    ///
    /// # Errors
    ///
    /// [`Error::CreationFailed`] when keys could not be generated or the batch could not be
    /// saved, also after running out of attempts on colliding keys
    pub async fn create(&self, requests: Vec<CreateRequest>) -> Result<Vec<Alias>> {
        tracing::debug!(count = requests.len(), "Creating aliases");

        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let keys = self.generate_keys(requests.len()).await?;

        let mut values = requests
            .into_iter()
            .zip(keys)
            .map(|(request, key)| CreateAliasValues {
                key,
                target: request.target,
                usage_policy: request.usage_policy,
            })
            .collect::<Vec<_>>();

        let mut attempt = 1;

        loop {
            match self.directory.save_batch(&values).await {
                Ok(aliases) => {
                    tracing::info!(count = aliases.len(), "Created aliases");

                    return Ok(aliases);
                }
                Err(storage::Error::DuplicateKey(key)) if attempt < MAX_SAVE_ATTEMPTS => {
                    tracing::warn!(
                        attempt,
                        "Key collision on {}, regenerating",
                        key.as_deref().unwrap_or("unknown key")
                    );

                    self.regenerate_colliding_keys(&mut values, key.as_deref())
                        .await?;

                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!("Could not save aliases: {err}");

                    return Err(Error::CreationFailed(err.to_string()));
                }
            }
        }
    }

    /// Resolve a key to its target
    ///
    /// Limited aliases emit a `used` event, the try is taken off asynchronously. Exhausted
    /// aliases emit an `expired` event and fail.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for unknown or removed keys
    /// - [`Error::Expired`] for limited aliases without tries left
    /// - [`Error::EventChannel`] when the expiry could not be recorded
    /// - [`Error::InternalStorage`] when the directory failed
    pub async fn resolve(&self, key: &str) -> Result<Url> {
        let alias = self
            .directory
            .find_active_by_key(key)
            .await?
            .ok_or(Error::NotFound)?;

        if alias.is_exhausted() {
            let event = LifecycleEvent::expired(alias);

            if let Err(err) = self.expired.produce(&event).await {
                tracing::error!(key, "Could not publish expired event: {err}");

                return Err(Error::EventChannel(err));
            }

            tracing::debug!(key, event_id = %event.record().event_id, "Alias expired");

            return Err(Error::Expired);
        }

        match alias.usage_policy {
            UsagePolicy::Permanent => Ok(alias.target),
            UsagePolicy::Limited { tries_left } => {
                let target = alias.target.clone();
                let event = LifecycleEvent::used(alias);

                // the redirect stands, even when the decrement gets lost
                if let Err(err) = self.used.produce(&event).await {
                    tracing::warn!(key, "Dropped used event: {err}");
                } else {
                    tracing::debug!(
                        key,
                        tries_left,
                        event_id = %event.record().event_id,
                        "Alias used"
                    );
                }

                Ok(target)
            }
        }
    }

    /// Soft-delete the alias, visible to the very next resolve
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for unknown or already removed keys
    pub async fn remove(&self, key: &str) -> Result<()> {
        self.directory.soft_delete(key).await?;

        tracing::info!(key, "Removed alias");

        Ok(())
    }

    /// Generate `count` keys with bounded parallelism, results in index order
    async fn generate_keys(&self, count: usize) -> Result<Vec<String>> {
        let semaphore = Arc::new(Semaphore::new(self.key_concurrency));
        let mut tasks = JoinSet::new();
        let mut keys = vec![None; count];

        for index in 0..count {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|err| Error::CreationFailed(err.to_string()))?;

            let key_generator = Arc::clone(&self.key_generator);
            let key_length = self.key_length;

            tasks.spawn(async move {
                let _permit = permit;

                key_generator
                    .generate(key_length)
                    .map(|key| (index, key))
            });

            // stop handing out work as soon as anything failed
            while let Some(joined) = tasks.try_join_next() {
                let (index, key) = Self::collect_key(joined)?;
                keys[index] = Some(key);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            let (index, key) = Self::collect_key(joined)?;
            keys[index] = Some(key);
        }

        keys.into_iter()
            .map(|key| key.ok_or_else(|| Error::CreationFailed("Missing key".to_string())))
            .collect()
    }

    /// Unwrap a finished key generation, dropping the join set aborts the others on error
    fn collect_key(
        joined: core::result::Result<
            core::result::Result<(usize, String), crate::keygen::Error>,
            tokio::task::JoinError,
        >,
    ) -> Result<(usize, String)> {
        match joined {
            Ok(Ok(generated)) => Ok(generated),
            Ok(Err(err)) => {
                tracing::error!("Could not generate key: {err}");

                Err(Error::CreationFailed(err.to_string()))
            }
            Err(err) => Err(Error::CreationFailed(err.to_string())),
        }
    }

    /// Give the aliases carrying a colliding key a fresh one
    ///
    /// Without a known key all keys are regenerated
    async fn regenerate_colliding_keys(
        &self,
        values: &mut [CreateAliasValues],
        key: Option<&str>,
    ) -> Result<()> {
        let colliding = values
            .iter()
            .enumerate()
            .filter(|(_, value)| key.is_none_or(|key| value.key == key))
            .map(|(index, _)| index)
            .collect::<Vec<_>>();

        let fresh = self.generate_keys(colliding.len()).await?;

        for (index, key) in colliding.into_iter().zip(fresh) {
            values[index].key = key;
        }

        Ok(())
    }
}
