//! Runtime configuration, read once from the environment at startup

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use url::Url;

use crate::lifecycle::DEFAULT_KEY_CONCURRENCY;
use crate::lifecycle::DEFAULT_KEY_LENGTH;
use crate::utils::env_var_or_else;
use crate::utils::parse_env_var_or;

const DEFAULT_ADDRESS: &str = "0.0.0.0:6000";
const DEFAULT_BASE_URL: &str = "http://localhost:6000";
const DEFAULT_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_MAX_IN_FLIGHT: usize = 512;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CONSUMER_GROUP: &str = "alias";

/// Where aliases and expiry statistics live
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageKind {
    Memory,
    Postgres,
}

impl FromStr for StorageKind {
    type Err = UnknownKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" => Ok(Self::Postgres),
            _ => Err(UnknownKind(value.to_string())),
        }
    }
}

/// How lifecycle events travel to the consumers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelKind {
    /// Bounded in-process queues
    Memory,

    /// Append-only log in Postgres
    Durable,
}

impl FromStr for ChannelKind {
    type Err = UnknownKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "durable" => Ok(Self::Durable),
            _ => Err(UnknownKind(value.to_string())),
        }
    }
}

/// Unrecognized backend name
#[derive(Debug, thiserror::Error)]
#[error("Unknown kind: {0}")]
pub struct UnknownKind(String);

/// Application configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Listen address
    pub address: SocketAddr,

    /// Prefix of the rendered short links
    pub base_url: String,

    /// Alias and statistics storage
    pub storage: StorageKind,

    /// Event channel realization
    pub event_channel: ChannelKind,

    /// Needed by the Postgres storage and the durable channel
    pub database_url: Option<String>,

    /// Length of generated keys
    pub key_length: usize,

    /// Concurrent key generations per batch
    pub key_concurrency: usize,

    /// Bound of every in-process queue
    pub queue_capacity: usize,

    /// In-flight requests above this get a 429
    pub max_in_flight: usize,

    /// Deadline of a single request
    pub request_timeout: Duration,

    /// Consumer group reading the durable log
    pub consumer_group: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([0, 0, 0, 0], 6000)),
            base_url: DEFAULT_BASE_URL.to_string(),
            storage: StorageKind::Memory,
            event_channel: ChannelKind::Memory,
            database_url: None,
            key_length: DEFAULT_KEY_LENGTH,
            key_concurrency: DEFAULT_KEY_CONCURRENCY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
        }
    }
}

impl Config {
    /// Read the configuration from the environment
    ///
    /// # Errors
    ///
    /// Will return `Err` when a value can not be parsed or the combination is not usable
    pub fn from_env() -> Result<Self> {
        let config = Self {
            address: setup_address()?,
            base_url: env_var_or_else("BASE_URL", || DEFAULT_BASE_URL.to_string()),
            storage: parse_env_var_or("STORAGE", StorageKind::Memory)?,
            event_channel: parse_env_var_or("EVENT_CHANNEL", ChannelKind::Memory)?,
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|value| !value.is_empty()),
            key_length: parse_env_var_or("KEY_LENGTH", DEFAULT_KEY_LENGTH)?,
            key_concurrency: parse_env_var_or("KEY_CONCURRENCY", DEFAULT_KEY_CONCURRENCY)?,
            queue_capacity: parse_env_var_or("QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?,
            max_in_flight: parse_env_var_or("MAX_IN_FLIGHT", DEFAULT_MAX_IN_FLIGHT)?,
            request_timeout: Duration::from_secs(parse_env_var_or(
                "REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
            consumer_group: env_var_or_else("CONSUMER_GROUP", || {
                DEFAULT_CONSUMER_GROUP.to_string()
            }),
        };

        config.validate()?;

        Ok(config)
    }

    /// Check the values that parse but can not work
    ///
    /// # Errors
    ///
    /// Will return `Err` describing the first unusable value
    pub fn validate(&self) -> Result<()> {
        if self.key_length == 0 {
            bail!("`KEY_LENGTH` must be at least 1");
        }

        if self.key_concurrency == 0 {
            bail!("`KEY_CONCURRENCY` must be at least 1");
        }

        if self.queue_capacity == 0 {
            bail!("`QUEUE_CAPACITY` must be at least 1");
        }

        if self.max_in_flight == 0 {
            bail!("`MAX_IN_FLIGHT` must be at least 1");
        }

        if self.request_timeout.is_zero() {
            bail!("`REQUEST_TIMEOUT_SECS` must be at least 1");
        }

        let base_url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid value for `BASE_URL`: {:?}", self.base_url))?;

        if base_url.cannot_be_a_base() {
            bail!("`BASE_URL` can not be used as a prefix: {base_url}");
        }

        let needs_database =
            self.storage == StorageKind::Postgres || self.event_channel == ChannelKind::Durable;

        if needs_database {
            if !cfg!(feature = "postgres") {
                bail!("Postgres storage and the durable channel need the `postgres` feature");
            }

            if self.database_url.is_none() {
                bail!("`DATABASE_URL` is required for Postgres storage and the durable channel");
            }
        }

        Ok(())
    }

    /// Render the short link of a key
    pub fn short_url(&self, key: &str) -> String {
        format!("{}/{key}", self.base_url.trim_end_matches('/'))
    }
}

fn setup_address() -> Result<SocketAddr> {
    let mut address =
        env_var_or_else("ADDRESS", || String::from(DEFAULT_ADDRESS)).parse::<SocketAddr>()?;

    // optional override of just the port
    if let Ok(port) = std::env::var("PORT") {
        // only check non-empty strings
        if !port.is_empty() {
            let port = port.parse::<u16>()?;

            address.set_port(port);
        }
    }

    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();

        assert!(config.validate().is_ok());
        assert_eq!(StorageKind::Memory, config.storage);
        assert_eq!(ChannelKind::Memory, config.event_channel);
    }

    #[test]
    fn test_backend_names() {
        assert_eq!(StorageKind::Postgres, "Postgres".parse::<StorageKind>().unwrap());
        assert_eq!(ChannelKind::Durable, "durable".parse::<ChannelKind>().unwrap());
        assert!("kafka".parse::<ChannelKind>().is_err());
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let config = Config {
            queue_capacity: 0,
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_durable_channel_needs_database_url() {
        let config = Config {
            event_channel: ChannelKind::Durable,
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_base_url_must_be_a_url() {
        let config = Config {
            base_url: "localhost".to_string(),
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_short_url() {
        let config = Config {
            base_url: "https://s.example.com/go/".to_string(),
            ..Config::default()
        };

        assert_eq!("https://s.example.com/go/abc", config.short_url("abc"));
        assert_eq!(
            "http://localhost:6000/abc",
            Config::default().short_url("abc")
        );
    }
}
