#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
// easier to use when using the functions as callback of foreign functions
#![allow(clippy::needless_pass_by_value)]
// #![doc = include_str!("../README.md")]

use std::sync::Arc;

use anyhow::Result;
use axum::Extension;
use axum::Router;
use axum::middleware;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::prelude::*;

use crate::api::InFlight;
use crate::channel::BufferedProducer;
use crate::channel::Channels;
use crate::channel::EventProducer;
use crate::channel::run_consumer;
use crate::config::ChannelKind;
use crate::config::Config;
use crate::config::StorageKind;
use crate::counter::UsageCounterManager;
use crate::keygen::KeyGenerator;
use crate::keygen::UrlSafeKeyGenerator;
use crate::lifecycle::LifecycleService;
use crate::statistics::ExpiryStatisticsCollector;
use crate::storage::Storage;

mod aliases;
mod api;
mod channel;
mod config;
mod counter;
mod events;
mod graceful_shutdown;
mod keygen;
mod lifecycle;
mod root;
mod statistics;
mod storage;
#[cfg(test)]
mod tests;
mod utils;

const DEFAULT_RUST_LOG: &str = "alias=debug,tower_http=debug";

#[tokio::main]
async fn main() -> Result<()> {
    setup_environment();
    setup_tracing();

    let config = Arc::new(Config::from_env()?);

    let services = setup_services(&config, Arc::new(UrlSafeKeyGenerator)).await?;
    let app = create_router(
        Arc::clone(&config),
        &services,
        InFlight::new(config.max_in_flight),
    );

    let listener = TcpListener::bind(config.address).await?;
    tracing::info!("Listening on {}", config.address);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(graceful_shutdown::handler(services.shutdown.clone()))
        .await;

    services.stop().await;

    served?;

    Ok(())
}

/// Everything the router and the consumers share
pub struct Services {
    /// The alias lifecycle
    pub lifecycle: Arc<LifecycleService>,

    /// Directory and statistics
    pub storage: Storage,

    /// Cancelled on shutdown, stops the consumers
    pub shutdown: CancellationToken,

    /// Consumer loops and forwarders
    workers: Vec<JoinHandle<()>>,
}

impl Services {
    /// Stop the consumers and wait for them
    ///
    /// Events still waiting in a channel are not handled
    pub async fn stop(self) {
        self.shutdown.cancel();

        for worker in self.workers {
            if let Err(err) = worker.await {
                tracing::error!("Worker did not stop cleanly: {err}");
            }
        }

        tracing::info!("Consumers stopped");
    }
}

/// Setup storage, event channels and the consumers
///
/// # Errors
///
/// Will return `Err` if any of its dependencies fail to load:
/// - Database connection
/// - Migrations
pub async fn setup_services(
    config: &Config,
    key_generator: Arc<dyn KeyGenerator>,
) -> Result<Services> {
    #[cfg(feature = "postgres")]
    let connection_pool = if config.storage == StorageKind::Postgres
        || config.event_channel == ChannelKind::Durable
    {
        use anyhow::Context;

        let database_url = config
            .database_url
            .as_deref()
            .context("`DATABASE_URL` is not set")?;

        Some(storage::postgres::connect(database_url).await?)
    } else {
        None
    };

    let storage = match config.storage {
        StorageKind::Memory => Storage::memory(),
        #[cfg(feature = "postgres")]
        StorageKind::Postgres => {
            use anyhow::Context;

            Storage::postgres(connection_pool.clone().context("No database connection")?)
        }
        #[cfg(not(feature = "postgres"))]
        StorageKind::Postgres => anyhow::bail!("Postgres storage needs the `postgres` feature"),
    };

    let channels = match config.event_channel {
        ChannelKind::Memory => Channels::memory(config.queue_capacity),
        #[cfg(feature = "postgres")]
        ChannelKind::Durable => {
            use anyhow::Context;

            let connection_pool = connection_pool.context("No database connection")?;

            Channels::durable(&connection_pool, &config.consumer_group)
        }
        #[cfg(not(feature = "postgres"))]
        ChannelKind::Durable => anyhow::bail!("The durable channel needs the `postgres` feature"),
    };

    tracing::info!(
        storage = ?config.storage,
        event_channel = ?config.event_channel,
        "Services ready"
    );

    let Channels {
        used_producer,
        used_consumer,
        expired_producer,
        expired_consumer,
    } = channels;

    let shutdown = CancellationToken::new();
    let mut workers = Vec::with_capacity(3);

    // a durable producer waits on the database, `used` events go through a local buffer
    let used_producer: Arc<dyn EventProducer> = if config.event_channel == ChannelKind::Durable {
        let (buffered, forwarder) = BufferedProducer::spawn(
            "used-events",
            used_producer,
            config.queue_capacity,
            shutdown.clone(),
        );
        workers.push(forwarder);

        Arc::new(buffered)
    } else {
        used_producer
    };

    let lifecycle = LifecycleService::new(
        Arc::clone(&storage.directory),
        used_producer,
        expired_producer,
        key_generator,
    )
    .with_key_length(config.key_length)
    .with_key_concurrency(config.key_concurrency);

    workers.extend([
        tokio::spawn(run_consumer(
            "usage-counter",
            used_consumer,
            Arc::new(UsageCounterManager::new(Arc::clone(&storage.directory))),
            shutdown.clone(),
        )),
        tokio::spawn(run_consumer(
            "expiry-statistics",
            expired_consumer,
            Arc::new(ExpiryStatisticsCollector::new(Arc::clone(&storage.stats))),
            shutdown.clone(),
        )),
    ]);

    Ok(Services {
        lifecycle: Arc::new(lifecycle),
        storage,
        shutdown,
        workers,
    })
}

/// Create the router for the alias service
fn create_router(config: Arc<Config>, services: &Services, in_flight: InFlight) -> Router {
    Router::new()
        .nest("/api", api::router())
        .fallback(get(root::root))
        .layer(Extension(Arc::clone(&services.lifecycle)))
        .layer(Extension(Arc::clone(&services.storage.stats)))
        .layer(Extension(config))
        .layer(middleware::from_fn_with_state(in_flight, api::throttle))
        .layer(TraceLayer::new_for_http())
}

fn setup_environment() {
    dotenvy::dotenv().ok();
}

fn setup_tracing() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::registry;

    registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_RUST_LOG.into()),
        ))
        .with(fmt::layer())
        .init();
}
