//! Postgres storage

use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use url::Url;
use uuid::Uuid;

use crate::aliases::Alias;
use crate::aliases::UsagePolicy;

use super::CreateAliasValues;
use super::Directory;
use super::Error;
use super::ExpiryRecord;
use super::Result;
use super::StatsStore;

/// Migrator to run migrations on startup
static MIGRATOR: Migrator = sqlx::migrate!();

/// Name of the unique index on active keys, see the migrations
const ACTIVE_KEY_INDEX: &str = "aliases_active_key_idx";

/// Connect to Postgres and run the migrations
///
/// # Errors
///
/// When the database can not be reached or a migration fails
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let connection_pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(3))
        .connect(database_url)
        .await
        .map_err(connection_error)?;

    MIGRATOR
        .run(&connection_pool)
        .await
        .map_err(connection_error)?;

    Ok(connection_pool)
}

/// Postgres storage
#[derive(Clone)]
pub struct Postgres {
    /// Pool of connections
    connection_pool: PgPool,
}

impl Postgres {
    /// Create Postgres storage with existing, migrated pool
    pub fn new_with_pool(connection_pool: PgPool) -> Self {
        Self { connection_pool }
    }
}

/// Postgres version of an alias
#[derive(sqlx::FromRow)]
struct PostgresAlias {
    id: Uuid,
    key: String,
    target: String,
    active: bool,
    permanent: bool,
    tries_left: i64,
}

impl PostgresAlias {
    fn into_alias(self) -> Result<Alias> {
        let target = Url::parse(&self.target).map_err(connection_error)?;

        let usage_policy = if self.permanent {
            UsagePolicy::Permanent
        } else {
            UsagePolicy::Limited {
                tries_left: u64::try_from(self.tries_left).unwrap_or(0),
            }
        };

        Ok(Alias {
            id: self.id,
            key: self.key,
            target,
            active: self.active,
            usage_policy,
        })
    }
}

/// Postgres version of an expiry audit row
#[derive(sqlx::FromRow)]
struct PostgresExpiryRecord {
    event_id: Uuid,
    occurred_at: DateTime<Utc>,
    key: String,
    target: String,
}

#[async_trait]
impl Directory for Postgres {
    async fn save_batch(&self, values: &[CreateAliasValues]) -> Result<Vec<Alias>> {
        let mut transaction = self
            .connection_pool
            .begin()
            .await
            .map_err(connection_error)?;

        let keys = values
            .iter()
            .map(|value| value.key.clone())
            .collect::<Vec<_>>();

        let taken = sqlx::query_scalar::<_, String>(
            r"
            SELECT key
            FROM aliases
            WHERE active AND key = ANY($1)
            LIMIT 1
            ",
        )
        .bind(&keys)
        .fetch_optional(&mut *transaction)
        .await
        .map_err(connection_error)?;

        if let Some(taken) = taken {
            return Err(Error::DuplicateKey(Some(taken)));
        }

        let mut created = Vec::with_capacity(values.len());

        for value in values {
            let (permanent, tries_left) = match value.usage_policy {
                UsagePolicy::Permanent => (true, 0),
                UsagePolicy::Limited { tries_left } => {
                    (false, i64::try_from(tries_left).unwrap_or(i64::MAX))
                }
            };

            let alias = sqlx::query_as::<_, PostgresAlias>(
                r"
                INSERT INTO aliases (id, key, target, active, permanent, tries_left)
                VALUES ($1, $2, $3, TRUE, $4, $5)
                RETURNING id, key, target, active, permanent, tries_left
                ",
            )
            .bind(Uuid::new_v4())
            .bind(&value.key)
            .bind(value.target.as_str())
            .bind(permanent)
            .bind(tries_left)
            .fetch_one(&mut *transaction)
            .await
            .map_err(insert_error)?;

            created.push(alias.into_alias()?);
        }

        transaction.commit().await.map_err(connection_error)?;

        Ok(created)
    }

    async fn find_active_by_key(&self, key: &str) -> Result<Option<Alias>> {
        sqlx::query_as::<_, PostgresAlias>(
            r"
            SELECT id, key, target, active, permanent, tries_left
            FROM aliases
            WHERE active AND key = $1
            LIMIT 1
            ",
        )
        .bind(key)
        .fetch_optional(&self.connection_pool)
        .await
        .map_err(connection_error)?
        .map(PostgresAlias::into_alias)
        .transpose()
    }

    async fn decrement_if_present_and_active(&self, key: &str, alias_id: Uuid) -> Result<u64> {
        // single statement: the row lock taken by the CTE makes concurrent decrements serialize
        let previous = sqlx::query_scalar::<_, i64>(
            r"
            WITH previous AS (
                SELECT id, tries_left
                FROM aliases
                WHERE active AND NOT permanent AND key = $1 AND id = $2
                FOR UPDATE
            )
            UPDATE aliases
            SET tries_left = GREATEST(aliases.tries_left - 1, 0)
            FROM previous
            WHERE aliases.id = previous.id
            RETURNING previous.tries_left
            ",
        )
        .bind(key)
        .bind(alias_id)
        .fetch_optional(&self.connection_pool)
        .await
        .map_err(connection_error)?
        .ok_or(Error::NotFound)?;

        if previous <= 0 {
            Err(Error::AlreadyZero)
        } else {
            Ok(u64::try_from(previous - 1).unwrap_or(0))
        }
    }

    async fn soft_delete(&self, key: &str) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE aliases
            SET active = FALSE
            WHERE active AND key = $1
            ",
        )
        .bind(key)
        .execute(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        if result.rows_affected() == 0 {
            Err(Error::NotFound)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StatsStore for Postgres {
    async fn push_expired(&self, record: &ExpiryRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO expired_stats (event_id, occurred_at, key, target)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (event_id) DO NOTHING
            ",
        )
        .bind(record.event_id)
        .bind(record.occurred_at)
        .bind(&record.key)
        .bind(record.target.as_str())
        .execute(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(())
    }

    async fn find_all_expired(&self) -> Result<Vec<ExpiryRecord>> {
        sqlx::query_as::<_, PostgresExpiryRecord>(
            r"
            SELECT event_id, occurred_at, key, target
            FROM expired_stats
            ORDER BY occurred_at ASC
            ",
        )
        .fetch_all(&self.connection_pool)
        .await
        .map_err(connection_error)?
        .into_iter()
        .map(|record| {
            Ok(ExpiryRecord {
                event_id: record.event_id,
                occurred_at: record.occurred_at,
                key: record.key,
                target: Url::parse(&record.target).map_err(connection_error)?,
            })
        })
        .collect()
    }
}

/// Convert `SQLx` to storage connection error
fn connection_error<E>(err: E) -> Error
where
    E: std::error::Error,
{
    Error::Connection(err.to_string())
}

/// Lost the race on the active key index after the pre-check
fn insert_error(err: sqlx::Error) -> Error {
    let is_duplicate_key = err
        .as_database_error()
        .and_then(|database_error| database_error.constraint())
        .is_some_and(|constraint| constraint == ACTIVE_KEY_INDEX);

    if is_duplicate_key {
        Error::DuplicateKey(None)
    } else {
        connection_error(err)
    }
}
