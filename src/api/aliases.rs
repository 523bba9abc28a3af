//! Aliases API endpoints
//!
//! Creating and removing aliases, resolving happens in [`crate::root`]

use std::sync::Arc;

use axum::Extension;
use serde::Deserialize;
use serde::Serialize;

use crate::aliases::Alias;
use crate::aliases::CreateRequest;
use crate::aliases::UsagePolicy;
use crate::config::Config;
use crate::lifecycle::LifecycleService;

use super::Error;
use super::Form;
use super::PathParameters;
use super::Success;

/// Highest usage limit every storage can hold
const MAX_USAGE_COUNT: u64 = i64::MAX.unsigned_abs();

/// Alias response going to the user
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasResponse {
    /// Generated key
    pub key: String,

    /// Where the alias resolves to
    pub target: String,

    /// Full short link
    pub short_url: String,

    /// Usage limit at creation
    pub usage_policy: UsagePolicy,
}

impl AliasResponse {
    fn from_alias(config: &Config, alias: Alias) -> Self {
        Self {
            short_url: config.short_url(&alias.key),
            key: alias.key,
            target: alias.target.into(),
            usage_policy: alias.usage_policy,
        }
    }
}

/// Create aliases form
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAliasesForm {
    /// Targets, one alias per URL
    urls: Vec<String>,

    /// Limit every alias of the batch to this many resolutions, permanent when absent
    max_usage_count: Option<u64>,
}

/// Create an alias for every URL in the [`CreateAliasesForm`] form
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -d '{ "urls": ["https://www.example.com/"], "maxUsageCount": 5 }' \
///     http://localhost:6000/api/aliases
/// ```
///
/// Response:
/// ```json
/// { "data": [ { "key": "x1Y2z3_-", "shortUrl": "http://localhost:6000/x1Y2z3_-" ... } ] }
/// ```
pub async fn create(
    Extension(config): Extension<Arc<Config>>,
    Extension(lifecycle): Extension<Arc<LifecycleService>>,
    Form(form): Form<CreateAliasesForm>,
) -> Result<Success<Vec<AliasResponse>>, Error> {
    if form.urls.is_empty() {
        return Err(Error::bad_request("No URLs given"));
    }

    if form
        .max_usage_count
        .is_some_and(|max_usage_count| max_usage_count > MAX_USAGE_COUNT)
    {
        return Err(Error::bad_request("Invalid usage count")
            .with_description(format!("`maxUsageCount` can be at most {MAX_USAGE_COUNT}")));
    }

    let usage_policy = form
        .max_usage_count
        .map_or(UsagePolicy::Permanent, |tries_left| UsagePolicy::Limited {
            tries_left,
        });

    let requests = form
        .urls
        .iter()
        .map(|url| CreateRequest::parse(url, usage_policy))
        .collect::<Result<Vec<_>, _>>()?;

    // dropping the create aborts its key generations
    let aliases = tokio::time::timeout(config.request_timeout, lifecycle.create(requests))
        .await
        .map_err(|_| Error::request_timeout("Creating aliases took too long"))??;

    Ok(Success::created(
        aliases
            .into_iter()
            .map(|alias| AliasResponse::from_alias(&config, alias))
            .collect(),
    ))
}

/// Remove an alias, the key stops resolving right away
///
/// Request:
/// ```sh
/// curl -v -XDELETE http://localhost:6000/api/aliases/<key>
/// ```
pub async fn delete(
    Extension(config): Extension<Arc<Config>>,
    Extension(lifecycle): Extension<Arc<LifecycleService>>,
    PathParameters(key): PathParameters<String>,
) -> Result<Success<&'static str>, Error> {
    tokio::time::timeout(config.request_timeout, lifecycle.remove(&key))
        .await
        .map_err(|_| Error::request_timeout("Removing the alias took too long"))??;

    Ok(Success::<&'static str>::no_content())
}
