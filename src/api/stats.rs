//! Expiry statistics endpoint

use std::sync::Arc;

use axum::Extension;

use crate::config::Config;
use crate::storage::ExpiryRecord;
use crate::storage::StatsStore;

use super::Error;
use super::Success;

/// List the resolutions against exhausted aliases, oldest first
///
/// Request:
/// ```sh
/// curl -v http://localhost:6000/api/stats/expired
/// ```
///
/// Response:
/// ```json
/// { "data": [ { "eventId": "<uuid>", "key": "x1Y2z3_-", "target": "https://..." ... } ] }
/// ```
pub async fn expired(
    Extension(config): Extension<Arc<Config>>,
    Extension(stats): Extension<Arc<dyn StatsStore>>,
) -> Result<Success<Vec<ExpiryRecord>>, Error> {
    let records = tokio::time::timeout(config.request_timeout, stats.find_all_expired())
        .await
        .map_err(|_| Error::request_timeout("Listing expiries took too long"))?
        .map_err(Error::internal_server_error)?;

    Ok(Success::ok(records))
}
