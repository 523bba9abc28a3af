//! The root!
//!
//! The hot path, resolving a key and redirecting to its target

use std::sync::Arc;

use axum::Extension;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::Uri;
use axum::http::header::LOCATION;

use crate::api::Error;
use crate::api::parse_key;
use crate::config::Config;
use crate::lifecycle::LifecycleService;

/// The root!
///
/// All wildcard requests end up in this function.
///
/// The key is taken from the path. Redirects are always temporary, a limited or removed alias
/// must not be cached by the client
pub async fn root(
    Extension(config): Extension<Arc<Config>>,
    Extension(lifecycle): Extension<Arc<LifecycleService>>,
    uri: Uri,
) -> Result<(StatusCode, HeaderMap), Error> {
    let key = parse_key(uri.path())?;

    tracing::debug!("Looking for key: /{key}");

    let target = tokio::time::timeout(config.request_timeout, lifecycle.resolve(&key))
        .await
        .map_err(|_| Error::request_timeout("Resolving took too long"))?
        .inspect_err(|err| tracing::debug!(r#"Key "{key}" not resolved: {err}"#))?;

    tracing::debug!(r#"Key "{key}" redirecting to: {target}"#);

    let location = HeaderValue::from_str(target.as_str()).map_err(Error::internal_server_error)?;

    let mut headers = HeaderMap::new();
    headers.insert(LOCATION, location);

    Ok((StatusCode::TEMPORARY_REDIRECT, headers))
}
