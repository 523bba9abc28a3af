//! All API endpoint setup

use axum::Router;
use axum::routing::delete;
use axum::routing::get;
use axum::routing::post;

pub use request::Form;
pub use request::PathParameters;
pub use request::parse_key;
pub use response::Error;
pub use response::Success;
pub use throttle::InFlight;
pub use throttle::throttle;

mod aliases;
mod request;
mod response;
mod stats;
mod throttle;

/// Get the Axum router for all API routes
pub fn router() -> Router {
    let aliases = Router::new()
        .route("/", post(aliases::create))
        .route("/{key}", delete(aliases::delete));

    let stats = Router::new().route("/expired", get(stats::expired));

    Router::new()
        .route("/healthcheck", get(healthcheck))
        .nest("/aliases", aliases)
        .nest("/stats", stats)
}

/// Liveness of the service
async fn healthcheck() -> Success<&'static str> {
    Success::ok("OK")
}
