//! API response helpers

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use serde::Serialize;

use crate::lifecycle;

/// Hold data for a successful API interaction
pub struct Success<V>
where
    V: Serialize,
{
    status_code: StatusCode,
    data: Option<V>,
}

impl<V> Success<V>
where
    V: Serialize,
{
    pub fn ok(data: V) -> Self {
        Self {
            status_code: StatusCode::OK,
            data: Some(data),
        }
    }

    pub fn created(data: V) -> Self {
        Self {
            status_code: StatusCode::CREATED,
            data: Some(data),
        }
    }

    pub fn no_content() -> Self {
        Self {
            status_code: StatusCode::NO_CONTENT,
            data: None,
        }
    }
}

#[derive(Serialize)]
struct DataWrapper<D>
where
    D: Serialize,
{
    data: D,
}

impl<V> IntoResponse for Success<V>
where
    V: Serialize,
{
    fn into_response(self) -> Response {
        if let Some(data) = self.data {
            (self.status_code, Json(DataWrapper { data })).into_response()
        } else {
            self.status_code.into_response()
        }
    }
}

/// Hold data for a failed API interaction
#[derive(Debug)]
pub struct Error {
    status_code: StatusCode,
    message: String,
    description: Option<String>,
}

impl Error {
    fn new<M>(status_code: StatusCode, message: M) -> Self
    where
        M: ToString,
    {
        Self {
            status_code,
            message: message.to_string(),
            description: None,
        }
    }

    pub fn bad_request<M>(message: M) -> Self
    where
        M: ToString,
    {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found<M>(message: M) -> Self
    where
        M: ToString,
    {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn request_timeout<M>(message: M) -> Self
    where
        M: ToString,
    {
        Self::new(StatusCode::REQUEST_TIMEOUT, message)
    }

    pub fn gone<M>(message: M) -> Self
    where
        M: ToString,
    {
        Self::new(StatusCode::GONE, message)
    }

    pub fn too_many_requests<M>(message: M) -> Self
    where
        M: ToString,
    {
        Self::new(StatusCode::TOO_MANY_REQUESTS, message)
    }

    pub fn internal_server_error<M>(message: M) -> Self
    where
        M: ToString,
    {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn with_description<M>(&self, description: M) -> Self
    where
        M: ToString,
    {
        Self {
            status_code: self.status_code,
            message: self.message.clone(),
            description: Some(description.to_string()),
        }
    }
}

impl From<lifecycle::Error> for Error {
    fn from(err: lifecycle::Error) -> Self {
        match err {
            lifecycle::Error::NotFound => Self::not_found("Alias not found"),
            lifecycle::Error::Expired => Self::gone("Alias expired"),
            lifecycle::Error::InvalidTarget(description) => {
                Self::bad_request("Invalid target").with_description(description)
            }
            lifecycle::Error::CreationFailed(description) => {
                Self::internal_server_error("Alias creation failed").with_description(description)
            }
            err @ (lifecycle::Error::InternalStorage(_) | lifecycle::Error::EventChannel(_)) => {
                tracing::error!("Internal error: {err}");

                Self::internal_server_error("Internal error")
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorWrapper<D>
where
    D: Serialize,
{
    error: D,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<D>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (
            self.status_code,
            Json(ErrorWrapper {
                error: self.message,
                description: self.description,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage;

    #[test]
    fn test_lifecycle_errors_map_to_status_codes() {
        let cases = [
            (lifecycle::Error::NotFound, StatusCode::NOT_FOUND),
            (lifecycle::Error::Expired, StatusCode::GONE),
            (
                lifecycle::Error::InvalidTarget("nope".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                lifecycle::Error::CreationFailed("nope".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                lifecycle::Error::InternalStorage(storage::Error::Connection("down".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status_code) in cases {
            assert_eq!(status_code, Error::from(err).into_response().status());
        }
    }
}
