use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Every failure a single request can run into.
///
/// None of these are fatal to the process; they are mapped to an HTTP status
/// and an M3U comment body so players that only understand playlists still
/// get something readable.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),
    #[error("invalid or missing API key")]
    AuthFailure,
    #[error("upstream did not answer within {0} ms")]
    Timeout(u64),
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("upstream responded with HTTP {0}")]
    HttpError(u16),
    #[error("upstream returned an empty playlist")]
    EmptyBody,
    #[error("no #EXT marker found in playlist")]
    InvalidFormat,
    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::UnknownProvider(_) => StatusCode::BAD_REQUEST,
            Error::AuthFailure => StatusCode::FORBIDDEN,
            Error::Timeout(_)
            | Error::NetworkError(_)
            | Error::HttpError(_)
            | Error::EmptyBody
            | Error::InvalidFormat => StatusCode::BAD_GATEWAY,
            Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label used for the `outcome` metric.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UnknownProvider(_) => "unknown_provider",
            Error::AuthFailure => "auth_failure",
            Error::Timeout(_) => "timeout",
            Error::NetworkError(_) => "network_error",
            Error::HttpError(_) => "http_error",
            Error::EmptyBody => "empty_body",
            Error::InvalidFormat => "invalid_format",
            Error::Storage(_) => "storage",
        }
    }
}

/// Renders an error as a playlist that contains only comment lines.
pub fn m3u_error_body(message: &str) -> String {
    format!("#EXTM3U\n# Error: {message}\n")
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = m3u_error_body(&self.to_string());
        (
            self.status(),
            [
                (axum::http::header::CONTENT_TYPE, "audio/x-mpegurl"),
                (axum::http::header::CACHE_CONTROL, "no-store"),
            ],
            Body::from(body),
        )
            .into_response()
    }
}
