use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{debug, error};

pub type AppResult<T> = Result<T, Error>;

/// Clone because one failed refresh gets handed to every caller that was waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("upstream auth unavailable: {0}")]
    AuthUnavailable(String),

    #[error("upstream returned invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("invalid pointer: {0}")]
    InvalidPointer(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream rejected the request with {0}")]
    UpstreamRejected(StatusCode),

    #[error("upstream body is not a playlist")]
    NotAPlaylist,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("internal server error: {0}")]
    InternalServerErrorWithContext(String),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidPointer(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AuthUnavailable(_)
            | Self::InvalidCredentials(_)
            | Self::UpstreamUnavailable(_)
            | Self::NotAPlaylist => StatusCode::BAD_GATEWAY,
            Self::UpstreamRejected(status) => *status,
            Self::InternalServerErrorWithContext(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// timeouts and connection failures from reqwest both mean the origin is unreachable
    pub fn from_upstream(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::UpstreamUnavailable("upstream timed out".to_string())
        } else {
            Self::UpstreamUnavailable(err.to_string())
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            error!("request failed with {}: {}", status, self);
        } else {
            debug!("request rejected with {}: {}", status, self);
        }

        // keep the body short, players never show it and it shouldn't leak upstream urls
        let body = match &self {
            Self::InternalServerErrorWithContext(_) => "Internal server error".to_string(),
            Self::UpstreamRejected(status) => format!("Upstream error: {}", status.as_u16()),
            Self::UpstreamUnavailable(_) => "Upstream fetch failed".to_string(),
            other => other.to_string(),
        };

        (status, body).into_response()
    }
}
