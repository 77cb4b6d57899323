use axum::{ http::StatusCode, response::{ IntoResponse, Response } };
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Upstream API error (status {status}): {message}")]
    Upstream {
        status: u16,
        message: String,
    },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Speech recognition error: {0}")]
    Speech(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        RelayError::InvalidRequest(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Client errors carry their message; everything else collapses to a generic
/// body so upstream details never reach the caller.
impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            RelayError::InvalidRequest(message) => message,
            _ => "Internal Server Error".to_string(),
        };
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_request_maps_to_bad_request() {
        let err = RelayError::invalid_request("No prompt provided");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "No prompt provided");
    }

    #[test]
    fn upstream_failure_maps_to_server_error() {
        let err = RelayError::Upstream { status: 403, message: "API key not valid".into() };
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
