//! Error to HTTP response mapping

use crate::error::ReposerveError;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

/// Header carrying the current version on a 409
pub const CONFLICT_VERSION: &str = "conflictversion";

impl ReposerveError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Conflict { .. } | Self::AlreadyExists(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PathEscape(_) => StatusCode::FORBIDDEN,
            Self::PathInvalid { .. } | Self::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ReposerveError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}", self);
        } else {
            warn!("{}", self);
        }

        let mut response = (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response();
        if let Self::Conflict { current_version } = &self {
            if let Ok(value) = HeaderValue::from_str(current_version) {
                response.headers_mut().insert(CONFLICT_VERSION, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn conflict_carries_version_header() {
        let response = ReposerveError::Conflict {
            current_version: "abc".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(response.headers()[CONFLICT_VERSION], "abc");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            ReposerveError::NotFound(PathBuf::from("x")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ReposerveError::PathEscape("../x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ReposerveError::backend("git commit", "fatal").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
