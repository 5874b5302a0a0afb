//! Mapping from `sandterm_core::Error` to HTTP status codes (spec.md §7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

pub struct ApiError(pub sandterm_core::Error);

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl From<sandterm_core::Error> for ApiError {
    fn from(e: sandterm_core::Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        use sandterm_core::Error::*;
        let status = match &self.0 {
            BadRequest(_) | BadDims { .. } | PathRejected(_) | NotActive => {
                StatusCode::BAD_REQUEST
            }
            NotFound(_) => StatusCode::NOT_FOUND,
            SpawnFailed(_) | WorkspaceSetupFailed(_) | Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let resp = ApiError(sandterm_core::Error::NotFound("x".into())).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn path_rejected_maps_to_400() {
        let resp = ApiError(sandterm_core::Error::PathRejected("x".into())).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn not_active_maps_to_400() {
        let resp = ApiError(sandterm_core::Error::NotActive).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
