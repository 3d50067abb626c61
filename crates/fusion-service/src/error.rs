use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fusion_core::FusionError;
use serde::Serialize;

use crate::auth::AuthError;
use crate::validation::ValidationError;

/// Error body shared by every failing route.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status_code: u16,
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn body(&self) -> ErrorBody {
        ErrorBody {
            status_code: self.status.as_u16(),
            error: self.status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.message.clone(),
        }
    }
}

impl From<FusionError> for ApiError {
    fn from(err: FusionError) -> Self {
        let status = if err.is_not_found() {
            StatusCode::NOT_FOUND
        } else if err.is_validation() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self::new(status, err.to_string())
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::Pattern(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            _ => Self::bad_request(err.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Key(_) => Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            _ => Self::new(StatusCode::UNAUTHORIZED, "Unauthorized"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status.as_u16();
        if self.status.is_server_error() {
            tracing::error!(status, message = %self.message, "request failed");
        } else {
            tracing::debug!(status, message = %self.message, "request rejected");
        }
        (self.status(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_root_maps_to_404_even_when_wrapped() {
        let err =
            ApiError::from(FusionError::merge(FusionError::NotFound("character 9999".into())));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert!(err.body().message.contains("character 9999"));
    }

    #[test]
    fn other_domain_failures_map_to_500() {
        for err in [
            FusionError::merge(FusionError::Upstream("timeout".into())),
            FusionError::merge(FusionError::Match("unexpected shape".into())),
            FusionError::Create("disk full".into()),
            FusionError::History("locked".into()),
        ] {
            assert_eq!(ApiError::from(err).status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[test]
    fn validation_and_auth_failures_map_to_client_errors() {
        assert_eq!(
            ApiError::from(FusionError::Validation("limit".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::from(AuthError::Expired).status(), StatusCode::UNAUTHORIZED);
        let rejected = ValidationError::Rejected(vec!["\"email\" is required".into()]);
        assert_eq!(ApiError::from(rejected).status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn broken_email_pattern_is_a_server_error() {
        let err = ApiError::from(ValidationError::Pattern("unclosed group".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body().status_code, 500);
    }

    #[test]
    fn body_carries_status_code_reason_and_message() {
        let body = ApiError::bad_request("\"email\" is required").body();
        assert_eq!(
            serde_json::to_value(&body).unwrap_or_else(|err| panic!("{err}")),
            serde_json::json!({
                "statusCode": 400,
                "error": "Bad Request",
                "message": "\"email\" is required"
            })
        );
    }
}
