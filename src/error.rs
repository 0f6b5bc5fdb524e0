use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// One field-level validation message, surfaced to the caller as-is.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Everything a route handler can fail with. All variants are recovered at
/// the route boundary and turned into a response; none crash the process.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("forbidden")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("identity provider exchange failed: {0}")]
    ProviderExchange(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        AppError::Validation(vec![FieldError::new(field, message)])
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<FieldError>,
}

impl ErrorBody {
    fn message(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            fields: Vec::new(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Validation(fields) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "validation failed".into(),
                    fields,
                },
            ),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, ErrorBody::message(msg)),
            AppError::Forbidden => (StatusCode::FORBIDDEN, ErrorBody::message("forbidden")),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                ErrorBody::message(format!("{what} not found")),
            ),
            AppError::ProviderExchange(detail) => {
                // Provider internals go to the log, never to the client.
                warn!(%detail, "identity provider exchange failed");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorBody::message("authentication with the identity provider failed"),
                )
            }
            AppError::Transport(detail) => {
                error!(%detail, "transport failure");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorBody::message("temporary failure, please try again"),
                )
            }
            AppError::Internal(e) => {
                error!(error = %e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::message("internal server error"),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        if matches!(e, sqlx::Error::RowNotFound) {
            return AppError::NotFound("record");
        }
        if let Some(db) = e.as_database_error() {
            // Unique constraints are the source of truth for username/email
            // uniqueness; the application-level lookup is only an early exit.
            if db.code().as_deref() == Some("23505") {
                let field = match db.constraint() {
                    Some("users_username_key") => "username",
                    Some("users_email_key") => "email",
                    _ => "value",
                };
                return AppError::validation(field, "already taken");
            }
        }
        AppError::Internal(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_400_with_fields() {
        let resp = AppError::validation("email", "already taken").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn forbidden_maps_to_403() {
        let resp = AppError::Forbidden.into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn not_found_maps_to_404() {
        let resp = AppError::NotFound("post").into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn provider_exchange_is_a_generic_400() {
        let resp = AppError::ProviderExchange("token endpoint said 500".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn transport_maps_to_503() {
        let resp = AppError::Transport("smtp connect timed out".into()).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn row_not_found_becomes_not_found() {
        let err = AppError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[derive(Debug)]
    struct UniqueViolation {
        constraint: &'static str,
    }

    impl std::fmt::Display for UniqueViolation {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "duplicate key value violates unique constraint")
        }
    }

    impl std::error::Error for UniqueViolation {}

    impl sqlx::error::DatabaseError for UniqueViolation {
        fn message(&self) -> &str {
            "duplicate key value violates unique constraint"
        }

        fn code(&self) -> Option<std::borrow::Cow<'_, str>> {
            Some("23505".into())
        }

        fn constraint(&self) -> Option<&str> {
            Some(self.constraint)
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::UniqueViolation
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }
    }

    fn unique_violation(constraint: &'static str) -> AppError {
        AppError::from(sqlx::Error::Database(Box::new(UniqueViolation {
            constraint,
        })))
    }

    #[test]
    fn duplicate_email_maps_to_an_email_field_error() {
        match unique_violation("users_email_key") {
            AppError::Validation(fields) => {
                assert_eq!(fields, vec![FieldError::new("email", "already taken")]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_username_maps_to_a_username_field_error() {
        match unique_violation("users_username_key") {
            AppError::Validation(fields) => {
                assert_eq!(fields, vec![FieldError::new("username", "already taken")]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_unique_constraint_still_reports_a_conflict() {
        match unique_violation("some_other_key") {
            AppError::Validation(fields) => {
                assert_eq!(fields, vec![FieldError::new("value", "already taken")]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
