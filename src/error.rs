use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// A store write or read that did not go through. Callers decide whether to retry.
    #[error("Store unavailable: {0}")]
    Store(String),

    /// Rejected synchronously and never retried.
    #[error("Illegal operation: {0}")]
    IllegalOperation(String),

    #[error("Submission failed after {attempts} attempt(s): {reason}")]
    SubmissionFailed { attempts: u32, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Transient failures are the ones a retry budget is allowed to spend on.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Store(_) | Error::Database(_))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (status, error_message) = match self {
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Error::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Error::Validation(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            Error::IllegalOperation(msg) => (StatusCode::CONFLICT, msg),
            Error::Store(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            err @ Error::SubmissionFailed { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            Error::Database(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            Error::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An unexpected error occurred".to_string(),
            ),
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("Resource not found".to_string()),
            other => Error::Database(other),
        }
    }
}
