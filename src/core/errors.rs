use http::StatusCode;
use serde::Serialize;
use spin_sdk::http::Response;
use thiserror::Error as ThisError;

/// A single rejected form field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self { field, message: message.into() }
    }
}

#[derive(ThisError, Debug)]
pub enum AppError {
    /// Username or email already belongs to another account
    #[error("Please use a different {field}")]
    DuplicateIdentity { field: &'static str },

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("You cannot follow yourself!")]
    SelfFollowRejected,

    #[error("The password reset link is invalid or has expired")]
    InvalidOrExpiredToken,

    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: String },

    #[error("{}", join_field_errors(.0))]
    ValidationFailed(Vec<FieldError>),

    #[error("Please log in to access this page.")]
    Unauthenticated,

    /// The store rejected a commit because data read by the request changed
    #[error("Conflicting update, please retry")]
    Conflict,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl AppError {
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        AppError::NotFound { resource, id: id.into() }
    }

    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        AppError::ValidationFailed(vec![FieldError::new(field, message)])
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::DuplicateIdentity { .. } => StatusCode::CONFLICT,
            AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::SelfFollowRejected => StatusCode::BAD_REQUEST,
            AppError::InvalidOrExpiredToken => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Conflict => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the user; internal details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Internal(_) => "An unexpected error has occurred".to_string(),
            other => other.to_string(),
        }
    }

    /// Domain errors are re-rendered for the user; the rest are server faults.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, AppError::Internal(_) | AppError::Conflict)
    }
}

impl From<AppError> for Response {
    fn from(err: AppError) -> Self {
        if let AppError::Internal(ref source) = err {
            tracing::error!(error = ?source, "request failed");
        }
        let status = err.status_code();
        crate::templates::render_error(status.as_u16(), &err.user_message())
    }
}

pub type AppResult<T> = Result<T, AppError>;
