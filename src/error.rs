//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::DomainError;
use crate::store::{StoreError, UniqueKey};

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Server errors (5xx)
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Failures that may succeed if the whole operation is attempted again
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Store(e) => e.is_transient(),
            AppError::Domain(DomainError::AccountNumberExhausted { .. }) => true,
            _ => false,
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }

            AppError::Domain(domain_err) => {
                let status = match domain_err {
                    DomainError::AccountNotFound(_) => StatusCode::NOT_FOUND,
                    e if e.is_conflict_error() => StatusCode::CONFLICT,
                    e if e.is_client_error() => StatusCode::BAD_REQUEST,
                    e => {
                        tracing::error!("{}", e);
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                };
                let (error_code, details) = domain_error_body(domain_err);
                (status, error_code, details)
            }

            AppError::Store(StoreError::UniqueViolation(key)) => {
                let details = match key {
                    UniqueKey::HolderId => "account_holder_id",
                    UniqueKey::AccountNumber => "account_number",
                };
                (StatusCode::CONFLICT, "conflict", Some(details.to_string()))
            }
            AppError::Store(e) if e.is_transient() => {
                tracing::warn!("Store unavailable: {:?}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", None)
            }
            AppError::Store(e) => {
                tracing::error!("Store error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Error code and details for a domain failure
fn domain_error_body(err: &DomainError) -> (&'static str, Option<String>) {
    match err {
        DomainError::AccountNotFound(id) => ("account_not_found", Some(id.clone())),
        DomainError::AccountAlreadyExists(holder) => ("account_already_exists", Some(holder.clone())),
        DomainError::InsufficientFunds { .. } => ("insufficient_funds", Some(err.to_string())),
        DomainError::BalanceLimitExceeded { .. } => ("balance_limit_exceeded", Some(err.to_string())),
        DomainError::InvalidAmount(msg) => ("invalid_amount", Some(msg.clone())),
        DomainError::AccountNumberExhausted { .. } => ("account_number_exhausted", None),
        DomainError::VersionConflict(id) => ("version_conflict", Some(id.clone())),
    }
}
