use crate::cloudant::ServiceError;
use crate::pagination::PaginationError;
use crate::token_exchange::{ExchangeError, TokenExchangeResponse};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Everything that can end a request early.
///
/// Application-level outcomes (no cr-token, IAM refusing the exchange, unknown instance name)
/// are answered with `200` and a `message`, like any other result. Failures of the calls
/// themselves become `5xx` responses naming the kind of failure.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("error reading service account token")]
    CredentialUnavailable,
    #[error("IAM did not issue an access token")]
    ExchangeFailed(TokenExchangeResponse),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error(transparent)]
    Pagination(#[from] PaginationError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("resource controller did not return resource instances")]
    ListingFailed(serde_json::Value),
    #[error("no resource instance named {0}")]
    InstanceNotFound(String),
    #[error("resource instance {0} has no public endpoint")]
    EndpointMissing(String),
}

impl AppError {
    /// Short machine readable name of the failure.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::CredentialUnavailable => "credential-unavailable",
            AppError::ExchangeFailed(_) => "exchange-failed",
            AppError::ListingFailed(_) => "listing-failed",
            AppError::Exchange(ExchangeError::TokenServiceError(_)) => "downstream-unreachable",
            AppError::Exchange(ExchangeError::InvalidResponseData(_)) => "parse-error",
            AppError::Pagination(e) => match e {
                PaginationError::Request { .. } => "downstream-unreachable",
                PaginationError::Decode { .. }
                | PaginationError::InvalidCursor { .. }
                | PaginationError::MissingResults { .. } => "parse-error",
                PaginationError::InvalidUrl { .. } | PaginationError::InvalidHeader(_) => {
                    "invalid-request"
                }
                PaginationError::CursorCycle { .. } | PaginationError::PageLimit(_) => {
                    "pagination-aborted"
                }
            },
            AppError::Service(e) => e.kind(),
            AppError::InstanceNotFound(_) => "instance-not-found",
            AppError::EndpointMissing(_) => "endpoint-missing",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::CredentialUnavailable
            | AppError::ExchangeFailed(_)
            | AppError::ListingFailed(_)
            | AppError::InstanceNotFound(_)
            | AppError::EndpointMissing(_) => StatusCode::OK,
            AppError::Exchange(_) | AppError::Service(_) => StatusCode::BAD_GATEWAY,
            AppError::Pagination(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            // The upstream error body is what the caller needs to see.
            AppError::ExchangeFailed(response) => json!({"message": response.into_value()}),
            AppError::ListingFailed(body) => json!({"message": body}),
            e if status.is_success() => json!({"message": e.to_string()}),
            e => {
                tracing::error!(kind = e.kind(), "Request failed: {}", e);
                json!({"message": e.to_string(), "error": e.kind()})
            }
        };
        (status, Json(body)).into_response()
    }
}
