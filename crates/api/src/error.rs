//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cart_store::CartStoreError;
use checkout::{CheckoutError, ErrorKind};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// The caller did not present a usable user identity.
    Unauthorized(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Commit or rollback failed.
    Checkout(CheckoutError),
    /// Reading or writing the cart outside a checkout failed.
    Store(CartStoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(msg) => error_body(StatusCode::UNAUTHORIZED, msg),
            ApiError::BadRequest(msg) => error_body(StatusCode::BAD_REQUEST, msg),
            ApiError::Checkout(err) => checkout_error_to_response(err),
            ApiError::Store(err) => {
                let status = if err.is_transient() {
                    StatusCode::SERVICE_UNAVAILABLE
                } else if matches!(
                    err,
                    CartStoreError::InvalidBatch(_)
                        | CartStoreError::DuplicateItem(_)
                        | CartStoreError::InvalidQuantity(_)
                ) {
                    StatusCode::BAD_REQUEST
                } else {
                    tracing::error!(error = %err, "cart store error");
                    StatusCode::INTERNAL_SERVER_ERROR
                };
                error_body(status, err.to_string())
            }
        }
    }
}

fn error_body(status: StatusCode, message: String) -> Response {
    let body = serde_json::json!({ "error": message });
    (status, axum::Json(body)).into_response()
}

/// Maps a checkout failure to a status code.
///
/// Partial failures always carry `"partial": true` so a caller can tell a
/// half-applied operation from one that changed nothing.
fn checkout_error_to_response(err: CheckoutError) -> Response {
    let kind = err.kind();
    let status = match (&err, kind) {
        (CheckoutError::OperationTimeout { .. }, _) => StatusCode::GATEWAY_TIMEOUT,
        (CheckoutError::NothingToCommit { .. }, _) => StatusCode::UNPROCESSABLE_ENTITY,
        (CheckoutError::ItemNotFound { .. }, _) => StatusCode::NOT_FOUND,
        (CheckoutError::InvalidQuantity { .. }, _) => StatusCode::BAD_REQUEST,
        (_, ErrorKind::Precondition) => StatusCode::CONFLICT,
        (_, ErrorKind::Transient) => StatusCode::SERVICE_UNAVAILABLE,
        (_, ErrorKind::PartialFailure) | (_, ErrorKind::Internal) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    if kind == ErrorKind::Internal {
        tracing::error!(error = %err, "internal checkout error");
    }

    let body = serde_json::json!({
        "error": err.to_string(),
        "stage": err.stage().as_str(),
        "partial": kind == ErrorKind::PartialFailure,
        "retryable": err.is_retryable(),
    });
    (status, axum::Json(body)).into_response()
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}

impl From<CartStoreError> for ApiError {
    fn from(err: CartStoreError) -> Self {
        ApiError::Store(err)
    }
}
