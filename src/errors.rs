use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::collaborators::CollaboratorError;
use crate::lifecycle::{LifecycleError, StatusTriplet};
use crate::services::checkout::CheckoutStep;

fn current_request_id() -> Option<String> {
    crate::logging::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Conflict",
    "message": "Order changed concurrently; current state is status=processing payment=paid refund=none",
    "details": {
        "current": {"status": "processing", "payment_status": "paid", "refund_status": null}
    },
    "request_id": "3f0c1d9e-8d59-4a4c-9d2b-52f1c0d3a111",
    "timestamp": "2026-03-02T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Authoritative order state for rejected transitions, or the checkout step
    /// a checkout error occurred on
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Order creation failed: {0}")]
    OrderCreationFailed(String),

    #[error("Checkout step {actual} cannot be completed before {expected}")]
    CheckoutStepOutOfOrder {
        expected: CheckoutStep,
        actual: CheckoutStep,
    },

    #[error("Transition not permitted: {message}")]
    TransitionForbidden {
        current: StatusTriplet,
        message: String,
    },

    #[error("Invalid transition: {message}")]
    InvalidTransition {
        current: StatusTriplet,
        message: String,
    },

    #[error("Order changed concurrently; current state is {current}")]
    StaleStatus { current: StatusTriplet },

    #[error("Refund invariant: {message}")]
    RefundInvariant {
        current: StatusTriplet,
        message: String,
    },

    #[error("Monetary invariant violated: {0}")]
    MonetaryInvariantViolation(String),

    #[error("Collaborator error: {0}")]
    CollaboratorError(#[from] CollaboratorError),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<LifecycleError> for ServiceError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Forbidden { current, message } => {
                ServiceError::TransitionForbidden { current, message }
            }
            LifecycleError::Invalid { current, message } => {
                ServiceError::InvalidTransition { current, message }
            }
            LifecycleError::RefundInvariant { current, message } => {
                ServiceError::RefundInvariant { current, message }
            }
            LifecycleError::MissingReason => {
                ServiceError::ValidationError("a cancellation reason is required".to_string())
            }
            LifecycleError::MonetaryInvariant { total, expected } => {
                ServiceError::MonetaryInvariantViolation(format!(
                    "total {} does not equal subtotal + shipping - discount ({})",
                    total, expected
                ))
            }
        }
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::EmptyCart
            | Self::InvalidAddress(_)
            | Self::CheckoutStepOutOfOrder { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) | Self::TransitionForbidden { .. } => StatusCode::FORBIDDEN,
            Self::StaleStatus { .. } => StatusCode::CONFLICT,
            Self::InvalidTransition { .. } | Self::RefundInvariant { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::CollaboratorError(CollaboratorError::Rejected { .. }) => StatusCode::BAD_GATEWAY,
            Self::CollaboratorError(CollaboratorError::Unavailable { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::DatabaseError(_)
            | Self::OrderCreationFailed(_)
            | Self::MonetaryInvariantViolation(_)
            | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            Self::OrderCreationFailed(_) => {
                "Order could not be created; your checkout selections were kept".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Structured context rendered into [`ErrorResponse::details`].
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::InvalidTransition { current, .. }
            | Self::TransitionForbidden { current, .. }
            | Self::StaleStatus { current }
            | Self::RefundInvariant { current, .. } => Some(json!({ "current": current })),
            Self::CheckoutStepOutOfOrder { expected, actual } => {
                Some(json!({ "step": actual, "required_step": expected }))
            }
            Self::EmptyCart => Some(json!({ "step": CheckoutStep::Address })),
            Self::InvalidAddress(_) => Some(json!({ "step": CheckoutStep::Address })),
            Self::OrderCreationFailed(_) => Some(json!({ "step": CheckoutStep::Review })),
            _ => None,
        }
    }

    /// Authoritative triplet carried by transition errors.
    pub fn current_triplet(&self) -> Option<StatusTriplet> {
        match self {
            Self::InvalidTransition { current, .. }
            | Self::TransitionForbidden { current, .. }
            | Self::StaleStatus { current }
            | Self::RefundInvariant { current, .. } => Some(*current),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: self.details(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
