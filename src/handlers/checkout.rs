use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::order::PaymentMethod,
    errors::ServiceError,
    lifecycle::ActorRole,
    services::checkout::{CardMetadata, CheckoutReview, CheckoutView, PaymentSelection, PlacedOrder},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct SelectAddressRequest {
    /// Address book entry owned by the caller.
    pub address_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct SelectPaymentRequest {
    pub method: PaymentMethod,
    pub card: Option<CardMetadata>,
    pub notes: Option<String>,
}

/// Checkout is something customers do for themselves.
fn shopper(auth_user: &AuthUser) -> Result<Uuid, ServiceError> {
    if auth_user.role != ActorRole::Customer {
        return Err(ServiceError::Forbidden(
            "only customers can check out".to_string(),
        ));
    }
    Ok(auth_user.user_id)
}

#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    summary = "Start checkout",
    description = "Freeze the caller's cart and open a checkout session",
    responses(
        (status = 201, description = "Checkout session opened", body = ApiResponse<CheckoutView>),
        (status = 400, description = "Cart is empty or inconsistent", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Checkout"
)]
pub async fn start_checkout(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    let customer_id = shopper(&auth_user)?;
    let view = state.services.checkout.start(customer_id).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(view))))
}

#[utoipa::path(
    put,
    path = "/api/v1/checkout/{session_id}/address",
    summary = "Select shipping address",
    params(("session_id" = Uuid, Path, description = "Checkout session ID")),
    request_body = SelectAddressRequest,
    responses(
        (status = 200, description = "Address frozen into the session", body = ApiResponse<CheckoutView>),
        (status = 400, description = "Address not found or invalid", body = crate::errors::ErrorResponse),
        (status = 404, description = "Checkout session not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Checkout"
)]
pub async fn select_address(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    auth_user: AuthUser,
    Json(payload): Json<SelectAddressRequest>,
) -> ApiResult<CheckoutView> {
    let customer_id = shopper(&auth_user)?;
    let view = state
        .services
        .checkout
        .select_address(customer_id, session_id, payload.address_id)
        .await?;
    Ok(Json(ApiResponse::success(view)))
}

#[utoipa::path(
    put,
    path = "/api/v1/checkout/{session_id}/payment",
    summary = "Select payment method",
    params(("session_id" = Uuid, Path, description = "Checkout session ID")),
    request_body = SelectPaymentRequest,
    responses(
        (status = 200, description = "Payment selection stored", body = ApiResponse<CheckoutView>),
        (status = 400, description = "Invalid selection or address step not completed", body = crate::errors::ErrorResponse),
        (status = 404, description = "Checkout session not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Checkout"
)]
pub async fn select_payment(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    auth_user: AuthUser,
    Json(payload): Json<SelectPaymentRequest>,
) -> ApiResult<CheckoutView> {
    let customer_id = shopper(&auth_user)?;
    let selection = PaymentSelection {
        method: payload.method,
        card: payload.card,
    };
    let view = state
        .services
        .checkout
        .select_payment(customer_id, session_id, selection, payload.notes)
        .await?;
    Ok(Json(ApiResponse::success(view)))
}

#[utoipa::path(
    get,
    path = "/api/v1/checkout/{session_id}/review",
    summary = "Review checkout",
    description = "Totals, selections and the expected delivery date before confirming",
    params(("session_id" = Uuid, Path, description = "Checkout session ID")),
    responses(
        (status = 200, description = "Checkout summary", body = ApiResponse<CheckoutReview>),
        (status = 400, description = "An earlier step is incomplete", body = crate::errors::ErrorResponse),
        (status = 404, description = "Checkout session not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Checkout"
)]
pub async fn review_checkout(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    auth_user: AuthUser,
) -> ApiResult<CheckoutReview> {
    let customer_id = shopper(&auth_user)?;
    let review = state
        .services
        .checkout
        .review(customer_id, session_id)
        .await?;
    Ok(Json(ApiResponse::success(review)))
}

#[utoipa::path(
    post,
    path = "/api/v1/checkout/{session_id}/confirm",
    summary = "Confirm checkout",
    description = "Place the order. On failure the session is kept so the customer can retry",
    params(("session_id" = Uuid, Path, description = "Checkout session ID")),
    responses(
        (status = 201, description = "Order placed", body = ApiResponse<PlacedOrder>),
        (status = 400, description = "An earlier step is incomplete", body = crate::errors::ErrorResponse),
        (status = 404, description = "Checkout session not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Order could not be created", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Checkout"
)]
pub async fn confirm_checkout(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    let customer_id = shopper(&auth_user)?;
    let placed = state
        .services
        .checkout
        .confirm(customer_id, session_id)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(placed))))
}
