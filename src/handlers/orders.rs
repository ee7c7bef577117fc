use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthUser,
    collaborators::ShippingAddress,
    entities::{
        invoice,
        order::{self, OrderStatus, PaymentMethod, PaymentStatus, RefundStatus},
        order_item,
    },
    lifecycle::{StatusTriplet, Totals, Transition},
    services::orders::{DeliveryUpdate, OrderDetails, OrderFilter, TransitionOutcome},
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemView {
    pub line_no: i32,
    pub product_id: Uuid,
    pub name: String,
    pub image_url: Option<String>,
    pub category: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

impl From<order_item::Model> for OrderItemView {
    fn from(item: order_item::Model) -> Self {
        Self {
            line_no: item.line_no,
            product_id: item.product_id,
            name: item.name,
            image_url: item.image_url,
            category: item.category,
            unit_price: item.unit_price,
            quantity: item.quantity,
            line_total: item.line_total,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderView {
    pub id: Uuid,
    pub order_number: String,
    pub invoice_number: String,
    pub customer_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub refund_status: Option<RefundStatus>,
    pub payment_method: PaymentMethod,
    pub card_last4: Option<String>,
    pub card_type: Option<String>,
    pub totals: Totals,
    pub shipping_address: Option<ShippingAddress>,
    pub notes: Option<String>,
    pub expected_delivery_date: NaiveDate,
    pub delivery_delay_message: Option<String>,
    pub cancellation_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refund_requested_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
    /// Present on single-order responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<OrderItemView>>,
}

impl From<order::Model> for OrderView {
    fn from(order: order::Model) -> Self {
        let shipping_address = match order.shipping_address() {
            Ok(address) => Some(address),
            Err(e) => {
                warn!(order_number = %order.order_number, error = %e, "stored address unreadable");
                None
            }
        };
        let totals = order.totals();
        Self {
            id: order.id,
            order_number: order.order_number,
            invoice_number: order.invoice_number,
            customer_id: order.customer_id,
            status: order.status,
            payment_status: order.payment_status,
            refund_status: order.refund_status,
            payment_method: order.payment_method,
            card_last4: order.card_last4,
            card_type: order.card_type,
            totals,
            shipping_address,
            notes: order.notes,
            expected_delivery_date: order.expected_delivery_date,
            delivery_delay_message: order.delivery_delay_message,
            cancellation_reason: order.cancellation_reason,
            cancelled_at: order.cancelled_at,
            refund_requested_at: order.refund_requested_at,
            created_at: order.created_at,
            updated_at: order.updated_at,
            version: order.version,
            items: None,
        }
    }
}

impl From<OrderDetails> for OrderView {
    fn from(details: OrderDetails) -> Self {
        let mut view = OrderView::from(details.order);
        view.items = Some(details.items.into_iter().map(OrderItemView::from).collect());
        view
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransitionResponse {
    pub order: OrderView,
    /// False when the order already reflected the request.
    pub applied: bool,
}

impl From<TransitionOutcome> for TransitionResponse {
    fn from(outcome: TransitionOutcome) -> Self {
        Self {
            order: outcome.order.into(),
            applied: outcome.applied,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InvoiceView {
    pub order_id: Uuid,
    pub invoice_number: String,
    pub document_ref: String,
    pub checksum: String,
    pub issued_at: DateTime<Utc>,
}

impl From<invoice::Model> for InvoiceView {
    fn from(invoice: invoice::Model) -> Self {
        Self {
            order_id: invoice.order_id,
            invoice_number: invoice.invoice_number,
            document_ref: invoice.document_ref,
            checksum: invoice.checksum,
            issued_at: invoice.issued_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CancelOrderRequest {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
    /// Status the caller last saw; a mismatch is refused with 409.
    pub expected: Option<StatusTriplet>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct TransitionRequest {
    pub transition: Transition,
    /// Status the caller last saw; a mismatch is refused with 409.
    pub expected: Option<StatusTriplet>,
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders",
    description = "Customers list their own orders; staff list all orders with optional status filters",
    params(OrderFilter),
    responses(
        (status = 200, description = "Orders retrieved successfully", body = ApiResponse<PaginatedResponse<OrderView>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(filter): Query<OrderFilter>,
    auth_user: AuthUser,
) -> ApiResult<PaginatedResponse<OrderView>> {
    let page = state
        .services
        .orders
        .list_orders(filter, &auth_user.capability())
        .await?;
    let total_pages = page.total.div_ceil(page.per_page);
    Ok(Json(ApiResponse::success(PaginatedResponse {
        items: page.orders.into_iter().map(OrderView::from).collect(),
        total: page.total,
        page: page.page,
        limit: page.per_page,
        total_pages,
    })))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order retrieved successfully", body = ApiResponse<OrderView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> ApiResult<OrderView> {
    let details = state
        .services
        .orders
        .get_order(id, &auth_user.capability())
        .await?;
    Ok(Json(ApiResponse::success(details.into())))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/by-number/{order_number}",
    summary = "Get order by number",
    description = "Retrieve an order by its public order number (e.g., ORD-20260301-K2M9QX)",
    params(("order_number" = String, Path, description = "Public order number")),
    responses(
        (status = 200, description = "Order retrieved successfully", body = ApiResponse<OrderView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn get_order_by_number(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
    auth_user: AuthUser,
) -> ApiResult<OrderView> {
    let details = state
        .services
        .orders
        .get_order_by_number(&order_number, &auth_user.capability())
        .await?;
    Ok(Json(ApiResponse::success(details.into())))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    summary = "Cancel order",
    description = "Customers cancel their own pending orders; staff holding orders:force_cancel may also cancel processing or shipped orders. Paid orders get a pending refund",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = CancelOrderRequest,
    responses(
        (status = 200, description = "Order cancelled, or already cancelled", body = ApiResponse<TransitionResponse>),
        (status = 400, description = "Missing reason", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order changed concurrently", body = crate::errors::ErrorResponse),
        (status = 422, description = "Order can no longer be cancelled", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
    Json(payload): Json<CancelOrderRequest>,
) -> ApiResult<TransitionResponse> {
    payload.validate()?;
    let outcome = state
        .services
        .orders
        .cancel_order(id, &payload.reason, payload.expected, &auth_user.capability())
        .await?;
    let message = if outcome.applied {
        "Order cancelled"
    } else {
        "Order was already cancelled"
    };
    Ok(Json(ApiResponse::success(outcome.into()).with_message(message)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/transitions",
    summary = "Apply a status transition",
    description = "Advance fulfilment, record a payment result, or move a refund forward",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = TransitionRequest,
    responses(
        (status = 200, description = "Transition applied, or already applied", body = ApiResponse<TransitionResponse>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order changed concurrently", body = crate::errors::ErrorResponse),
        (status = 422, description = "Illegal transition", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn transition_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
    Json(payload): Json<TransitionRequest>,
) -> ApiResult<TransitionResponse> {
    auth_user.require_staff()?;
    let outcome = state
        .services
        .orders
        .apply_transition(
            id,
            payload.expected,
            &payload.transition,
            &auth_user.capability(),
        )
        .await?;
    Ok(Json(ApiResponse::success(outcome.into())))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/delivery",
    summary = "Set delivery estimate",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = DeliveryUpdate,
    responses(
        (status = 200, description = "Delivery estimate updated", body = ApiResponse<OrderView>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn annotate_delivery(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
    Json(payload): Json<DeliveryUpdate>,
) -> ApiResult<OrderView> {
    let order = state
        .services
        .orders
        .annotate_delivery(id, payload, &auth_user.capability())
        .await?;
    Ok(Json(ApiResponse::success(order.into())))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/invoice",
    summary = "Get invoice",
    description = "Issues the invoice on first request; later requests return the same document",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Invoice document", body = ApiResponse<InvoiceView>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Invoice generator rejected the request", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn issue_invoice(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> ApiResult<InvoiceView> {
    let invoice = state
        .services
        .invoicing
        .issue_invoice(id, &auth_user.capability())
        .await?;
    Ok(Json(ApiResponse::success(invoice.into())))
}
