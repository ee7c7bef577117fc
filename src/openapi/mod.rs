use axum::Json;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::handlers::{checkout, orders};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Furnish Orders API",
        version = "0.1.0",
        description = r#"
# Furnish Orders API

Order lifecycle for the furniture storefront: checkout, fulfilment and payment
status, cancellations, refunds and invoices.

## Authentication

Every `/api/v1` endpoint expects an HS256 bearer token issued by the identity
service:

```
Authorization: Bearer <your-jwt-token>
```

## Concurrency

Transition requests may carry the status the caller last saw as `expected`.
If the order has moved on, the request is refused with `409 Conflict` and the
error `details.current` holds the authoritative status.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Checkout", description = "Multi-step checkout"),
        (name = "Orders", description = "Order queries and lifecycle transitions"),
        (name = "health", description = "Health check endpoints")
    ),
    paths(
        checkout::start_checkout,
        checkout::select_address,
        checkout::select_payment,
        checkout::review_checkout,
        checkout::confirm_checkout,
        orders::list_orders,
        orders::get_order,
        orders::get_order_by_number,
        orders::cancel_order,
        orders::transition_order,
        orders::annotate_delivery,
        orders::issue_invoice,
        crate::health::health_check,
    ),
    components(
        schemas(
            crate::errors::ErrorResponse,
            crate::lifecycle::StatusTriplet,
            crate::lifecycle::Transition,
            crate::lifecycle::Totals,
            crate::entities::order::OrderStatus,
            crate::entities::order::PaymentStatus,
            crate::entities::order::RefundStatus,
            crate::entities::order::PaymentMethod,
            crate::collaborators::ShippingAddress,
            crate::collaborators::CartSnapshot,
            crate::collaborators::CartLine,
            crate::services::checkout::CheckoutStep,
            crate::services::checkout::CheckoutView,
            crate::services::checkout::CheckoutReview,
            crate::services::checkout::PaymentSelection,
            crate::services::checkout::CardMetadata,
            crate::services::checkout::PlacedOrder,
            crate::services::orders::DeliveryUpdate,
            checkout::SelectAddressRequest,
            checkout::SelectPaymentRequest,
            orders::OrderView,
            orders::OrderItemView,
            orders::TransitionResponse,
            orders::InvoiceView,
            orders::CancelOrderRequest,
            orders::TransitionRequest,
            crate::health::HealthInfo,
            crate::health::HealthStatus,
        )
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDocV1;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDocV1::openapi())
}
