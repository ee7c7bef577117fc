pub mod checkout;
pub mod orders;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use slog::Logger;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::collaborators::{AddressBook, CartProvider, CatalogDirectory};
use crate::db::DbPool;
use crate::logging::{logging_middleware, LoggingState};
use crate::services::{
    checkout::{CheckoutService, CheckoutSettings},
    invoicing::{InvoiceIssuer, InvoicingService},
    orders::OrderService,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: OrderService,
    pub checkout: CheckoutService,
    pub invoicing: InvoicingService,
}

/// External systems the services are wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub carts: Arc<dyn CartProvider>,
    pub catalog: Arc<dyn CatalogDirectory>,
    pub addresses: Arc<dyn AddressBook>,
    pub invoices: Arc<dyn InvoiceIssuer>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        collaborators: Collaborators,
        settings: CheckoutSettings,
    ) -> Self {
        let orders = OrderService::new(db_pool.clone());
        let checkout = CheckoutService::new(
            db_pool.clone(),
            orders.clone(),
            collaborators.carts,
            collaborators.catalog,
            collaborators.addresses,
            settings,
        );
        let invoicing = InvoicingService::new(db_pool, collaborators.invoices);
        Self {
            orders,
            checkout,
            invoicing,
        }
    }
}

pub fn api_v1_routes() -> Router<AppState> {
    let checkout = Router::new()
        .route("/checkout", post(checkout::start_checkout))
        .route("/checkout/:session_id/address", put(checkout::select_address))
        .route("/checkout/:session_id/payment", put(checkout::select_payment))
        .route("/checkout/:session_id/review", get(checkout::review_checkout))
        .route("/checkout/:session_id/confirm", post(checkout::confirm_checkout));

    let orders = Router::new()
        .route("/orders", get(orders::list_orders))
        .route("/orders/:id", get(orders::get_order))
        .route(
            "/orders/by-number/:order_number",
            get(orders::get_order_by_number),
        )
        .route("/orders/:id/cancel", post(orders::cancel_order))
        .route("/orders/:id/transitions", post(orders::transition_order))
        .route("/orders/:id/delivery", put(orders::annotate_delivery))
        .route("/orders/:id/invoice", get(orders::issue_invoice));

    checkout.merge(orders)
}

/// Full application router: API, health, metrics and the OpenAPI document.
pub fn router(state: AppState, logger: Logger) -> Router {
    let timeout = state.config.request_timeout();
    let logging_state = Arc::new(LoggingState::new(logger));

    Router::new()
        .nest("/api/v1", api_v1_routes())
        .route("/health", get(crate::health::health_check))
        .route("/metrics", get(crate::metrics::metrics_handler))
        .route("/api-docs/openapi.json", get(crate::openapi::openapi_json))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .layer(middleware::from_fn_with_state(
            logging_state,
            logging_middleware,
        ))
        .with_state(state)
}
