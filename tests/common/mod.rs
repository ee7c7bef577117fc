#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    response::Response,
    Router,
};
use rust_decimal_macros::dec;
use sea_orm::{EntityTrait, QueryOrder};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use furnish_orders::{
    auth::{consts, roles, AuthService},
    collaborators::{
        CartLine, CartSnapshot, InMemoryAddressBook, InMemoryCarts, InMemoryCatalog,
        ShippingAddress,
    },
    config::AppConfig,
    db::{self, DbPool},
    entities::{order::PaymentMethod, outbox_event},
    events::{outbox, Event, EventSender},
    handlers::{self, AppServices, Collaborators},
    logging,
    services::{
        checkout::{CardMetadata, CheckoutSettings, PaymentSelection, PlacedOrder},
        invoicing::DigestInvoiceIssuer,
    },
    AppState,
};

pub const TEST_SECRET: &str =
    "furnish-orders-integration-signing-key/with-enough-entropy-for-hs256-Lp4Rx";

/// A caller with a signed bearer token.
#[derive(Clone, Debug)]
pub struct Actor {
    pub id: Uuid,
    pub token: String,
}

/// Application wired to an in-memory SQLite database and in-memory collaborators.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub db: Arc<DbPool>,
    pub carts: Arc<InMemoryCarts>,
    pub catalog: Arc<InMemoryCatalog>,
    pub addresses: Arc<InMemoryAddressBook>,
    auth: Arc<AuthService>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Builds the app after letting the caller adjust the configuration.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:", TEST_SECRET);
        cfg.payment_capture_delay_ms = 0;
        cfg.default_lead_days = 7;
        cfg.lead_times.insert("dining".to_string(), 12);
        cfg.lead_times.insert("decor".to_string(), 3);
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let carts = Arc::new(InMemoryCarts::new());
        let catalog = Arc::new(InMemoryCatalog::from_lead_times(&cfg.lead_times));
        let addresses = Arc::new(InMemoryAddressBook::new());
        let collaborators = Collaborators {
            carts: carts.clone(),
            catalog: catalog.clone(),
            addresses: addresses.clone(),
            invoices: Arc::new(DigestInvoiceIssuer),
        };

        let auth = Arc::new(AuthService::new(cfg.jwt_secret.clone()));
        let services =
            AppServices::new(db_arc.clone(), collaborators, CheckoutSettings::from(&cfg));
        let state = AppState {
            db: db_arc.clone(),
            config: cfg,
            auth: auth.clone(),
            services,
        };
        let router = handlers::router(state.clone(), logging::discard_logger());

        Self {
            router,
            state,
            db: db_arc,
            carts,
            catalog,
            addresses,
            auth,
        }
    }

    /// Builds the app on a SQLite file, so transactions race over a pool of
    /// real connections. Keep the directory alive for the test's duration.
    pub async fn on_disk() -> (Self, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("furnish-orders.db").display()
        );
        let app = Self::with_config(move |cfg| cfg.database_url = url).await;
        (app, dir)
    }

    pub fn token(&self, user_id: Uuid, role: &str, permissions: &[&str]) -> String {
        self.auth
            .issue_token(user_id, role, permissions, chrono::Duration::hours(1))
            .expect("issue test token")
    }

    pub fn customer(&self) -> Actor {
        let id = Uuid::new_v4();
        Actor {
            id,
            token: self.token(id, roles::CUSTOMER, &[]),
        }
    }

    pub fn moderator(&self) -> Actor {
        let id = Uuid::new_v4();
        Actor {
            id,
            token: self.token(id, roles::MODERATOR, &[]),
        }
    }

    /// Admin holding the force-cancel permission.
    pub fn admin(&self) -> Actor {
        let id = Uuid::new_v4();
        Actor {
            id,
            token: self.token(id, roles::ADMIN, &[consts::ORDERS_FORCE_CANCEL]),
        }
    }

    /// A dining table, two cushions, shipping and a discount: total 20400.
    pub fn seed_cart(&self, customer_id: Uuid) -> CartSnapshot {
        let cart = CartSnapshot {
            lines: vec![
                CartLine {
                    product_id: Uuid::new_v4(),
                    name: "Sheesham Dining Table".to_string(),
                    image_url: Some("https://cdn.example.com/tables/sheesham.jpg".to_string()),
                    category: "dining".to_string(),
                    unit_price: dec!(20000),
                    quantity: 1,
                },
                CartLine {
                    product_id: Uuid::new_v4(),
                    name: "Jute Cushion".to_string(),
                    image_url: None,
                    category: "decor".to_string(),
                    unit_price: dec!(450),
                    quantity: 2,
                },
            ],
            shipping_cost: dec!(500),
            discount: dec!(1000),
        };
        self.carts.put(customer_id, cart.clone());
        cart
    }

    pub fn seed_address(&self, customer_id: Uuid) -> Uuid {
        self.addresses.insert(customer_id, sample_address())
    }

    /// Runs the whole checkout for `customer_id` through the service layer.
    pub async fn place_order(&self, customer_id: Uuid, method: PaymentMethod) -> PlacedOrder {
        self.seed_cart(customer_id);
        let address_id = self.seed_address(customer_id);
        let checkout = &self.state.services.checkout;

        let view = checkout
            .start(customer_id)
            .await
            .expect("start checkout");
        checkout
            .select_address(customer_id, view.session_id, address_id)
            .await
            .expect("select address");
        checkout
            .select_payment(customer_id, view.session_id, selection(method), None)
            .await
            .expect("select payment");
        checkout
            .confirm(customer_id, view.session_id)
            .await
            .expect("confirm checkout")
    }

    /// Every event written to the outbox for `order_id`, oldest first.
    pub async fn outbox_events(&self, order_id: Uuid) -> Vec<Event> {
        outbox_event::Entity::find()
            .order_by_asc(outbox_event::Column::CreatedAt)
            .all(&*self.db)
            .await
            .expect("read outbox")
            .into_iter()
            .filter(|row| row.aggregate_id == order_id)
            .map(|row| serde_json::from_str(&row.payload).expect("decode outbox payload"))
            .collect()
    }

    /// Relays pending outbox rows once and returns what was sent.
    pub async fn relay_outbox(&self) -> Vec<Event> {
        let (tx, mut rx) = mpsc::channel(256);
        outbox::drain_once(&self.db, &EventSender::new(tx), 256)
            .await
            .expect("drain outbox");
        let mut relayed = Vec::new();
        while let Ok(event) = rx.try_recv() {
            relayed.push(event);
        }
        relayed
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }
}

pub fn sample_address() -> ShippingAddress {
    ShippingAddress {
        full_name: "Meera Iyer".to_string(),
        phone: "+91 98765 43210".to_string(),
        line1: "22 Lavelle Road".to_string(),
        line2: Some("Apartment 5C".to_string()),
        city: "Bengaluru".to_string(),
        state: "Karnataka".to_string(),
        postal_code: "560001".to_string(),
        country: "India".to_string(),
    }
}

pub fn selection(method: PaymentMethod) -> PaymentSelection {
    let card = match method {
        PaymentMethod::Card => Some(CardMetadata {
            last4: "4242".to_string(),
            card_type: "visa".to_string(),
        }),
        _ => None,
    };
    PaymentSelection { method, card }
}

pub async fn read_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}
