//! Multi-step checkout: address, payment, review, confirm.
//!
//! A session holds the frozen cart snapshot and the customer's selections on
//! the server. Confirming a session creates the order, its line items and the
//! `OrderPlaced` event in one transaction; a failed confirmation leaves the
//! session untouched so the customer can retry without starting over.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait, TransactionTrait};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    collaborators::{AddressBook, CartProvider, CartSnapshot, CatalogDirectory, ShippingAddress},
    config::AppConfig,
    db::DbPool,
    entities::{
        order::{self, OrderStatus, PaymentMethod, PaymentStatus},
        order_item,
    },
    errors::ServiceError,
    events::{outbox, Event},
    lifecycle::{Capability, StatusTriplet, Totals, Transition},
    metrics,
    services::orders::OrderService,
};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CheckoutStep {
    Address,
    Payment,
    Review,
}

/// Masked card details; full card numbers never reach this service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct CardMetadata {
    #[validate(custom = "validate_last4")]
    pub last4: String,
    #[validate(length(min = 1, max = 32))]
    pub card_type: String,
}

fn validate_last4(last4: &str) -> Result<(), ValidationError> {
    if last4.len() != 4 || !last4.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::new("last4_must_be_four_digits"));
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PaymentSelection {
    pub method: PaymentMethod,
    /// Required for card payments, refused otherwise.
    pub card: Option<CardMetadata>,
}

impl PaymentSelection {
    fn check(&self) -> Result<(), ServiceError> {
        match (&self.method, &self.card) {
            (PaymentMethod::Card, Some(card)) => Ok(card.validate()?),
            (PaymentMethod::Card, None) => Err(ServiceError::ValidationError(
                "card payments require card metadata".to_string(),
            )),
            (_, Some(_)) => Err(ServiceError::ValidationError(format!(
                "card metadata is not accepted for {} payments",
                self.method
            ))),
            (_, None) => Ok(()),
        }
    }
}

const MAX_NOTES_LEN: usize = 500;

/// Checkout knobs taken from [`AppConfig`].
#[derive(Clone, Debug)]
pub struct CheckoutSettings {
    pub default_lead_days: u32,
    pub payment_capture_delay: Duration,
    pub session_ttl: Duration,
}

impl From<&AppConfig> for CheckoutSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            default_lead_days: config.default_lead_days,
            payment_capture_delay: config.payment_capture_delay(),
            session_ttl: config.checkout_session_ttl(),
        }
    }
}

#[derive(Clone, Debug)]
struct CheckoutSession {
    customer_id: Uuid,
    cart: CartSnapshot,
    address: Option<ShippingAddress>,
    payment: Option<PaymentSelection>,
    notes: Option<String>,
    touched_at: Instant,
}

impl CheckoutSession {
    fn step(&self) -> CheckoutStep {
        if self.address.is_none() {
            CheckoutStep::Address
        } else if self.payment.is_none() {
            CheckoutStep::Payment
        } else {
            CheckoutStep::Review
        }
    }

    fn totals(&self) -> Totals {
        Totals::compute(
            self.cart.subtotal(),
            self.cart.shipping_cost,
            self.cart.discount,
        )
    }

    /// Address and payment, or the step the customer has to go back to.
    fn selections(
        &self,
        attempted: CheckoutStep,
    ) -> Result<(ShippingAddress, PaymentSelection), ServiceError> {
        let address = self
            .address
            .clone()
            .ok_or(ServiceError::CheckoutStepOutOfOrder {
                expected: CheckoutStep::Address,
                actual: attempted,
            })?;
        let payment = self
            .payment
            .clone()
            .ok_or(ServiceError::CheckoutStepOutOfOrder {
                expected: CheckoutStep::Payment,
                actual: attempted,
            })?;
        Ok((address, payment))
    }
}

/// What the customer sees after each checkout step.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct CheckoutView {
    pub session_id: Uuid,
    /// Next step to complete.
    pub step: CheckoutStep,
    pub cart: CartSnapshot,
    pub totals: Totals,
    pub address: Option<ShippingAddress>,
    pub payment: Option<PaymentSelection>,
    pub notes: Option<String>,
}

impl CheckoutView {
    fn of(session_id: Uuid, session: &CheckoutSession) -> Self {
        Self {
            session_id,
            step: session.step(),
            cart: session.cart.clone(),
            totals: session.totals(),
            address: session.address.clone(),
            payment: session.payment.clone(),
            notes: session.notes.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct CheckoutReview {
    #[serde(flatten)]
    pub checkout: CheckoutView,
    pub expected_delivery_date: NaiveDate,
}

/// Identifiers and status of a freshly placed order.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PlacedOrder {
    pub order_id: Uuid,
    pub order_number: String,
    pub invoice_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total: Decimal,
    pub expected_delivery_date: NaiveDate,
}

#[derive(Clone)]
pub struct CheckoutService {
    db_pool: Arc<DbPool>,
    orders: OrderService,
    carts: Arc<dyn CartProvider>,
    catalog: Arc<dyn CatalogDirectory>,
    addresses: Arc<dyn AddressBook>,
    sessions: Arc<DashMap<Uuid, CheckoutSession>>,
    settings: CheckoutSettings,
}

impl CheckoutService {
    pub fn new(
        db_pool: Arc<DbPool>,
        orders: OrderService,
        carts: Arc<dyn CartProvider>,
        catalog: Arc<dyn CatalogDirectory>,
        addresses: Arc<dyn AddressBook>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            db_pool,
            orders,
            carts,
            catalog,
            addresses,
            sessions: Arc::new(DashMap::new()),
            settings,
        }
    }

    /// Opens a session over a snapshot of the customer's cart.
    #[instrument(skip(self))]
    pub async fn start(&self, customer_id: Uuid) -> Result<CheckoutView, ServiceError> {
        self.purge_expired();

        let cart = self.carts.snapshot(customer_id).await?;
        if cart.is_empty() {
            metrics::record_checkout("empty_cart");
            return Err(ServiceError::EmptyCart);
        }
        cart.check_amounts().map_err(ServiceError::ValidationError)?;

        let session_id = Uuid::new_v4();
        let session = CheckoutSession {
            customer_id,
            cart,
            address: None,
            payment: None,
            notes: None,
            touched_at: Instant::now(),
        };
        let view = CheckoutView::of(session_id, &session);
        self.sessions.insert(session_id, session);

        info!(%session_id, lines = view.cart.lines.len(), "checkout started");
        Ok(view)
    }

    /// Step 1: resolve and freeze a shipping address from the address book.
    #[instrument(skip(self))]
    pub async fn select_address(
        &self,
        customer_id: Uuid,
        session_id: Uuid,
        address_id: Uuid,
    ) -> Result<CheckoutView, ServiceError> {
        self.session(customer_id, session_id)?;

        let address = self
            .addresses
            .resolve(customer_id, address_id)
            .await?
            .ok_or_else(|| {
                ServiceError::InvalidAddress(format!("address {} not found", address_id))
            })?;
        address
            .validate()
            .map_err(|e| ServiceError::InvalidAddress(e.to_string()))?;

        self.update(customer_id, session_id, |session| {
            session.address = Some(address);
            Ok(())
        })
    }

    /// Step 2: choose how to pay. Only masked card metadata is accepted.
    #[instrument(skip(self, selection, notes))]
    pub async fn select_payment(
        &self,
        customer_id: Uuid,
        session_id: Uuid,
        selection: PaymentSelection,
        notes: Option<String>,
    ) -> Result<CheckoutView, ServiceError> {
        selection.check()?;
        let notes = notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        if notes.as_ref().map_or(false, |n| n.chars().count() > MAX_NOTES_LEN) {
            return Err(ServiceError::ValidationError(format!(
                "notes may not exceed {} characters",
                MAX_NOTES_LEN
            )));
        }

        self.update(customer_id, session_id, |session| {
            if session.address.is_none() {
                return Err(ServiceError::CheckoutStepOutOfOrder {
                    expected: CheckoutStep::Address,
                    actual: CheckoutStep::Payment,
                });
            }
            session.payment = Some(selection);
            session.notes = notes;
            Ok(())
        })
    }

    /// Step 3: everything the customer is about to confirm.
    #[instrument(skip(self))]
    pub async fn review(
        &self,
        customer_id: Uuid,
        session_id: Uuid,
    ) -> Result<CheckoutReview, ServiceError> {
        let session = self.session(customer_id, session_id)?;
        session.selections(CheckoutStep::Review)?;
        let expected_delivery_date = self
            .expected_delivery_date(&session.cart, Utc::now().date_naive())
            .await?;
        Ok(CheckoutReview {
            checkout: CheckoutView::of(session_id, &session),
            expected_delivery_date,
        })
    }

    pub async fn confirm(
        &self,
        customer_id: Uuid,
        session_id: Uuid,
    ) -> Result<PlacedOrder, ServiceError> {
        self.confirm_at(customer_id, session_id, Utc::now()).await
    }

    /// Places the order and clears the cart. The session is claimed before
    /// anything is written, so concurrent confirms of one session place at
    /// most one order. Every write happens in one transaction; on failure the
    /// session and cart are kept and [`ServiceError::OrderCreationFailed`]
    /// returned.
    /// Non-COD orders then go through payment capture, whose failure leaves
    /// the order placed with a pending payment.
    #[instrument(skip(self, now))]
    pub async fn confirm_at(
        &self,
        customer_id: Uuid,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<PlacedOrder, ServiceError> {
        let session = self.claim(customer_id, session_id)?;
        let (placed, method) = match self.place(customer_id, session_id, &session, now).await {
            Ok(placed) => placed,
            Err(e) => {
                self.sessions.insert(session_id, session);
                return Err(e);
            }
        };

        if let Err(e) = self.carts.clear(customer_id).await {
            warn!(error = %e, order_number = %placed.order_number, "cart not cleared after checkout");
        }
        info!(
            order_number = %placed.order_number,
            total = %placed.total,
            method = %method,
            "order placed"
        );

        let placed = if method.captures_at_checkout() {
            self.capture_payment(placed).await
        } else {
            placed
        };
        metrics::record_checkout("placed");
        Ok(placed)
    }

    async fn place(
        &self,
        customer_id: Uuid,
        session_id: Uuid,
        session: &CheckoutSession,
        now: DateTime<Utc>,
    ) -> Result<(PlacedOrder, PaymentMethod), ServiceError> {
        let (address, payment) = session.selections(CheckoutStep::Review)?;

        let totals = session.totals();
        totals.verify()?;
        let expected_delivery_date = self
            .expected_delivery_date(&session.cart, now.date_naive())
            .await?;
        let (order_number, invoice_number) = order_numbers(now);

        let draft = OrderDraft {
            order_id: Uuid::new_v4(),
            order_number,
            invoice_number,
            customer_id,
            session,
            address: &address,
            payment: &payment,
            totals,
            expected_delivery_date,
            now,
        };
        let placed = self.persist(&draft).await.map_err(|e| {
            metrics::record_checkout("failed");
            error!(error = %e, %session_id, "order creation failed");
            ServiceError::OrderCreationFailed(e.to_string())
        })?;
        Ok((placed, payment.method))
    }

    /// Lead time is the slowest category in the cart; categories the catalog
    /// has no value for use the configured default.
    async fn expected_delivery_date(
        &self,
        cart: &CartSnapshot,
        today: NaiveDate,
    ) -> Result<NaiveDate, ServiceError> {
        let mut lead_days = 0;
        for category in cart.categories() {
            let days = self
                .catalog
                .lead_time_days(category)
                .await?
                .unwrap_or(self.settings.default_lead_days);
            lead_days = lead_days.max(days);
        }
        if lead_days == 0 {
            lead_days = self.settings.default_lead_days;
        }
        Ok(today + chrono::Duration::days(i64::from(lead_days)))
    }

    async fn persist(&self, draft: &OrderDraft<'_>) -> Result<PlacedOrder, ServiceError> {
        let db = &*self.db_pool;
        let shipping_address = serde_json::to_string(draft.address)
            .map_err(|e| ServiceError::InternalError(format!("address encoding failed: {}", e)))?;
        let card = draft.payment.card.as_ref();

        let txn = db.begin().await?;
        let order = order::ActiveModel {
            id: Set(draft.order_id),
            order_number: Set(draft.order_number.clone()),
            invoice_number: Set(draft.invoice_number.clone()),
            customer_id: Set(draft.customer_id),
            status: Set(StatusTriplet::PLACED.status),
            payment_status: Set(StatusTriplet::PLACED.payment_status),
            refund_status: Set(StatusTriplet::PLACED.refund_status),
            payment_method: Set(draft.payment.method),
            card_last4: Set(card.map(|c| c.last4.clone())),
            card_type: Set(card.map(|c| c.card_type.clone())),
            subtotal: Set(draft.totals.subtotal),
            shipping_cost: Set(draft.totals.shipping_cost),
            discount: Set(draft.totals.discount),
            total: Set(draft.totals.total),
            shipping_address: Set(shipping_address),
            notes: Set(draft.session.notes.clone()),
            expected_delivery_date: Set(draft.expected_delivery_date),
            delivery_delay_message: Set(None),
            cancellation_reason: Set(None),
            cancelled_at: Set(None),
            refund_requested_at: Set(None),
            created_at: Set(draft.now),
            updated_at: Set(draft.now),
            version: Set(1),
        }
        .insert(&txn)
        .await?;

        let items: Vec<order_item::ActiveModel> = draft
            .session
            .cart
            .lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                order_item::ActiveModel::from_cart_line(order.id, i as i32 + 1, line, draft.now)
            })
            .collect();
        order_item::Entity::insert_many(items).exec(&txn).await?;

        outbox::enqueue(
            &txn,
            &Event::OrderPlaced {
                order_id: order.id,
                order_number: order.order_number.clone(),
                customer_id: order.customer_id,
                total: order.total,
                payment_method: order.payment_method,
            },
        )
        .await?;

        txn.commit().await?;

        Ok(PlacedOrder {
            order_id: order.id,
            order_number: order.order_number,
            invoice_number: order.invoice_number,
            status: order.status,
            payment_status: order.payment_status,
            total: order.total,
            expected_delivery_date: order.expected_delivery_date,
        })
    }

    /// Simulated capture: wait, then mark the payment paid.
    async fn capture_payment(&self, mut placed: PlacedOrder) -> PlacedOrder {
        tokio::time::sleep(self.settings.payment_capture_delay).await;
        let transition = Transition::Payment {
            to: PaymentStatus::Paid,
        };
        match self
            .orders
            .apply_transition(placed.order_id, None, &transition, &Capability::system())
            .await
        {
            Ok(outcome) => placed.payment_status = outcome.order.payment_status,
            Err(e) => warn!(
                error = %e,
                order_number = %placed.order_number,
                "payment capture failed; payment stays pending"
            ),
        }
        placed
    }

    /// Copy of a live session owned by `customer_id`; refreshes its TTL.
    fn session(&self, customer_id: Uuid, session_id: Uuid) -> Result<CheckoutSession, ServiceError> {
        let mut copy = None;
        self.update(customer_id, session_id, |session| {
            copy = Some(session.clone());
            Ok(())
        })?;
        copy.ok_or_else(|| session_not_found(session_id))
    }

    /// Takes the session out of the map; only one caller can hold it.
    fn claim(&self, customer_id: Uuid, session_id: Uuid) -> Result<CheckoutSession, ServiceError> {
        let (_, session) = self
            .sessions
            .remove_if(&session_id, |_, s| s.customer_id == customer_id)
            .ok_or_else(|| session_not_found(session_id))?;
        if session.touched_at.elapsed() >= self.settings.session_ttl {
            return Err(session_not_found(session_id));
        }
        Ok(session)
    }

    fn update<F>(
        &self,
        customer_id: Uuid,
        session_id: Uuid,
        apply: F,
    ) -> Result<CheckoutView, ServiceError>
    where
        F: FnOnce(&mut CheckoutSession) -> Result<(), ServiceError>,
    {
        let ttl = self.settings.session_ttl;
        let mut session = self
            .sessions
            .get_mut(&session_id)
            .filter(|s| s.customer_id == customer_id)
            .ok_or_else(|| session_not_found(session_id))?;
        if session.touched_at.elapsed() >= ttl {
            drop(session);
            self.sessions.remove(&session_id);
            return Err(session_not_found(session_id));
        }
        apply(session.value_mut())?;
        session.touched_at = Instant::now();
        Ok(CheckoutView::of(session_id, session.value()))
    }

    fn purge_expired(&self) {
        let ttl = self.settings.session_ttl;
        self.sessions.retain(|_, s| s.touched_at.elapsed() < ttl);
    }
}

struct OrderDraft<'a> {
    order_id: Uuid,
    order_number: String,
    invoice_number: String,
    customer_id: Uuid,
    session: &'a CheckoutSession,
    address: &'a ShippingAddress,
    payment: &'a PaymentSelection,
    totals: Totals,
    expected_delivery_date: NaiveDate,
    now: DateTime<Utc>,
}

fn session_not_found(session_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("Checkout session {} not found", session_id))
}

/// `ORD-YYYYMMDD-XXXXXX` and the matching `INV-` number sharing its suffix.
fn order_numbers(now: DateTime<Utc>) -> (String, String) {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    let date = now.format("%Y%m%d");
    (
        format!("ORD-{}-{}", date, suffix),
        format!("INV-{}-{}", date, suffix),
    )
}
