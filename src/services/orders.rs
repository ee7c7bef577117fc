use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use sea_orm::{
    sea_query::Expr, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait,
    DbErr, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{
        order::{
            self, Entity as OrderEntity, Model as OrderModel, OrderStatus, PaymentStatus,
            RefundStatus,
        },
        order_item::{self, Entity as OrderItemEntity},
    },
    errors::ServiceError,
    events::{outbox, Event},
    lifecycle::{
        self, Capability, LifecycleError, Planned, StatusTriplet, Transition, TransitionPlan,
    },
    metrics,
};

/// An order header with its frozen line items, in cart order.
#[derive(Debug, Clone)]
pub struct OrderDetails {
    pub order: OrderModel,
    pub items: Vec<order_item::Model>,
}

/// Result of [`OrderService::apply_transition`]. `applied` is false when the
/// order already reflected the transition and nothing was written.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub order: OrderModel,
    pub applied: bool,
}

/// Staff-supplied delivery estimate.
#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct DeliveryUpdate {
    pub expected_delivery_date: NaiveDate,
    /// Customer-facing explanation; blank clears a previous message.
    #[validate(length(max = 500))]
    pub delay_message: Option<String>,
}

/// List filters. Customers always see only their own orders, whatever
/// `customer_id` says.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub refund_status: Option<RefundStatus>,
    pub customer_id: Option<Uuid>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

impl Default for OrderFilter {
    fn default() -> Self {
        Self {
            status: None,
            payment_status: None,
            refund_status: None,
            customer_id: None,
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

const MAX_PER_PAGE: u64 = 100;
const MAX_WRITE_ATTEMPTS: u32 = 5;
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct OrderPage {
    pub orders: Vec<OrderModel>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Service for reading orders and moving them through their lifecycle.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Applies `transition` to an order as one guarded read-validate-write.
    ///
    /// When `expected` is given it must equal the stored triplet, otherwise the
    /// request is refused with [`ServiceError::StaleStatus`]. Independently of
    /// `expected`, the write is conditional on the triplet read at the start,
    /// so a concurrent change between read and write also ends in
    /// `StaleStatus` and never in a lost update. Events describing the change
    /// are written to the outbox in the same transaction.
    #[instrument(skip(self, cap), fields(order_id = %order_id, transition = %transition, actor = %cap.actor_id))]
    pub async fn apply_transition(
        &self,
        order_id: Uuid,
        expected: Option<StatusTriplet>,
        transition: &Transition,
        cap: &Capability,
    ) -> Result<TransitionOutcome, ServiceError> {
        let result = self
            .apply_transition_inner(order_id, expected, transition, cap)
            .await;
        let outcome = match &result {
            Ok(outcome) if outcome.applied => "applied",
            Ok(_) => "noop",
            Err(ServiceError::StaleStatus { .. }) => "stale",
            Err(_) => "rejected",
        };
        metrics::record_transition(transition.kind(), outcome);
        result
    }

    async fn apply_transition_inner(
        &self,
        order_id: Uuid,
        expected: Option<StatusTriplet>,
        transition: &Transition,
        cap: &Capability,
    ) -> Result<TransitionOutcome, ServiceError> {
        let db = &*self.db_pool;
        let order = find_visible(db, order_id, cap).await?;
        order.totals().verify()?;
        let current = order.triplet();
        current.check_invariants()?;

        let plan = match lifecycle::plan(current, transition, cap, Utc::now()) {
            Err(err @ LifecycleError::Forbidden { .. }) => {
                warn!(%current, "transition refused: {}", err);
                return Err(err.into());
            }
            Err(LifecycleError::MissingReason) => return Err(LifecycleError::MissingReason.into()),
            Ok(Planned::AlreadyApplied) => {
                info!(%current, "transition already applied; nothing to do");
                return Ok(TransitionOutcome {
                    order,
                    applied: false,
                });
            }
            _ if expected.map_or(false, |seen| seen != current) => {
                return Err(ServiceError::StaleStatus { current });
            }
            Ok(Planned::Apply(plan)) => plan,
            Err(e) => return Err(e.into()),
        };

        let mut attempt = 0;
        let updated = loop {
            attempt += 1;
            match self.write_plan(&order, &plan).await {
                Ok(Some(updated)) => break updated,
                Ok(None) => return self.lost_race(order_id, &plan, transition, cap).await,
                Err(e) if is_lock_contention(&e) => {
                    let latest = self.reload(order_id).await?;
                    if latest.triplet() != plan.from {
                        return self.lost_race(order_id, &plan, transition, cap).await;
                    }
                    if attempt >= MAX_WRITE_ATTEMPTS {
                        return Err(e);
                    }
                    warn!(attempt, "database busy; retrying transition write");
                    tokio::time::sleep(WRITE_RETRY_DELAY * attempt).await;
                }
                Err(e) => return Err(e),
            }
        };

        info!(
            order_number = %updated.order_number,
            from = %plan.from,
            to = %plan.to,
            "order transition applied"
        );
        Ok(TransitionOutcome {
            order: updated,
            applied: true,
        })
    }

    /// Writes a plan and its events in one transaction. The guarded update is
    /// the first statement, so the transaction takes the write lock before it
    /// reads anything. `None` means the row no longer holds `plan.from`.
    async fn write_plan(
        &self,
        order: &OrderModel,
        plan: &TransitionPlan,
    ) -> Result<Option<OrderModel>, ServiceError> {
        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin transaction");
            ServiceError::DatabaseError(e)
        })?;

        if guarded_update(&txn, order, plan).await? == 0 {
            txn.rollback().await?;
            return Ok(None);
        }

        for event in plan_events(order, plan) {
            outbox::enqueue(&txn, &event).await?;
        }

        let updated = OrderEntity::find_by_id(order.id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order.id)))?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit transition");
            ServiceError::DatabaseError(e)
        })?;
        Ok(Some(updated))
    }

    /// Outcome for a writer whose snapshot went stale before its write. A
    /// concurrent identical request counts as already applied.
    async fn lost_race(
        &self,
        order_id: Uuid,
        plan: &TransitionPlan,
        transition: &Transition,
        cap: &Capability,
    ) -> Result<TransitionOutcome, ServiceError> {
        let latest = self.reload(order_id).await?;
        let current = latest.triplet();
        warn!(seen = %plan.from, latest = %current, "order changed concurrently");
        match lifecycle::plan(current, transition, cap, Utc::now()) {
            Ok(Planned::AlreadyApplied) => Ok(TransitionOutcome {
                order: latest,
                applied: false,
            }),
            _ => Err(ServiceError::StaleStatus { current }),
        }
    }

    async fn reload(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Cancels an order on behalf of a customer or staff member.
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        reason: &str,
        expected: Option<StatusTriplet>,
        cap: &Capability,
    ) -> Result<TransitionOutcome, ServiceError> {
        let transition = Transition::Cancel {
            reason: reason.to_string(),
        };
        self.apply_transition(order_id, expected, &transition, cap)
            .await
    }

    /// Records a staff delivery estimate. Independent of the status tracks.
    #[instrument(skip(self, update, cap), fields(order_id = %order_id))]
    pub async fn annotate_delivery(
        &self,
        order_id: Uuid,
        update: DeliveryUpdate,
        cap: &Capability,
    ) -> Result<OrderModel, ServiceError> {
        if !cap.is_staff() {
            return Err(ServiceError::Forbidden(
                "only staff may change delivery estimates".to_string(),
            ));
        }
        update.validate()?;
        let delay_message = update
            .delay_message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());

        let order = find_visible(&*self.db_pool, order_id, cap).await?;

        let mut attempt = 0;
        let updated = loop {
            attempt += 1;
            match self
                .write_delivery(&order, update.expected_delivery_date, delay_message.clone())
                .await
            {
                Ok(updated) => break updated,
                Err(e) if is_lock_contention(&e) && attempt < MAX_WRITE_ATTEMPTS => {
                    warn!(attempt, "database busy; retrying delivery update");
                    tokio::time::sleep(WRITE_RETRY_DELAY * attempt).await;
                }
                Err(e) => return Err(e),
            }
        };

        info!(
            order_number = %updated.order_number,
            expected = %updated.expected_delivery_date,
            "delivery estimate updated"
        );
        Ok(updated)
    }

    async fn write_delivery(
        &self,
        order: &OrderModel,
        expected_delivery_date: NaiveDate,
        delay_message: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db_pool.begin().await?;

        let changes = order::ActiveModel {
            expected_delivery_date: Set(expected_delivery_date),
            delivery_delay_message: Set(delay_message.clone()),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        OrderEntity::update_many()
            .set(changes)
            .col_expr(order::Column::Version, Expr::col(order::Column::Version).add(1))
            .filter(order::Column::Id.eq(order.id))
            .exec(&txn)
            .await?;

        outbox::enqueue(
            &txn,
            &Event::DeliveryRescheduled {
                order_id: order.id,
                order_number: order.order_number.clone(),
                expected_delivery_date,
                delay_message,
            },
        )
        .await?;

        let updated = OrderEntity::find_by_id(order.id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order.id)))?;
        txn.commit().await?;
        Ok(updated)
    }

    #[instrument(skip(self, cap))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        cap: &Capability,
    ) -> Result<OrderDetails, ServiceError> {
        let db = &*self.db_pool;
        let order = find_visible(db, order_id, cap).await?;
        let items = load_items(db, order.id).await?;
        Ok(OrderDetails { order, items })
    }

    #[instrument(skip(self, cap))]
    pub async fn get_order_by_number(
        &self,
        order_number: &str,
        cap: &Capability,
    ) -> Result<OrderDetails, ServiceError> {
        let db = &*self.db_pool;
        let order = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(db)
            .await?
            .filter(|o| cap.can_access(o.customer_id))
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))?;
        let items = load_items(db, order.id).await?;
        Ok(OrderDetails { order, items })
    }

    /// Lists orders newest first.
    #[instrument(skip(self, cap))]
    pub async fn list_orders(
        &self,
        filter: OrderFilter,
        cap: &Capability,
    ) -> Result<OrderPage, ServiceError> {
        let db = &*self.db_pool;
        let page = filter.page.max(1);
        let per_page = filter.per_page.clamp(1, MAX_PER_PAGE);

        let mut query = OrderEntity::find();
        let customer = if cap.is_staff() {
            filter.customer_id
        } else {
            Some(cap.actor_id)
        };
        if let Some(customer_id) = customer {
            query = query.filter(order::Column::CustomerId.eq(customer_id));
        }
        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status));
        }
        if let Some(payment_status) = filter.payment_status {
            query = query.filter(order::Column::PaymentStatus.eq(payment_status));
        }
        if let Some(refund_status) = filter.refund_status {
            query = query.filter(order::Column::RefundStatus.eq(refund_status));
        }

        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::OrderNumber)
            .paginate(db, per_page);
        let total = paginator.num_items().await.map_err(|e| {
            error!(error = %e, "Failed to count orders");
            ServiceError::DatabaseError(e)
        })?;
        let orders = paginator.fetch_page(page - 1).await.map_err(|e| {
            error!(error = %e, page, "Failed to fetch orders page");
            ServiceError::DatabaseError(e)
        })?;

        Ok(OrderPage {
            orders,
            total,
            page,
            per_page,
        })
    }
}

/// Loads an order the caller may see. Orders of other customers are reported
/// as missing rather than forbidden.
async fn find_visible<C>(db: &C, order_id: Uuid, cap: &Capability) -> Result<OrderModel, ServiceError>
where
    C: ConnectionTrait,
{
    OrderEntity::find_by_id(order_id)
        .one(db)
        .await
        .map_err(|e| {
            error!(error = %e, %order_id, "Failed to fetch order");
            ServiceError::DatabaseError(e)
        })?
        .filter(|o| cap.can_access(o.customer_id))
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
}

async fn load_items<C>(db: &C, order_id: Uuid) -> Result<Vec<order_item::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(OrderItemEntity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_item::Column::LineNo)
        .all(db)
        .await?)
}

/// Writes the plan only if the row still holds the triplet it was planned
/// from. Returns the number of rows changed.
async fn guarded_update<C>(db: &C, order: &OrderModel, plan: &TransitionPlan) -> Result<u64, ServiceError>
where
    C: ConnectionTrait,
{
    let mut changes = order::ActiveModel {
        status: Set(plan.to.status),
        payment_status: Set(plan.to.payment_status),
        refund_status: Set(plan.to.refund_status),
        updated_at: Set(Utc::now()),
        ..Default::default()
    };
    if let Some(reason) = &plan.cancellation_reason {
        changes.cancellation_reason = Set(Some(reason.clone()));
    }
    if let Some(at) = plan.cancelled_at {
        changes.cancelled_at = Set(Some(at));
    }
    if let Some(at) = plan.refund_requested_at {
        changes.refund_requested_at = Set(Some(at));
    }

    let refund_guard = match plan.from.refund_status {
        Some(refund) => order::Column::RefundStatus.eq(refund),
        None => order::Column::RefundStatus.is_null(),
    };

    let result = OrderEntity::update_many()
        .set(changes)
        .col_expr(order::Column::Version, Expr::col(order::Column::Version).add(1))
        .filter(order::Column::Id.eq(order.id))
        .filter(order::Column::Status.eq(plan.from.status))
        .filter(order::Column::PaymentStatus.eq(plan.from.payment_status))
        .filter(refund_guard)
        .exec(db)
        .await
        .map_err(|e| {
            error!(error = %e, order_id = %order.id, "Failed to write transition");
            ServiceError::DatabaseError(e)
        })?;
    Ok(result.rows_affected)
}

/// SQLite refuses a write that cannot take the database lock with
/// `SQLITE_BUSY` (5) or `SQLITE_LOCKED` (6).
fn is_lock_contention(err: &ServiceError) -> bool {
    match err {
        ServiceError::DatabaseError(e) => is_busy(e),
        _ => false,
    }
}

fn is_busy(err: &DbErr) -> bool {
    let message = err.to_string();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("(code: 5)")
        || message.contains("(code: 6)")
}

fn plan_events(order: &OrderModel, plan: &TransitionPlan) -> Vec<Event> {
    let mut events = Vec::new();
    if plan.status_changed() {
        events.push(Event::OrderStatusChanged {
            order_id: order.id,
            order_number: order.order_number.clone(),
            old_status: plan.from.status,
            new_status: plan.to.status,
        });
    }
    if plan.payment_changed() {
        events.push(Event::PaymentStatusChanged {
            order_id: order.id,
            order_number: order.order_number.clone(),
            old_status: plan.from.payment_status,
            new_status: plan.to.payment_status,
        });
    }
    if plan.refund_changed() {
        events.push(Event::RefundStatusChanged {
            order_id: order.id,
            order_number: order.order_number.clone(),
            old_status: plan.from.refund_status,
            new_status: plan.to.refund_status,
        });
    }
    events
}
