//! Order status state machine.
//!
//! Three tracks make up the status of an order: fulfilment, payment and
//! refund. [`plan`] decides whether a requested [`Transition`] is legal for the
//! current [`StatusTriplet`] and the caller's [`Capability`], and computes the
//! exact field values to write. It performs no I/O; persisting the plan with a
//! guarded update is the job of [`crate::services::orders::OrderService`].

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::{OrderStatus, PaymentStatus, RefundStatus};

/// The three coupled status fields of an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct StatusTriplet {
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub refund_status: Option<RefundStatus>,
}

impl StatusTriplet {
    /// State of every freshly placed order.
    pub const PLACED: StatusTriplet = StatusTriplet {
        status: OrderStatus::Pending,
        payment_status: PaymentStatus::Pending,
        refund_status: None,
    };

    /// Cross-track invariants that must hold for every stored order.
    pub fn check_invariants(&self) -> Result<(), LifecycleError> {
        if self.refund_status.is_some() && self.status != OrderStatus::Cancelled {
            return Err(LifecycleError::RefundInvariant {
                current: *self,
                message: "refund status present on an order that is not cancelled".to_string(),
            });
        }
        let refunded = self.payment_status == PaymentStatus::Refunded;
        let processed = self.refund_status == Some(RefundStatus::Processed);
        if refunded != processed {
            return Err(LifecycleError::RefundInvariant {
                current: *self,
                message: "payment is refunded exactly when the refund is processed".to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for StatusTriplet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status={} payment={}", self.status, self.payment_status)?;
        match self.refund_status {
            Some(refund) => write!(f, " refund={}", refund),
            None => write!(f, " refund=none"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActorRole {
    Customer,
    Moderator,
    Admin,
    /// Internal callers such as the simulated payment capture.
    System,
}

impl ActorRole {
    pub fn is_staff(self) -> bool {
        matches!(self, ActorRole::Moderator | ActorRole::Admin)
    }
}

/// Who is asking for a change, passed explicitly into every transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Capability {
    pub actor_id: Uuid,
    pub role: ActorRole,
    /// Staff may cancel orders that already left `pending`.
    pub force_cancel: bool,
}

impl Capability {
    pub fn customer(actor_id: Uuid) -> Self {
        Self {
            actor_id,
            role: ActorRole::Customer,
            force_cancel: false,
        }
    }

    pub fn staff(actor_id: Uuid, role: ActorRole, force_cancel: bool) -> Self {
        Self {
            actor_id,
            role,
            force_cancel,
        }
    }

    pub fn system() -> Self {
        Self {
            actor_id: Uuid::nil(),
            role: ActorRole::System,
            force_cancel: false,
        }
    }

    pub fn is_staff(&self) -> bool {
        self.role.is_staff()
    }

    /// Customers act only on their own orders; everyone else sees all orders.
    pub fn can_access(&self, owner: Uuid) -> bool {
        match self.role {
            ActorRole::Customer => self.actor_id == owner,
            _ => true,
        }
    }
}

/// A requested change to one track of the status triplet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    /// Move the order forward along pending, processing, shipped, delivered.
    Advance { to: OrderStatus },
    Cancel { reason: String },
    Payment { to: PaymentStatus },
    Refund { to: RefundStatus },
}

impl Transition {
    pub fn kind(&self) -> &'static str {
        match self {
            Transition::Advance { .. } => "advance",
            Transition::Cancel { .. } => "cancel",
            Transition::Payment { .. } => "payment",
            Transition::Refund { .. } => "refund",
        }
    }

    /// True when `current` already reflects this transition.
    pub fn is_applied_in(&self, current: &StatusTriplet) -> bool {
        match self {
            Transition::Advance { to } => current.status == *to,
            Transition::Cancel { .. } => current.status == OrderStatus::Cancelled,
            Transition::Payment { to } => current.payment_status == *to,
            Transition::Refund { to } => current.refund_status == Some(*to),
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Advance { to } => write!(f, "advance to {}", to),
            Transition::Cancel { .. } => write!(f, "cancel"),
            Transition::Payment { to } => write!(f, "payment to {}", to),
            Transition::Refund { to } => write!(f, "refund to {}", to),
        }
    }
}

/// Field values a legal transition writes, all in one update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionPlan {
    pub from: StatusTriplet,
    pub to: StatusTriplet,
    pub cancellation_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refund_requested_at: Option<DateTime<Utc>>,
}

impl TransitionPlan {
    fn starting_at(from: StatusTriplet) -> Self {
        Self {
            from,
            to: from,
            cancellation_reason: None,
            cancelled_at: None,
            refund_requested_at: None,
        }
    }

    pub fn status_changed(&self) -> bool {
        self.from.status != self.to.status
    }

    pub fn payment_changed(&self) -> bool {
        self.from.payment_status != self.to.payment_status
    }

    pub fn refund_changed(&self) -> bool {
        self.from.refund_status != self.to.refund_status
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Planned {
    /// The order already reflects the transition; nothing is written or sent.
    AlreadyApplied,
    Apply(TransitionPlan),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("{message}")]
    Forbidden {
        current: StatusTriplet,
        message: String,
    },

    #[error("{message} (current: {current})")]
    Invalid {
        current: StatusTriplet,
        message: String,
    },

    #[error("{message} (current: {current})")]
    RefundInvariant {
        current: StatusTriplet,
        message: String,
    },

    #[error("a cancellation reason is required")]
    MissingReason,

    #[error("total {total} does not equal subtotal + shipping - discount ({expected})")]
    MonetaryInvariant { total: Decimal, expected: Decimal },
}

/// Decides whether `transition` may be applied to an order in `current`.
///
/// Checks run in a fixed order: caller authorization, request shape, the
/// no-op check, then legality against the adjacency rules of the targeted
/// track. `now` stamps cancellation and refund request times.
pub fn plan(
    current: StatusTriplet,
    transition: &Transition,
    cap: &Capability,
    now: DateTime<Utc>,
) -> Result<Planned, LifecycleError> {
    authorize(current, transition, cap)?;

    match transition {
        Transition::Advance { to } if to.rank().unwrap_or(0) == 0 => {
            return Err(invalid(
                current,
                format!("{} is not a fulfilment step", to),
            ));
        }
        Transition::Cancel { reason } if reason.trim().is_empty() => {
            return Err(LifecycleError::MissingReason);
        }
        _ => {}
    }

    if transition.is_applied_in(&current) {
        return Ok(Planned::AlreadyApplied);
    }

    let mut plan = TransitionPlan::starting_at(current);
    match transition {
        Transition::Advance { to } => advance(&mut plan, *to)?,
        Transition::Cancel { reason } => cancel(&mut plan, reason, cap, now)?,
        Transition::Payment { to } => payment(&mut plan, *to)?,
        Transition::Refund { to } => refund(&mut plan, *to)?,
    }

    plan.to.check_invariants()?;
    Ok(Planned::Apply(plan))
}

fn authorize(
    current: StatusTriplet,
    transition: &Transition,
    cap: &Capability,
) -> Result<(), LifecycleError> {
    let allowed = match cap.role {
        ActorRole::Customer => matches!(transition, Transition::Cancel { .. }),
        ActorRole::System => matches!(transition, Transition::Payment { .. }),
        ActorRole::Moderator | ActorRole::Admin => true,
    };
    if allowed {
        Ok(())
    } else {
        Err(LifecycleError::Forbidden {
            current,
            message: format!("{} may not {}", cap.role, transition.kind()),
        })
    }
}

fn invalid(current: StatusTriplet, message: impl Into<String>) -> LifecycleError {
    LifecycleError::Invalid {
        current,
        message: message.into(),
    }
}

fn advance(plan: &mut TransitionPlan, to: OrderStatus) -> Result<(), LifecycleError> {
    let current = plan.from;
    if current.status.is_terminal() {
        return Err(invalid(
            current,
            format!("order is {}; no further status changes", current.status),
        ));
    }
    // Both ranks exist: terminal states and non-forward targets were rejected above.
    let from_rank = current.status.rank().unwrap_or(u8::MAX);
    let to_rank = to.rank().unwrap_or(0);
    if to_rank <= from_rank {
        return Err(invalid(
            current,
            format!("cannot move from {} back to {}", current.status, to),
        ));
    }
    plan.to.status = to;
    Ok(())
}

fn cancel(
    plan: &mut TransitionPlan,
    reason: &str,
    cap: &Capability,
    now: DateTime<Utc>,
) -> Result<(), LifecycleError> {
    let current = plan.from;
    match current.status {
        OrderStatus::Pending => {}
        OrderStatus::Processing | OrderStatus::Shipped => {
            if !cap.is_staff() {
                return Err(invalid(
                    current,
                    format!("only pending orders can be cancelled; order is {}", current.status),
                ));
            }
            if !cap.force_cancel {
                return Err(LifecycleError::Forbidden {
                    current,
                    message: format!(
                        "cancelling a {} order requires the force-cancel capability",
                        current.status
                    ),
                });
            }
        }
        OrderStatus::Delivered | OrderStatus::Cancelled => {
            return Err(invalid(
                current,
                format!("order is {}; it can no longer be cancelled", current.status),
            ));
        }
    }

    plan.to.status = OrderStatus::Cancelled;
    plan.cancellation_reason = Some(reason.trim().to_string());
    plan.cancelled_at = Some(now);
    if current.payment_status == PaymentStatus::Paid {
        plan.to.refund_status = Some(RefundStatus::Pending);
        plan.refund_requested_at = Some(now);
    }
    Ok(())
}

fn payment(plan: &mut TransitionPlan, to: PaymentStatus) -> Result<(), LifecycleError> {
    let current = plan.from;
    if to == PaymentStatus::Refunded {
        return Err(LifecycleError::RefundInvariant {
            current,
            message: "payment becomes refunded only by processing a refund".to_string(),
        });
    }
    if current.status == OrderStatus::Cancelled {
        return Err(invalid(
            current,
            "payment status of a cancelled order is settled through its refund",
        ));
    }
    let legal = matches!(
        (current.payment_status, to),
        (PaymentStatus::Pending, PaymentStatus::Paid)
            | (PaymentStatus::Pending, PaymentStatus::Failed)
            | (PaymentStatus::Failed, PaymentStatus::Paid)
    );
    if !legal {
        return Err(invalid(
            current,
            format!("payment cannot move from {} to {}", current.payment_status, to),
        ));
    }
    plan.to.payment_status = to;
    Ok(())
}

fn refund(plan: &mut TransitionPlan, to: RefundStatus) -> Result<(), LifecycleError> {
    let current = plan.from;
    let Some(refund) = current.refund_status else {
        return Err(invalid(current, "no refund was requested for this order"));
    };
    if refund.is_terminal() {
        return Err(invalid(current, format!("refund is already {}", refund)));
    }
    let legal = matches!(
        (refund, to),
        (RefundStatus::Pending, RefundStatus::Approved)
            | (RefundStatus::Pending, RefundStatus::Rejected)
            | (RefundStatus::Approved, RefundStatus::Processed)
    );
    if !legal {
        return Err(invalid(
            current,
            format!("refund cannot move from {} to {}", refund, to),
        ));
    }
    if to == RefundStatus::Processed {
        if current.payment_status != PaymentStatus::Paid {
            return Err(LifecycleError::RefundInvariant {
                current,
                message: format!(
                    "cannot process a refund while payment is {}",
                    current.payment_status
                ),
            });
        }
        plan.to.payment_status = PaymentStatus::Refunded;
    }
    plan.to.refund_status = Some(to);
    Ok(())
}

/// Monetary fields of an order, frozen at placement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Totals {
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

impl Totals {
    pub fn compute(subtotal: Decimal, shipping_cost: Decimal, discount: Decimal) -> Self {
        Self {
            subtotal,
            shipping_cost,
            discount,
            total: subtotal + shipping_cost - discount,
        }
    }

    pub fn verify(&self) -> Result<(), LifecycleError> {
        let expected = (self.subtotal + self.shipping_cost - self.discount).round_dp(2);
        if self.total.round_dp(2) != expected {
            return Err(LifecycleError::MonetaryInvariant {
                total: self.total,
                expected,
            });
        }
        Ok(())
    }
}
