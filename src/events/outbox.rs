use crate::entities::outbox_event::{self, OutboxStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const AGGREGATE_TYPE: &str = "order";
const PRUNE_EVERY_POLLS: u64 = 120;

/// Records `event` in the outbox. Call with the transaction that performs the
/// change so the event commits or rolls back with it.
pub async fn enqueue<C>(db: &C, event: &Event) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    let payload = serde_json::to_string(event)
        .map_err(|e| ServiceError::InternalError(format!("event encoding failed: {}", e)))?;

    let id = Uuid::new_v4();
    outbox_event::ActiveModel {
        id: Set(id),
        aggregate_type: Set(AGGREGATE_TYPE.to_string()),
        aggregate_id: Set(event.order_id()),
        event_type: Set(event.event_type().to_string()),
        payload: Set(payload),
        status: Set(OutboxStatus::Pending),
        attempts: Set(0),
        error_message: Set(None),
        created_at: Set(Utc::now()),
        processed_at: Set(None),
    }
    .insert(db)
    .await?;

    debug!(
        "enqueued outbox event {} type={} agg={}",
        id,
        event.event_type(),
        event.order_id()
    );
    Ok(())
}

/// Background worker that relays pending outbox rows to the event channel
/// and prunes finished rows older than `retention`.
pub fn start_worker(
    db: Arc<DatabaseConnection>,
    sender: EventSender,
    interval: Duration,
    batch_size: u64,
    retention: Duration,
) -> JoinHandle<()> {
    info!(
        "Starting outbox relay (interval={:?}, batch_size={}, retention={:?})",
        interval, batch_size, retention
    );
    tokio::spawn(async move {
        let mut polls: u64 = 0;
        loop {
            if let Err(e) = drain_once(&db, &sender, batch_size).await {
                error!("outbox worker error: {}", e);
            }
            if polls % PRUNE_EVERY_POLLS == 0 {
                if let Err(e) = prune_finished(&db, retention).await {
                    error!("outbox prune error: {}", e);
                }
            }
            polls = polls.wrapping_add(1);
            sleep(interval).await;
        }
    })
}

/// Deletes delivered and failed rows processed more than `retention` ago.
/// Pending and in-flight rows are never touched.
pub async fn prune_finished(
    db: &DatabaseConnection,
    retention: Duration,
) -> Result<u64, ServiceError> {
    let retention = chrono::Duration::from_std(retention)
        .map_err(|e| ServiceError::InternalError(format!("invalid outbox retention: {}", e)))?;
    let cutoff = Utc::now() - retention;

    let result = outbox_event::Entity::delete_many()
        .filter(
            outbox_event::Column::Status.is_in([OutboxStatus::Delivered, OutboxStatus::Failed]),
        )
        .filter(outbox_event::Column::ProcessedAt.lt(cutoff))
        .exec(db)
        .await?;
    if result.rows_affected > 0 {
        debug!("pruned {} finished outbox events", result.rows_affected);
    }
    Ok(result.rows_affected)
}

/// Relays up to `batch_size` pending events, oldest first, and returns how
/// many were handed to `sender`.
///
/// Each row is claimed with a conditional update before it is sent, so two
/// relays never deliver the same row. Delivery is attempted once: rows that
/// cannot be decoded or sent are marked failed.
pub async fn drain_once(
    db: &DatabaseConnection,
    sender: &EventSender,
    batch_size: u64,
) -> Result<usize, ServiceError> {
    let pending = outbox_event::Entity::find()
        .filter(outbox_event::Column::Status.eq(OutboxStatus::Pending))
        .order_by_asc(outbox_event::Column::CreatedAt)
        .limit(batch_size)
        .all(db)
        .await?;

    let mut delivered = 0;
    for row in pending {
        let claim = outbox_event::Entity::update_many()
            .col_expr(
                outbox_event::Column::Status,
                Expr::value(OutboxStatus::Processing),
            )
            .col_expr(
                outbox_event::Column::Attempts,
                Expr::col(outbox_event::Column::Attempts).add(1),
            )
            .filter(outbox_event::Column::Id.eq(row.id))
            .filter(outbox_event::Column::Status.eq(OutboxStatus::Pending))
            .exec(db)
            .await?;
        if claim.rows_affected == 0 {
            continue;
        }

        let outcome = match serde_json::from_str::<Event>(&row.payload) {
            Ok(event) => sender.send(event).await,
            Err(e) => Err(format!("undecodable {} payload: {}", row.event_type, e)),
        };

        let (status, error_message) = match outcome {
            Ok(()) => {
                delivered += 1;
                (OutboxStatus::Delivered, None)
            }
            Err(e) => {
                warn!("outbox event {} not delivered: {}", row.id, e);
                (OutboxStatus::Failed, Some(e))
            }
        };

        outbox_event::Entity::update_many()
            .col_expr(outbox_event::Column::Status, Expr::value(status))
            .col_expr(
                outbox_event::Column::ErrorMessage,
                Expr::value(error_message),
            )
            .col_expr(
                outbox_event::Column::ProcessedAt,
                Expr::value(Some(Utc::now())),
            )
            .filter(outbox_event::Column::Id.eq(row.id))
            .exec(db)
            .await?;
    }

    Ok(delivered)
}
