use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, QueryResult, Statement};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub enum OutboxStatus {
    Pending,
    Processing,
    Delivered,
    Failed,
}

impl OutboxStatus {
    fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Delivered => "delivered",
            OutboxStatus::Failed => "failed",
        }
    }
}

/// Enqueue a domain event into the outbox table inside the caller's
/// transaction, so the row commits or rolls back together with the state
/// change it announces.
///
/// Returns `true` when a row was written. On non-Postgres backends the
/// outbox is disabled and the caller should emit the event directly after
/// commit.
pub async fn enqueue(
    db: &impl ConnectionTrait,
    event_type: &str,
    payload: &Value,
) -> Result<bool, ServiceError> {
    if db.get_database_backend() != DbBackend::Postgres {
        debug!("outbox enqueue skipped for non-Postgres backend (event_type={})", event_type);
        return Ok(false);
    }

    let id = Uuid::new_v4();
    let sql = r#"INSERT INTO outbox_events
        (id, event_type, payload, status, attempts, created_at)
        VALUES ($1, $2, $3::jsonb, 'pending', 0, NOW())"#;
    let stmt = Statement::from_sql_and_values(
        DbBackend::Postgres,
        sql,
        vec![id.into(), event_type.into(), payload.clone().into()],
    );
    db.execute(stmt).await?;
    info!("enqueued outbox event {} type={}", id, event_type);
    Ok(true)
}

/// Background worker to poll and dispatch outbox events via in-process EventSender.
pub async fn start_worker(db: Arc<DatabaseConnection>, sender: EventSender) {
    if db.get_database_backend() != DbBackend::Postgres {
        info!(
            "Outbox worker disabled for {:?} backend; relying on direct event emission",
            db.get_database_backend()
        );
        return;
    }

    tokio::spawn(async move {
        loop {
            if let Err(e) = drain_once(&db, &sender, 50).await {
                error!("outbox worker error: {}", e);
            }
            sleep(Duration::from_millis(500)).await;
        }
    });
}

async fn drain_once(
    db: &DatabaseConnection,
    sender: &EventSender,
    batch_size: i64,
) -> Result<(), ServiceError> {
    const MAX_ATTEMPTS: i32 = 8;
    const BASE_BACKOFF_SECS: u64 = 2; // exponential backoff base

    // Claim a batch and mark it processing; SKIP LOCKED keeps concurrent
    // workers from double-dispatching
    let sql_claim = r#"
        WITH cte AS (
            SELECT id FROM outbox_events
            WHERE status = 'pending'
              AND (next_attempt_at IS NULL OR next_attempt_at <= NOW())
            ORDER BY created_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT $1
        )
        UPDATE outbox_events o
        SET status = 'processing', attempts = o.attempts + 1
        FROM cte
        WHERE o.id = cte.id
        RETURNING o.id, o.event_type, o.payload, o.attempts
    "#;
    let stmt =
        Statement::from_sql_and_values(DbBackend::Postgres, sql_claim, vec![batch_size.into()]);
    let rows: Vec<QueryResult> = db.query_all(stmt).await?;

    for row in rows {
        let id: Uuid = row.try_get("", "id").unwrap_or_default();
        let et: String = row.try_get("", "event_type").unwrap_or_default();
        let payload: Value = row.try_get("", "payload").unwrap_or(Value::Null);
        let attempts: i32 = row.try_get("", "attempts").unwrap_or(1);

        let evt = map_to_event(&et, &payload).unwrap_or_else(|| Event::with_data(et.clone()));

        if sender.send(evt).await.is_ok() {
            let sql_update = r#"UPDATE outbox_events
                SET status = 'delivered', processed_at = NOW(), last_error = NULL
                WHERE id = $1"#;
            let stmt_upd =
                Statement::from_sql_and_values(DbBackend::Postgres, sql_update, vec![id.into()]);
            if let Err(e) = db.execute(stmt_upd).await {
                warn!("failed updating outbox {}: {}", id, e);
            }
        } else if attempts < MAX_ATTEMPTS {
            let backoff = BASE_BACKOFF_SECS.saturating_pow(attempts as u32);
            let sql_retry = r#"UPDATE outbox_events
                SET status = 'pending',
                    next_attempt_at = NOW() + make_interval(secs := $2::int),
                    last_error = 'send failed'
                WHERE id = $1"#;
            let stmt_retry = Statement::from_sql_and_values(
                DbBackend::Postgres,
                sql_retry,
                vec![id.into(), (backoff as i64).into()],
            );
            if let Err(e) = db.execute(stmt_retry).await {
                warn!("failed scheduling retry for outbox {}: {}", id, e);
            }
        } else {
            let sql_fail = r#"UPDATE outbox_events
                SET status = 'failed', last_error = 'max attempts exceeded'
                WHERE id = $1"#;
            let stmt_fail =
                Statement::from_sql_and_values(DbBackend::Postgres, sql_fail, vec![id.into()]);
            if let Err(e) = db.execute(stmt_fail).await {
                warn!("failed marking outbox {} failed: {}", id, e);
            }
        }
    }
    Ok(())
}

fn parse_uuid_field(payload: &Value, field: &str) -> Option<Uuid> {
    payload
        .get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn map_to_event(event_type: &str, payload: &Value) -> Option<Event> {
    match event_type {
        "OrderCreated" => parse_uuid_field(payload, "order_id").map(Event::OrderCreated),
        "OrderConfirmationRequested" => {
            parse_uuid_field(payload, "order_id").map(Event::OrderConfirmationRequested)
        }
        "OrderCanceled" => parse_uuid_field(payload, "order_id").map(Event::OrderCanceled),
        "OrderStatusChanged" => {
            let order_id = parse_uuid_field(payload, "order_id")?;
            let old_status = payload.get("old_status")?.as_str()?.to_string();
            let new_status = payload.get("new_status")?.as_str()?.to_string();
            Some(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            })
        }
        "CartConverted" => parse_uuid_field(payload, "cart_id").map(Event::CartConverted),
        "PaymentCompleted" => {
            let order_id = parse_uuid_field(payload, "order_id")?;
            let payment_id = parse_uuid_field(payload, "payment_id")?;
            Some(Event::PaymentCompleted {
                order_id,
                payment_id,
            })
        }
        "PaymentRefunded" => {
            let order_id = parse_uuid_field(payload, "order_id")?;
            let payment_id = parse_uuid_field(payload, "payment_id")?;
            Some(Event::PaymentRefunded {
                order_id,
                payment_id,
            })
        }
        "PaymentFailed" => {
            let order_id = parse_uuid_field(payload, "order_id")?;
            let reason = payload
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            Some(Event::PaymentFailed { order_id, reason })
        }
        _ => None,
    }
}
