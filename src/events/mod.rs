//! Audit trail: every mutation of role/permission state is published on an
//! in-process bus and persisted to a hash-chained `activity_log` table by a
//! background listener. Publishing is fire-and-forget; a full bus or a failed
//! insert never breaks the request that caused the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod loggable;
pub use loggable::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<i64>,
    pub subject_id: Option<i64>,
    pub severity: Severity,
    pub payload: Value,
}

pub type EventBus = broadcast::Sender<AuditEvent>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<AuditEvent>) {
    broadcast::channel(1024)
}

/// Publish an audit event for an entity mutation.
///
/// `action` is the verb suffix of the event name: "created", "granted",
/// "revoked", ...
pub fn log_activity<T: Loggable>(bus: &EventBus, action: &str, actor_id: Option<i64>, entity: &T) {
    let event = AuditEvent {
        id: Uuid::new_v4(),
        name: format!("{}.{}", T::entity_type(), action),
        occurred_at: Utc::now(),
        actor_id,
        subject_id: entity.subject_id(),
        severity: entity.severity_for_action(action),
        payload: serde_json::to_value(entity).unwrap_or_default(),
    };

    // Fire and forget: no subscribers just drops the event.
    let _ = bus.send(event);
}

/// Consume the bus and persist events. Each row's hash covers the previous
/// row's hash plus the serialized event, so tampering with history is
/// detectable.
pub async fn start_activity_listener(mut rx: broadcast::Receiver<AuditEvent>, pool: SqlitePool) {
    tracing::info!("activity listener started");
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "activity listener lagged, events dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        if let Err(err) = persist_event(&pool, &event).await {
            tracing::error!(error = %err, event = %event.name, "failed to save activity log");
        }
    }
}

async fn persist_event(pool: &SqlitePool, event: &AuditEvent) -> Result<(), sqlx::Error> {
    let properties = serde_json::to_string(event).unwrap_or_default();

    let prev_hash: Option<String> =
        sqlx::query_scalar("SELECT hash FROM activity_log ORDER BY occurred_at DESC, id DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    let hash = chain_hash(prev_hash.as_deref(), &properties);

    sqlx::query(
        r#"
        INSERT INTO activity_log (id, event_name, actor_id, subject_id, occurred_at, properties, severity, prev_hash, hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.id.to_string())
    .bind(&event.name)
    .bind(event.actor_id)
    .bind(event.subject_id)
    .bind(event.occurred_at)
    .bind(&properties)
    .bind(event.severity.as_str())
    .bind(&prev_hash)
    .bind(&hash)
    .execute(pool)
    .await?;

    Ok(())
}

fn chain_hash(prev: Option<&str>, payload: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    if let Some(prev) = prev {
        hasher.update(prev.as_bytes());
    }
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}
