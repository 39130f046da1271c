use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

/// Observed state transition. `Deny` exists in the schema for entry-rule
/// denials; no current transition emits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AttendanceAction {
    In,
    Out,
    Deny,
}

/// One immutable audit row: who moved which registration, which way, when.
/// This table is append-only; the model exposes inserts and reads, nothing
/// else.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AttendanceEvent {
    pub id: Uuid,
    pub registration_id: Uuid,
    pub event_id: Uuid,
    pub action: AttendanceAction,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

/// Check-in count for one actor, derived from the audit log.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ActorCheckins {
    pub actor: String,
    pub checkins: i64,
}

impl AttendanceEvent {
    /// Appends one audit row on the caller's open transaction, so the row
    /// commits or rolls back together with the state mutation it records.
    pub async fn insert(
        conn: &mut PgConnection,
        registration_id: Uuid,
        event_id: Uuid,
        action: AttendanceAction,
        actor: &str,
    ) -> Result<Self, sqlx::Error> {
        let row = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO attendance_events (registration_id, event_id, action, actor)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(registration_id)
        .bind(event_id)
        .bind(action)
        .bind(actor)
        .fetch_one(conn)
        .await?;

        Ok(row)
    }

    /// Recent transitions for an event, newest first (dashboard ticker)
    pub async fn list_recent_by_event(
        pool: &PgPool,
        event_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let rows = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM attendance_events
            WHERE event_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(event_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    /// Full transition history of one registration, oldest first
    pub async fn list_by_registration(
        pool: &PgPool,
        registration_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let rows = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM attendance_events
            WHERE registration_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(registration_id)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    /// Check-ins grouped by actor (stats breakdown)
    pub async fn count_checkins_by_actor(
        pool: &PgPool,
        event_id: Uuid,
    ) -> Result<Vec<ActorCheckins>, sqlx::Error> {
        let rows = sqlx::query_as::<_, ActorCheckins>(
            r#"
            SELECT actor, COUNT(*) AS checkins
            FROM attendance_events
            WHERE event_id = $1 AND action = 'in'
            GROUP BY actor
            ORDER BY checkins DESC
            "#,
        )
        .bind(event_id)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }
}
