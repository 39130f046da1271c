use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// A physical check-in device identity, scoped to one event. Authenticates
/// with a secret stored as an argon2 hash; deactivated rather than deleted
/// so its audit trail keeps a valid actor.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Station {
    pub id: Uuid,
    pub event_id: Uuid,
    pub code: String,
    pub name: Option<String>,
    #[serde(skip_serializing)]
    pub secret_hash: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateStationData {
    pub event_id: Uuid,
    pub code: String,
    pub name: Option<String>,
    pub secret_hash: String,
}

impl Station {
    /// Display label used in audit rows: the station name, or its code when
    /// no name was set.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.code)
    }

    /// Creates a new station
    pub async fn create(pool: &PgPool, data: CreateStationData) -> Result<Self, sqlx::Error> {
        let station = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO stations (event_id, code, name, secret_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(data.event_id)
        .bind(&data.code)
        .bind(&data.name)
        .bind(&data.secret_hash)
        .fetch_one(pool)
        .await?;

        Ok(station)
    }

    /// Finds a station by its internal ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let station = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM stations WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(station)
    }

    /// Finds a station by (event, code)
    pub async fn find_by_code(
        pool: &PgPool,
        event_id: Uuid,
        code: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let station = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM stations WHERE event_id = $1 AND code = $2
            "#,
        )
        .bind(event_id)
        .bind(code)
        .fetch_optional(pool)
        .await?;

        Ok(station)
    }

    /// Lists stations for an event
    pub async fn list_by_event(pool: &PgPool, event_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let stations = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM stations
            WHERE event_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(event_id)
        .fetch_all(pool)
        .await?;

        Ok(stations)
    }

    /// Replaces the station secret hash. The old secret stops working the
    /// moment this commits; existing session tokens stay valid until expiry
    /// unless the station is also deactivated.
    pub async fn rotate_secret(
        pool: &PgPool,
        id: Uuid,
        secret_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE stations
            SET secret_hash = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(secret_hash)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Soft-deactivates a station. Outstanding session tokens fail the
    /// gate's liveness check from here on.
    pub async fn deactivate(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE stations
            SET is_active = FALSE, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }
}
