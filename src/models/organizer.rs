use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// An organizer is the tenant boundary: it owns events, and every
/// tenant-scoped query downstream filters by its id.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Organizer {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    /// Legacy shared-secret credential; accepted as a fallback by the
    /// authorization gate. Nullable so new tenants can go token-only.
    #[serde(skip_serializing)]
    pub checkin_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateOrganizerData {
    pub name: String,
    pub slug: String,
    pub checkin_key: Option<String>,
}

impl Organizer {
    /// Creates a new organizer
    pub async fn create(pool: &PgPool, data: CreateOrganizerData) -> Result<Self, sqlx::Error> {
        let organizer = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO organizers (name, slug, checkin_key)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(&data.name)
        .bind(&data.slug)
        .bind(&data.checkin_key)
        .fetch_one(pool)
        .await?;

        Ok(organizer)
    }

    /// Finds an organizer by its internal ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let organizer = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM organizers WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(organizer)
    }

    /// Finds an organizer whose legacy check-in key matches the given key.
    /// Used by the gate's compatibility fallback.
    pub async fn find_by_checkin_key(
        pool: &PgPool,
        key: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let organizer = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM organizers WHERE checkin_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(pool)
        .await?;

        Ok(organizer)
    }
}
