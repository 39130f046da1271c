use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

/// An attendee's per-event enrollment record. Rows are retained forever;
/// attendance state lives in the (attended, checked_out_at) pair.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Registration {
    pub id: Uuid,
    pub event_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    /// Scan code printed on the badge; unique per event.
    pub code: String,
    pub attended: bool,
    pub scanned_at: Option<DateTime<Utc>>,
    pub scanned_by: Option<String>,
    pub checked_out_at: Option<DateTime<Utc>>,
    pub checked_out_by: Option<String>,
    pub paid: bool,
    /// Free-form display attributes (badge fields etc.); the state machine
    /// never reads these.
    pub attributes: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateRegistrationData {
    pub event_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub code: String,
    pub paid: bool,
    pub attributes: JsonValue,
}

/// Aggregate attendance counts for one event.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AttendanceCounts {
    pub total: i64,
    pub attended: i64,
}

impl Registration {
    /// Creates a new registration
    pub async fn create(pool: &PgPool, data: CreateRegistrationData) -> Result<Self, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        Self::insert_on(&mut *conn, &data).await
    }

    /// Creates a registration only while the event is under capacity.
    /// Concurrent signups serialize on the event row, so the count and the
    /// insert see a stable total. Returns None when the event is full.
    pub async fn create_capped(
        pool: &PgPool,
        data: CreateRegistrationData,
        capacity: i32,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query("SELECT 1 FROM events WHERE id = $1 FOR UPDATE")
            .bind(data.event_id)
            .execute(&mut *tx)
            .await?;

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM registrations WHERE event_id = $1")
                .bind(data.event_id)
                .fetch_one(&mut *tx)
                .await?;
        if capacity_reached(count, capacity) {
            return Ok(None);
        }

        let registration = Self::insert_on(&mut *tx, &data).await?;
        tx.commit().await?;

        Ok(Some(registration))
    }

    async fn insert_on(
        conn: &mut PgConnection,
        data: &CreateRegistrationData,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO registrations (event_id, email, display_name, code, paid, attributes)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(data.event_id)
        .bind(&data.email)
        .bind(&data.display_name)
        .bind(&data.code)
        .bind(data.paid)
        .bind(&data.attributes)
        .fetch_one(conn)
        .await
    }

    /// Finds a registration by its internal ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let registration = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM registrations WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(registration)
    }

    /// Finds a registration by scan code within one event
    pub async fn find_by_code(
        pool: &PgPool,
        event_id: Uuid,
        code: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let registration = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM registrations WHERE event_id = $1 AND code = $2
            "#,
        )
        .bind(event_id)
        .bind(code)
        .fetch_optional(pool)
        .await?;

        Ok(registration)
    }

    /// Total and attended counts in one round trip
    pub async fn attendance_counts(
        pool: &PgPool,
        event_id: Uuid,
    ) -> Result<AttendanceCounts, sqlx::Error> {
        sqlx::query_as::<_, AttendanceCounts>(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE attended) AS attended
            FROM registrations
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_one(pool)
        .await
    }

    /// Conditional check-in: flips the row to IN only if it is not already
    /// IN. Runs on an open transaction so the caller can pair it with the
    /// audit insert. Returns None when a concurrent writer got there first.
    pub async fn check_in_cas(
        conn: &mut PgConnection,
        id: Uuid,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error> {
        let registration = sqlx::query_as::<_, Self>(
            r#"
            UPDATE registrations
            SET attended = TRUE,
                scanned_at = $3,
                scanned_by = $2,
                checked_out_at = NULL,
                checked_out_by = NULL,
                updated_at = NOW()
            WHERE id = $1
              AND (attended = FALSE OR checked_out_at IS NOT NULL)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(actor)
        .bind(now)
        .fetch_optional(conn)
        .await?;

        Ok(registration)
    }

    /// Conditional check-out: only a row currently IN can be checked out.
    /// Attended stays true. Returns None when the precondition failed.
    pub async fn check_out_cas(
        conn: &mut PgConnection,
        id: Uuid,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error> {
        let registration = sqlx::query_as::<_, Self>(
            r#"
            UPDATE registrations
            SET checked_out_at = $3,
                checked_out_by = $2,
                updated_at = NOW()
            WHERE id = $1
              AND attended = TRUE
              AND checked_out_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(actor)
        .bind(now)
        .fetch_optional(conn)
        .await?;

        Ok(registration)
    }

    /// Conditional reset to OUT (admin un-attend). Clears scan and checkout
    /// fields together so the checkout-implies-attended shape holds.
    pub async fn reset_cas(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let registration = sqlx::query_as::<_, Self>(
            r#"
            UPDATE registrations
            SET attended = FALSE,
                scanned_at = NULL,
                scanned_by = NULL,
                checked_out_at = NULL,
                checked_out_by = NULL,
                updated_at = NOW()
            WHERE id = $1 AND attended = TRUE
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(conn)
        .await?;

        Ok(registration)
    }

    /// Locks one row for the duration of the caller's transaction, so an
    /// admin update applies its flags to a stable snapshot.
    pub async fn lock(conn: &mut PgConnection, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let registration = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM registrations WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(conn)
        .await?;

        Ok(registration)
    }

    /// Sets the paid flag on the caller's transaction
    pub async fn set_paid_on(
        conn: &mut PgConnection,
        id: Uuid,
        paid: bool,
    ) -> Result<Self, sqlx::Error> {
        let registration = sqlx::query_as::<_, Self>(
            r#"
            UPDATE registrations SET paid = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(paid)
        .fetch_one(conn)
        .await?;

        Ok(registration)
    }

    /// Resolves a mixed selector set (row ids, emails, scan codes) to row
    /// ids, scoped to one event. Identifiers from other events simply do
    /// not resolve.
    pub async fn resolve_selectors(
        pool: &PgPool,
        event_id: Uuid,
        ids: &[Uuid],
        emails: &[String],
        codes: &[String],
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        let resolved = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM registrations
            WHERE event_id = $1
              AND (id = ANY($2) OR email = ANY($3) OR code = ANY($4))
            "#,
        )
        .bind(event_id)
        .bind(ids)
        .bind(emails)
        .bind(codes)
        .fetch_all(pool)
        .await?;

        Ok(resolved)
    }

    /// One batched status mutation over a resolved id set. The whole batch
    /// is one statement: all rows move or none do. The SET clauses come
    /// from [`bulk_update_sql`], which keeps the stored shape legal for
    /// every flag combination: checkout implies attended, a bulk IN clears
    /// any checkout, un-attending clears the scan/checkout fields.
    #[allow(clippy::too_many_arguments)]
    pub async fn bulk_update_status(
        pool: &PgPool,
        event_id: Uuid,
        ids: &[Uuid],
        attended: Option<bool>,
        checked_out: Option<bool>,
        paid: Option<bool>,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let (sql, stamped) = bulk_update_sql(attended, checked_out);

        let mut query = sqlx::query_as::<_, Self>(&sql)
            .bind(event_id)
            .bind(ids)
            .bind(paid);
        if stamped {
            query = query.bind(actor).bind(now);
        }

        query.fetch_all(pool).await
    }

    /// Returns which of the given (already normalized) emails exist for the
    /// event. One round trip regardless of batch size.
    pub async fn existing_emails(
        pool: &PgPool,
        event_id: Uuid,
        emails: &[String],
    ) -> Result<Vec<String>, sqlx::Error> {
        let existing = sqlx::query_scalar::<_, String>(
            r#"
            SELECT email FROM registrations
            WHERE event_id = $1 AND email = ANY($2)
            "#,
        )
        .bind(event_id)
        .bind(emails)
        .fetch_all(pool)
        .await?;

        Ok(existing)
    }

    /// Inserts one chunk of new registrations via UNNEST. Conflicting
    /// emails are left untouched so a concurrent import cannot double-create.
    pub async fn insert_chunk(
        pool: &PgPool,
        event_id: Uuid,
        emails: &[String],
        display_names: &[Option<String>],
        codes: &[String],
        paid: &[bool],
        attributes: &[JsonValue],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO registrations (event_id, email, display_name, code, paid, attributes)
            SELECT $1, u.email, u.display_name, u.code, u.paid, u.attributes
            FROM UNNEST($2::text[], $3::text[], $4::text[], $5::boolean[], $6::jsonb[])
                 AS u(email, display_name, code, paid, attributes)
            ON CONFLICT (event_id, email) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(emails)
        .bind(display_names)
        .bind(codes)
        .bind(paid)
        .bind(attributes)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Updates display attributes for one chunk of existing registrations,
    /// matched by email. Runs on the caller's transaction.
    pub async fn update_chunk(
        conn: &mut PgConnection,
        event_id: Uuid,
        emails: &[String],
        display_names: &[Option<String>],
        paid: &[Option<bool>],
        attributes: &[JsonValue],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE registrations r
            SET display_name = COALESCE(u.display_name, r.display_name),
                paid = COALESCE(u.paid, r.paid),
                attributes = r.attributes || u.attributes,
                updated_at = NOW()
            FROM UNNEST($2::text[], $3::text[], $4::boolean[], $5::jsonb[])
                 AS u(email, display_name, paid, attributes)
            WHERE r.event_id = $1 AND r.email = u.email
            "#,
        )
        .bind(event_id)
        .bind(emails)
        .bind(display_names)
        .bind(paid)
        .bind(attributes)
        .execute(conn)
        .await?;

        Ok(result.rows_affected())
    }
}

fn capacity_reached(count: i64, capacity: i32) -> bool {
    count >= capacity as i64
}

/// Builds the SET clauses for one bulk status change. The returned SQL
/// binds $1 event id, $2 row ids, $3 paid and, when the flag is true,
/// $4 actor and $5 timestamp. The contradictory attended=false with
/// checked_out=true combination is rejected by the API layer before this
/// runs.
fn bulk_update_sql(attended: Option<bool>, checked_out: Option<bool>) -> (String, bool) {
    let (status_sets, stamped) = match (attended, checked_out) {
        // Checkout implies attended; rows that were not yet attended get
        // a scan stamp as well.
        (_, Some(true)) => (
            "attended = TRUE,
                scanned_at = CASE WHEN attended THEN scanned_at ELSE $5 END,
                scanned_by = CASE WHEN attended THEN scanned_by ELSE $4 END,
                checked_out_at = $5,
                checked_out_by = $4,",
            true,
        ),
        // Bulk IN: any checkout is cleared, and rows coming from OUT or
        // CHECKED_OUT get a fresh scan stamp.
        (Some(true), _) => (
            "attended = TRUE,
                scanned_at = CASE WHEN attended AND checked_out_at IS NULL
                    THEN scanned_at ELSE $5 END,
                scanned_by = CASE WHEN attended AND checked_out_at IS NULL
                    THEN scanned_by ELSE $4 END,
                checked_out_at = NULL,
                checked_out_by = NULL,",
            true,
        ),
        // Un-attend resets every status field together.
        (Some(false), _) => (
            "attended = FALSE,
                scanned_at = NULL,
                scanned_by = NULL,
                checked_out_at = NULL,
                checked_out_by = NULL,",
            false,
        ),
        // Clearing a checkout readmits those rows; others are untouched.
        (None, Some(false)) => (
            "scanned_at = CASE WHEN checked_out_at IS NULL THEN scanned_at ELSE $5 END,
                scanned_by = CASE WHEN checked_out_at IS NULL THEN scanned_by ELSE $4 END,
                checked_out_at = NULL,
                checked_out_by = NULL,",
            true,
        ),
        (None, None) => ("", false),
    };

    let sql = format!(
        "UPDATE registrations
            SET {status_sets}
                paid = COALESCE($3, paid),
                updated_at = NOW()
            WHERE event_id = $1 AND id = ANY($2)
            RETURNING *"
    );
    (sql, stamped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_in_clears_checkout_and_restamps_scan() {
        let (sql, stamped) = bulk_update_sql(Some(true), None);

        assert!(stamped);
        assert!(sql.contains("attended = TRUE"));
        assert!(sql.contains("checked_out_at = NULL"));
        assert!(sql.contains("checked_out_by = NULL"));
        // rows re-admitted from a checkout get a fresh scan stamp
        assert!(sql.contains("attended AND checked_out_at IS NULL"));
        assert!(!sql.contains("checked_out_at = $5"));
    }

    #[test]
    fn bulk_checkout_stamps_and_implies_attended() {
        let (sql, stamped) = bulk_update_sql(None, Some(true));

        assert!(stamped);
        assert!(sql.contains("attended = TRUE"));
        assert!(sql.contains("checked_out_at = $5"));
        assert!(sql.contains("checked_out_by = $4"));
    }

    #[test]
    fn bulk_unattend_clears_every_status_field() {
        let (sql, stamped) = bulk_update_sql(Some(false), None);

        assert!(!stamped);
        for clause in [
            "attended = FALSE",
            "scanned_at = NULL",
            "scanned_by = NULL",
            "checked_out_at = NULL",
            "checked_out_by = NULL",
        ] {
            assert!(sql.contains(clause), "missing {clause}");
        }
        assert!(!sql.contains("$4"));
        assert!(!sql.contains("$5"));
    }

    #[test]
    fn bulk_checkout_clear_readmits_checked_out_rows() {
        let (sql, stamped) = bulk_update_sql(None, Some(false));

        assert!(stamped);
        assert!(sql.contains("checked_out_at = NULL"));
        assert!(sql.contains("CASE WHEN checked_out_at IS NULL THEN scanned_at ELSE $5 END"));
        // attendance itself is untouched on this path
        assert!(!sql.contains("attended = TRUE"));
        assert!(!sql.contains("attended = FALSE"));
    }

    #[test]
    fn bulk_paid_only_touches_no_status_field() {
        let (sql, stamped) = bulk_update_sql(None, None);

        assert!(!stamped);
        assert!(!sql.contains("attended = TRUE"));
        assert!(!sql.contains("scanned_at"));
        assert!(!sql.contains("checked_out_at"));
        assert!(sql.contains("paid = COALESCE($3, paid)"));
    }

    #[test]
    fn capacity_boundary_is_inclusive() {
        assert!(!capacity_reached(0, 1));
        assert!(!capacity_reached(99, 100));
        assert!(capacity_reached(100, 100));
        assert!(capacity_reached(101, 100));
    }
}
