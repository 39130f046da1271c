//! Registration endpoints: self-service signup, admin status toggles, bulk
//! mutation and import.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, patch, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::api::checkin::GateQuery;
use crate::api::middleware::auth::{authorize, require_admin, Actor};
use crate::api::middleware::session::AppState;
use crate::error::{AppError, Result};
use crate::models::{
    attendance_event::AttendanceEvent,
    event::Event,
    registration::{CreateRegistrationData, Registration},
};
use crate::services::importer::{self, ImportRow, ImportSummary};
use crate::services::webhook::CheckinNotification;
use crate::services::{checkin, scancode};

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    email: String,
    name: Option<String>,
}

/// Self-service signup. The only path where event capacity is enforced;
/// operators deliberately may exceed it through import/bulk.
async fn register(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<Registration>> {
    let event = Event::find_by_slug(&state.pool, &slug)
        .await?
        .ok_or_else(|| AppError::NotFound("event".to_string()))?;

    let email = importer::normalize_email(&req.email).map_err(AppError::Validation)?;

    let data = CreateRegistrationData {
        event_id: event.id,
        email,
        display_name: req.name.filter(|n| !n.trim().is_empty()),
        code: scancode::generate_code(),
        paid: false,
        attributes: json!({}),
    };

    // Capacity is checked and the row inserted inside one transaction, so
    // concurrent signups cannot both squeeze past the limit.
    let created = match event.capacity {
        Some(capacity) => Registration::create_capped(&state.pool, data, capacity).await,
        None => Registration::create(&state.pool, data).await.map(Some),
    };
    let registration = created
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::Validation("email is already registered for this event".to_string())
            }
            _ => AppError::Database(e),
        })?
        .ok_or_else(|| AppError::Validation("event is at capacity".to_string()))?;

    tracing::info!(event_id = %event.id, registration_id = %registration.id, "Self-registered");

    Ok(Json(registration))
}

#[derive(Debug, Deserialize)]
struct AdminUpdateRequest {
    attended: Option<bool>,
    checked_out: Option<bool>,
    paid: Option<bool>,
    /// Attribute the change to a named station in the audit trail
    station: Option<String>,
}

/// Admin toggle for one registration
async fn update_registration(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, Uuid)>,
    Query(query): Query<GateQuery>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<AdminUpdateRequest>,
) -> Result<Json<Registration>> {
    let event = Event::find_by_slug(&state.pool, &slug)
        .await?
        .ok_or_else(|| AppError::NotFound("event".to_string()))?;
    let actor =
        require_admin(authorize(&state, &jar, &headers, query.key.as_deref(), &event).await?)?;

    // Cross-event ids do not resolve
    let registration = Registration::find_by_id(&state.pool, id)
        .await?
        .filter(|r| r.event_id == event.id)
        .ok_or_else(|| AppError::NotFound("registration".to_string()))?;

    let actor_label = label_for(&actor, req.station);
    let update = checkin::apply_admin_update(
        &state.pool,
        registration.id,
        req.attended,
        req.checked_out,
        req.paid,
        &actor_label,
        Utc::now(),
    )
    .await?;

    // Admin transitions notify like scans do, one message per audit row
    for notification in admin_notifications(&event, &update, &actor_label) {
        let notifier = state.notifier.clone();
        tokio::spawn(async move { notifier.notify(notification).await });
    }

    Ok(Json(update.registration))
}

/// One notification per committed transition of an admin update
fn admin_notifications(
    event: &Event,
    update: &checkin::AdminUpdate,
    actor: &str,
) -> Vec<CheckinNotification> {
    update
        .transitions
        .iter()
        .map(|&action| CheckinNotification {
            event_id: event.id,
            event_slug: event.slug.clone(),
            registration_id: update.registration.id,
            email: update.registration.email.clone(),
            action,
            actor: actor.to_string(),
            at: Utc::now(),
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct BulkUpdateRequest {
    #[serde(default)]
    ids: Vec<Uuid>,
    #[serde(default)]
    emails: Vec<String>,
    /// Scan codes
    #[serde(default)]
    tokens: Vec<String>,
    attended: Option<bool>,
    checked_out: Option<bool>,
    paid: Option<bool>,
    station: Option<String>,
}

#[derive(Debug, Serialize)]
struct BulkUpdateResponse {
    count: usize,
    registrations: Vec<Registration>,
}

/// Multi-row status mutation: resolve the selector set to row ids first,
/// then apply one batched update. No per-row audit writes on this path.
async fn bulk_update(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<GateQuery>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<BulkUpdateRequest>,
) -> Result<Json<BulkUpdateResponse>> {
    let event = Event::find_by_slug(&state.pool, &slug)
        .await?
        .ok_or_else(|| AppError::NotFound("event".to_string()))?;
    let actor =
        require_admin(authorize(&state, &jar, &headers, query.key.as_deref(), &event).await?)?;

    if req.ids.is_empty() && req.emails.is_empty() && req.tokens.is_empty() {
        return Err(AppError::Validation("no registrations selected".to_string()));
    }
    if req.attended.is_none() && req.checked_out.is_none() && req.paid.is_none() {
        return Err(AppError::Validation("no status change requested".to_string()));
    }
    if req.attended == Some(false) && req.checked_out == Some(true) {
        return Err(AppError::InvalidTransition(
            "cannot check out registrations while marking them not attended".to_string(),
        ));
    }

    let emails: Vec<String> = req
        .emails
        .iter()
        .map(|e| e.trim().to_lowercase())
        .collect();

    let ids =
        Registration::resolve_selectors(&state.pool, event.id, &req.ids, &emails, &req.tokens)
            .await?;

    let actor_label = label_for(&actor, req.station);
    let registrations = Registration::bulk_update_status(
        &state.pool,
        event.id,
        &ids,
        req.attended,
        req.checked_out,
        req.paid,
        &actor_label,
        Utc::now(),
    )
    .await?;

    tracing::info!(
        event_id = %event.id,
        count = registrations.len(),
        actor = %actor_label,
        "Bulk status update applied"
    );

    Ok(Json(BulkUpdateResponse {
        count: registrations.len(),
        registrations,
    }))
}

#[derive(Debug, Deserialize)]
struct ImportRequest {
    rows: Option<Vec<ImportRow>>,
    csv: Option<String>,
}

/// Imports registrations from JSON rows or a CSV document
async fn import(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<GateQuery>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<ImportRequest>,
) -> Result<Json<ImportSummary>> {
    let event = Event::find_by_slug(&state.pool, &slug)
        .await?
        .ok_or_else(|| AppError::NotFound("event".to_string()))?;
    require_admin(authorize(&state, &jar, &headers, query.key.as_deref(), &event).await?)?;

    let rows = match (req.rows, req.csv) {
        (Some(rows), None) => rows,
        (None, Some(csv)) => importer::parse_csv(&csv)?,
        _ => {
            return Err(AppError::Validation(
                "provide either rows or csv".to_string(),
            ))
        }
    };

    let summary = importer::run_import(&state.pool, event.id, rows).await?;

    Ok(Json(summary))
}

/// Full audit trail of one registration, oldest first
async fn history(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, Uuid)>,
    Query(query): Query<GateQuery>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<Vec<AttendanceEvent>>> {
    let event = Event::find_by_slug(&state.pool, &slug)
        .await?
        .ok_or_else(|| AppError::NotFound("event".to_string()))?;
    require_admin(authorize(&state, &jar, &headers, query.key.as_deref(), &event).await?)?;

    let registration = Registration::find_by_id(&state.pool, id)
        .await?
        .filter(|r| r.event_id == event.id)
        .ok_or_else(|| AppError::NotFound("registration".to_string()))?;

    let rows = AttendanceEvent::list_by_registration(&state.pool, registration.id).await?;

    Ok(Json(rows))
}

#[derive(Debug, Serialize)]
struct ScanRefResponse {
    token: String,
}

/// Signed scan reference for badge/QR embedding
async fn scan_ref(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, Uuid)>,
    Query(query): Query<GateQuery>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<ScanRefResponse>> {
    let event = Event::find_by_slug(&state.pool, &slug)
        .await?
        .ok_or_else(|| AppError::NotFound("event".to_string()))?;
    require_admin(authorize(&state, &jar, &headers, query.key.as_deref(), &event).await?)?;

    let registration = Registration::find_by_id(&state.pool, id)
        .await?
        .filter(|r| r.event_id == event.id)
        .ok_or_else(|| AppError::NotFound("registration".to_string()))?;

    let token = scancode::sign_reference(
        registration.id,
        event.id,
        state.config.scan_ref_secret.expose_secret(),
    );

    Ok(Json(ScanRefResponse { token }))
}

fn label_for(actor: &Actor, station_override: Option<String>) -> String {
    match station_override {
        Some(label) if !label.trim().is_empty() => label,
        _ => actor.audit_label(),
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/e/:slug/register", post(register))
        .route("/e/:slug/registrations", patch(bulk_update))
        .route("/e/:slug/registrations/:id", patch(update_registration))
        .route("/e/:slug/registrations/:id/history", get(history))
        .route("/e/:slug/registrations/:id/scan-ref", get(scan_ref))
        .route("/e/:slug/import", post(import))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::attendance_event::AttendanceAction;
    use crate::services::checkin::AdminUpdate;

    fn sample_event() -> Event {
        let now = Utc::now();
        Event {
            id: Uuid::new_v4(),
            organizer_id: Uuid::new_v4(),
            name: "Conf".to_string(),
            slug: "conf-2026".to_string(),
            capacity: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_registration(event_id: Uuid) -> Registration {
        let now = Utc::now();
        Registration {
            id: Uuid::new_v4(),
            event_id,
            email: "a@x.com".to_string(),
            display_name: None,
            code: "c0ffee".to_string(),
            attended: true,
            scanned_at: Some(now),
            scanned_by: Some("front-desk".to_string()),
            checked_out_at: None,
            checked_out_by: None,
            paid: false,
            attributes: json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn admin_update_notifies_once_per_transition() {
        let event = sample_event();
        let update = AdminUpdate {
            registration: sample_registration(event.id),
            transitions: vec![AttendanceAction::In, AttendanceAction::Out],
        };

        let notifications = admin_notifications(&event, &update, "front-desk");

        assert_eq!(notifications.len(), 2);
        assert_eq!(notifications[0].action, AttendanceAction::In);
        assert_eq!(notifications[1].action, AttendanceAction::Out);
        assert!(notifications
            .iter()
            .all(|n| n.actor == "front-desk" && n.event_slug == "conf-2026"));
    }

    #[test]
    fn noop_admin_update_notifies_nobody() {
        let event = sample_event();
        let update = AdminUpdate {
            registration: sample_registration(event.id),
            transitions: Vec::new(),
        };

        assert!(admin_notifications(&event, &update, "admin").is_empty());
    }
}
