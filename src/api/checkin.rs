//! Scan endpoint plus the read surface derived from the audit log.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::api::middleware::auth::{authorize, require_admin, Actor};
use crate::api::middleware::session::AppState;
use crate::error::{AppError, Result};
use crate::models::{
    attendance_event::{ActorCheckins, AttendanceAction, AttendanceEvent},
    event::Event,
    registration::Registration,
};
use crate::services::checkin::{self, ScanMode, ScanOutcome, StateLabel};
use crate::services::webhook::CheckinNotification;

#[derive(Debug, Deserialize)]
pub struct GateQuery {
    /// Legacy shared key; lowest-priority credential provider
    pub key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckinRequest {
    /// Scan code, signed reference or registration id
    token: String,
    #[serde(default = "default_mode")]
    mode: ScanMode,
    /// Admin-supplied actor label; ignored for station actors
    station: Option<String>,
}

fn default_mode() -> ScanMode {
    ScanMode::In
}

#[derive(Debug, Serialize)]
struct CheckinResponse {
    result: ScanOutcome,
    state: StateLabel,
    registration: Registration,
}

/// Applies one scan for a station or admin actor
async fn check_in(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<GateQuery>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<CheckinRequest>,
) -> Result<Json<CheckinResponse>> {
    let event = Event::find_by_slug(&state.pool, &slug)
        .await?
        .ok_or_else(|| AppError::NotFound("event".to_string()))?;

    let actor = authorize(&state, &jar, &headers, query.key.as_deref(), &event).await?;

    // The audit label comes from the authenticated identity; only admin
    // actors may attribute the scan to a named station.
    let actor_label = match (&actor, req.station) {
        (Actor::Admin { .. }, Some(label)) if !label.trim().is_empty() => label,
        _ => actor.audit_label(),
    };

    let registration = checkin::resolve_registration(
        &state.pool,
        &event,
        req.token.trim(),
        state.config.scan_ref_secret.expose_secret(),
    )
    .await?
    .ok_or_else(|| AppError::NotFound("registration".to_string()))?;

    let scan =
        checkin::apply_scan(&state.pool, registration, req.mode, &actor_label, Utc::now()).await?;

    if scan.result.mutated() {
        let action = match scan.result {
            ScanOutcome::Out => AttendanceAction::Out,
            _ => AttendanceAction::In,
        };
        let notification = CheckinNotification {
            event_id: event.id,
            event_slug: event.slug.clone(),
            registration_id: scan.registration.id,
            email: scan.registration.email.clone(),
            action,
            actor: actor_label,
            at: Utc::now(),
        };
        let notifier = state.notifier.clone();
        // Decoupled from this request's lifecycle
        tokio::spawn(async move { notifier.notify(notification).await });
    }

    Ok(Json(CheckinResponse {
        result: scan.result,
        state: checkin::state_of(&scan.registration),
        registration: scan.registration,
    }))
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    total: i64,
    attended: i64,
    no_shows: i64,
    per_actor: Vec<ActorCheckins>,
}

/// Attendance counters plus the per-actor breakdown from the audit log
async fn stats(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<GateQuery>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<StatsResponse>> {
    let event = Event::find_by_slug(&state.pool, &slug)
        .await?
        .ok_or_else(|| AppError::NotFound("event".to_string()))?;
    require_admin(authorize(&state, &jar, &headers, query.key.as_deref(), &event).await?)?;

    let counts = Registration::attendance_counts(&state.pool, event.id).await?;
    let per_actor = AttendanceEvent::count_checkins_by_actor(&state.pool, event.id).await?;

    Ok(Json(StatsResponse {
        total: counts.total,
        attended: counts.attended,
        no_shows: counts.total - counts.attended,
        per_actor,
    }))
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    key: Option<String>,
    limit: Option<i64>,
}

/// Recent transitions, newest first (dashboard ticker)
async fn attendance_log(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<LogQuery>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<Vec<AttendanceEvent>>> {
    let event = Event::find_by_slug(&state.pool, &slug)
        .await?
        .ok_or_else(|| AppError::NotFound("event".to_string()))?;
    require_admin(authorize(&state, &jar, &headers, query.key.as_deref(), &event).await?)?;

    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let rows = AttendanceEvent::list_recent_by_event(&state.pool, event.id, limit).await?;

    Ok(Json(rows))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/e/:slug/checkin", post(check_in))
        .route("/e/:slug/stats", get(stats))
        .route("/e/:slug/attendance-log", get(attendance_log))
}
