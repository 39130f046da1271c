//! Session endpoints: admin login by legacy key, station login by
//! code + secret. Both set an HTTP-only cookie carrying a signed token.

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{Duration, Utc};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::middleware::auth::keys_equal;
use crate::api::middleware::session::{
    clear_session_cookie, session_cookie, AppState, ADMIN_SESSION_COOKIE,
    ADMIN_SESSION_TTL_HOURS, STATION_SESSION_COOKIE, STATION_SESSION_TTL_HOURS,
};
use crate::error::{AppError, Result};
use crate::models::{event::Event, organizer::Organizer, station::Station};
use crate::services::{secrets, token};

#[derive(Debug, Deserialize)]
struct AdminLoginRequest {
    key: String,
    /// Optional operator label recorded in audit rows
    label: Option<String>,
}

#[derive(Debug, Serialize)]
struct AdminLoginResponse {
    role: token::Role,
    organizer_id: Option<Uuid>,
}

/// Exchanges a legacy shared key for an admin session cookie. The global
/// admin key yields a superadmin session; an organizer's check-in key
/// yields a session scoped to that tenant.
async fn admin_login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<AdminLoginRequest>,
) -> Result<(CookieJar, Json<AdminLoginResponse>)> {
    if req.key.is_empty() {
        return Err(AppError::Unauthorized);
    }

    let label = req
        .label
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| "admin".to_string());

    let (role, organizer_id) = if state
        .config
        .admin_api_key
        .as_ref()
        .map(|k| keys_equal(&req.key, k.expose_secret()))
        .unwrap_or(false)
    {
        (token::Role::Superadmin, None)
    } else {
        let organizer = Organizer::find_by_checkin_key(&state.pool, &req.key)
            .await?
            .ok_or(AppError::Unauthorized)?;
        (token::Role::Admin, Some(organizer.id))
    };

    let now = Utc::now();
    let session = token::issue_admin(
        &label,
        role,
        organizer_id,
        Duration::hours(ADMIN_SESSION_TTL_HOURS),
        state.config.admin_session_secret.expose_secret(),
        now,
    );

    tracing::info!(label = %label, role = ?role, "Admin session issued");

    let jar = jar.add(session_cookie(
        ADMIN_SESSION_COOKIE,
        session,
        ADMIN_SESSION_TTL_HOURS,
    ));
    Ok((jar, Json(AdminLoginResponse { role, organizer_id })))
}

async fn admin_logout(jar: CookieJar) -> CookieJar {
    jar.add(clear_session_cookie(ADMIN_SESSION_COOKIE))
}

#[derive(Debug, Deserialize)]
struct StationLoginRequest {
    code: String,
    secret: String,
}

#[derive(Debug, Serialize)]
struct StationIdentity {
    id: Uuid,
    event_id: Uuid,
    code: String,
    name: Option<String>,
}

/// Authenticates a check-in station against its event. Attempts are
/// rate-limited per (event, code) before the expensive hash comparison.
async fn station_login(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    jar: CookieJar,
    Json(req): Json<StationLoginRequest>,
) -> Result<(CookieJar, Json<StationIdentity>)> {
    let event = Event::find_by_slug(&state.pool, &slug)
        .await?
        .ok_or_else(|| AppError::NotFound("event".to_string()))?;

    let limiter_key = format!("{}:{}", event.id, req.code);
    if !state.station_login_limiter.check(&limiter_key) {
        tracing::warn!(event_id = %event.id, code = %req.code, "Station login rate limited");
        return Err(AppError::RateLimited);
    }

    let station = Station::find_by_code(&state.pool, event.id, &req.code)
        .await?
        .filter(|s| s.is_active)
        .ok_or(AppError::Unauthorized)?;

    if !secrets::verify_secret(&req.secret, &station.secret_hash) {
        tracing::warn!(event_id = %event.id, code = %req.code, "Station login failed");
        return Err(AppError::Unauthorized);
    }

    let now = Utc::now();
    let session = token::issue_station(
        station.id,
        event.id,
        Duration::hours(STATION_SESSION_TTL_HOURS),
        state.config.station_session_secret.expose_secret(),
        now,
    );

    tracing::info!(event_id = %event.id, station_id = %station.id, "Station session issued");

    let jar = jar.add(session_cookie(
        STATION_SESSION_COOKIE,
        session,
        STATION_SESSION_TTL_HOURS,
    ));
    let identity = StationIdentity {
        id: station.id,
        event_id: station.event_id,
        code: station.code,
        name: station.name,
    };
    Ok((jar, Json(identity)))
}

async fn station_logout(jar: CookieJar) -> CookieJar {
    jar.add(clear_session_cookie(STATION_SESSION_COOKIE))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/session", post(admin_login).delete(admin_logout))
        .route(
            "/e/:slug/station-session",
            post(station_login).delete(station_logout),
        )
}
