//! Station management: create, list, rotate secret, deactivate. Admin only.
//!
//! The plaintext secret is returned exactly once, on creation or rotation;
//! only its argon2 hash is stored.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::checkin::GateQuery;
use crate::api::middleware::auth::{authorize, require_admin};
use crate::api::middleware::session::AppState;
use crate::error::{AppError, Result};
use crate::models::{
    event::Event,
    station::{CreateStationData, Station},
};
use crate::services::secrets;

#[derive(Debug, Deserialize)]
struct CreateStationRequest {
    code: String,
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct StationWithSecret {
    station: Station,
    /// Shown exactly once; store it on the device now
    secret: String,
}

async fn create_station(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<GateQuery>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<CreateStationRequest>,
) -> Result<Json<StationWithSecret>> {
    let event = Event::find_by_slug(&state.pool, &slug)
        .await?
        .ok_or_else(|| AppError::NotFound("event".to_string()))?;
    require_admin(authorize(&state, &jar, &headers, query.key.as_deref(), &event).await?)?;

    let code = req.code.trim().to_string();
    if code.is_empty() {
        return Err(AppError::Validation("station code is required".to_string()));
    }

    let secret = secrets::generate_secret();
    let secret_hash = secrets::hash_secret(&secret)?;

    let station = Station::create(
        &state.pool,
        CreateStationData {
            event_id: event.id,
            code,
            name: req.name.filter(|n| !n.trim().is_empty()),
            secret_hash,
        },
    )
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Validation("station code already exists for this event".to_string())
        }
        _ => AppError::Database(e),
    })?;

    tracing::info!(event_id = %event.id, station_id = %station.id, "Station created");

    Ok(Json(StationWithSecret { station, secret }))
}

async fn list_stations(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<GateQuery>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<Vec<Station>>> {
    let event = Event::find_by_slug(&state.pool, &slug)
        .await?
        .ok_or_else(|| AppError::NotFound("event".to_string()))?;
    require_admin(authorize(&state, &jar, &headers, query.key.as_deref(), &event).await?)?;

    let stations = Station::list_by_event(&state.pool, event.id).await?;

    Ok(Json(stations))
}

#[derive(Debug, Serialize)]
struct RotatedSecret {
    secret: String,
}

/// Issues a new secret for a station; the old one stops working immediately
async fn rotate_secret(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, Uuid)>,
    Query(query): Query<GateQuery>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<RotatedSecret>> {
    let event = Event::find_by_slug(&state.pool, &slug)
        .await?
        .ok_or_else(|| AppError::NotFound("event".to_string()))?;
    require_admin(authorize(&state, &jar, &headers, query.key.as_deref(), &event).await?)?;

    let station = find_event_station(&state, &event, id).await?;

    let secret = secrets::generate_secret();
    let secret_hash = secrets::hash_secret(&secret)?;
    Station::rotate_secret(&state.pool, station.id, &secret_hash).await?;

    tracing::info!(event_id = %event.id, station_id = %station.id, "Station secret rotated");

    Ok(Json(RotatedSecret { secret }))
}

/// Soft-deactivates a station; outstanding sessions fail the gate from now on
async fn deactivate_station(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, Uuid)>,
    Query(query): Query<GateQuery>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<Station>> {
    let event = Event::find_by_slug(&state.pool, &slug)
        .await?
        .ok_or_else(|| AppError::NotFound("event".to_string()))?;
    require_admin(authorize(&state, &jar, &headers, query.key.as_deref(), &event).await?)?;

    let station = find_event_station(&state, &event, id).await?;
    Station::deactivate(&state.pool, station.id).await?;

    tracing::info!(event_id = %event.id, station_id = %station.id, "Station deactivated");

    let station = Station::find_by_id(&state.pool, station.id)
        .await?
        .ok_or_else(|| AppError::NotFound("station".to_string()))?;
    Ok(Json(station))
}

async fn find_event_station(state: &AppState, event: &Event, id: Uuid) -> Result<Station> {
    Station::find_by_id(&state.pool, id)
        .await?
        .filter(|s| s.event_id == event.id)
        .ok_or_else(|| AppError::NotFound("station".to_string()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/e/:slug/stations", get(list_stations).post(create_station))
        .route("/e/:slug/stations/:id/rotate", post(rotate_secret))
        .route("/e/:slug/stations/:id/deactivate", post(deactivate_station))
}
