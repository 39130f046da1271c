//! Provisioning: organizers and events. These surfaces exist before any
//! event does, so they authorize without an event scope.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::checkin::GateQuery;
use crate::api::middleware::auth::{authorize, authorize_admin, require_admin, Actor};
use crate::api::middleware::session::AppState;
use crate::error::{AppError, Result};
use crate::models::{
    event::{CreateEventData, Event},
    organizer::{CreateOrganizerData, Organizer},
};

#[derive(Debug, Deserialize)]
struct CreateOrganizerRequest {
    name: String,
    slug: String,
    checkin_key: Option<String>,
}

/// Creates a tenant. Superadmin only.
async fn create_organizer(
    State(state): State<AppState>,
    Query(query): Query<GateQuery>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<CreateOrganizerRequest>,
) -> Result<Json<Organizer>> {
    let actor = authorize_admin(&state, &jar, &headers, query.key.as_deref()).await?;
    let Actor::Admin {
        organizer_id: None, ..
    } = actor
    else {
        return Err(AppError::Unauthorized);
    };

    validate_slug(&req.slug)?;
    if req.name.trim().is_empty() {
        return Err(AppError::Validation("organizer name is required".to_string()));
    }

    let organizer = Organizer::create(
        &state.pool,
        CreateOrganizerData {
            name: req.name.trim().to_string(),
            slug: req.slug,
            checkin_key: req.checkin_key.filter(|k| !k.is_empty()),
        },
    )
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Validation("organizer slug already exists".to_string())
        }
        _ => AppError::Database(e),
    })?;

    tracing::info!(organizer_id = %organizer.id, slug = %organizer.slug, "Organizer created");

    Ok(Json(organizer))
}

#[derive(Debug, Deserialize)]
struct CreateEventRequest {
    name: String,
    slug: String,
    capacity: Option<i32>,
    /// Required for superadmin; tenant admins always create under their own
    /// organizer
    organizer_id: Option<Uuid>,
}

async fn create_event(
    State(state): State<AppState>,
    Query(query): Query<GateQuery>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<CreateEventRequest>,
) -> Result<Json<Event>> {
    let actor = authorize_admin(&state, &jar, &headers, query.key.as_deref()).await?;
    let Actor::Admin { organizer_id, .. } = actor else {
        return Err(AppError::Unauthorized);
    };

    let organizer_id = match organizer_id {
        Some(own) => own,
        None => req.organizer_id.ok_or_else(|| {
            AppError::Validation("organizer_id is required".to_string())
        })?,
    };

    validate_slug(&req.slug)?;
    if req.name.trim().is_empty() {
        return Err(AppError::Validation("event name is required".to_string()));
    }
    if matches!(req.capacity, Some(c) if c <= 0) {
        return Err(AppError::Validation("capacity must be positive".to_string()));
    }

    let event = Event::create(
        &state.pool,
        CreateEventData {
            organizer_id,
            name: req.name.trim().to_string(),
            slug: req.slug,
            capacity: req.capacity,
        },
    )
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Validation("event slug already exists".to_string())
        }
        _ => AppError::Database(e),
    })?;

    tracing::info!(event_id = %event.id, slug = %event.slug, "Event created");

    Ok(Json(event))
}

#[derive(Debug, Deserialize)]
struct ListEventsQuery {
    key: Option<String>,
    /// Superadmin picks a tenant; tenant admins are fixed to their own
    organizer_id: Option<Uuid>,
}

async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<ListEventsQuery>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<Vec<Event>>> {
    let actor = authorize_admin(&state, &jar, &headers, query.key.as_deref()).await?;
    let Actor::Admin { organizer_id, .. } = actor else {
        return Err(AppError::Unauthorized);
    };

    let organizer_id = match organizer_id {
        Some(own) => own,
        None => query.organizer_id.ok_or_else(|| {
            AppError::Validation("organizer_id is required".to_string())
        })?,
    };

    let events = Event::list_by_organizer(&state.pool, organizer_id).await?;

    Ok(Json(events))
}

/// Soft-deactivates an event; its slug stops resolving for every route
async fn deactivate_event(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<GateQuery>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<serde_json::Value>> {
    let event = Event::find_by_slug(&state.pool, &slug)
        .await?
        .ok_or_else(|| AppError::NotFound("event".to_string()))?;
    require_admin(authorize(&state, &jar, &headers, query.key.as_deref(), &event).await?)?;

    Event::deactivate(&state.pool, event.id).await?;

    tracing::info!(event_id = %event.id, slug = %event.slug, "Event deactivated");

    Ok(Json(serde_json::json!({ "deactivated": true })))
}

fn validate_slug(slug: &str) -> Result<()> {
    let ok = !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if ok {
        Ok(())
    } else {
        Err(AppError::Validation(
            "slug must be lowercase letters, digits and hyphens".to_string(),
        ))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/organizers", post(create_organizer))
        .route("/events", get(list_events).post(create_event))
        .route("/e/:slug/deactivate", post(deactivate_event))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_validation() {
        assert!(validate_slug("conf-2026").is_ok());
        assert!(validate_slug("x").is_ok());
        assert!(validate_slug("").is_err());
        assert!(validate_slug("Conf").is_err());
        assert!(validate_slug("conf 2026").is_err());
        assert!(validate_slug("conf/2026").is_err());
    }
}
