//! Authorization gate.
//!
//! Resolves an inbound request plus an event to exactly one authenticated
//! actor, or rejects it. Credentials are extracted as an ordered list of
//! named providers and tried first-match-wins:
//!
//!   1. station session cookie (scoped to this event)
//!   2. admin session cookie (tenant-scoped unless superadmin)
//!   3. legacy shared key via bearer/header/query (global admin key or the
//!      event organizer's check-in key)
//!
//! Every failure, wrong-credential or wrong-tenant alike, surfaces as the
//! same Unauthorized so callers cannot tell the two apart.

use axum::http::{header, HeaderMap};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use ring::hmac;
use ring::rand::SystemRandom;
use secrecy::ExposeSecret;
use std::sync::OnceLock;
use uuid::Uuid;

use super::session::{AppState, ADMIN_SESSION_COOKIE, STATION_SESSION_COOKIE};
use crate::error::AppError;
use crate::models::{event::Event, organizer::Organizer, station::Station};
use crate::services::token::{self, Role};

/// Header carrying a legacy shared key
pub const CHECKIN_KEY_HEADER: &str = "x-checkin-key";

/// One extracted credential, tagged by provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    StationToken(String),
    AdminToken(String),
    ApiKey(String),
}

/// The authenticated identity a request acts as
#[derive(Debug, Clone)]
pub enum Actor {
    Station(Station),
    Admin {
        label: String,
        /// Tenant scope; None means superadmin (no scoping filter)
        organizer_id: Option<Uuid>,
    },
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        matches!(self, Actor::Admin { .. })
    }

    /// Label recorded in audit rows. Resolved server-side from the
    /// authenticated identity; station clients cannot choose it.
    pub fn audit_label(&self) -> String {
        match self {
            Actor::Station(station) => station.label().to_string(),
            Actor::Admin { label, .. } => label.clone(),
        }
    }
}

/// Extracts candidate credentials in provider order. Pure; independently
/// testable against synthetic requests.
pub fn extract_credentials(
    jar: &CookieJar,
    headers: &HeaderMap,
    query_key: Option<&str>,
) -> Vec<Credential> {
    let mut credentials = Vec::new();

    if let Some(cookie) = jar.get(STATION_SESSION_COOKIE) {
        if !cookie.value().is_empty() {
            credentials.push(Credential::StationToken(cookie.value().to_string()));
        }
    }

    if let Some(cookie) = jar.get(ADMIN_SESSION_COOKIE) {
        if !cookie.value().is_empty() {
            credentials.push(Credential::AdminToken(cookie.value().to_string()));
        }
    }

    if let Some(bearer) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        if !bearer.is_empty() {
            credentials.push(Credential::ApiKey(bearer.to_string()));
        }
    }

    if let Some(key) = headers.get(CHECKIN_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        if !key.is_empty() {
            credentials.push(Credential::ApiKey(key.to_string()));
        }
    }

    if let Some(key) = query_key {
        if !key.is_empty() {
            credentials.push(Credential::ApiKey(key.to_string()));
        }
    }

    credentials
}

/// Resolves the request to exactly one actor for this event. The caller has
/// already looked the event up by slug; a missing event is not-found before
/// any credential is evaluated.
pub async fn authorize(
    state: &AppState,
    jar: &CookieJar,
    headers: &HeaderMap,
    query_key: Option<&str>,
    event: &Event,
) -> Result<Actor, AppError> {
    let now = Utc::now();

    for credential in extract_credentials(jar, headers, query_key) {
        match credential {
            Credential::StationToken(token) => {
                let Some(claims) = token::verify_station(
                    &token,
                    state.config.station_session_secret.expose_secret(),
                    now,
                ) else {
                    continue;
                };
                // A station session is only valid for its own event
                if claims.event_id != event.id {
                    continue;
                }
                let Some(station) = Station::find_by_id(&state.pool, claims.station_id).await?
                else {
                    continue;
                };
                if !station.is_active || station.event_id != event.id {
                    continue;
                }
                return Ok(Actor::Station(station));
            }

            Credential::AdminToken(token) => {
                let Some(claims) = token::verify_admin(
                    &token,
                    state.config.admin_session_secret.expose_secret(),
                    now,
                ) else {
                    continue;
                };
                match claims.role {
                    Role::Superadmin => {
                        return Ok(Actor::Admin {
                            label: claims.sub,
                            organizer_id: None,
                        });
                    }
                    Role::Admin => {
                        // Tenant scoping: the session's organizer must own
                        // the event
                        if claims.organizer_id != Some(event.organizer_id) {
                            continue;
                        }
                        return Ok(Actor::Admin {
                            label: claims.sub,
                            organizer_id: claims.organizer_id,
                        });
                    }
                }
            }

            Credential::ApiKey(key) => {
                if let Some(admin_key) = &state.config.admin_api_key {
                    if keys_equal(&key, admin_key.expose_secret()) {
                        return Ok(Actor::Admin {
                            label: "admin".to_string(),
                            organizer_id: None,
                        });
                    }
                }

                let Some(organizer) =
                    Organizer::find_by_id(&state.pool, event.organizer_id).await?
                else {
                    continue;
                };
                if let Some(checkin_key) = &organizer.checkin_key {
                    if keys_equal(&key, checkin_key) {
                        return Ok(Actor::Admin {
                            label: "admin".to_string(),
                            organizer_id: Some(organizer.id),
                        });
                    }
                }
            }
        }
    }

    Err(AppError::Unauthorized)
}

/// Resolves an admin actor without an event scope, for surfaces that exist
/// before any event does (provisioning). Station credentials never match
/// here; legacy keys resolve through the global key or any organizer's
/// check-in key.
pub async fn authorize_admin(
    state: &AppState,
    jar: &CookieJar,
    headers: &HeaderMap,
    query_key: Option<&str>,
) -> Result<Actor, AppError> {
    let now = Utc::now();

    for credential in extract_credentials(jar, headers, query_key) {
        match credential {
            Credential::StationToken(_) => continue,

            Credential::AdminToken(token) => {
                let Some(claims) = token::verify_admin(
                    &token,
                    state.config.admin_session_secret.expose_secret(),
                    now,
                ) else {
                    continue;
                };
                match claims.role {
                    Role::Superadmin => {
                        return Ok(Actor::Admin {
                            label: claims.sub,
                            organizer_id: None,
                        });
                    }
                    Role::Admin => {
                        // A tenant admin token must carry its scope
                        let Some(organizer_id) = claims.organizer_id else {
                            continue;
                        };
                        return Ok(Actor::Admin {
                            label: claims.sub,
                            organizer_id: Some(organizer_id),
                        });
                    }
                }
            }

            Credential::ApiKey(key) => {
                if let Some(admin_key) = &state.config.admin_api_key {
                    if keys_equal(&key, admin_key.expose_secret()) {
                        return Ok(Actor::Admin {
                            label: "admin".to_string(),
                            organizer_id: None,
                        });
                    }
                }

                if let Some(organizer) =
                    Organizer::find_by_checkin_key(&state.pool, &key).await?
                {
                    return Ok(Actor::Admin {
                        label: "admin".to_string(),
                        organizer_id: Some(organizer.id),
                    });
                }
            }
        }
    }

    Err(AppError::Unauthorized)
}

/// Requires an admin actor; stations cannot reach admin surfaces
pub fn require_admin(actor: Actor) -> Result<Actor, AppError> {
    if actor.is_admin() {
        Ok(actor)
    } else {
        Err(AppError::Unauthorized)
    }
}

/// Compares two legacy keys without leaking prefix or length timing: both
/// sides are mapped to fixed-length HMAC tags under a per-process random
/// key, and the tags are compared.
pub fn keys_equal(presented: &str, expected: &str) -> bool {
    let key = comparison_key();
    hmac::sign(key, presented.as_bytes()).as_ref()
        == hmac::sign(key, expected.as_bytes()).as_ref()
}

fn comparison_key() -> &'static hmac::Key {
    static KEY: OnceLock<hmac::Key> = OnceLock::new();
    KEY.get_or_init(|| {
        // A fixed fallback key still compares correctly
        hmac::Key::generate(hmac::HMAC_SHA256, &SystemRandom::new())
            .unwrap_or_else(|_| hmac::Key::new(hmac::HMAC_SHA256, &[0u8; 32]))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn jar_with(cookies: &[(&'static str, &str)]) -> CookieJar {
        let mut jar = CookieJar::new();
        for (name, value) in cookies {
            jar = jar.add(axum_extra::extract::cookie::Cookie::new(
                *name,
                value.to_string(),
            ));
        }
        jar
    }

    #[test]
    fn provider_order_is_station_admin_key() {
        let jar = jar_with(&[
            (ADMIN_SESSION_COOKIE, "admin-token"),
            (STATION_SESSION_COOKIE, "station-token"),
        ]);
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer bearer-key"),
        );
        headers.insert(CHECKIN_KEY_HEADER, HeaderValue::from_static("header-key"));

        let credentials = extract_credentials(&jar, &headers, Some("query-key"));

        assert_eq!(
            credentials,
            vec![
                Credential::StationToken("station-token".to_string()),
                Credential::AdminToken("admin-token".to_string()),
                Credential::ApiKey("bearer-key".to_string()),
                Credential::ApiKey("header-key".to_string()),
                Credential::ApiKey("query-key".to_string()),
            ]
        );
    }

    #[test]
    fn empty_credentials_are_skipped() {
        let jar = jar_with(&[(STATION_SESSION_COOKIE, "")]);
        let headers = HeaderMap::new();

        assert!(extract_credentials(&jar, &headers, None).is_empty());
        assert!(extract_credentials(&jar, &headers, Some("")).is_empty());
    }

    #[test]
    fn bearer_prefix_is_required_for_authorization_header() {
        let jar = CookieJar::new();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcjpwdw=="),
        );

        assert!(extract_credentials(&jar, &headers, None).is_empty());
    }

    #[test]
    fn key_comparison_is_exact() {
        assert!(keys_equal("secret-key", "secret-key"));
        assert!(!keys_equal("secret-key", "secret-keY"));
        assert!(!keys_equal("secret-key", "secret-key2"));
        assert!(!keys_equal("", "secret-key"));
    }
}
