use axum::extract::FromRef;
use axum_extra::extract::cookie::{Cookie, SameSite};
use sqlx::PgPool;
use std::sync::Arc;

use crate::config::Config;
use crate::services::{rate_limit::RateLimiter, webhook::CheckinNotifier};

/// Cookie names carrying the two session token kinds
pub const ADMIN_SESSION_COOKIE: &str = "turnstile_admin";
pub const STATION_SESSION_COOKIE: &str = "turnstile_station";

/// Session lifetimes. Station sessions cover one event day; admin sessions
/// are shorter-lived.
pub const ADMIN_SESSION_TTL_HOURS: i64 = 12;
pub const STATION_SESSION_TTL_HOURS: i64 = 24;

/// Application state shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub notifier: Arc<dyn CheckinNotifier>,
    pub station_login_limiter: Arc<RateLimiter>,
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> PgPool {
        state.pool.clone()
    }
}

/// Builds an HTTP-only session cookie carrying a bearer token
pub fn session_cookie(name: &'static str, token: String, ttl_hours: i64) -> Cookie<'static> {
    Cookie::build((name, token))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::hours(ttl_hours))
        .build()
}

/// Builds an expired cookie that clears the session
pub fn clear_session_cookie(name: &'static str) -> Cookie<'static> {
    Cookie::build((name, ""))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::ZERO)
        .build()
}
