//! Compact bearer tokens for the two actor kinds (admin, station).
//!
//! Token = base64url(JSON claims) + "." + base64url(HMAC-SHA256 over the
//! payload). Issuing and verifying are pure functions with no I/O; every
//! verification failure, whatever the cause, comes back as `None` so
//! callers have exactly one failure path.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use ring::hmac;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Superadmin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminClaims {
    /// Display label of the operator ("admin" when none was supplied)
    pub sub: String,
    pub role: Role,
    /// Tenant scope; absent for superadmin
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organizer_id: Option<Uuid>,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationClaims {
    pub station_id: Uuid,
    pub event_id: Uuid,
    pub iat: i64,
    pub exp: i64,
}

pub fn issue_admin(
    user: &str,
    role: Role,
    organizer_id: Option<Uuid>,
    ttl: Duration,
    secret: &str,
    now: DateTime<Utc>,
) -> String {
    let claims = AdminClaims {
        sub: user.to_string(),
        role,
        organizer_id,
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };
    encode(&claims, secret)
}

pub fn issue_station(
    station_id: Uuid,
    event_id: Uuid,
    ttl: Duration,
    secret: &str,
    now: DateTime<Utc>,
) -> String {
    let claims = StationClaims {
        station_id,
        event_id,
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };
    encode(&claims, secret)
}

pub fn verify_admin(token: &str, secret: &str, now: DateTime<Utc>) -> Option<AdminClaims> {
    let claims: AdminClaims = decode(token, secret)?;
    (now.timestamp() < claims.exp).then_some(claims)
}

pub fn verify_station(token: &str, secret: &str, now: DateTime<Utc>) -> Option<StationClaims> {
    let claims: StationClaims = decode(token, secret)?;
    (now.timestamp() < claims.exp).then_some(claims)
}

fn encode<T: Serialize>(claims: &T, secret: &str) -> String {
    // Claims are plain data; serialization cannot fail in practice. An
    // empty payload would never verify, so this still fails closed.
    let payload = serde_json::to_vec(claims).unwrap_or_default();
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let tag = hmac::sign(&key, &payload);

    format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(&payload),
        URL_SAFE_NO_PAD.encode(tag.as_ref())
    )
}

fn decode<T: DeserializeOwned>(token: &str, secret: &str) -> Option<T> {
    let (payload_b64, sig_b64) = token.split_once('.')?;
    let payload = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
    let sig = URL_SAFE_NO_PAD.decode(sig_b64).ok()?;

    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    // Constant-time comparison
    hmac::verify(&key, &payload, &sig).ok()?;

    serde_json::from_slice(&payload).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-admin-secret";
    const OTHER_SECRET: &str = "test-station-secret";

    #[test]
    fn admin_roundtrip() {
        let now = Utc::now();
        let org = Uuid::new_v4();
        let token = issue_admin("alice", Role::Admin, Some(org), Duration::hours(1), SECRET, now);

        let claims = verify_admin(&token, SECRET, now).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.organizer_id, Some(org));
    }

    #[test]
    fn station_roundtrip() {
        let now = Utc::now();
        let (station_id, event_id) = (Uuid::new_v4(), Uuid::new_v4());
        let token = issue_station(station_id, event_id, Duration::hours(8), SECRET, now);

        let claims = verify_station(&token, SECRET, now).unwrap();
        assert_eq!(claims.station_id, station_id);
        assert_eq!(claims.event_id, event_id);
    }

    #[test]
    fn expired_token_fails_closed() {
        let now = Utc::now();
        let token = issue_admin("alice", Role::Admin, None, Duration::minutes(5), SECRET, now);

        assert!(verify_admin(&token, SECRET, now + Duration::minutes(5)).is_none());
        assert!(verify_admin(&token, SECRET, now + Duration::hours(1)).is_none());
        // Still valid one second before expiry
        assert!(verify_admin(&token, SECRET, now + Duration::minutes(4)).is_some());
    }

    #[test]
    fn cross_kind_secret_is_rejected() {
        let now = Utc::now();
        let token = issue_station(Uuid::new_v4(), Uuid::new_v4(), Duration::hours(1), OTHER_SECRET, now);

        // A station token cannot be verified in the admin namespace
        assert!(verify_admin(&token, SECRET, now).is_none());
        assert!(verify_station(&token, SECRET, now).is_none());
        assert!(verify_station(&token, OTHER_SECRET, now).is_some());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let now = Utc::now();
        let token = issue_admin("alice", Role::Admin, None, Duration::hours(1), SECRET, now);

        let (payload_b64, sig_b64) = token.split_once('.').unwrap();
        let mut payload = URL_SAFE_NO_PAD.decode(payload_b64).unwrap();
        let json = String::from_utf8(payload.clone()).unwrap();
        payload = json.replace("\"admin\"", "\"superadmin\"").into_bytes();
        let forged = format!("{}.{}", URL_SAFE_NO_PAD.encode(&payload), sig_b64);

        assert!(verify_admin(&forged, SECRET, now).is_none());
    }

    #[test]
    fn malformed_tokens_fail_closed() {
        let now = Utc::now();
        assert!(verify_admin("", SECRET, now).is_none());
        assert!(verify_admin("no-separator", SECRET, now).is_none());
        assert!(verify_admin("a.b.c", SECRET, now).is_none());
        assert!(verify_admin("!!!.???", SECRET, now).is_none());
    }
}
