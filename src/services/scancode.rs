//! Scan codes and signed scan references.
//!
//! A badge carries either a bare scan code (random hex, unique per event)
//! or a self-describing signed reference of the form
//! `tk:<registration_id>:<signature>`, where the signature is HMAC-SHA256
//! over `<registration_id>:<event_id>`. Binding the event id into the
//! signed material means a reference lifted from one event can never
//! resolve under another.

use ring::hmac;
use uuid::Uuid;

const REFERENCE_PREFIX: &str = "tk:";

/// Generates a fresh scan code for a new registration
pub fn generate_code() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Builds a signed reference for embedding in QR payloads
pub fn sign_reference(registration_id: Uuid, event_id: Uuid, secret: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let message = format!("{}:{}", registration_id, event_id);
    let tag = hmac::sign(&key, message.as_bytes());

    format!("{}{}:{}", REFERENCE_PREFIX, registration_id, hex::encode(tag.as_ref()))
}

/// Returns true if the token has the signed-reference shape (as opposed to
/// a bare scan code)
pub fn looks_like_reference(token: &str) -> bool {
    token.starts_with(REFERENCE_PREFIX)
}

/// Verifies a signed reference against the event implied by the gate.
/// Returns the registration id on success, None on any mismatch.
pub fn verify_reference(token: &str, event_id: Uuid, secret: &str) -> Option<Uuid> {
    let rest = token.strip_prefix(REFERENCE_PREFIX)?;
    let (id_part, sig_part) = rest.split_once(':')?;
    let registration_id = Uuid::parse_str(id_part).ok()?;
    let sig = hex::decode(sig_part).ok()?;

    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let message = format!("{}:{}", registration_id, event_id);
    hmac::verify(&key, message.as_bytes(), &sig).ok()?;

    Some(registration_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "scan-ref-secret";

    #[test]
    fn reference_roundtrip() {
        let reg = Uuid::new_v4();
        let event = Uuid::new_v4();
        let token = sign_reference(reg, event, SECRET);

        assert!(looks_like_reference(&token));
        assert_eq!(verify_reference(&token, event, SECRET), Some(reg));
    }

    #[test]
    fn reference_is_bound_to_event() {
        let reg = Uuid::new_v4();
        let token = sign_reference(reg, Uuid::new_v4(), SECRET);

        // Same registration, different event: signature no longer matches
        assert_eq!(verify_reference(&token, Uuid::new_v4(), SECRET), None);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let reg = Uuid::new_v4();
        let event = Uuid::new_v4();
        let token = sign_reference(reg, event, SECRET);

        assert_eq!(verify_reference(&token, event, "other-secret"), None);
    }

    #[test]
    fn malformed_references_are_rejected() {
        let event = Uuid::new_v4();
        assert_eq!(verify_reference("tk:", event, SECRET), None);
        assert_eq!(verify_reference("tk:not-a-uuid:abcd", event, SECRET), None);
        assert_eq!(verify_reference("tk:00000000-0000-0000-0000-000000000000:zz", event, SECRET), None);
        assert!(!looks_like_reference("plain-scan-code"));
    }

    #[test]
    fn generated_codes_are_distinct() {
        assert_ne!(generate_code(), generate_code());
        assert_eq!(generate_code().len(), 32);
    }
}
