//! Station credential handling.
//!
//! Station secrets are long-lived shared secrets typed into scanning
//! devices, so they are stored behind argon2 (deliberately expensive to
//! check, resists offline brute force). Short-lived session tokens use the
//! fast HMAC path in `services::token` instead.

use argon2::{
    password_hash::{rand_core::OsRng, rand_core::RngCore, PasswordHash, SaltString},
    Argon2, PasswordHasher, PasswordVerifier,
};

/// Generates a fresh station secret (shown to the operator exactly once)
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hashes a station secret into a PHC string for storage
pub fn hash_secret(secret: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash station secret: {}", e))?;

    Ok(hash.to_string())
}

/// Verifies a presented secret against a stored PHC hash. Any parse or
/// verification problem counts as a mismatch.
pub fn verify_secret(secret: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };

    Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let secret = generate_secret();
        let hash = hash_secret(&secret).unwrap();

        assert!(verify_secret(&secret, &hash));
        assert!(!verify_secret("wrong-secret", &hash));
    }

    #[test]
    fn rotation_invalidates_old_secret() {
        let old = generate_secret();
        let new = generate_secret();
        let new_hash = hash_secret(&new).unwrap();

        assert!(!verify_secret(&old, &new_hash));
        assert!(verify_secret(&new, &new_hash));
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_secret("anything", "not-a-phc-string"));
        assert!(!verify_secret("anything", ""));
    }

    #[test]
    fn generated_secrets_are_distinct() {
        assert_ne!(generate_secret(), generate_secret());
        assert_eq!(generate_secret().len(), 64);
    }
}
