//! One-way password hashing (bcrypt).

use tracing::warn;

use super::r#trait::IdentityStoreError;

pub use bcrypt::DEFAULT_COST;

pub fn hash_password(password: &str, cost: u32) -> Result<String, IdentityStoreError> {
    bcrypt::hash(password, cost).map_err(|e| IdentityStoreError::Hashing(e.to_string()))
}

/// `true` only when `candidate` matches `hash`. A malformed hash never
/// matches.
pub fn verify_password(candidate: &str, hash: &str) -> bool {
    match bcrypt::verify(candidate, hash) {
        Ok(matches) => matches,
        Err(e) => {
            warn!(error = %e, "stored password hash is unreadable");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("hunter2", 4).unwrap();
        assert_ne!(hash, "hunter2");
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
    }

    #[test]
    fn garbage_hash_never_matches() {
        assert!(!verify_password("anything", "not-a-bcrypt-hash"));
    }
}
