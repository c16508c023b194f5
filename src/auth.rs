// Password hashing and session token generation

use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

const SALT_LEN: usize = 16;

/// Hash a password with a fresh random salt.
///
/// The stored form is `<salt>$<sha256-hex>` so verification only needs the
/// stored string and the candidate password.
pub fn hash_password(password: &str) -> String {
    let salt = generate_salt();
    format!("{}${}", salt, digest(&salt, password))
}

/// Check a candidate password against a stored `<salt>$<digest>` hash.
pub fn verify_password(password: &str, stored: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, expected)) => digest(salt, password) == expected,
        None => false,
    }
}

/// Generate an unpredictable session token.
pub fn generate_token() -> String {
    Uuid::new_v4().to_string()
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_salt() -> String {
    const CHARSET: &[u8] = b"0123456789abcdef";

    let mut rng = rand::thread_rng();
    (0..SALT_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        let stored = hash_password("hunter2");
        assert!(verify_password("hunter2", &stored));
        assert!(!verify_password("hunter3", &stored));
    }

    #[test]
    fn same_password_hashes_differently() {
        // Fresh salt per account
        let a = hash_password("secret");
        let b = hash_password("secret");
        assert_ne!(a, b);
        assert!(verify_password("secret", &a));
        assert!(verify_password("secret", &b));
    }

    #[test]
    fn malformed_stored_hash_never_verifies() {
        assert!(!verify_password("secret", "no-separator-here"));
        assert!(!verify_password("secret", ""));
    }

    #[test]
    fn tokens_are_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }
}
