//! Password hashing and verification
//!
//! PBKDF2-HMAC-SHA256 with a fresh per-account salt. The iteration
//! count is stored alongside the hash so it can be raised for new
//! password changes without invalidating existing credentials.

use std::num::NonZeroU32;

use ring::pbkdf2;
use ring::rand::SecureRandom;

/// Salt length in bytes
pub const SALT_LEN: usize = 16;

/// Derived key length in bytes (256-bit)
pub const HASH_LEN: usize = 32;

/// Default PBKDF2 iteration count for new passwords
pub const DEFAULT_ITERATIONS: u32 = 600_000;

static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

/// Salt, hash, and iteration count for one hashed password
#[derive(Clone, Debug)]
pub struct PasswordRecord {
    pub salt: String, // Hex-encoded
    pub hash: String, // Hex-encoded
    pub iterations: u32,
}

/// Hashes passwords with a configured iteration count
#[derive(Clone, Debug)]
pub struct PasswordHasher {
    iterations: NonZeroU32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_ITERATIONS)
    }
}

impl PasswordHasher {
    /// Create a hasher with the given iteration count. Zero falls back
    /// to the default.
    #[must_use]
    pub fn new(iterations: u32) -> Self {
        let iterations = NonZeroU32::new(iterations)
            .unwrap_or_else(|| NonZeroU32::new(DEFAULT_ITERATIONS).expect("nonzero default"));
        Self { iterations }
    }

    /// Hash a password with a fresh random salt
    #[must_use]
    pub fn hash(&self, password: &str) -> PasswordRecord {
        let mut salt = [0u8; SALT_LEN];
        ring::rand::SystemRandom::new()
            .fill(&mut salt)
            .expect("Failed to generate password salt");

        let mut derived = [0u8; HASH_LEN];
        pbkdf2::derive(
            PBKDF2_ALG,
            self.iterations,
            &salt,
            password.as_bytes(),
            &mut derived,
        );

        PasswordRecord {
            salt: hex::encode(salt),
            hash: hex::encode(derived),
            iterations: self.iterations.get(),
        }
    }
}

/// Verify a candidate password against a stored salt/hash pair.
///
/// Fails closed (`false`) on an empty candidate, salt, or hash, on a
/// malformed hex encoding, or on a zero iteration count. The comparison
/// is constant-time (ring's `pbkdf2::verify` never short-circuits on the
/// first differing byte).
#[must_use]
pub fn verify(candidate: &str, salt_hex: &str, hash_hex: &str, iterations: u32) -> bool {
    if candidate.is_empty() || salt_hex.is_empty() || hash_hex.is_empty() {
        return false;
    }
    let Some(iterations) = NonZeroU32::new(iterations) else {
        return false;
    };
    let Ok(salt) = hex::decode(salt_hex) else {
        return false;
    };
    let Ok(expected) = hex::decode(hash_hex) else {
        return false;
    };

    pbkdf2::verify(
        PBKDF2_ALG,
        iterations,
        &salt,
        candidate.as_bytes(),
        &expected,
    )
    .is_ok()
}
