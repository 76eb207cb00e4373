//! Single-use backup codes
//!
//! Codes are random strings over a restricted alphabet that excludes
//! visually ambiguous characters. Only salted PBKDF2 hashes are stored;
//! the plaintext codes are returned to the caller exactly once at
//! generation time. Regeneration replaces the whole set and salt,
//! invalidating every previously issued code.

use std::num::NonZeroU32;

use chrono::Utc;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use ring::pbkdf2;
use subtle::ConstantTimeEq;

use crate::models::BackupCodeState;

/// Default number of codes per set
pub const DEFAULT_CODE_COUNT: usize = 10;

/// Default code length in characters
pub const DEFAULT_CODE_LENGTH: usize = 10;

/// Fixed PBKDF2 iteration count for backup-code hashes
pub const CODE_ITERATIONS: u32 = 100_000;

/// Salt length in bytes
const SALT_LEN: usize = 16;

/// Uppercase letters and digits minus the visually ambiguous 0/O and
/// 1/I/L. Sampling draws uniform indices, so the odd length is fine.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

/// Generates, hashes, and consumes single-use recovery codes
#[derive(Clone, Debug)]
pub struct BackupCodeVault {
    count: usize,
    length: usize,
}

impl Default for BackupCodeVault {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_COUNT, DEFAULT_CODE_LENGTH)
    }
}

impl BackupCodeVault {
    #[must_use]
    pub fn new(count: usize, length: usize) -> Self {
        Self { count, length }
    }

    /// Generate a fresh code set: new salt, new hashes, new timestamp.
    /// Returns the persisted state and the plaintext codes for one-time
    /// display.
    #[must_use]
    pub fn generate(&self) -> (BackupCodeState, Vec<String>) {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let salt_hex = hex::encode(salt);

        let plain_codes: Vec<String> = (0..self.count).map(|_| self.random_code()).collect();
        let code_hashes = plain_codes
            .iter()
            .map(|code| derive_hash(&salt, code))
            .collect();

        let state = BackupCodeState {
            salt: salt_hex,
            code_hashes,
            generated_at: Utc::now(),
        };
        (state, plain_codes)
    }

    /// Number of unconsumed codes in the current set
    #[must_use]
    pub fn remaining_count(state: Option<&BackupCodeState>) -> usize {
        state.map_or(0, |s| s.code_hashes.len())
    }

    /// Attempt to consume a code from the state in place.
    ///
    /// Fails closed on blank input, absent state, empty salt, or an
    /// empty hash list. The candidate is normalized, hashed, and
    /// compared against every stored entry in constant time; on a match
    /// exactly one entry is removed. The caller must run this inside a
    /// single serialized account update so a racing request cannot
    /// consume the same code twice.
    #[must_use]
    pub fn consume(state: &mut Option<BackupCodeState>, code: &str) -> bool {
        if code.trim().is_empty() {
            return false;
        }
        let Some(current) = state.as_mut() else {
            return false;
        };
        if current.salt.is_empty() || current.code_hashes.is_empty() {
            return false;
        }
        let Ok(salt) = hex::decode(&current.salt) else {
            return false;
        };

        let normalized = normalize(code);
        let candidate = derive_hash(&salt, &normalized);

        // Full-list scan: every entry is compared even after a match so
        // the comparison work does not depend on which slot matched.
        let mut matched: Option<usize> = None;
        for (index, stored) in current.code_hashes.iter().enumerate() {
            let equal = bool::from(stored.as_bytes().ct_eq(candidate.as_bytes()));
            if equal && matched.is_none() {
                matched = Some(index);
            }
        }

        match matched {
            Some(index) => {
                current.code_hashes.remove(index);
                true
            }
            None => false,
        }
    }

    fn random_code(&self) -> String {
        let mut rng = OsRng;
        (0..self.length)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }
}

/// Normalize a submitted code: trim, uppercase, strip everything that is
/// not ASCII alphanumeric (so dashes and spaces are ignored).
#[must_use]
pub fn normalize(code: &str) -> String {
    code.trim()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn derive_hash(salt: &[u8], normalized_code: &str) -> String {
    let iterations = NonZeroU32::new(CODE_ITERATIONS).expect("nonzero iteration count");
    let mut out = [0u8; 32];
    pbkdf2::derive(
        PBKDF2_ALG,
        iterations,
        salt,
        normalized_code.as_bytes(),
        &mut out,
    );
    hex::encode(out)
}
