//! Time-based one-time passwords (RFC 6238)
//!
//! Secrets are random base32 strings; verification tolerates bounded
//! clock drift. Enabling and disabling TOTP are flow-level state
//! transitions (see [`crate::flow`]), not part of this engine.

use std::time::{SystemTime, UNIX_EPOCH};

use totp_rs::{Algorithm, Secret, TOTP};

/// Time-step length in seconds
pub const STEP_SECONDS: u64 = 30;

/// Code length in digits
pub const DIGITS: usize = 6;

/// Default drift tolerance, in time steps either side of now
pub const DEFAULT_DRIFT_STEPS: u8 = 1;

/// Label used in provisioning URIs when the account has no email
const FALLBACK_LABEL: &str = "user";

/// Generates secrets, builds provisioning URIs, and verifies codes
#[derive(Clone, Debug)]
pub struct TotpEngine {
    issuer: String,
}

impl TotpEngine {
    #[must_use]
    pub fn new(issuer: &str) -> Self {
        Self {
            issuer: issuer.to_string(),
        }
    }

    /// Generate a fresh random base32 secret (160 bits of entropy).
    /// Persistence is the caller's responsibility.
    #[must_use]
    pub fn generate_secret() -> String {
        match Secret::generate_secret().to_encoded() {
            Secret::Encoded(encoded) => encoded,
            // to_encoded always yields the Encoded variant
            Secret::Raw(_) => String::new(),
        }
    }

    /// Build an `otpauth://totp/` provisioning URI for authenticator
    /// apps. Returns `None` if the secret is absent or malformed. The
    /// label prefers the account email.
    #[must_use]
    pub fn provisioning_uri(&self, secret: Option<&str>, label: Option<&str>) -> Option<String> {
        let secret = secret.filter(|s| !s.is_empty())?;
        let label = label.filter(|l| !l.is_empty()).unwrap_or(FALLBACK_LABEL);
        let totp = self.build(secret, Some(label))?;
        Some(totp.get_url())
    }

    /// Verify a submitted code against the stored secret at the current
    /// time, accepting any step within `drift_steps` of now.
    ///
    /// Fails closed if the secret or the (whitespace-stripped) code is
    /// empty or the secret does not decode.
    #[must_use]
    pub fn verify(&self, secret: Option<&str>, code: &str, drift_steps: u8) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.verify_at(secret, code, drift_steps, now)
    }

    /// Verify a submitted code at an explicit Unix time
    #[must_use]
    pub fn verify_at(
        &self,
        secret: Option<&str>,
        code: &str,
        drift_steps: u8,
        unix_time: u64,
    ) -> bool {
        let Some(secret) = secret.filter(|s| !s.is_empty()) else {
            return false;
        };
        let normalized: String = code.split_whitespace().collect();
        if normalized.is_empty() {
            return false;
        }
        let Some(totp) = self.build_with_skew(secret, None, drift_steps) else {
            return false;
        };
        totp.check(&normalized, unix_time)
    }

    /// Derive the code for a secret at an explicit Unix time. Returns
    /// `None` if the secret is absent or malformed.
    #[must_use]
    pub fn code_at(&self, secret: &str, unix_time: u64) -> Option<String> {
        let totp = self.build(secret, None)?;
        Some(totp.generate(unix_time))
    }

    fn build(&self, secret: &str, label: Option<&str>) -> Option<TOTP> {
        self.build_with_skew(secret, label, DEFAULT_DRIFT_STEPS)
    }

    fn build_with_skew(&self, secret: &str, label: Option<&str>, skew: u8) -> Option<TOTP> {
        let secret_bytes = Secret::Encoded(secret.to_string()).to_bytes().ok()?;
        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            skew,
            STEP_SECONDS,
            secret_bytes,
            Some(self.issuer.clone()),
            label.unwrap_or(FALLBACK_LABEL).to_string(),
        )
        .ok()
    }
}
