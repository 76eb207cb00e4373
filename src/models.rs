//! Core data model for accounts and registered authenticators

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity record holding password material and second-factor state
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub password_salt: String, // Hex-encoded per-account salt
    pub password_hash: String, // Hex-encoded PBKDF2 output
    pub password_iterations: u32,
    pub totp_secret: Option<String>, // Base32, present only while provisioned
    pub totp_enabled_at: Option<DateTime<Utc>>,
    pub backup_codes: Option<BackupCodeState>,
    pub credentials: Vec<AuthenticatorCredential>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// TOTP is enabled only when both the secret and the enabled
    /// timestamp are present. Either may be cleared independently.
    #[must_use]
    pub fn totp_enabled(&self) -> bool {
        self.totp_secret.is_some() && self.totp_enabled_at.is_some()
    }

    /// Whether password authentication must transition to a pending
    /// second-factor state instead of completing directly.
    #[must_use]
    pub fn second_factor_required(&self) -> bool {
        self.totp_enabled() || !self.credentials.is_empty()
    }

    /// Stable user handle for `WebAuthn` ceremonies: a byte encoding of
    /// the account id.
    #[must_use]
    pub fn user_handle(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.id.as_bytes())
    }

    /// Look up a registered credential by its external identifier
    #[must_use]
    pub fn find_credential(&self, external_id: &str) -> Option<&AuthenticatorCredential> {
        self.credentials
            .iter()
            .find(|c| c.external_id == external_id)
    }
}

/// Backup-code state: salt, hash list, and generation timestamp are set
/// together and cleared together.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BackupCodeState {
    pub salt: String,             // Hex-encoded per-set salt
    pub code_hashes: Vec<String>, // Hex-encoded PBKDF2 hashes, generation order
    pub generated_at: DateTime<Utc>,
}

/// One registered `WebAuthn` credential owned by exactly one account
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticatorCredential {
    pub external_id: String, // Base64URL-encoded credential ID, globally unique
    pub public_key: Vec<u8>, // COSE-encoded public key
    pub sign_count: u32,     // Monotonically-expected signature counter
    pub transports: Vec<String>, // Transport hints ("usb", "internal", ...)
    pub nickname: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Ephemeral proof that an account passed password verification but has
/// not yet completed a required second factor. Threaded explicitly
/// through second-factor calls, never ambient state.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PendingAuth {
    pub account_id: Uuid,
    pub issued_at: DateTime<Utc>,
}

impl PendingAuth {
    #[must_use]
    pub fn new(account_id: Uuid) -> Self {
        Self {
            account_id,
            issued_at: Utc::now(),
        }
    }
}
