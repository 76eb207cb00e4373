//! Error types for authentication operations
//!
//! All cryptographic and verification failures are converted to one of
//! these kinds at the component boundary; no raw crypto error detail is
//! surfaced to callers. Authentication failures deliberately carry no
//! information about which check failed.

use crate::store::StoreError;

/// Errors surfaced by the authentication core
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Wrong password or unknown email - always reported identically
    #[error("invalid email or password")]
    InvalidCredentials,

    /// Wrong TOTP code, exhausted or wrong backup code, or failed
    /// `WebAuthn` verification - always reported identically
    #[error("invalid or expired code")]
    InvalidSecondFactor,

    /// Session lost, challenge already consumed, or challenge replayed
    #[error("challenge expired or missing")]
    ChallengeExpiredOrMissing,

    /// Assertion references a credential not registered to the account
    #[error("unknown credential")]
    UnknownCredential,

    /// Email already registered (safe to reveal per the error policy)
    #[error("email already registered")]
    EmailTaken,

    /// Non-security-sensitive input validation failure
    #[error("validation failed: {0}")]
    Validation(String),

    /// The referenced account does not exist
    #[error("account not found")]
    AccountNotFound,

    /// Invalid relying party or crypto configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Data-store error - fatal to the request, not retried here
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AuthError::AccountNotFound,
            StoreError::EmailTaken => AuthError::EmailTaken,
            StoreError::CredentialTaken => AuthError::Validation(
                "credential already registered".to_string(),
            ),
            StoreError::Backend(msg) => AuthError::PersistenceFailure(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_mapping() {
        assert!(matches!(
            AuthError::from(StoreError::NotFound),
            AuthError::AccountNotFound
        ));
        assert!(matches!(
            AuthError::from(StoreError::EmailTaken),
            AuthError::EmailTaken
        ));
        assert!(matches!(
            AuthError::from(StoreError::Backend("db down".to_string())),
            AuthError::PersistenceFailure(_)
        ));
    }

    #[test]
    fn test_auth_failures_are_generic() {
        // The two authentication failure messages must not leak which
        // check failed.
        assert_eq!(
            AuthError::InvalidCredentials.to_string(),
            "invalid email or password"
        );
        assert_eq!(
            AuthError::InvalidSecondFactor.to_string(),
            "invalid or expired code"
        );
    }
}
