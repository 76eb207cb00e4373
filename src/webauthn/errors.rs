//! `WebAuthn` ceremony error types
//!
//! Internal to the ceremony layer. The flow converts every variant to
//! an opaque caller-facing failure; these carry the detail that goes to
//! the logs.

/// Errors raised while running a `WebAuthn` ceremony
#[derive(Debug, thiserror::Error)]
pub enum CeremonyError {
    /// Invalid relying-party settings
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Challenge, origin, type, or signature verification failed
    #[error("verification failed: {0}")]
    Verification(String),

    /// Malformed encoding in the client response
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Key type or algorithm this ceremony does not support
    #[error("not supported: {0}")]
    NotSupported(String),

    /// The ceremony state outlived its validity window
    #[error("challenge expired")]
    Expired,

    /// Non-increasing signature counter: a cloned or replayed
    /// authenticator. Distinguishable here for observability; callers
    /// see a generic second-factor failure.
    #[error("signature counter did not increase (stored {stored}, received {received})")]
    Replay { stored: u32, received: u32 },
}
