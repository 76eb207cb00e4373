//! Persistence seams for accounts and ephemeral challenge state
//!
//! The core never talks to a database or session backend directly; it
//! goes through these traits. `AccountStore::update` is the concurrency
//! contract: implementations must serialize read-modify-write cycles per
//! account so salt/hash pairs, TOTP secret/timestamp pairs, backup-code
//! consumption, and signature-counter updates commit as a unit.

mod memory;

pub use memory::{MemoryAccountStore, MemoryChallengeStore};

use uuid::Uuid;

use crate::models::{Account, AuthenticatorCredential};

/// Errors from the persistence layer
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("email already registered")]
    EmailTaken,

    #[error("credential identifier already registered")]
    CredentialTaken,

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Persistent store for [`Account`] records
///
/// Implementations must enforce uniqueness on account email and on
/// credential external identifiers across all accounts.
pub trait AccountStore: Send + Sync {
    /// Insert a new account
    ///
    /// # Errors
    /// Returns [`StoreError::EmailTaken`] if the email is already in use.
    fn insert(&self, account: Account) -> Result<(), StoreError>;

    /// Fetch an account by id
    ///
    /// # Errors
    /// Returns [`StoreError::Backend`] on storage failure.
    fn get(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

    /// Fetch an account by email
    ///
    /// # Errors
    /// Returns [`StoreError::Backend`] on storage failure.
    fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    /// Apply a mutation to one account as a single serialized
    /// read-modify-write. Two concurrent updates to the same account
    /// must not interleave; the closure observes the latest committed
    /// state and its result commits atomically.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if the account does not exist.
    fn update(
        &self,
        id: Uuid,
        apply: &mut dyn FnMut(&mut Account),
    ) -> Result<Account, StoreError>;

    /// Attach a newly registered credential to an account, enforcing
    /// global uniqueness of the external identifier.
    ///
    /// # Errors
    /// Returns [`StoreError::CredentialTaken`] if the external id is
    /// already registered (to any account), [`StoreError::NotFound`] if
    /// the account does not exist.
    fn add_credential(
        &self,
        id: Uuid,
        credential: AuthenticatorCredential,
    ) -> Result<(), StoreError>;
}

/// Which `WebAuthn` ceremony a stored challenge belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChallengeKind {
    /// Credential creation (attestation) ceremony
    Creation,
    /// Assertion (request) ceremony
    Request,
}

impl ChallengeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeKind::Creation => "creation",
            ChallengeKind::Request => "request",
        }
    }
}

/// Keyed ephemeral store for outstanding ceremony state, scoped per
/// client session. Values are opaque to the store.
pub trait ChallengeStore: Send + Sync {
    /// Store ceremony state under a session key, replacing any previous
    /// value of the same kind.
    ///
    /// # Errors
    /// Returns [`StoreError::Backend`] on storage failure.
    fn put(&self, session: &str, kind: ChallengeKind, value: &str) -> Result<(), StoreError>;

    /// Atomically fetch and delete the stored state. Single-use: a
    /// second take of the same key observes `None`, so a challenge can
    /// never be consumed by two concurrent verifications.
    ///
    /// # Errors
    /// Returns [`StoreError::Backend`] on storage failure.
    fn take(&self, session: &str, kind: ChallengeKind) -> Result<Option<String>, StoreError>;

    /// Drop all ephemeral state for a session (logout)
    ///
    /// # Errors
    /// Returns [`StoreError::Backend`] on storage failure.
    fn clear_session(&self, session: &str) -> Result<(), StoreError>;
}
