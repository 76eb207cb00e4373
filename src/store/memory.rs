//! In-memory store implementations
//!
//! Reference implementations backing the test suite and embedders that
//! do not need a relational store. Each store holds one mutex, which
//! gives the per-account serialization the traits require.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::models::{Account, AuthenticatorCredential};
use crate::store::{AccountStore, ChallengeKind, ChallengeStore, StoreError};

/// Mutex-guarded account map. Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct MemoryAccountStore {
    accounts: Arc<Mutex<HashMap<Uuid, Account>>>,
}

impl MemoryAccountStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Uuid, Account>>, StoreError> {
        self.accounts
            .lock()
            .map_err(|_| StoreError::Backend("account store lock poisoned".to_string()))
    }
}

impl AccountStore for MemoryAccountStore {
    fn insert(&self, account: Account) -> Result<(), StoreError> {
        let mut accounts = self.lock()?;
        if accounts.values().any(|a| a.email == account.email) {
            return Err(StoreError::EmailTaken);
        }
        accounts.insert(account.id, account);
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.lock()?.get(&id).cloned())
    }

    fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.lock()?.values().find(|a| a.email == email).cloned())
    }

    fn update(
        &self,
        id: Uuid,
        apply: &mut dyn FnMut(&mut Account),
    ) -> Result<Account, StoreError> {
        let mut accounts = self.lock()?;
        let account = accounts.get_mut(&id).ok_or(StoreError::NotFound)?;
        apply(account);
        Ok(account.clone())
    }

    fn add_credential(
        &self,
        id: Uuid,
        credential: AuthenticatorCredential,
    ) -> Result<(), StoreError> {
        let mut accounts = self.lock()?;
        let taken = accounts
            .values()
            .flat_map(|a| a.credentials.iter())
            .any(|c| c.external_id == credential.external_id);
        if taken {
            return Err(StoreError::CredentialTaken);
        }
        let account = accounts.get_mut(&id).ok_or(StoreError::NotFound)?;
        account.credentials.push(credential);
        Ok(())
    }
}

/// Mutex-guarded session-scoped key-value store for ceremony state
#[derive(Clone, Default)]
pub struct MemoryChallengeStore {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryChallengeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(session: &str, kind: ChallengeKind) -> String {
        format!("{session}:{}", kind.as_str())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, StoreError> {
        self.values
            .lock()
            .map_err(|_| StoreError::Backend("challenge store lock poisoned".to_string()))
    }
}

impl ChallengeStore for MemoryChallengeStore {
    fn put(&self, session: &str, kind: ChallengeKind, value: &str) -> Result<(), StoreError> {
        self.lock()?
            .insert(Self::key(session, kind), value.to_string());
        Ok(())
    }

    fn take(&self, session: &str, kind: ChallengeKind) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.remove(&Self::key(session, kind)))
    }

    fn clear_session(&self, session: &str) -> Result<(), StoreError> {
        let prefix = format!("{session}:");
        self.lock()?.retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }
}
