//! Multi-step authentication flow
//!
//! Orchestrates the login state machine over the leaf components:
//! password verification first, then an optional second factor (TOTP
//! code, backup code, or `WebAuthn` assertion). Pending state is an
//! explicit [`PendingAuth`] value threaded through the second-factor
//! calls, never ambient state.
//!
//! Failure policy: password failures never reveal whether the email
//! exists, and second-factor failures never reveal which mechanism is
//! configured or which check failed. Replay detection is logged with
//! detail but surfaced generically.

use log::{debug, info, warn};
use uuid::Uuid;

use crate::backup_codes::BackupCodeVault;
use crate::error::AuthError;
use crate::models::{Account, PendingAuth};
use crate::password::{self, PasswordHasher};
use crate::settings::StepupSettings;
use crate::store::{AccountStore, ChallengeKind, ChallengeStore};
use crate::totp::TotpEngine;
use crate::webauthn::{
    AuthenticationOptions, AuthenticationResponse, AuthenticationState, CeremonyError,
    RegistrationOptions, RegistrationResponse, RegistrationState, WebAuthnCeremony,
};

/// Minimum password length accepted at registration
const MIN_PASSWORD_LEN: usize = 8;

/// Result of password authentication
#[derive(Clone, Debug)]
pub enum PasswordOutcome {
    /// No second factor configured; the session is complete.
    Authenticated { account_id: Uuid },
    /// Password accepted but a second factor must follow. The pending
    /// value is the proof to present to the second-factor calls.
    SecondFactorRequired(PendingAuth),
}

/// Result of a successful second-factor verification
#[derive(Clone, Debug)]
pub struct SecondFactorSuccess {
    pub account_id: Uuid,
    /// Set when a backup code answered instead of a TOTP code. Callers
    /// should advise the user to regenerate their codes.
    pub used_backup_code: bool,
}

/// TOTP provisioning material returned by [`AuthFlow::totp_setup`]
#[derive(Clone, Debug)]
pub struct TotpSetup {
    pub secret: String,
    pub provisioning_uri: String,
}

/// The authentication core: every exposed operation goes through here.
pub struct AuthFlow<S, C> {
    accounts: S,
    challenges: C,
    hasher: PasswordHasher,
    totp: TotpEngine,
    vault: BackupCodeVault,
    ceremony: WebAuthnCeremony,
    drift_steps: u8,
}

impl<S: AccountStore, C: ChallengeStore> AuthFlow<S, C> {
    /// Build the flow from settings and the two persistence seams.
    ///
    /// # Errors
    /// Returns [`AuthError::Configuration`] if the relying-party
    /// settings are invalid.
    pub fn new(settings: &StepupSettings, accounts: S, challenges: C) -> Result<Self, AuthError> {
        let ceremony = WebAuthnCeremony::new(settings.webauthn.clone())
            .map_err(|e| AuthError::Configuration(e.to_string()))?;

        Ok(Self {
            accounts,
            challenges,
            hasher: PasswordHasher::new(settings.password.iterations),
            totp: TotpEngine::new(&settings.totp.issuer),
            vault: BackupCodeVault::new(settings.backup_codes.count, settings.backup_codes.length),
            ceremony,
            drift_steps: settings.totp.drift_steps,
        })
    }

    /// Create an account with a hashed password.
    ///
    /// # Errors
    /// Returns [`AuthError::Validation`] on malformed input and
    /// [`AuthError::EmailTaken`] if the email is already registered.
    pub fn register_account(
        &self,
        email: &str,
        name: &str,
        password: &str,
    ) -> Result<Account, AuthError> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(AuthError::Validation("invalid email address".to_string()));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::Validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let record = self.hasher.hash(password);
        let account = Account {
            id: Uuid::new_v4(),
            email,
            name: name.trim().to_string(),
            password_salt: record.salt,
            password_hash: record.hash,
            password_iterations: record.iterations,
            totp_secret: None,
            totp_enabled_at: None,
            backup_codes: None,
            credentials: Vec::new(),
            created_at: chrono::Utc::now(),
        };
        self.accounts.insert(account.clone())?;
        info!("registered account {}", account.id);
        Ok(account)
    }

    /// Verify an email/password pair.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidCredentials`] on any mismatch; an
    /// unknown email and a wrong password are indistinguishable.
    pub fn authenticate_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<PasswordOutcome, AuthError> {
        let email = email.trim().to_lowercase();
        let Some(account) = self.accounts.find_by_email(&email)? else {
            return Err(AuthError::InvalidCredentials);
        };

        if !password::verify(
            password,
            &account.password_salt,
            &account.password_hash,
            account.password_iterations,
        ) {
            return Err(AuthError::InvalidCredentials);
        }

        if account.second_factor_required() {
            Ok(PasswordOutcome::SecondFactorRequired(PendingAuth::new(
                account.id,
            )))
        } else {
            Ok(PasswordOutcome::Authenticated {
                account_id: account.id,
            })
        }
    }

    /// Verify a submitted second-factor code: TOTP first, then backup
    /// codes. Backup-code consumption commits inside a single account
    /// update, so a racing request cannot spend the same code twice.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidSecondFactor`] if neither mechanism
    /// accepts the code.
    pub fn verify_second_factor(
        &self,
        pending: &PendingAuth,
        code: &str,
    ) -> Result<SecondFactorSuccess, AuthError> {
        let account = self.require_account(pending.account_id)?;

        if account.totp_enabled()
            && self
                .totp
                .verify(account.totp_secret.as_deref(), code, self.drift_steps)
        {
            return Ok(SecondFactorSuccess {
                account_id: account.id,
                used_backup_code: false,
            });
        }

        if self.try_consume_backup_code(pending.account_id, code)? {
            warn!(
                "account {} authenticated with a backup code",
                pending.account_id
            );
            return Ok(SecondFactorSuccess {
                account_id: account.id,
                used_backup_code: true,
            });
        }

        Err(AuthError::InvalidSecondFactor)
    }

    /// Consume one backup code for a pending authentication.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidSecondFactor`] if the code does not
    /// match an unconsumed entry.
    pub fn consume_backup_code(
        &self,
        pending: &PendingAuth,
        code: &str,
    ) -> Result<SecondFactorSuccess, AuthError> {
        if self.try_consume_backup_code(pending.account_id, code)? {
            Ok(SecondFactorSuccess {
                account_id: pending.account_id,
                used_backup_code: true,
            })
        } else {
            Err(AuthError::InvalidSecondFactor)
        }
    }

    /// Number of unconsumed backup codes for an account
    ///
    /// # Errors
    /// Returns [`AuthError::AccountNotFound`] for an unknown account.
    pub fn backup_codes_remaining(&self, account_id: Uuid) -> Result<usize, AuthError> {
        let account = self.require_account(account_id)?;
        Ok(BackupCodeVault::remaining_count(account.backup_codes.as_ref()))
    }

    /// Replace the account's backup-code set and return the plaintext
    /// codes for one-time display. Destructive: every previously issued
    /// code stops working.
    ///
    /// # Errors
    /// Returns [`AuthError::Validation`] if TOTP is not enabled; backup
    /// codes exist only as a fallback for it.
    pub fn generate_backup_codes(&self, account_id: Uuid) -> Result<Vec<String>, AuthError> {
        let (state, plain_codes) = self.vault.generate();
        let mut slot = Some(state);
        let mut eligible = false;

        self.accounts.update(account_id, &mut |account| {
            eligible = account.totp_enabled();
            if eligible {
                account.backup_codes = slot.take();
            }
        })?;

        if eligible {
            info!("regenerated backup codes for account {account_id}");
            Ok(plain_codes)
        } else {
            Err(AuthError::Validation(
                "enable an authenticator app before generating backup codes".to_string(),
            ))
        }
    }

    /// Provision a TOTP secret: stores the secret without enabling it
    /// and returns the secret plus its `otpauth://` URI for enrollment.
    /// Calling again replaces an unconfirmed secret.
    ///
    /// # Errors
    /// Returns [`AuthError::Validation`] if TOTP is already enabled.
    pub fn totp_setup(&self, account_id: Uuid) -> Result<TotpSetup, AuthError> {
        let secret = TotpEngine::generate_secret();
        let mut already_enabled = false;
        let mut email = String::new();

        self.accounts.update(account_id, &mut |account| {
            already_enabled = account.totp_enabled();
            if !already_enabled {
                account.totp_secret = Some(secret.clone());
                email.clone_from(&account.email);
            }
        })?;

        if already_enabled {
            return Err(AuthError::Validation(
                "authenticator app already enabled".to_string(),
            ));
        }

        let provisioning_uri = self
            .totp
            .provisioning_uri(Some(&secret), Some(&email))
            .ok_or_else(|| AuthError::Configuration("cannot build provisioning URI".to_string()))?;

        Ok(TotpSetup {
            secret,
            provisioning_uri,
        })
    }

    /// Confirm the provisioned secret with a current code and enable
    /// TOTP. The secret check and the enabled timestamp commit in one
    /// serialized account update.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidSecondFactor`] if the code does not
    /// verify against the provisioned secret.
    pub fn enable_totp(&self, account_id: Uuid, code: &str) -> Result<(), AuthError> {
        let mut enabled = false;
        self.accounts.update(account_id, &mut |account| {
            if self
                .totp
                .verify(account.totp_secret.as_deref(), code, self.drift_steps)
            {
                account.totp_enabled_at = Some(chrono::Utc::now());
                enabled = true;
            }
        })?;

        if enabled {
            info!("enabled TOTP for account {account_id}");
            Ok(())
        } else {
            Err(AuthError::InvalidSecondFactor)
        }
    }

    /// Disable TOTP. The secret, the enabled timestamp, and the backup
    /// codes clear together in one update; backup codes never outlive
    /// the factor they back up.
    ///
    /// # Errors
    /// Returns [`AuthError::AccountNotFound`] for an unknown account.
    pub fn disable_totp(&self, account_id: Uuid) -> Result<(), AuthError> {
        self.accounts.update(account_id, &mut |account| {
            account.totp_secret = None;
            account.totp_enabled_at = None;
            account.backup_codes = None;
        })?;
        info!("disabled TOTP for account {account_id}");
        Ok(())
    }

    /// Start a credential creation ceremony. The challenge is stored
    /// keyed to the caller's session, single-use.
    ///
    /// # Errors
    /// Returns [`AuthError::AccountNotFound`] for an unknown account.
    pub fn begin_credential_registration(
        &self,
        account_id: Uuid,
        session: &str,
    ) -> Result<RegistrationOptions, AuthError> {
        let account = self.require_account(account_id)?;
        let (options, state) = self
            .ceremony
            .start_registration(&account)
            .map_err(map_ceremony_error)?;
        self.put_state(session, ChallengeKind::Creation, &state)?;
        Ok(options)
    }

    /// Finish a credential creation ceremony and persist the new
    /// credential. The stored challenge is consumed whether or not
    /// verification succeeds.
    ///
    /// # Errors
    /// Returns [`AuthError::ChallengeExpiredOrMissing`] if no ceremony
    /// is outstanding for the session, [`AuthError::InvalidSecondFactor`]
    /// on verification failure.
    pub fn complete_credential_registration(
        &self,
        account_id: Uuid,
        session: &str,
        response: &RegistrationResponse,
        nickname: Option<&str>,
    ) -> Result<String, AuthError> {
        let state: RegistrationState = self.take_state(session, ChallengeKind::Creation)?;

        let account = self.require_account(account_id)?;
        if state.user_handle != account.user_handle() {
            return Err(AuthError::ChallengeExpiredOrMissing);
        }

        let mut credential = self
            .ceremony
            .complete_registration(response, &state)
            .map_err(map_ceremony_error)?;
        credential.nickname = nickname.map(str::to_string);

        let external_id = credential.external_id.clone();
        self.accounts.add_credential(account_id, credential)?;
        info!("registered credential {external_id} for account {account_id}");
        Ok(external_id)
    }

    /// Start an assertion ceremony for a pending authentication.
    ///
    /// # Errors
    /// Returns [`AuthError::AccountNotFound`] for an unknown account.
    pub fn begin_assertion(
        &self,
        pending: &PendingAuth,
        session: &str,
    ) -> Result<AuthenticationOptions, AuthError> {
        let account = self.require_account(pending.account_id)?;
        let (options, state) = self
            .ceremony
            .start_assertion(Some(&account))
            .map_err(map_ceremony_error)?;
        self.put_state(session, ChallengeKind::Request, &state)?;
        Ok(options)
    }

    /// Finish an assertion ceremony and resolve the pending state.
    ///
    /// The signature counter is checked twice: inside the ceremony
    /// against the value read at verification time, then again at
    /// commit time inside the serialized account update, so two
    /// concurrent assertions can never both land the same counter.
    ///
    /// # Errors
    /// Returns [`AuthError::UnknownCredential`] if the assertion names a
    /// credential the account does not hold,
    /// [`AuthError::ChallengeExpiredOrMissing`] if no ceremony is
    /// outstanding, [`AuthError::InvalidSecondFactor`] on any
    /// verification failure including replay.
    pub fn complete_assertion(
        &self,
        pending: &PendingAuth,
        session: &str,
        response: &AuthenticationResponse,
    ) -> Result<SecondFactorSuccess, AuthError> {
        let state: AuthenticationState = self.take_state(session, ChallengeKind::Request)?;

        let account = self.require_account(pending.account_id)?;
        let Some(credential) = account.find_credential(&response.id) else {
            return Err(AuthError::UnknownCredential);
        };

        let outcome = self
            .ceremony
            .complete_assertion(response, &state, credential)
            .map_err(map_ceremony_error)?;

        let mut committed = false;
        self.accounts.update(pending.account_id, &mut |account| {
            if let Some(stored) = account
                .credentials
                .iter_mut()
                .find(|c| c.external_id == outcome.external_id)
            {
                // Re-checked at commit time: a concurrent assertion may
                // have advanced the counter since verification.
                if outcome.sign_count > stored.sign_count {
                    stored.sign_count = outcome.sign_count;
                    stored.last_used_at = Some(chrono::Utc::now());
                    committed = true;
                }
            }
        })?;

        if committed {
            Ok(SecondFactorSuccess {
                account_id: pending.account_id,
                used_backup_code: false,
            })
        } else {
            warn!(
                "replay detected for credential {} on account {}",
                outcome.external_id, pending.account_id
            );
            Err(AuthError::InvalidSecondFactor)
        }
    }

    /// Remove a registered credential from an account
    ///
    /// # Errors
    /// Returns [`AuthError::UnknownCredential`] if the account does not
    /// hold the credential.
    pub fn revoke_credential(&self, account_id: Uuid, external_id: &str) -> Result<(), AuthError> {
        let mut removed = false;
        self.accounts.update(account_id, &mut |account| {
            let before = account.credentials.len();
            account.credentials.retain(|c| c.external_id != external_id);
            removed = account.credentials.len() < before;
        })?;

        if removed {
            info!("revoked credential {external_id} for account {account_id}");
            Ok(())
        } else {
            Err(AuthError::UnknownCredential)
        }
    }

    /// Drop all ephemeral second-factor state for a session
    ///
    /// # Errors
    /// Returns [`AuthError::PersistenceFailure`] on a backend failure.
    pub fn logout(&self, session: &str) -> Result<(), AuthError> {
        self.challenges.clear_session(session)?;
        Ok(())
    }

    fn require_account(&self, account_id: Uuid) -> Result<Account, AuthError> {
        self.accounts
            .get(account_id)?
            .ok_or(AuthError::AccountNotFound)
    }

    fn try_consume_backup_code(&self, account_id: Uuid, code: &str) -> Result<bool, AuthError> {
        let mut consumed = false;
        self.accounts.update(account_id, &mut |account| {
            consumed = BackupCodeVault::consume(&mut account.backup_codes, code);
        })?;
        Ok(consumed)
    }

    fn put_state<T: serde::Serialize>(
        &self,
        session: &str,
        kind: ChallengeKind,
        state: &T,
    ) -> Result<(), AuthError> {
        let encoded = serde_json::to_string(state)
            .map_err(|e| AuthError::PersistenceFailure(e.to_string()))?;
        self.challenges.put(session, kind, &encoded)?;
        Ok(())
    }

    fn take_state<T: serde::de::DeserializeOwned>(
        &self,
        session: &str,
        kind: ChallengeKind,
    ) -> Result<T, AuthError> {
        let Some(encoded) = self.challenges.take(session, kind)? else {
            return Err(AuthError::ChallengeExpiredOrMissing);
        };
        serde_json::from_str(&encoded).map_err(|_| AuthError::ChallengeExpiredOrMissing)
    }
}

/// Convert ceremony failures to the caller-facing taxonomy. Replay
/// keeps its detail in the logs only.
fn map_ceremony_error(err: CeremonyError) -> AuthError {
    match err {
        CeremonyError::Configuration(msg) => AuthError::Configuration(msg),
        CeremonyError::Expired => AuthError::ChallengeExpiredOrMissing,
        CeremonyError::Replay { stored, received } => {
            warn!("non-increasing signature counter: stored {stored}, received {received}");
            AuthError::InvalidSecondFactor
        }
        CeremonyError::Verification(msg)
        | CeremonyError::Encoding(msg)
        | CeremonyError::NotSupported(msg) => {
            debug!("ceremony verification failed: {msg}");
            AuthError::InvalidSecondFactor
        }
    }
}
