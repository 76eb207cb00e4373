#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![deny(warnings)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the stepup library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod backup_codes;
pub mod error;
pub mod flow;
pub mod models;
pub mod password;
pub mod settings;
pub mod store;
pub mod totp;
pub mod webauthn;

/// Re-export commonly used items
pub use backup_codes::BackupCodeVault;
pub use error::AuthError;
pub use flow::{AuthFlow, PasswordOutcome, SecondFactorSuccess, TotpSetup};
pub use models::{Account, AuthenticatorCredential, PendingAuth};
pub use password::PasswordHasher;
pub use settings::StepupSettings;
pub use store::{AccountStore, ChallengeStore, MemoryAccountStore, MemoryChallengeStore};
pub use totp::TotpEngine;
pub use webauthn::WebAuthnCeremony;
