//! `WebAuthn` credential registration and assertion
//!
//! A self-contained ceremony layer: wire types, CBOR attestation
//! parsing, and the verification engine. The flow layer owns challenge
//! storage and credential persistence.

pub mod cbor;
pub mod errors;
pub mod service;
pub mod types;

pub use cbor::AttestedCredential;
pub use errors::CeremonyError;
pub use service::WebAuthnCeremony;
pub use types::{
    AssertionOutcome, AuthenticationOptions, AuthenticationResponse, AuthenticationState,
    RegistrationOptions, RegistrationResponse, RegistrationState,
};
