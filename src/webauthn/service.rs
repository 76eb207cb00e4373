//! `WebAuthn` ceremony engine
//!
//! Implements credential creation and assertion following the W3C
//! `WebAuthn` specification directly, using standard cryptography
//! libraries. Challenges are caller-managed: `begin_*` returns the
//! state to stash, `complete_*` takes it back and verifies.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature;

use crate::models::{Account, AuthenticatorCredential};
use crate::settings::WebAuthnSettings;
use crate::webauthn::cbor;
use crate::webauthn::errors::CeremonyError;
use crate::webauthn::types::{
    AssertionOutcome, AuthenticationOptions, AuthenticationResponse, AuthenticationState,
    AuthenticatorSelectionCriteria, PublicKeyCredentialDescriptor, PublicKeyCredentialParameters,
    RegistrationOptions, RegistrationResponse, RegistrationState, RelyingParty, UserEntity,
};

/// Challenge length in bytes (256 bits)
const CHALLENGE_LEN: usize = 32;

/// Core `WebAuthn` ceremony service
pub struct WebAuthnCeremony {
    settings: WebAuthnSettings,
    rng: SystemRandom,
}

impl WebAuthnCeremony {
    /// Create a new ceremony service from settings
    ///
    /// # Errors
    /// Returns an error if the settings are invalid:
    /// - If relying party ID is empty
    /// - If origin doesn't use HTTPS (except for localhost)
    pub fn new(settings: WebAuthnSettings) -> Result<Self, CeremonyError> {
        if settings.rp_id.is_empty() {
            return Err(CeremonyError::Configuration(
                "Relying party ID cannot be empty".into(),
            ));
        }

        if !settings.rp_origin.starts_with("https://")
            && !settings.rp_origin.starts_with("http://localhost")
        {
            return Err(CeremonyError::Configuration(
                "Origin must be https:// except for localhost".into(),
            ));
        }

        Ok(Self {
            settings,
            rng: SystemRandom::new(),
        })
    }

    /// Start a credential creation ceremony for an account.
    ///
    /// Existing credentials go into the exclude list so the client
    /// refuses to re-register an authenticator it already holds.
    ///
    /// # Errors
    /// Returns an error if challenge generation fails.
    pub fn start_registration(
        &self,
        account: &Account,
    ) -> Result<(RegistrationOptions, RegistrationState), CeremonyError> {
        let challenge = self.generate_challenge()?;
        let user_handle = account.user_handle();

        let options = RegistrationOptions {
            challenge: challenge.clone(),
            rp: RelyingParty {
                id: self.settings.rp_id.clone(),
                name: self.settings.rp_name.clone(),
            },
            user: UserEntity {
                id: user_handle.clone(),
                name: account.email.clone(),
                display_name: account.name.clone(),
            },
            // ES256 (ECDSA P-256 with SHA-256) only
            pub_key_cred_params: vec![PublicKeyCredentialParameters {
                r#type: "public-key".to_string(),
                alg: -7,
            }],
            timeout: timeout_millis(self.settings.timeout_seconds),
            attestation: "none".to_string(),
            exclude_credentials: account
                .credentials
                .iter()
                .map(|c| PublicKeyCredentialDescriptor {
                    r#type: "public-key".to_string(),
                    id: c.external_id.clone(),
                    transports: if c.transports.is_empty() {
                        None
                    } else {
                        Some(c.transports.clone())
                    },
                })
                .collect(),
            authenticator_selection: AuthenticatorSelectionCriteria {
                authenticator_attachment: self.settings.authenticator_attachment.clone(),
                require_resident_key: true, // Required for passkeys
                user_verification: self.settings.user_verification.clone(),
            },
        };

        let state = RegistrationState {
            user_handle,
            challenge,
            created_at: Utc::now(),
        };

        Ok((options, state))
    }

    /// Complete a credential creation ceremony.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The ceremony state outlived its validity window
    /// - The challenge, type, or origin verification fails
    /// - The attestation object cannot be parsed
    /// - The attested public key is not an ES256 EC2 key
    pub fn complete_registration(
        &self,
        response: &RegistrationResponse,
        state: &RegistrationState,
    ) -> Result<AuthenticatorCredential, CeremonyError> {
        self.check_validity_window(state.created_at)?;
        self.verify_client_data(
            &response.response.client_data_json,
            "webauthn.create",
            &state.challenge,
        )?;

        let attested = cbor::parse_attestation(&response.response.attestation_object)?;

        // Only ES256 EC2 keys are accepted; reject anything else at
        // registration time rather than at first assertion.
        extract_ec2_coordinates(&attested.public_key)?;

        let external_id = URL_SAFE_NO_PAD.encode(&attested.credential_id);
        if external_id != response.id {
            return Err(CeremonyError::Verification(
                "Credential ID mismatch".to_string(),
            ));
        }

        Ok(AuthenticatorCredential {
            external_id,
            public_key: attested.public_key,
            sign_count: attested.sign_count,
            transports: response.response.transports.clone().unwrap_or_default(),
            nickname: None,
            created_at: Utc::now(),
            last_used_at: None,
        })
    }

    /// Start an assertion ceremony.
    ///
    /// With an account in hand the allow list names its credentials;
    /// without one the list is omitted and the platform offers any
    /// discoverable credential for the relying party.
    ///
    /// # Errors
    /// Returns an error if challenge generation fails.
    pub fn start_assertion(
        &self,
        account: Option<&Account>,
    ) -> Result<(AuthenticationOptions, AuthenticationState), CeremonyError> {
        let challenge = self.generate_challenge()?;

        let allow_credentials = account.and_then(|a| {
            if a.credentials.is_empty() {
                None
            } else {
                Some(
                    a.credentials
                        .iter()
                        .map(|c| PublicKeyCredentialDescriptor {
                            r#type: "public-key".to_string(),
                            id: c.external_id.clone(),
                            transports: if c.transports.is_empty() {
                                None
                            } else {
                                Some(c.transports.clone())
                            },
                        })
                        .collect(),
                )
            }
        });

        let options = AuthenticationOptions {
            challenge: challenge.clone(),
            timeout: timeout_millis(self.settings.timeout_seconds),
            rp_id: self.settings.rp_id.clone(),
            allow_credentials,
            user_verification: self.settings.user_verification.clone(),
        };

        let state = AuthenticationState {
            challenge,
            created_at: Utc::now(),
        };

        Ok((options, state))
    }

    /// Complete an assertion ceremony against one stored credential.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The ceremony state outlived its validity window
    /// - The challenge, type, or origin verification fails
    /// - The signature does not verify against the stored public key
    /// - The reported signature counter did not increase
    ///   ([`CeremonyError::Replay`])
    pub fn complete_assertion(
        &self,
        response: &AuthenticationResponse,
        state: &AuthenticationState,
        stored_credential: &AuthenticatorCredential,
    ) -> Result<AssertionOutcome, CeremonyError> {
        self.check_validity_window(state.created_at)?;
        self.verify_client_data(
            &response.response.client_data_json,
            "webauthn.get",
            &state.challenge,
        )?;

        verify_assertion_signature(response, stored_credential)?;

        let sign_count = extract_counter(response)?;
        if sign_count <= stored_credential.sign_count {
            return Err(CeremonyError::Replay {
                stored: stored_credential.sign_count,
                received: sign_count,
            });
        }

        Ok(AssertionOutcome {
            external_id: stored_credential.external_id.clone(),
            sign_count,
        })
    }

    fn generate_challenge(&self) -> Result<String, CeremonyError> {
        let mut bytes = [0u8; CHALLENGE_LEN];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| CeremonyError::Configuration("Random generator failure".to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    fn check_validity_window(
        &self,
        created_at: chrono::DateTime<Utc>,
    ) -> Result<(), CeremonyError> {
        let age = Utc::now().signed_duration_since(created_at);
        let limit = i64::try_from(self.settings.timeout_seconds).unwrap_or(i64::MAX);
        if age.num_seconds() > limit || age.num_seconds() < 0 {
            return Err(CeremonyError::Expired);
        }
        Ok(())
    }

    /// Verify the client data JSON: ceremony type, challenge echo, and
    /// origin must all match.
    fn verify_client_data(
        &self,
        client_data_b64: &str,
        expected_type: &str,
        expected_challenge: &str,
    ) -> Result<(), CeremonyError> {
        let client_data_bytes = URL_SAFE_NO_PAD.decode(client_data_b64).map_err(|_| {
            CeremonyError::Encoding("Invalid client data encoding".to_string())
        })?;

        let client_data: serde_json::Value =
            serde_json::from_slice(&client_data_bytes).map_err(|_| {
                CeremonyError::Encoding("Invalid client data format".to_string())
            })?;

        if client_data["type"] != expected_type {
            return Err(CeremonyError::Verification(
                "Invalid client data type".to_string(),
            ));
        }

        if client_data["challenge"] != expected_challenge {
            return Err(CeremonyError::Verification(
                "Challenge verification failed".to_string(),
            ));
        }

        if client_data["origin"] != self.settings.rp_origin.as_str() {
            return Err(CeremonyError::Verification(
                "Origin verification failed".to_string(),
            ));
        }

        Ok(())
    }
}

fn timeout_millis(timeout_seconds: u64) -> u32 {
    u32::try_from(timeout_seconds * 1000).unwrap_or(u32::MAX)
}

/// Prepare the data needed for signature verification: the signed
/// message is `authenticatorData || SHA-256(clientDataJSON)`.
fn prepare_verification_data(
    response: &AuthenticationResponse,
) -> Result<(Vec<u8>, Vec<u8>), CeremonyError> {
    let client_data_bytes = URL_SAFE_NO_PAD
        .decode(&response.response.client_data_json)
        .map_err(|_| CeremonyError::Encoding("Invalid client data encoding".to_string()))?;

    let client_data_hash = digest::digest(&digest::SHA256, &client_data_bytes);

    let auth_data_bytes = URL_SAFE_NO_PAD
        .decode(&response.response.authenticator_data)
        .map_err(|_| {
            CeremonyError::Encoding("Invalid authenticator data encoding".to_string())
        })?;

    let mut verify_data =
        Vec::with_capacity(auth_data_bytes.len() + client_data_hash.as_ref().len());
    verify_data.extend_from_slice(&auth_data_bytes);
    verify_data.extend_from_slice(client_data_hash.as_ref());

    let signature_bytes = URL_SAFE_NO_PAD
        .decode(&response.response.signature)
        .map_err(|_| CeremonyError::Encoding("Invalid signature encoding".to_string()))?;

    Ok((verify_data, signature_bytes))
}

/// Verify an assertion signature against the stored COSE public key
fn verify_assertion_signature(
    response: &AuthenticationResponse,
    credential: &AuthenticatorCredential,
) -> Result<(), CeremonyError> {
    let (verify_data, signature_bytes) = prepare_verification_data(response)?;

    let (x_coord, y_coord) = extract_ec2_coordinates(&credential.public_key)?;

    // Uncompressed SEC1 encoded public key: 0x04 || x || y
    let mut public_key_bytes = Vec::with_capacity(1 + x_coord.len() + y_coord.len());
    public_key_bytes.push(0x04);
    public_key_bytes.extend_from_slice(&x_coord);
    public_key_bytes.extend_from_slice(&y_coord);

    let verification_key =
        signature::UnparsedPublicKey::new(&signature::ECDSA_P256_SHA256_ASN1, &public_key_bytes);

    verification_key
        .verify(&verify_data, &signature_bytes)
        .map_err(|_| {
            CeremonyError::Verification("ES256 signature verification failed".to_string())
        })
}

/// Extract counter from authenticator data (bytes 33..37)
fn extract_counter(response: &AuthenticationResponse) -> Result<u32, CeremonyError> {
    let auth_data = URL_SAFE_NO_PAD
        .decode(&response.response.authenticator_data)
        .map_err(|_| CeremonyError::Encoding("Invalid authenticator data".to_string()))?;

    if auth_data.len() < 37 {
        return Err(CeremonyError::Encoding(
            "Authenticator data too short".to_string(),
        ));
    }

    Ok(u32::from_be_bytes([
        auth_data[33],
        auth_data[34],
        auth_data[35],
        auth_data[36],
    ]))
}

/// Parse a COSE key and extract the EC2 P-256 x and y coordinates.
/// Anything that is not an ES256 EC2 key is rejected.
fn extract_ec2_coordinates(public_key: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CeremonyError> {
    let cose_key = ciborium::de::from_reader::<ciborium::value::Value, _>(public_key)
        .map_err(|_| CeremonyError::Encoding("Invalid COSE key format".to_string()))?;

    let ciborium::value::Value::Map(cose_map) = cose_key else {
        return Err(CeremonyError::Encoding("COSE key is not a map".to_string()));
    };

    let int_entry = |label: i64| {
        let key = ciborium::value::Value::Integer(label.into());
        cose_map.iter().find(|(k, _)| k == &key).map(|(_, v)| v)
    };

    // kty (1) must be EC2 (2); alg (3), when present, must be ES256 (-7)
    match int_entry(1) {
        Some(ciborium::value::Value::Integer(kty)) if *kty == 2.into() => {}
        _ => {
            return Err(CeremonyError::NotSupported(
                "Unsupported key type".to_string(),
            ))
        }
    }
    if let Some(ciborium::value::Value::Integer(alg)) = int_entry(3) {
        if *alg != (-7).into() {
            return Err(CeremonyError::NotSupported(
                "Unsupported algorithm".to_string(),
            ));
        }
    }

    let coordinate = |label: i64, name: &str| {
        match int_entry(label) {
            Some(ciborium::value::Value::Bytes(bytes)) => Ok(bytes.clone()),
            _ => Err(CeremonyError::Verification(format!(
                "Missing or invalid {name} coordinate"
            ))),
        }
    };

    let x = coordinate(-2, "x")?;
    let y = coordinate(-3, "y")?;
    Ok((x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::WebAuthnSettings;
    use chrono::Duration;
    use uuid::Uuid;

    fn settings() -> WebAuthnSettings {
        WebAuthnSettings {
            rp_id: "example.com".to_string(),
            rp_name: "Example".to_string(),
            rp_origin: "https://example.com".to_string(),
            timeout_seconds: 120,
            user_verification: "preferred".to_string(),
            authenticator_attachment: None,
        }
    }

    fn account() -> Account {
        Account {
            id: Uuid::new_v4(),
            email: "user@example.com".to_string(),
            name: "User".to_string(),
            password_salt: String::new(),
            password_hash: String::new(),
            password_iterations: 600_000,
            totp_secret: None,
            totp_enabled_at: None,
            backup_codes: None,
            credentials: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_new_rejects_bad_settings() {
        let mut empty_rp = settings();
        empty_rp.rp_id = String::new();
        assert!(WebAuthnCeremony::new(empty_rp).is_err());

        let mut http_origin = settings();
        http_origin.rp_origin = "http://example.com".to_string();
        assert!(WebAuthnCeremony::new(http_origin).is_err());

        let mut localhost = settings();
        localhost.rp_origin = "http://localhost:8080".to_string();
        assert!(WebAuthnCeremony::new(localhost).is_ok());
    }

    #[test]
    fn test_start_registration_shape() {
        let ceremony = WebAuthnCeremony::new(settings()).unwrap();
        let acct = account();
        let (options, state) = ceremony.start_registration(&acct).unwrap();

        assert_eq!(options.challenge, state.challenge);
        assert_eq!(options.rp.id, "example.com");
        assert_eq!(options.user.id, acct.user_handle());
        assert_eq!(options.user.name, acct.email);
        assert_eq!(options.timeout, 120_000);
        assert_eq!(options.attestation, "none");
        assert_eq!(options.pub_key_cred_params.len(), 1);
        assert_eq!(options.pub_key_cred_params[0].alg, -7);
        assert!(options.exclude_credentials.is_empty());
    }

    #[test]
    fn test_challenges_are_unique() {
        let ceremony = WebAuthnCeremony::new(settings()).unwrap();
        let (a, _) = ceremony.start_assertion(None).unwrap();
        let (b, _) = ceremony.start_assertion(None).unwrap();
        assert_ne!(a.challenge, b.challenge);
        // 32 bytes -> 43 base64url characters unpadded
        assert_eq!(a.challenge.len(), 43);
    }

    #[test]
    fn test_assertion_allow_list_follows_account() {
        let ceremony = WebAuthnCeremony::new(settings()).unwrap();

        let (options, _) = ceremony.start_assertion(None).unwrap();
        assert!(options.allow_credentials.is_none());

        let mut acct = account();
        acct.credentials.push(AuthenticatorCredential {
            external_id: "cred-1".to_string(),
            public_key: vec![1],
            sign_count: 0,
            transports: vec!["internal".to_string()],
            nickname: None,
            created_at: Utc::now(),
            last_used_at: None,
        });
        let (options, _) = ceremony.start_assertion(Some(&acct)).unwrap();
        let allow = options.allow_credentials.unwrap();
        assert_eq!(allow.len(), 1);
        assert_eq!(allow[0].id, "cred-1");
    }

    #[test]
    fn test_expired_state_is_rejected() {
        let ceremony = WebAuthnCeremony::new(settings()).unwrap();
        let state = AuthenticationState {
            challenge: "abc".to_string(),
            created_at: Utc::now() - Duration::seconds(121),
        };
        let response = AuthenticationResponse {
            id: "x".to_string(),
            raw_id: "x".to_string(),
            r#type: "public-key".to_string(),
            response: crate::webauthn::types::AuthenticatorAssertionResponse {
                client_data_json: String::new(),
                authenticator_data: String::new(),
                signature: String::new(),
                user_handle: None,
            },
        };
        let credential = AuthenticatorCredential {
            external_id: "x".to_string(),
            public_key: Vec::new(),
            sign_count: 0,
            transports: Vec::new(),
            nickname: None,
            created_at: Utc::now(),
            last_used_at: None,
        };
        assert!(matches!(
            ceremony.complete_assertion(&response, &state, &credential),
            Err(CeremonyError::Expired)
        ));
    }

    #[test]
    fn test_client_data_checks() {
        let ceremony = WebAuthnCeremony::new(settings()).unwrap();
        let encode = |value: serde_json::Value| {
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&value).unwrap())
        };

        let good = encode(serde_json::json!({
            "type": "webauthn.get",
            "challenge": "expected",
            "origin": "https://example.com"
        }));
        assert!(ceremony
            .verify_client_data(&good, "webauthn.get", "expected")
            .is_ok());

        let wrong_type = encode(serde_json::json!({
            "type": "webauthn.create",
            "challenge": "expected",
            "origin": "https://example.com"
        }));
        assert!(ceremony
            .verify_client_data(&wrong_type, "webauthn.get", "expected")
            .is_err());

        let wrong_challenge = encode(serde_json::json!({
            "type": "webauthn.get",
            "challenge": "other",
            "origin": "https://example.com"
        }));
        assert!(ceremony
            .verify_client_data(&wrong_challenge, "webauthn.get", "expected")
            .is_err());

        let wrong_origin = encode(serde_json::json!({
            "type": "webauthn.get",
            "challenge": "expected",
            "origin": "https://evil.example"
        }));
        assert!(ceremony
            .verify_client_data(&wrong_origin, "webauthn.get", "expected")
            .is_err());

        assert!(ceremony
            .verify_client_data("!!!", "webauthn.get", "expected")
            .is_err());
    }

    #[test]
    fn test_cose_key_rejects_non_es256() {
        let ec2 = cose_map(vec![
            (1, ciborium::value::Value::Integer(2.into())),
            (3, ciborium::value::Value::Integer((-7).into())),
            (-2, ciborium::value::Value::Bytes(vec![1u8; 32])),
            (-3, ciborium::value::Value::Bytes(vec![2u8; 32])),
        ]);
        assert!(extract_ec2_coordinates(&ec2).is_ok());

        let rsa = cose_map(vec![
            (1, ciborium::value::Value::Integer(3.into())),
            (3, ciborium::value::Value::Integer((-257).into())),
        ]);
        assert!(matches!(
            extract_ec2_coordinates(&rsa),
            Err(CeremonyError::NotSupported(_))
        ));

        let missing_y = cose_map(vec![
            (1, ciborium::value::Value::Integer(2.into())),
            (-2, ciborium::value::Value::Bytes(vec![1u8; 32])),
        ]);
        assert!(extract_ec2_coordinates(&missing_y).is_err());
    }

    fn cose_map(entries: Vec<(i64, ciborium::value::Value)>) -> Vec<u8> {
        let map = ciborium::value::Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (ciborium::value::Value::Integer(k.into()), v))
                .collect(),
        );
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&map, &mut bytes).unwrap();
        bytes
    }
}
