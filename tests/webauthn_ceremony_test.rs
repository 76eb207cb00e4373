// End-to-end WebAuthn tests using a software authenticator built on
// ring's ECDSA P-256 signing, exercising registration, assertion,
// counter-based replay detection, and challenge single-use.
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};

use stepup::flow::{AuthFlow, PasswordOutcome};
use stepup::models::PendingAuth;
use stepup::settings::StepupSettings;
use stepup::store::{MemoryAccountStore, MemoryChallengeStore};
use stepup::webauthn::{AuthenticationResponse, RegistrationResponse};
use stepup::AuthError;

const ORIGIN: &str = "http://localhost:8080";

// A software authenticator: holds an ES256 key pair and a credential
// id, and produces browser-shaped attestation and assertion responses.
struct SoftAuthenticator {
    key_pair: EcdsaKeyPair,
    rng: SystemRandom,
    credential_id: Vec<u8>,
}

impl SoftAuthenticator {
    fn new() -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
            .expect("generate key pair");
        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng)
                .expect("parse key pair");
        Self {
            key_pair,
            rng,
            credential_id: b"soft-authenticator-credential".to_vec(),
        }
    }

    fn external_id(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.credential_id)
    }

    // COSE EC2 key map: kty=EC2, alg=ES256, crv=P-256, plus the x and y
    // coordinates from the uncompressed SEC1 public key (0x04 || x || y).
    fn cose_public_key(&self) -> Vec<u8> {
        let sec1 = self.key_pair.public_key().as_ref();
        assert_eq!(sec1.len(), 65);
        let x = sec1[1..33].to_vec();
        let y = sec1[33..65].to_vec();

        let map = ciborium::value::Value::Map(vec![
            (
                ciborium::value::Value::Integer(1.into()),
                ciborium::value::Value::Integer(2.into()),
            ),
            (
                ciborium::value::Value::Integer(3.into()),
                ciborium::value::Value::Integer((-7).into()),
            ),
            (
                ciborium::value::Value::Integer((-1).into()),
                ciborium::value::Value::Integer(1.into()),
            ),
            (
                ciborium::value::Value::Integer((-2).into()),
                ciborium::value::Value::Bytes(x),
            ),
            (
                ciborium::value::Value::Integer((-3).into()),
                ciborium::value::Value::Bytes(y),
            ),
        ]);
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&map, &mut bytes).unwrap();
        bytes
    }

    fn client_data(ceremony_type: &str, challenge: &str) -> String {
        let json = serde_json::json!({
            "type": ceremony_type,
            "challenge": challenge,
            "origin": ORIGIN,
        });
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&json).unwrap())
    }

    fn attest(&self, challenge: &str) -> RegistrationResponse {
        // Authenticator data with the attested-credential flag set.
        let mut auth_data = vec![0u8; 32]; // RP ID hash
        auth_data.push(0x45); // UP | UV | AT
        auth_data.extend_from_slice(&0u32.to_be_bytes());
        auth_data.extend_from_slice(&[0u8; 16]); // AAGUID
        auth_data
            .extend_from_slice(&u16::try_from(self.credential_id.len()).unwrap().to_be_bytes());
        auth_data.extend_from_slice(&self.credential_id);
        auth_data.extend_from_slice(&self.cose_public_key());

        let attestation = ciborium::value::Value::Map(vec![
            (
                ciborium::value::Value::Text("fmt".to_string()),
                ciborium::value::Value::Text("none".to_string()),
            ),
            (
                ciborium::value::Value::Text("attStmt".to_string()),
                ciborium::value::Value::Map(Vec::new()),
            ),
            (
                ciborium::value::Value::Text("authData".to_string()),
                ciborium::value::Value::Bytes(auth_data),
            ),
        ]);
        let mut attestation_bytes = Vec::new();
        ciborium::ser::into_writer(&attestation, &mut attestation_bytes).unwrap();

        serde_json::from_value(serde_json::json!({
            "id": self.external_id(),
            "rawId": self.external_id(),
            "type": "public-key",
            "response": {
                "clientDataJSON": Self::client_data("webauthn.create", challenge),
                "attestationObject": URL_SAFE_NO_PAD.encode(attestation_bytes),
                "transports": ["usb"]
            }
        }))
        .unwrap()
    }

    fn assert(&self, challenge: &str, counter: u32) -> AuthenticationResponse {
        let client_data = Self::client_data("webauthn.get", challenge);

        let mut auth_data = vec![0u8; 32]; // RP ID hash
        auth_data.push(0x05); // UP | UV
        auth_data.extend_from_slice(&counter.to_be_bytes());

        // Signed message: authenticatorData || SHA-256(clientDataJSON)
        let client_data_bytes = URL_SAFE_NO_PAD.decode(&client_data).unwrap();
        let client_data_hash = ring::digest::digest(&ring::digest::SHA256, &client_data_bytes);
        let mut message = auth_data.clone();
        message.extend_from_slice(client_data_hash.as_ref());

        let signature = self.key_pair.sign(&self.rng, &message).unwrap();

        serde_json::from_value(serde_json::json!({
            "id": self.external_id(),
            "rawId": self.external_id(),
            "type": "public-key",
            "response": {
                "clientDataJSON": client_data,
                "authenticatorData": URL_SAFE_NO_PAD.encode(auth_data),
                "signature": URL_SAFE_NO_PAD.encode(signature.as_ref()),
                "userHandle": null
            }
        }))
        .unwrap()
    }
}

fn test_flow() -> AuthFlow<MemoryAccountStore, MemoryChallengeStore> {
    let mut settings = StepupSettings::default();
    settings.password.iterations = 1_000;
    AuthFlow::new(
        &settings,
        MemoryAccountStore::new(),
        MemoryChallengeStore::new(),
    )
    .expect("default settings are valid")
}

// Register an account plus one software credential, returning the
// account id and the authenticator.
fn registered_setup(
    flow: &AuthFlow<MemoryAccountStore, MemoryChallengeStore>,
) -> (uuid::Uuid, SoftAuthenticator) {
    let account = flow
        .register_account("user@example.com", "User", "Password!234")
        .unwrap();
    let authenticator = SoftAuthenticator::new();

    let options = flow
        .begin_credential_registration(account.id, "session-1")
        .unwrap();
    let response = authenticator.attest(&options.challenge);
    let external_id = flow
        .complete_credential_registration(account.id, "session-1", &response, Some("YubiKey"))
        .unwrap();
    assert_eq!(external_id, authenticator.external_id());

    (account.id, authenticator)
}

fn pending_for(
    flow: &AuthFlow<MemoryAccountStore, MemoryChallengeStore>,
) -> PendingAuth {
    match flow
        .authenticate_password("user@example.com", "Password!234")
        .unwrap()
    {
        PasswordOutcome::SecondFactorRequired(pending) => pending,
        PasswordOutcome::Authenticated { .. } => panic!("credential should require second factor"),
    }
}

#[test]
fn test_registration_and_assertion_round_trip() {
    let flow = test_flow();
    let (account_id, authenticator) = registered_setup(&flow);

    // A registered credential makes password auth stop at pending.
    let pending = pending_for(&flow);
    assert_eq!(pending.account_id, account_id);

    let options = flow.begin_assertion(&pending, "session-1").unwrap();
    let allow = options.allow_credentials.unwrap();
    assert_eq!(allow.len(), 1);
    assert_eq!(allow[0].id, authenticator.external_id());

    let response = authenticator.assert(&options.challenge, 1);
    let success = flow
        .complete_assertion(&pending, "session-1", &response)
        .unwrap();
    assert_eq!(success.account_id, account_id);
    assert!(!success.used_backup_code);
}

#[test]
fn test_non_increasing_counter_is_rejected() {
    let flow = test_flow();
    let (_account_id, authenticator) = registered_setup(&flow);
    let pending = pending_for(&flow);

    // First assertion lands counter 5.
    let options = flow.begin_assertion(&pending, "session-1").unwrap();
    flow.complete_assertion(&pending, "session-1", &authenticator.assert(&options.challenge, 5))
        .unwrap();

    // An equal counter fails despite a valid signature.
    let options = flow.begin_assertion(&pending, "session-1").unwrap();
    assert!(matches!(
        flow.complete_assertion(&pending, "session-1", &authenticator.assert(&options.challenge, 5)),
        Err(AuthError::InvalidSecondFactor)
    ));

    // A lower counter fails too.
    let options = flow.begin_assertion(&pending, "session-1").unwrap();
    assert!(matches!(
        flow.complete_assertion(&pending, "session-1", &authenticator.assert(&options.challenge, 3)),
        Err(AuthError::InvalidSecondFactor)
    ));

    // A strictly greater counter recovers.
    let options = flow.begin_assertion(&pending, "session-1").unwrap();
    assert!(flow
        .complete_assertion(&pending, "session-1", &authenticator.assert(&options.challenge, 6))
        .is_ok());
}

#[test]
fn test_challenge_is_single_use() {
    let flow = test_flow();
    let (_account_id, authenticator) = registered_setup(&flow);
    let pending = pending_for(&flow);

    let options = flow.begin_assertion(&pending, "session-1").unwrap();
    let response = authenticator.assert(&options.challenge, 1);

    flow.complete_assertion(&pending, "session-1", &response)
        .unwrap();

    // The stored challenge was consumed; replaying the same response
    // finds nothing to verify against.
    assert!(matches!(
        flow.complete_assertion(&pending, "session-1", &response),
        Err(AuthError::ChallengeExpiredOrMissing)
    ));
}

#[test]
fn test_tampered_signature_fails_without_state_change() {
    let flow = test_flow();
    let (_account_id, authenticator) = registered_setup(&flow);
    let pending = pending_for(&flow);

    let options = flow.begin_assertion(&pending, "session-1").unwrap();
    let mut response = authenticator.assert(&options.challenge, 1);
    response.response.signature = URL_SAFE_NO_PAD.encode([0u8; 64]);

    assert!(matches!(
        flow.complete_assertion(&pending, "session-1", &response),
        Err(AuthError::InvalidSecondFactor)
    ));

    // The counter was not consumed: a genuine assertion at counter 1
    // still succeeds.
    let options = flow.begin_assertion(&pending, "session-1").unwrap();
    assert!(flow
        .complete_assertion(&pending, "session-1", &authenticator.assert(&options.challenge, 1))
        .is_ok());
}

#[test]
fn test_unknown_credential_is_rejected() {
    let flow = test_flow();
    let (_account_id, _authenticator) = registered_setup(&flow);
    let pending = pending_for(&flow);

    let options = flow.begin_assertion(&pending, "session-1").unwrap();
    let stranger = SoftAuthenticator::new();
    let mut response = stranger.assert(&options.challenge, 1);
    response.id = URL_SAFE_NO_PAD.encode(b"some-other-credential");

    assert!(matches!(
        flow.complete_assertion(&pending, "session-1", &response),
        Err(AuthError::UnknownCredential)
    ));
}

#[test]
fn test_registration_challenge_mismatch_fails() {
    let flow = test_flow();
    let account = flow
        .register_account("user@example.com", "User", "Password!234")
        .unwrap();
    let authenticator = SoftAuthenticator::new();

    flow.begin_credential_registration(account.id, "session-1")
        .unwrap();

    // Attest against a challenge the server never issued.
    let response = authenticator.attest("bm90LXRoZS1jaGFsbGVuZ2U");
    assert!(matches!(
        flow.complete_credential_registration(account.id, "session-1", &response, None),
        Err(AuthError::InvalidSecondFactor)
    ));

    // Nothing was persisted.
    let options = flow
        .begin_credential_registration(account.id, "session-1")
        .unwrap();
    assert!(options.exclude_credentials.is_empty());
}

#[test]
fn test_revoked_credential_no_longer_asserts() {
    let flow = test_flow();
    let (account_id, authenticator) = registered_setup(&flow);
    let pending = pending_for(&flow);

    flow.revoke_credential(account_id, &authenticator.external_id())
        .unwrap();

    // Pending state still references the account, but the credential
    // lookup now fails.
    let options = flow.begin_assertion(&pending, "session-1").unwrap();
    assert!(options.allow_credentials.is_none());
    assert!(matches!(
        flow.complete_assertion(&pending, "session-1", &authenticator.assert(&options.challenge, 1)),
        Err(AuthError::UnknownCredential)
    ));
}
