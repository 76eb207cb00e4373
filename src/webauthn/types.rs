//! `WebAuthn` ceremony data types
//!
//! Wire-shaped structures exchanged with the client plus the ceremony
//! state held server-side between `begin` and `complete`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Credential creation options sent to the client
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOptions {
    pub challenge: String, // Base64URL-encoded random challenge
    pub rp: RelyingParty,
    pub user: UserEntity,
    pub pub_key_cred_params: Vec<PublicKeyCredentialParameters>,
    pub timeout: u32, // Milliseconds
    pub attestation: String, // "none", "indirect", "direct"
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub exclude_credentials: Vec<PublicKeyCredentialDescriptor>,
    pub authenticator_selection: AuthenticatorSelectionCriteria,
}

/// Assertion request options sent to the client
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationOptions {
    pub challenge: String, // Base64URL-encoded random challenge
    pub timeout: u32,      // Milliseconds
    pub rp_id: String,
    /// Omitted entirely when the account has no registered credentials,
    /// letting the platform decide.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub allow_credentials: Option<Vec<PublicKeyCredentialDescriptor>>,
    pub user_verification: String, // "required", "preferred", "discouraged"
}

/// Relying party metadata
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RelyingParty {
    pub id: String,   // Domain name (e.g., "example.com")
    pub name: String, // Display name
}

/// User entity embedded in creation options
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    pub id: String,   // Base64URL-encoded stable user handle
    pub name: String, // Username (e.g., email)
    pub display_name: String,
}

/// Allowed credential algorithm
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PublicKeyCredentialParameters {
    #[serde(rename = "type")]
    pub r#type: String, // Always "public-key"
    pub alg: i32, // COSE algorithm identifier (-7 for ES256)
}

/// Credential reference used in exclude and allow lists
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PublicKeyCredentialDescriptor {
    #[serde(rename = "type")]
    pub r#type: String, // Always "public-key"
    pub id: String, // Base64URL-encoded credential ID
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub transports: Option<Vec<String>>,
}

/// Authenticator selection criteria for creation options
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelectionCriteria {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub authenticator_attachment: Option<String>, // "platform", "cross-platform"
    pub require_resident_key: bool,
    pub user_verification: String,
}

/// Registration (attestation) response from the client
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub id: String,     // Base64URL-encoded credential ID
    pub raw_id: String, // Base64URL-encoded raw credential ID
    pub response: AuthenticatorAttestationResponse,
    #[serde(rename = "type")]
    pub r#type: String, // Always "public-key"
}

/// Assertion response from the client
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResponse {
    pub id: String,     // Base64URL-encoded credential ID
    pub raw_id: String, // Base64URL-encoded raw credential ID
    pub response: AuthenticatorAssertionResponse,
    #[serde(rename = "type")]
    pub r#type: String, // Always "public-key"
}

/// Attestation payload carried in a registration response
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticatorAttestationResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String, // Base64URL-encoded client data JSON
    #[serde(rename = "attestationObject")]
    pub attestation_object: String, // Base64URL-encoded attestation object
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub transports: Option<Vec<String>>, // Transport hints from the client
}

/// Assertion payload carried in an authentication response
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticatorAssertionResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String, // Base64URL-encoded client data JSON
    #[serde(rename = "authenticatorData")]
    pub authenticator_data: String, // Base64URL-encoded authenticator data
    pub signature: String, // Base64URL-encoded signature
    #[serde(rename = "userHandle", skip_serializing_if = "Option::is_none", default)]
    pub user_handle: Option<String>,
}

/// State stored between `begin_registration` and `complete_registration`
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RegistrationState {
    pub user_handle: String, // Base64URL-encoded account id bytes
    pub challenge: String,   // Base64URL-encoded challenge
    pub created_at: DateTime<Utc>,
}

/// State stored between `begin_assertion` and `complete_assertion`
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuthenticationState {
    pub challenge: String, // Base64URL-encoded challenge
    pub created_at: DateTime<Utc>,
}

/// Successful assertion: the credential that answered and the counter
/// value it reported.
#[derive(Clone, Debug)]
pub struct AssertionOutcome {
    pub external_id: String,
    pub sign_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_serialize_with_wire_field_names() {
        let options = AuthenticationOptions {
            challenge: "abc".to_string(),
            timeout: 120_000,
            rp_id: "example.com".to_string(),
            allow_credentials: Some(vec![PublicKeyCredentialDescriptor {
                r#type: "public-key".to_string(),
                id: "cred".to_string(),
                transports: Some(vec!["usb".to_string()]),
            }]),
            user_verification: "preferred".to_string(),
        };
        let json = serde_json::to_value(&options).unwrap();
        assert!(json.get("rpId").is_some());
        assert!(json.get("allowCredentials").is_some());
        assert!(json.get("userVerification").is_some());
    }

    #[test]
    fn test_empty_allow_list_is_omitted() {
        let options = AuthenticationOptions {
            challenge: "abc".to_string(),
            timeout: 120_000,
            rp_id: "example.com".to_string(),
            allow_credentials: None,
            user_verification: "preferred".to_string(),
        };
        let json = serde_json::to_value(&options).unwrap();
        assert!(json.get("allowCredentials").is_none());
    }

    #[test]
    fn test_client_response_parses_browser_field_names() {
        let raw = serde_json::json!({
            "id": "Y3JlZA",
            "rawId": "Y3JlZA",
            "type": "public-key",
            "response": {
                "clientDataJSON": "e30",
                "authenticatorData": "AAAA",
                "signature": "c2ln",
                "userHandle": null
            }
        });
        let parsed: AuthenticationResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.id, "Y3JlZA");
        assert_eq!(parsed.response.signature, "c2ln");
        assert!(parsed.response.user_handle.is_none());
    }
}
