//! CBOR processing for `WebAuthn` attestation objects
//!
//! Extracts the attested credential (id, COSE public key, initial
//! signature counter) from the authenticator data inside an attestation
//! object.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ciborium::de::from_reader;
use ciborium::value::Value;

use super::errors::CeremonyError;

/// Credential material carried in an attestation object
#[derive(Clone, Debug)]
pub struct AttestedCredential {
    pub credential_id: Vec<u8>,
    pub public_key: Vec<u8>, // COSE-encoded
    pub sign_count: u32,
}

/// Parse a base64url-encoded attestation object and extract the
/// attested credential data.
///
/// # Errors
/// Returns [`CeremonyError::Encoding`] if the base64, CBOR, or
/// authenticator data layout is malformed, or if the attested
/// credential data flag is not set.
pub fn parse_attestation(attestation_object_b64: &str) -> Result<AttestedCredential, CeremonyError> {
    let attestation_bytes = URL_SAFE_NO_PAD
        .decode(attestation_object_b64)
        .map_err(|_| CeremonyError::Encoding("Invalid attestation encoding".to_string()))?;

    let attestation: Value = from_reader(&attestation_bytes[..])
        .map_err(|_| CeremonyError::Encoding("Invalid CBOR attestation format".to_string()))?;

    let Some(Some(auth_data)) = attestation.as_map().and_then(|map| {
        map.iter()
            .find(|(k, _)| k.as_text() == Some("authData"))
            .map(|(_, v)| v.as_bytes())
    }) else {
        return Err(CeremonyError::Encoding(
            "Missing authData in attestation".to_string(),
        ));
    };

    parse_auth_data(auth_data)
}

/// Walk the binary authenticator data layout:
/// - 32 bytes: RP ID hash
/// - 1 byte: flags
/// - 4 bytes: signature counter
/// - attested credential data (when flag bit 6 is set):
///   - 16 bytes: AAGUID
///   - 2 bytes: credential ID length (L)
///   - L bytes: credential ID
///   - remainder: COSE public key
fn parse_auth_data(auth_data: &[u8]) -> Result<AttestedCredential, CeremonyError> {
    if auth_data.len() < 37 {
        return Err(CeremonyError::Encoding("Auth data too short".to_string()));
    }

    let flags = auth_data[32];
    if (flags & 0x40) == 0 {
        return Err(CeremonyError::Encoding(
            "No attested credential data".to_string(),
        ));
    }

    let sign_count = u32::from_be_bytes([auth_data[33], auth_data[34], auth_data[35], auth_data[36]]);

    // Skip RP ID hash (32), flags (1), counter (4), AAGUID (16).
    let mut pos = 37 + 16;

    if auth_data.len() < pos + 2 {
        return Err(CeremonyError::Encoding(
            "Auth data too short for credential ID length".to_string(),
        ));
    }
    let id_len = (usize::from(auth_data[pos]) << 8) | usize::from(auth_data[pos + 1]);
    pos += 2;

    if auth_data.len() < pos + id_len {
        return Err(CeremonyError::Encoding(
            "Auth data too short for credential ID".to_string(),
        ));
    }
    let credential_id = auth_data[pos..pos + id_len].to_vec();
    pos += id_len;

    if auth_data.len() <= pos {
        return Err(CeremonyError::Encoding(
            "Auth data too short for public key".to_string(),
        ));
    }
    let public_key = auth_data[pos..].to_vec();

    Ok(AttestedCredential {
        credential_id,
        public_key,
        sign_count,
    })
}
