use ed25519_dalek::{Signature, VerifyingKey};
use thiserror::Error;

pub const SIGNATURE_HEADER: &str = "x-signature-ed25519";
pub const TIMESTAMP_HEADER: &str = "x-signature-timestamp";

const PUBLIC_KEY_BYTES: usize = 32;
const SIGNATURE_BYTES: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("interaction authentication failed")]
    AuthenticationFailure,
    #[error("invalid hex input for {label}: {reason}")]
    InvalidHex { label: &'static str, reason: String },
    #[error("{label} decoded to {actual} bytes (expected {expected})")]
    InvalidLength {
        label: &'static str,
        actual: usize,
        expected: usize,
    },
    #[error("invalid ed25519 public key")]
    InvalidPublicKey,
}

/// Bytes covered by the platform signature: the timestamp header followed by the raw body.
pub fn interaction_signed_message(timestamp: &str, raw_body: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(timestamp.len() + raw_body.len());
    message.extend_from_slice(timestamp.as_bytes());
    message.extend_from_slice(raw_body);
    message
}

/// Returns true only when `signature_hex` is a valid signature of `timestamp || raw_body`.
///
/// Any parse error, malformed hex, or verification failure yields `false`.
pub fn verify(raw_body: &[u8], signature_hex: &str, timestamp: &str, public_key_hex: &str) -> bool {
    verify_interaction_signature(raw_body, signature_hex, timestamp, public_key_hex).is_ok()
}

pub fn verify_interaction_signature(
    raw_body: &[u8],
    signature_hex: &str,
    timestamp: &str,
    public_key_hex: &str,
) -> Result<(), AccessError> {
    if timestamp.is_empty() {
        return Err(AccessError::AuthenticationFailure);
    }
    let verifying_key = parse_public_key(public_key_hex)?;
    let signature_bytes = decode_hex_fixed::<SIGNATURE_BYTES>("signature", signature_hex)?;
    let signature = Signature::from_bytes(&signature_bytes);
    let message = interaction_signed_message(timestamp, raw_body);
    verifying_key
        .verify_strict(&message, &signature)
        .map_err(|_| AccessError::AuthenticationFailure)
}

fn parse_public_key(public_key_hex: &str) -> Result<VerifyingKey, AccessError> {
    let bytes = decode_hex_fixed::<PUBLIC_KEY_BYTES>("public key", public_key_hex)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| AccessError::InvalidPublicKey)
}

#[derive(Debug, Clone)]
/// Verifier bound to one application public key, parsed once at startup.
pub struct InteractionSignatureVerifier {
    verifying_key: VerifyingKey,
}

impl InteractionSignatureVerifier {
    pub fn from_public_key_hex(public_key_hex: &str) -> Result<Self, AccessError> {
        Ok(Self {
            verifying_key: parse_public_key(public_key_hex)?,
        })
    }

    pub fn verify(&self, raw_body: &[u8], signature_hex: &str, timestamp: &str) -> bool {
        if timestamp.is_empty() {
            return false;
        }
        let Ok(signature_bytes) = decode_hex_fixed::<SIGNATURE_BYTES>("signature", signature_hex)
        else {
            tracing::debug!("interaction signature header is not valid hex");
            return false;
        };
        let signature = Signature::from_bytes(&signature_bytes);
        let message = interaction_signed_message(timestamp, raw_body);
        self.verifying_key
            .verify_strict(&message, &signature)
            .is_ok()
    }
}

/// Decodes a lowercase or uppercase hex string with no separators.
pub fn decode_hex(label: &'static str, value: &str) -> Result<Vec<u8>, AccessError> {
    let raw = value.as_bytes();
    if raw.is_empty() {
        return Err(AccessError::InvalidHex {
            label,
            reason: "value cannot be empty".to_string(),
        });
    }
    if raw.len() % 2 != 0 {
        return Err(AccessError::InvalidHex {
            label,
            reason: "odd number of hex characters".to_string(),
        });
    }

    let mut bytes = Vec::with_capacity(raw.len() / 2);
    for pair in raw.chunks(2) {
        let high = hex_nibble(pair[0]);
        let low = hex_nibble(pair[1]);
        match (high, low) {
            (Some(high), Some(low)) => bytes.push((high << 4) | low),
            _ => {
                return Err(AccessError::InvalidHex {
                    label,
                    reason: "non-hex character".to_string(),
                })
            }
        }
    }
    Ok(bytes)
}

fn hex_nibble(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

fn decode_hex_fixed<const N: usize>(label: &'static str, raw: &str) -> Result<[u8; N], AccessError> {
    let decoded = decode_hex(label, raw)?;
    let actual = decoded.len();
    decoded.try_into().map_err(|_| AccessError::InvalidLength {
        label,
        actual,
        expected: N,
    })
}
