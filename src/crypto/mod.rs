/// Cryptography module for identity keys and session establishment
///
/// Identity signatures are Ed25519; verkeys travel base58-encoded per
/// ledger convention.
pub mod session;

use crate::error::{AgentError, AgentResult};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

/// Size of a verification key in bytes
pub const VERKEY_SIZE: usize = 32;

/// Size of an identity signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// A DID's public verification key, as published on the ledger
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct VerKey(pub [u8; VERKEY_SIZE]);

impl VerKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> AgentResult<Self> {
        if bytes.len() != VERKEY_SIZE {
            return Err(AgentError::Protocol(format!(
                "verkey must be {} bytes, got {}",
                VERKEY_SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; VERKEY_SIZE];
        arr.copy_from_slice(bytes);
        Ok(VerKey(arr))
    }

    /// Decode from the base58 wire form
    pub fn from_base58(s: &str) -> AgentResult<Self> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| AgentError::Protocol(format!("invalid base58 verkey: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    /// Encode to the base58 wire form
    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; VERKEY_SIZE] {
        &self.0
    }

    /// Verify an Ed25519 signature over `message`
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(signature) else {
            return false;
        };
        verifying_key.verify(message, &sig).is_ok()
    }
}

impl std::fmt::Debug for VerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VerKey({}...)", &self.to_base58()[..8])
    }
}

impl std::fmt::Display for VerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

impl Serialize for VerKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for VerKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_base58(&s).map_err(serde::de::Error::custom)
    }
}

/// Sign `message` with an Ed25519 seed, returning the 64-byte signature
pub fn sign(seed: &[u8; 32], message: &[u8]) -> Vec<u8> {
    let signing_key = SigningKey::from_bytes(seed);
    signing_key.sign(message).to_bytes().to_vec()
}

/// Derive the verkey matching an Ed25519 seed
pub fn verkey_from_seed(seed: &[u8; 32]) -> VerKey {
    let signing_key = SigningKey::from_bytes(seed);
    VerKey(signing_key.verifying_key().to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verkey_base58_round_trip() {
        let verkey = verkey_from_seed(&[7u8; 32]);
        let encoded = verkey.to_base58();
        let decoded = VerKey::from_base58(&encoded).unwrap();
        assert_eq!(verkey, decoded);
    }

    #[test]
    fn test_sign_and_verify() {
        let seed = [42u8; 32];
        let verkey = verkey_from_seed(&seed);
        let message = b"connect transcript";

        let signature = sign(&seed, message);
        assert!(verkey.verify(message, &signature));
        assert!(!verkey.verify(b"different transcript", &signature));
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let signature = sign(&[1u8; 32], b"hello");
        let other = verkey_from_seed(&[2u8; 32]);
        assert!(!other.verify(b"hello", &signature));
    }

    #[test]
    fn test_from_bytes_rejects_bad_length() {
        assert!(VerKey::from_bytes(&[0u8; 16]).is_err());
        assert!(VerKey::from_base58("abc").is_err());
    }
}
