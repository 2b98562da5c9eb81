/// Session key establishment and message sealing
///
/// Each connection derives two directional ChaCha20-Poly1305 keys from an
/// ephemeral X25519 exchange. The identity binding comes from the Ed25519
/// signatures over the handshake transcript, not from these keys.
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::error::{AgentError, AgentResult};

/// Size of a session key in bytes
pub const SESSION_KEY_SIZE: usize = 32;

/// Size of an AEAD nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of the AEAD authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Which side of the handshake this party played
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// An ephemeral keypair, used for exactly one handshake
#[derive(ZeroizeOnDrop)]
pub struct EphemeralKey {
    #[zeroize(skip)]
    public: [u8; 32],
    secret: [u8; 32],
}

impl EphemeralKey {
    /// Generate a fresh ephemeral keypair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);
        EphemeralKey {
            public: public.to_bytes(),
            secret: secret.to_bytes(),
        }
    }

    /// Public half, base58-encoded for the handshake frame
    pub fn public_b58(&self) -> String {
        bs58::encode(self.public).into_string()
    }

    /// Derive the directional session keys for this connection
    ///
    /// Both sides pass the transcript fields in initiator-first order so the
    /// derivations line up.
    pub fn derive_session(
        &self,
        peer_public_b58: &str,
        role: Role,
        sender_did: &str,
        receiver_did: &str,
        initiator_nonce: &str,
        responder_nonce: &str,
    ) -> AgentResult<SessionKeys> {
        let peer_bytes = bs58::decode(peer_public_b58)
            .into_vec()
            .map_err(|e| AgentError::Protocol(format!("invalid ephemeral key: {}", e)))?;
        if peer_bytes.len() != 32 {
            return Err(AgentError::Protocol(
                "ephemeral key must be 32 bytes".to_string(),
            ));
        }
        let mut peer_arr = [0u8; 32];
        peer_arr.copy_from_slice(&peer_bytes);

        let secret = StaticSecret::from(self.secret);
        let shared = secret.diffie_hellman(&X25519Public::from(peer_arr));

        let derive = |label: &str| -> [u8; SESSION_KEY_SIZE] {
            let mut hasher = Sha256::new();
            hasher.update(b"aurora-agent/session-v1");
            hasher.update(label.as_bytes());
            hasher.update(shared.as_bytes());
            hasher.update(sender_did.as_bytes());
            hasher.update(receiver_did.as_bytes());
            hasher.update(initiator_nonce.as_bytes());
            hasher.update(responder_nonce.as_bytes());
            hasher.finalize().into()
        };

        let i2r = derive("i2r");
        let r2i = derive("r2i");

        let (send_key, recv_key) = match role {
            Role::Initiator => (i2r, r2i),
            Role::Responder => (r2i, i2r),
        };

        Ok(SessionKeys { send_key, recv_key })
    }
}

/// Directional keys for one established connection
#[derive(ZeroizeOnDrop)]
pub struct SessionKeys {
    send_key: [u8; SESSION_KEY_SIZE],
    recv_key: [u8; SESSION_KEY_SIZE],
}

impl SessionKeys {
    /// Seal a message for the peer
    ///
    /// Returns: nonce || ciphertext || tag
    pub fn seal(&self, plaintext: &[u8]) -> Vec<u8> {
        let cipher = ChaCha20Poly1305::new((&self.send_key).into());

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // Encryption with a valid key and nonce cannot fail
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .expect("AEAD encryption with valid inputs");

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        out
    }

    /// Open a sealed message from the peer
    ///
    /// Input: nonce || ciphertext || tag
    pub fn open(&self, sealed: &[u8]) -> AgentResult<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(AgentError::Protocol("sealed frame too short".to_string()));
        }

        let cipher = ChaCha20Poly1305::new((&self.recv_key).into());
        let nonce = Nonce::from_slice(&sealed[..NONCE_SIZE]);

        cipher
            .decrypt(nonce, &sealed[NONCE_SIZE..])
            .map_err(|_| AgentError::Protocol("frame authentication failed".to_string()))
    }
}

/// Random nonce for the handshake transcript, hex-encoded
pub fn transcript_nonce() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn establish_pair() -> (SessionKeys, SessionKeys) {
        let initiator = EphemeralKey::generate();
        let responder = EphemeralKey::generate();
        let n_i = transcript_nonce();
        let n_r = transcript_nonce();

        let initiator_keys = initiator
            .derive_session(
                &responder.public_b58(),
                Role::Initiator,
                "did:aura:sender",
                "did:aura:receiver",
                &n_i,
                &n_r,
            )
            .unwrap();
        let responder_keys = responder
            .derive_session(
                &initiator.public_b58(),
                Role::Responder,
                "did:aura:sender",
                "did:aura:receiver",
                &n_i,
                &n_r,
            )
            .unwrap();
        (initiator_keys, responder_keys)
    }

    #[test]
    fn test_both_sides_derive_matching_keys() {
        let (initiator_keys, responder_keys) = establish_pair();

        let sealed = initiator_keys.seal(b"hello over the wire");
        let opened = responder_keys.open(&sealed).unwrap();
        assert_eq!(opened, b"hello over the wire");

        let sealed_back = responder_keys.seal(b"and back again");
        let opened_back = initiator_keys.open(&sealed_back).unwrap();
        assert_eq!(opened_back, b"and back again");
    }

    #[test]
    fn test_directional_keys_are_not_symmetric() {
        let (initiator_keys, responder_keys) = establish_pair();

        // A frame sealed by the initiator cannot be opened with the
        // initiator's own receive key
        let sealed = initiator_keys.seal(b"one way only");
        assert!(initiator_keys.open(&sealed).is_err());
        assert!(responder_keys.open(&sealed).is_ok());
    }

    #[test]
    fn test_tampered_frame_rejected() {
        let (initiator_keys, responder_keys) = establish_pair();

        let mut sealed = initiator_keys.seal(b"payload");
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(responder_keys.open(&sealed).is_err());
    }

    #[test]
    fn test_short_frame_rejected() {
        let (_, responder_keys) = establish_pair();
        assert!(responder_keys.open(&[0u8; 8]).is_err());
    }

    #[test]
    fn test_transcript_nonces_unique() {
        assert_ne!(transcript_nonce(), transcript_nonce());
    }
}
