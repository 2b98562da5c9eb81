/// Key material access for local identities
///
/// Key generation, persistence, and signing primitives stay behind the
/// `KeyStore` trait; the agent layer only asks "do we hold a key for this
/// DID" and "sign this transcript".
use crate::crypto::{self, VerKey};
use crate::error::{AgentError, AgentResult};
use async_trait::async_trait;
use rand::{rngs::OsRng, RngCore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use zeroize::ZeroizeOnDrop;

/// Signing access to a local wallet
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Whether the wallet holds a signing key for `did`
    async fn has_did(&self, did: &str) -> bool;

    /// The verkey matching the wallet's signing key for `did`
    async fn verkey(&self, did: &str) -> Option<VerKey>;

    /// Sign `message` with the key held for `did`
    ///
    /// Fails with `WalletKeyMissing` when no key is held.
    async fn sign(&self, did: &str, message: &[u8]) -> AgentResult<Vec<u8>>;
}

/// One stored signing seed, wiped on drop
#[derive(ZeroizeOnDrop)]
struct KeyEntry {
    seed: [u8; 32],
}

/// In-memory wallet keyed by DID
#[derive(Clone, Default)]
pub struct MemoryWallet {
    keys: Arc<RwLock<HashMap<String, KeyEntry>>>,
}

impl MemoryWallet {
    /// Create an empty wallet
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh DID with a random signing key
    ///
    /// The DID is derived from the verkey, so distinct keys yield distinct
    /// identifiers.
    pub async fn create_did(&self) -> (String, VerKey) {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        self.create_did_from_seed(&seed).await
    }

    /// Generate a DID deterministically from a 32-byte seed
    pub async fn create_did_from_seed(&self, seed: &[u8; 32]) -> (String, VerKey) {
        let verkey = crypto::verkey_from_seed(seed);
        let did = format!("did:aura:{}", bs58::encode(&verkey.as_bytes()[..16]).into_string());

        let mut keys = self.keys.write().await;
        keys.insert(did.clone(), KeyEntry { seed: *seed });

        (did, verkey)
    }

    /// Remove the key held for `did`, returning whether one existed
    pub async fn forget_did(&self, did: &str) -> bool {
        self.keys.write().await.remove(did).is_some()
    }
}

#[async_trait]
impl KeyStore for MemoryWallet {
    async fn has_did(&self, did: &str) -> bool {
        self.keys.read().await.contains_key(did)
    }

    async fn verkey(&self, did: &str) -> Option<VerKey> {
        let keys = self.keys.read().await;
        keys.get(did).map(|entry| crypto::verkey_from_seed(&entry.seed))
    }

    async fn sign(&self, did: &str, message: &[u8]) -> AgentResult<Vec<u8>> {
        let keys = self.keys.read().await;
        let entry = keys
            .get(did)
            .ok_or_else(|| AgentError::WalletKeyMissing(did.to_string()))?;
        Ok(crypto::sign(&entry.seed, message))
    }
}
