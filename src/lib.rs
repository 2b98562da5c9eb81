/// Aurora Agent - ledger-resolved agent connections between DIDs
///
/// Two parties that have never talked before find each other through a
/// shared ledger: each DID publishes its endpoint and verification key as
/// ledger records, and peers resolve those records to dial, authenticate,
/// and establish an end-to-end encrypted channel. A listener serves any
/// number of local DIDs, each bound or unbound while it runs.
pub mod config;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod handshake;
pub mod ledger;
pub mod listener;
pub mod metrics;
pub mod observer;
pub mod resolver;
pub mod wallet;
pub mod wire;

pub use config::AgentConfig;
pub use connection::{connect, Connection};
pub use error::{AgentError, AgentResult, ResolutionError};
pub use handshake::HandshakePhase;
pub use listener::{listen, IdentityBinding, Listener, ListenerState};
pub use observer::{ConnectionObserver, ListenerObserver, MessageObserver};
pub use resolver::{IdentityResolver, RouteInfo};

use crate::ledger::{AttribRecord, LedgerError, LedgerWriter, NymRecord};
use crate::wallet::KeyStore;
use serde_json::json;
use std::sync::Arc;

/// Publish a DID's ownership record and routing endpoint to the ledger
///
/// After this, peers can resolve the DID and dial `endpoint`. Re-publishing
/// replaces the previous records, which is how a DID moves endpoints.
pub async fn publish_endpoint(
    ledger: Arc<dyn LedgerWriter>,
    wallet: Arc<dyn KeyStore>,
    did: &str,
    endpoint: &str,
) -> AgentResult<()> {
    let verkey = wallet
        .verkey(did)
        .await
        .ok_or_else(|| AgentError::WalletKeyMissing(did.to_string()))?;

    ledger
        .submit_nym(NymRecord {
            did: did.to_string(),
            verkey,
        })
        .await
        .map_err(map_ledger_error)?;

    ledger
        .submit_attrib(AttribRecord {
            did: did.to_string(),
            raw: json!({"endpoint": {"ha": endpoint, "verkey": verkey.to_base58()}}),
        })
        .await
        .map_err(map_ledger_error)?;

    tracing::info!(did, endpoint, "routing data published");
    Ok(())
}

fn map_ledger_error(err: LedgerError) -> AgentError {
    match err {
        LedgerError::Unavailable(reason) => {
            AgentError::PeerResolution(ResolutionError::LedgerUnavailable(reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerClient, MemoryLedger};
    use crate::wallet::MemoryWallet;

    #[tokio::test]
    async fn test_publish_endpoint_writes_both_records() {
        let ledger = MemoryLedger::new();
        let wallet = MemoryWallet::new();
        let (did, verkey) = wallet.create_did().await;

        publish_endpoint(
            Arc::new(ledger.clone()),
            Arc::new(wallet.clone()),
            &did,
            "127.0.0.1:9801",
        )
        .await
        .unwrap();

        let nym = ledger.get_nym(&did).await.unwrap().unwrap();
        assert_eq!(nym.verkey, verkey);

        let attrib = ledger.get_attrib(&did).await.unwrap().unwrap();
        assert_eq!(attrib.endpoint(), Some("127.0.0.1:9801".to_string()));
    }

    #[tokio::test]
    async fn test_publish_endpoint_requires_wallet_key() {
        let ledger = MemoryLedger::new();
        let wallet = MemoryWallet::new();

        let err = publish_endpoint(
            Arc::new(ledger),
            Arc::new(wallet),
            "did:aura:stranger",
            "127.0.0.1:9801",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AgentError::WalletKeyMissing(_)));
    }
}
