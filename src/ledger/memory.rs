/// In-process ledger backend
///
/// Serves the same record shapes as a consensus-backed client, for local
/// development and tests. Supports verkey rotation and a switchable
/// unavailable mode so resolution failure paths can be exercised.
use crate::crypto::VerKey;
use crate::ledger::{AttribRecord, LedgerClient, LedgerError, LedgerWriter, NymRecord};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared in-memory record store
#[derive(Clone, Default)]
pub struct MemoryLedger {
    nyms: Arc<RwLock<HashMap<String, NymRecord>>>,
    attribs: Arc<RwLock<HashMap<String, AttribRecord>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an ownership record for `did`
    pub async fn register_nym(&self, did: &str, verkey: VerKey) {
        let mut nyms = self.nyms.write().await;
        nyms.insert(
            did.to_string(),
            NymRecord {
                did: did.to_string(),
                verkey,
            },
        );
    }

    /// Replace the verkey bound to `did`, as a key rotation would
    pub async fn rotate_verkey(&self, did: &str, verkey: VerKey) {
        self.register_nym(did, verkey).await;
    }

    /// Publish a routing endpoint attribute in the documented shape
    pub async fn set_endpoint_attrib(&self, did: &str, ha: &str, verkey: &VerKey) {
        let raw = json!({"endpoint": {"ha": ha, "verkey": verkey.to_base58()}});
        self.set_attrib_raw(did, raw).await;
    }

    /// Publish an arbitrary attribute record
    pub async fn set_attrib_raw(&self, did: &str, raw: serde_json::Value) {
        let mut attribs = self.attribs.write().await;
        attribs.insert(
            did.to_string(),
            AttribRecord {
                did: did.to_string(),
                raw,
            },
        );
    }

    /// Toggle the simulated outage. While unavailable, every query fails.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn get_nym(&self, did: &str) -> Result<Option<NymRecord>, LedgerError> {
        self.check_available()?;
        Ok(self.nyms.read().await.get(did).cloned())
    }

    async fn get_attrib(&self, did: &str) -> Result<Option<AttribRecord>, LedgerError> {
        self.check_available()?;
        Ok(self.attribs.read().await.get(did).cloned())
    }
}

#[async_trait]
impl LedgerWriter for MemoryLedger {
    async fn submit_nym(&self, record: NymRecord) -> Result<(), LedgerError> {
        self.check_available()?;
        self.nyms.write().await.insert(record.did.clone(), record);
        Ok(())
    }

    async fn submit_attrib(&self, record: AttribRecord) -> Result<(), LedgerError> {
        self.check_available()?;
        self.attribs
            .write()
            .await
            .insert(record.did.clone(), record);
        Ok(())
    }
}
