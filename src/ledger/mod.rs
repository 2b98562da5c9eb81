/// Ledger interface for identity ownership and routing records
///
/// The agent layer only reads two record kinds: ownership records (DID to
/// current verkey) and attribute records (DID to arbitrary JSON, used here
/// for routing endpoints). Consensus and storage live behind the
/// `LedgerClient` trait.
pub mod memory;

pub use memory::MemoryLedger;

use crate::crypto::VerKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single ledger query
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The query could not complete (no quorum, network fault, ...)
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Identity ownership record: the verkey currently bound to a DID
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NymRecord {
    pub did: String,
    pub verkey: VerKey,
}

/// Attribute record: arbitrary JSON published by a DID
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttribRecord {
    pub did: String,
    pub raw: serde_json::Value,
}

impl AttribRecord {
    /// Extract the routing endpoint, if the record carries one
    ///
    /// The attribute JSON shape is an external contract:
    /// `{"endpoint": {"ha": "host:port", "verkey": "..."}}`. Missing or
    /// malformed keys yield `None`, never a fault.
    pub fn endpoint(&self) -> Option<String> {
        self.raw
            .get("endpoint")?
            .get("ha")?
            .as_str()
            .map(String::from)
    }
}

/// Read access to the replicated ledger
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Fetch the ownership record for `did`, if any
    async fn get_nym(&self, did: &str) -> Result<Option<NymRecord>, LedgerError>;

    /// Fetch the attribute record for `did`, if any
    async fn get_attrib(&self, did: &str) -> Result<Option<AttribRecord>, LedgerError>;
}

/// Write access to the ledger, for parties publishing their own records
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    /// Publish or replace the ownership record for a DID
    async fn submit_nym(&self, record: NymRecord) -> Result<(), LedgerError>;

    /// Publish or replace the attribute record for a DID
    async fn submit_attrib(&self, record: AttribRecord) -> Result<(), LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attrib_endpoint_parse() {
        let record = AttribRecord {
            did: "did:aura:listener".to_string(),
            raw: json!({"endpoint": {"ha": "127.0.0.1:9801", "verkey": "abc"}}),
        };
        assert_eq!(record.endpoint(), Some("127.0.0.1:9801".to_string()));
    }

    #[test]
    fn test_attrib_endpoint_parse_is_defensive() {
        // Missing endpoint key
        let record = AttribRecord {
            did: "d".to_string(),
            raw: json!({"profile": {}}),
        };
        assert_eq!(record.endpoint(), None);

        // Missing ha key
        let record = AttribRecord {
            did: "d".to_string(),
            raw: json!({"endpoint": {"verkey": "abc"}}),
        };
        assert_eq!(record.endpoint(), None);

        // ha is not a string
        let record = AttribRecord {
            did: "d".to_string(),
            raw: json!({"endpoint": {"ha": 9801}}),
        };
        assert_eq!(record.endpoint(), None);
    }
}
