/// Route cache for resolved DID routing data
///
/// Purely advisory: entries speed up repeat lookups and are never
/// authoritative over the ledger. Expired entries are dropped on read.
use crate::crypto::VerKey;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One cached resolution result
#[derive(Debug, Clone)]
pub struct CachedRoute {
    pub endpoint: String,
    pub verkey: VerKey,
    pub resolved_at: DateTime<Utc>,
}

/// TTL'd in-memory cache keyed by DID
#[derive(Clone)]
pub struct RouteCache {
    entries: Arc<RwLock<HashMap<String, CachedRoute>>>,
    ttl: Duration,
}

impl RouteCache {
    /// Create a cache with the given entry TTL
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::seconds(300)),
        }
    }

    /// Get a live cached route for `did`
    pub async fn get(&self, did: &str) -> Option<CachedRoute> {
        {
            let entries = self.entries.read().await;
            if let Some(route) = entries.get(did) {
                if Utc::now() - route.resolved_at < self.ttl {
                    return Some(route.clone());
                }
            } else {
                return None;
            }
        }

        // Entry exists but expired; drop it
        self.entries.write().await.remove(did);
        None
    }

    /// Store a fresh resolution result
    pub async fn put(&self, did: &str, route: CachedRoute) {
        self.entries.write().await.insert(did.to_string(), route);
    }

    /// Drop the entry for `did`, forcing the next lookup to the ledger
    pub async fn invalidate(&self, did: &str) {
        self.entries.write().await.remove(did);
    }

    /// Drop expired entries
    pub async fn cleanup_expired(&self) {
        let cutoff = Utc::now() - self.ttl;
        self.entries
            .write()
            .await
            .retain(|_, route| route.resolved_at >= cutoff);
    }
}
