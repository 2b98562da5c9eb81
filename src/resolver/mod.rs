/// Identity resolution against the ledger
///
/// Turns a DID into live routing data with two ledger reads: the ownership
/// record for the current verkey and the attribute record for the
/// endpoint. Trust decisions always use `resolve_fresh`; the cached path
/// exists only as a performance shortcut for non-authoritative lookups.
pub mod cache;

pub use cache::{CachedRoute, RouteCache};

use crate::crypto::VerKey;
use crate::error::{AgentError, AgentResult, ResolutionError};
use crate::ledger::{LedgerClient, LedgerError};
use crate::metrics;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Routing data for one DID at one point in time
#[derive(Debug, Clone)]
pub struct RouteInfo {
    pub did: String,
    pub endpoint: String,
    pub verkey: VerKey,
    pub resolved_at: DateTime<Utc>,
}

/// Resolver combining ledger reads with the advisory route cache
#[derive(Clone)]
pub struct IdentityResolver {
    ledger: Arc<dyn LedgerClient>,
    cache: RouteCache,
    resolve_timeout: Duration,
}

impl IdentityResolver {
    /// Create a resolver over the given ledger client
    pub fn new(ledger: Arc<dyn LedgerClient>, cache_ttl: Duration, resolve_timeout: Duration) -> Self {
        Self {
            ledger,
            cache: RouteCache::new(cache_ttl),
            resolve_timeout,
        }
    }

    /// Resolve routing data, serving from cache when a live entry exists
    ///
    /// Not suitable for trust decisions; handshake verification paths use
    /// `resolve_fresh`.
    pub async fn resolve(&self, did: &str) -> AgentResult<RouteInfo> {
        if let Some(cached) = self.cache.get(did).await {
            metrics::RESOLVER_CACHE_HITS_TOTAL.inc();
            debug!(did, "route cache hit");
            return Ok(RouteInfo {
                did: did.to_string(),
                endpoint: cached.endpoint,
                verkey: cached.verkey,
                resolved_at: cached.resolved_at,
            });
        }

        metrics::RESOLVER_CACHE_MISSES_TOTAL.inc();
        self.resolve_fresh(did).await
    }

    /// Resolve routing data directly from the ledger, bypassing the cache
    ///
    /// Both reads reference the same DID; the result is consistent only if
    /// both succeed. No retries here: retry policy belongs to the caller.
    pub async fn resolve_fresh(&self, did: &str) -> AgentResult<RouteInfo> {
        let route = tokio::time::timeout(self.resolve_timeout, self.read_route(did))
            .await
            .map_err(|_| AgentError::Timeout("resolution"))??;

        self.cache
            .put(
                did,
                CachedRoute {
                    endpoint: route.endpoint.clone(),
                    verkey: route.verkey,
                    resolved_at: route.resolved_at,
                },
            )
            .await;

        debug!(did, endpoint = %route.endpoint, "resolved routing data");
        Ok(route)
    }

    async fn read_route(&self, did: &str) -> AgentResult<RouteInfo> {
        let nym = self
            .ledger
            .get_nym(did)
            .await
            .map_err(map_ledger_error)?
            .ok_or_else(|| ResolutionError::NotFound(did.to_string()))?;

        let attrib = self
            .ledger
            .get_attrib(did)
            .await
            .map_err(map_ledger_error)?
            .ok_or_else(|| ResolutionError::NotFound(did.to_string()))?;

        let endpoint = attrib
            .endpoint()
            .ok_or_else(|| ResolutionError::NotFound(did.to_string()))?;

        Ok(RouteInfo {
            did: did.to_string(),
            endpoint,
            verkey: nym.verkey,
            resolved_at: Utc::now(),
        })
    }

    /// Resolve only the current verkey for `did`, straight from the ledger
    ///
    /// Inbound accept decisions use this: the peer's endpoint is whatever
    /// socket it dialed from, so only the ownership record matters. A DID
    /// that publishes no routing attribute can still initiate connections.
    pub async fn resolve_verkey_fresh(&self, did: &str) -> AgentResult<VerKey> {
        let nym = tokio::time::timeout(self.resolve_timeout, self.ledger.get_nym(did))
            .await
            .map_err(|_| AgentError::Timeout("resolution"))?
            .map_err(map_ledger_error)?
            .ok_or_else(|| ResolutionError::NotFound(did.to_string()))?;

        debug!(did, verkey = %nym.verkey, "resolved current verkey");
        Ok(nym.verkey)
    }

    /// Drop any cached entry for `did`
    ///
    /// Called after an authentication mismatch so the next resolution goes
    /// back to the ledger.
    pub async fn invalidate(&self, did: &str) {
        self.cache.invalidate(did).await;
    }
}

fn map_ledger_error(err: LedgerError) -> AgentError {
    match err {
        LedgerError::Unavailable(reason) => {
            AgentError::PeerResolution(ResolutionError::LedgerUnavailable(reason))
        }
    }
}
