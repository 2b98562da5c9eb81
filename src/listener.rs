/// Inbound side of the agent protocol
///
/// A listener binds one endpoint and accepts on behalf of every DID
/// currently bound to it. Bindings come and go while the listener runs;
/// the accept check always sees a consistent snapshot of the binding set.
use crate::config::AgentConfig;
use crate::connection::{self, Connection};
use crate::crypto::VerKey;
use crate::error::{AgentError, AgentResult, ResolutionError};
use crate::handshake;
use crate::ledger::{LedgerClient, LedgerError};
use crate::metrics;
use crate::observer::ListenerObserver;
use crate::resolver::IdentityResolver;
use crate::wallet::KeyStore;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle state of a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Created,
    Listening,
    Closed,
}

/// One DID the listener currently accepts for
#[derive(Debug, Clone)]
pub struct IdentityBinding {
    pub did: String,
    pub verkey: VerKey,
    pub bound_at: DateTime<Utc>,
}

/// A bound endpoint accepting agent connections
pub struct Listener {
    endpoint: String,
    config: AgentConfig,
    wallet: Arc<dyn KeyStore>,
    ledger: Arc<dyn LedgerClient>,
    resolver: IdentityResolver,
    observer: Arc<dyn ListenerObserver>,
    state: std::sync::Mutex<ListenerState>,
    pub(crate) identities: RwLock<HashMap<String, IdentityBinding>>,
    connections: RwLock<HashMap<Uuid, Arc<Connection>>>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Bind `endpoint` and start accepting inbound connection attempts
///
/// Fails with `Bind` when the endpoint is already in use or unreachable.
/// The returned listener accepts nothing until an identity is bound.
pub async fn listen(
    endpoint: &str,
    observer: Arc<dyn ListenerObserver>,
    ledger: Arc<dyn LedgerClient>,
    wallet: Arc<dyn KeyStore>,
    config: AgentConfig,
) -> AgentResult<Arc<Listener>> {
    let socket = TcpListener::bind(endpoint)
        .await
        .map_err(|e| AgentError::Bind {
            endpoint: endpoint.to_string(),
            source: e,
        })?;

    // Bound sockets may have been given an ephemeral port
    let local_endpoint = socket
        .local_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| endpoint.to_string());

    let resolver = IdentityResolver::new(
        Arc::clone(&ledger),
        config.cache_ttl,
        config.resolve_timeout,
    );

    let listener = Arc::new(Listener {
        endpoint: local_endpoint,
        config,
        wallet,
        ledger,
        resolver,
        observer,
        state: std::sync::Mutex::new(ListenerState::Created),
        identities: RwLock::new(HashMap::new()),
        connections: RwLock::new(HashMap::new()),
        tasks: std::sync::Mutex::new(Vec::new()),
    });

    *listener.state.lock().unwrap() = ListenerState::Listening;

    let accept_listener = Arc::clone(&listener);
    let accept_task = tokio::spawn(async move {
        accept_loop(accept_listener, socket).await;
    });
    listener.track_task(accept_task);

    info!(endpoint = %listener.endpoint, "listener started");
    Ok(listener)
}

async fn accept_loop(listener: Arc<Listener>, socket: TcpListener) {
    loop {
        match socket.accept().await {
            Ok((stream, peer_addr)) => {
                debug!(%peer_addr, "inbound transport connection");
                let handshake_listener = Arc::clone(&listener);
                let task = tokio::spawn(async move {
                    handle_inbound(handshake_listener, stream).await;
                });
                listener.track_task(task);
            }
            Err(err) => {
                warn!(%err, "accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

/// Run the inbound accept algorithm on one transport connection
///
/// A failed handshake discards only this attempt; the listener keeps
/// accepting throughout.
async fn handle_inbound(listener: Arc<Listener>, mut stream: TcpStream) {
    let outcome = tokio::time::timeout(
        listener.config.handshake_timeout,
        handshake::respond(
            &mut stream,
            listener.wallet.as_ref(),
            &listener.resolver,
            &listener.identities,
            listener.config.max_frame_len,
        ),
    )
    .await;

    let established = match outcome {
        Ok(Ok(established)) => established,
        Ok(Err(err)) => {
            debug!(%err, "inbound handshake failed");
            return;
        }
        Err(_) => {
            metrics::CONNECTIONS_REJECTED_TOTAL
                .with_label_values(&["timeout"])
                .inc();
            debug!("inbound handshake timed out");
            return;
        }
    };

    // The listener may have closed while this handshake was in flight;
    // completed-but-undispatched attempts are discarded
    if listener.state() != ListenerState::Listening {
        debug!("listener closed during handshake; discarding attempt");
        return;
    }

    let (read_half, write_half) = stream.into_split();
    let connection = Connection::establish(
        established.receiver_did.clone(),
        established.sender_did.clone(),
        established.peer_verkey,
        established.session,
        Box::new(write_half),
        &listener.config,
    );
    metrics::CONNECTIONS_ACCEPTED_TOTAL.inc();
    info!(
        local = %established.receiver_did,
        remote = %established.sender_did,
        id = %connection.id(),
        "inbound connection established"
    );

    listener
        .connections
        .write()
        .await
        .insert(connection.id(), Arc::clone(&connection));

    // Observer cascade: listener stage yields the connection observer,
    // which yields the message observer. A failing stage leaves the
    // connection open with no message delivery.
    let message_observer = match listener
        .observer
        .on_connection(
            Arc::clone(&listener),
            Arc::clone(&connection),
            &established.sender_did,
            &established.receiver_did,
        )
        .await
    {
        Ok(connection_observer) => {
            match connection_observer
                .on_established(Arc::clone(&connection))
                .await
            {
                Ok(message_observer) => Some(message_observer),
                Err(err) => {
                    metrics::OBSERVER_ERRORS_TOTAL
                        .with_label_values(&["connection"])
                        .inc();
                    warn!(id = %connection.id(), %err, "connection observer failed; messages will be dropped");
                    None
                }
            }
        }
        Err(err) => {
            metrics::OBSERVER_ERRORS_TOTAL
                .with_label_values(&["listener"])
                .inc();
            warn!(id = %connection.id(), %err, "listener observer failed; messages will be dropped");
            None
        }
    };

    // The read loop runs outside the abortable handshake task so that
    // close lets in-flight deliveries finish
    let reader_conn = Arc::clone(&connection);
    let owner = Arc::clone(&listener);
    tokio::spawn(async move {
        connection::run_read_loop(Arc::clone(&reader_conn), read_half, message_observer).await;
        owner.connections.write().await.remove(&reader_conn.id());
    });
}

impl Listener {
    /// The endpoint this listener is bound to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Current lifecycle state
    pub fn state(&self) -> ListenerState {
        *self.state.lock().unwrap()
    }

    /// Bind `did` to this listener so inbound attempts addressed to it are
    /// accepted
    ///
    /// The wallet must hold the matching signing key; when the ledger
    /// already carries an ownership record for `did`, its verkey must
    /// match the wallet's. Re-adding an existing binding is a no-op.
    pub async fn add_identity(&self, did: &str) -> AgentResult<()> {
        if self.state() == ListenerState::Closed {
            return Err(AgentError::Protocol(
                "cannot bind an identity to a closed listener".to_string(),
            ));
        }

        let wallet_verkey = self
            .wallet
            .verkey(did)
            .await
            .ok_or_else(|| AgentError::WalletKeyMissing(did.to_string()))?;

        match self.ledger.get_nym(did).await {
            Ok(Some(nym)) => {
                if nym.verkey != wallet_verkey {
                    return Err(AgentError::WalletKeyMissing(format!(
                        "{} (wallet key does not match ledger verkey)",
                        did
                    )));
                }
            }
            Ok(None) => {
                debug!(did, "no ownership record on ledger; binding is inert until published");
            }
            Err(LedgerError::Unavailable(reason)) => {
                return Err(AgentError::PeerResolution(
                    ResolutionError::LedgerUnavailable(reason),
                ));
            }
        }

        let mut identities = self.identities.write().await;
        if identities.contains_key(did) {
            debug!(did, "identity already bound");
            return Ok(());
        }
        identities.insert(
            did.to_string(),
            IdentityBinding {
                did: did.to_string(),
                verkey: wallet_verkey,
                bound_at: Utc::now(),
            },
        );
        info!(did, endpoint = %self.endpoint, "identity bound to listener");
        Ok(())
    }

    /// Remove the binding for `did`, returning whether one existed
    ///
    /// Only prevents new connections; connections already established for
    /// this identity stay open until closed independently.
    pub async fn remove_identity(&self, did: &str) -> bool {
        let removed = self.identities.write().await.remove(did).is_some();
        if removed {
            info!(did, endpoint = %self.endpoint, "identity unbound from listener");
        }
        removed
    }

    /// Snapshot of the currently bound DIDs
    pub async fn identities(&self) -> Vec<String> {
        self.identities.read().await.keys().cloned().collect()
    }

    /// Snapshot of the connections this listener currently owns
    pub async fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Close the listener: stop accepting, cancel in-flight handshakes,
    /// and close every owned connection. Idempotent.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == ListenerState::Closed {
                return;
            }
            *state = ListenerState::Closed;
        }

        // Cancel the accept loop and any handshakes still in flight; the
        // bound socket is released with the accept task
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }

        let connections: Vec<Arc<Connection>> = {
            let mut owned = self.connections.write().await;
            owned.drain().map(|(_, connection)| connection).collect()
        };
        for connection in connections {
            connection.close().await;
        }

        info!(endpoint = %self.endpoint, "listener closed");
    }

    fn track_task(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::observer::{ConnectionObserver, ListenerObserver};
    use crate::wallet::MemoryWallet;
    use async_trait::async_trait;

    struct NoopObserver;

    #[async_trait]
    impl ListenerObserver for NoopObserver {
        async fn on_connection(
            &self,
            _listener: Arc<Listener>,
            _connection: Arc<Connection>,
            _sender_did: &str,
            _receiver_did: &str,
        ) -> AgentResult<Box<dyn ConnectionObserver>> {
            Err(AgentError::Protocol("unused in these tests".to_string()))
        }
    }

    async fn test_listener(
        ledger: &MemoryLedger,
        wallet: &MemoryWallet,
    ) -> Arc<Listener> {
        listen(
            "127.0.0.1:0",
            Arc::new(NoopObserver),
            Arc::new(ledger.clone()),
            Arc::new(wallet.clone()),
            AgentConfig::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_add_identity_requires_wallet_key() {
        let ledger = MemoryLedger::new();
        let wallet = MemoryWallet::new();
        let listener = test_listener(&ledger, &wallet).await;

        let err = listener.add_identity("did:aura:stranger").await.unwrap_err();
        assert!(matches!(err, AgentError::WalletKeyMissing(_)));

        listener.close().await;
    }

    #[tokio::test]
    async fn test_add_identity_twice_is_noop() {
        let ledger = MemoryLedger::new();
        let wallet = MemoryWallet::new();
        let (did, verkey) = wallet.create_did().await;
        ledger.register_nym(&did, verkey).await;

        let listener = test_listener(&ledger, &wallet).await;

        listener.add_identity(&did).await.unwrap();
        listener.add_identity(&did).await.unwrap();
        assert_eq!(listener.identities().await.len(), 1);

        listener.close().await;
    }

    #[tokio::test]
    async fn test_add_identity_rejects_mismatched_ledger_key() {
        let ledger = MemoryLedger::new();
        let wallet = MemoryWallet::new();
        let (did, _) = wallet.create_did().await;

        // Ledger says this DID is owned by a different key
        let other = crate::crypto::verkey_from_seed(&[77u8; 32]);
        ledger.register_nym(&did, other).await;

        let listener = test_listener(&ledger, &wallet).await;
        let err = listener.add_identity(&did).await.unwrap_err();
        assert!(matches!(err, AgentError::WalletKeyMissing(_)));

        listener.close().await;
    }

    #[tokio::test]
    async fn test_add_identity_surfaces_ledger_outage() {
        let ledger = MemoryLedger::new();
        let wallet = MemoryWallet::new();
        let (did, _) = wallet.create_did().await;
        ledger.set_unavailable(true);

        let listener = test_listener(&ledger, &wallet).await;
        let err = listener.add_identity(&did).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::PeerResolution(ResolutionError::LedgerUnavailable(_))
        ));

        listener.close().await;
    }

    #[tokio::test]
    async fn test_remove_identity() {
        let ledger = MemoryLedger::new();
        let wallet = MemoryWallet::new();
        let (did, verkey) = wallet.create_did().await;
        ledger.register_nym(&did, verkey).await;

        let listener = test_listener(&ledger, &wallet).await;
        listener.add_identity(&did).await.unwrap();

        assert!(listener.remove_identity(&did).await);
        assert!(!listener.remove_identity(&did).await);
        assert!(listener.identities().await.is_empty());

        listener.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rebindable() {
        let ledger = MemoryLedger::new();
        let wallet = MemoryWallet::new();
        let listener = test_listener(&ledger, &wallet).await;
        let endpoint = listener.endpoint().to_string();

        listener.close().await;
        listener.close().await;
        assert_eq!(listener.state(), ListenerState::Closed);

        // The endpoint is released and can be bound again
        let rebound = listen(
            &endpoint,
            Arc::new(NoopObserver),
            Arc::new(ledger.clone()),
            Arc::new(wallet.clone()),
            AgentConfig::default(),
        )
        .await
        .unwrap();
        rebound.close().await;
    }

    #[tokio::test]
    async fn test_bind_conflict_is_bind_error() {
        let ledger = MemoryLedger::new();
        let wallet = MemoryWallet::new();
        let listener = test_listener(&ledger, &wallet).await;

        let err = listen(
            listener.endpoint(),
            Arc::new(NoopObserver),
            Arc::new(ledger.clone()),
            Arc::new(wallet.clone()),
            AgentConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AgentError::Bind { .. }));

        listener.close().await;
    }
}
