/// A single authenticated, encrypted channel between two DIDs
///
/// Inbound connections are owned by the listener that accepted them;
/// outbound connections stand alone. Either way a connection has one
/// read loop delivering messages in wire order and one writer guarded by
/// a lock.
use crate::config::AgentConfig;
use crate::crypto::session::SessionKeys;
use crate::crypto::VerKey;
use crate::error::{AgentError, AgentResult};
use crate::handshake::{self, HandshakePhase};
use crate::ledger::LedgerClient;
use crate::metrics;
use crate::observer::{ConnectionObserver, MessageObserver};
use crate::resolver::IdentityResolver;
use crate::wallet::KeyStore;
use crate::wire;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An established agent connection
pub struct Connection {
    id: Uuid,
    local_did: String,
    remote_did: String,
    peer_verkey: VerKey,
    session: SessionKeys,
    writer: Mutex<BoxedWriter>,
    closed: AtomicBool,
    close_notify: Notify,
    send_timeout: Duration,
    max_frame_len: usize,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("local_did", &self.local_did)
            .field("remote_did", &self.remote_did)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub(crate) fn establish(
        local_did: String,
        remote_did: String,
        peer_verkey: VerKey,
        session: SessionKeys,
        writer: BoxedWriter,
        config: &AgentConfig,
    ) -> Arc<Self> {
        metrics::CONNECTIONS_OPEN.inc();
        Arc::new(Self {
            id: Uuid::new_v4(),
            local_did,
            remote_did,
            peer_verkey,
            session,
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
            send_timeout: config.send_timeout,
            max_frame_len: config.max_frame_len,
        })
    }

    /// Unique id of this connection
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The DID this side speaks as
    pub fn local_did(&self) -> &str {
        &self.local_did
    }

    /// The DID on the other end
    pub fn remote_did(&self) -> &str {
        &self.remote_did
    }

    /// The peer verkey the handshake was verified against
    pub fn peer_verkey(&self) -> &VerKey {
        &self.peer_verkey
    }

    /// Whether the connection has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Seal and send one message to the peer
    pub async fn send(&self, message: &[u8]) -> AgentResult<()> {
        if self.is_closed() {
            return Err(AgentError::ConnectionClosed);
        }

        let sealed = self.session.seal(message);
        let written = tokio::time::timeout(self.send_timeout, async {
            let mut writer = self.writer.lock().await;
            wire::write_frame(&mut *writer, &sealed, self.max_frame_len).await
        })
        .await
        .map_err(|_| AgentError::Timeout("send"))?;

        match written {
            Ok(()) => Ok(()),
            // A write that raced with close reports the close, not the
            // socket error it produced
            Err(_) if self.is_closed() => Err(AgentError::ConnectionClosed),
            Err(err) => Err(err),
        }
    }

    /// Close the connection. Idempotent; in-flight observer deliveries
    /// complete, but nothing is delivered afterwards.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.close_notify.notify_waiters();

        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;

        metrics::CONNECTIONS_OPEN.dec();
        info!(id = %self.id, local = %self.local_did, remote = %self.remote_did, "connection closed");
    }
}

/// Open an outbound connection to `remote_did`, speaking as `local_did`
///
/// Resolution is fresh: the handshake trusts only the verkey currently on
/// the ledger. The observer's `on_established` fires once before any
/// message delivery. No retries; callers wanting resilience re-invoke.
pub async fn connect(
    ledger: Arc<dyn LedgerClient>,
    wallet: Arc<dyn KeyStore>,
    local_did: &str,
    remote_did: &str,
    observer: Arc<dyn ConnectionObserver>,
    config: &AgentConfig,
) -> AgentResult<Arc<Connection>> {
    if !wallet.has_did(local_did).await {
        return Err(AgentError::WalletKeyMissing(local_did.to_string()));
    }

    let resolver = IdentityResolver::new(
        Arc::clone(&ledger),
        config.cache_ttl,
        config.resolve_timeout,
    );
    let route = resolver.resolve_fresh(remote_did).await?;

    let phase = HandshakePhase::Dialing;
    debug!(remote_did, endpoint = %route.endpoint, %phase, "dialing peer");
    let mut stream = TcpStream::connect(&route.endpoint)
        .await
        .map_err(|e| AgentError::Unreachable(format!("{}: {}", route.endpoint, e)))?;

    let established = tokio::time::timeout(
        config.handshake_timeout,
        handshake::initiate(
            &mut stream,
            wallet.as_ref(),
            local_did,
            remote_did,
            &route.verkey,
            config.max_frame_len,
        ),
    )
    .await
    .map_err(|_| AgentError::Timeout("handshake"))?;

    let established = match established {
        Ok(established) => established,
        Err(err) => {
            if matches!(err, AgentError::AuthenticationFailed(_)) {
                // The cached route is suspect; the next resolution must
                // come from the ledger
                resolver.invalidate(remote_did).await;
            }
            return Err(err);
        }
    };

    let (read_half, write_half) = stream.into_split();
    let connection = Connection::establish(
        local_did.to_string(),
        remote_did.to_string(),
        established.peer_verkey,
        established.session,
        Box::new(write_half),
        config,
    );
    metrics::CONNECTIONS_DIALED_TOTAL.inc();
    info!(local = local_did, remote = remote_did, id = %connection.id(), "outbound connection established");

    let message_observer = match observer.on_established(Arc::clone(&connection)).await {
        Ok(message_observer) => Some(message_observer),
        Err(err) => {
            metrics::OBSERVER_ERRORS_TOTAL
                .with_label_values(&["connection"])
                .inc();
            warn!(id = %connection.id(), %err, "connection observer failed; messages will be dropped");
            None
        }
    };

    let reader_conn = Arc::clone(&connection);
    tokio::spawn(async move {
        run_read_loop(reader_conn, read_half, message_observer).await;
    });

    Ok(connection)
}

/// Deliver inbound frames to the message observer until close or EOF
///
/// Runs as this connection's single reader, which is what guarantees
/// per-connection ordering.
pub(crate) async fn run_read_loop<R>(
    conn: Arc<Connection>,
    mut reader: R,
    observer: Option<Box<dyn MessageObserver>>,
) where
    R: AsyncRead + Send + Unpin,
{
    loop {
        if conn.is_closed() {
            break;
        }

        let frame = tokio::select! {
            _ = conn.close_notify.notified() => break,
            frame = wire::read_frame(&mut reader, conn.max_frame_len) => frame,
        };

        match frame {
            Ok(sealed) => {
                if conn.is_closed() {
                    break;
                }
                let plaintext = match conn.session.open(&sealed) {
                    Ok(plaintext) => plaintext,
                    Err(err) => {
                        warn!(id = %conn.id, %err, "discarding undecryptable frame");
                        continue;
                    }
                };
                match &observer {
                    Some(message_observer) => {
                        if let Err(err) = message_observer
                            .on_message(Arc::clone(&conn), &plaintext)
                            .await
                        {
                            metrics::OBSERVER_ERRORS_TOTAL
                                .with_label_values(&["message"])
                                .inc();
                            warn!(id = %conn.id, %err, "message observer failed; delivery dropped");
                        } else {
                            metrics::MESSAGES_DELIVERED_TOTAL.inc();
                        }
                    }
                    None => {
                        warn!(id = %conn.id, "no message observer; dropping message");
                    }
                }
            }
            Err(AgentError::Io(err)) => {
                debug!(id = %conn.id, %err, "peer closed the connection");
                break;
            }
            Err(err) => {
                warn!(id = %conn.id, %err, "transport error on connection");
                break;
            }
        }
    }

    conn.close().await;
}
