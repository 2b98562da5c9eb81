/// Mutual authenticated handshake
///
/// Both sides prove possession of their identity's wallet key by signing
/// the handshake transcript, and each verifies the peer's signature
/// against the verkey freshly resolved from the ledger. Confidentiality
/// comes from an ephemeral X25519 exchange whose public halves are bound
/// into the signed transcript.
use crate::crypto::session::{transcript_nonce, EphemeralKey, Role, SessionKeys};
use crate::crypto::VerKey;
use crate::error::{AgentError, AgentResult, ResolutionError};
use crate::listener::IdentityBinding;
use crate::metrics;
use crate::resolver::IdentityResolver;
use crate::wallet::KeyStore;
use crate::wire::{self, HandshakeFrame, RejectCode};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Where a single handshake attempt currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    Dialing,
    Resolving,
    Handshaking,
    Established,
    Failed,
}

impl std::fmt::Display for HandshakePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HandshakePhase::Dialing => "dialing",
            HandshakePhase::Resolving => "resolving",
            HandshakePhase::Handshaking => "handshaking",
            HandshakePhase::Established => "established",
            HandshakePhase::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of a completed handshake, ready to become a `Connection`
pub(crate) struct Established {
    pub session: SessionKeys,
    pub peer_verkey: VerKey,
    pub sender_did: String,
    pub receiver_did: String,
}

/// Drive the initiating side of the handshake over an open stream
///
/// `route` is the freshly resolved routing data for `remote_did`; the
/// accept signature is checked against its verkey and nothing else.
pub(crate) async fn initiate<S>(
    stream: &mut S,
    wallet: &dyn KeyStore,
    local_did: &str,
    remote_did: &str,
    remote_verkey: &VerKey,
    max_frame_len: usize,
) -> AgentResult<Established>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut phase = HandshakePhase::Handshaking;
    debug!(local_did, remote_did, %phase, "initiating handshake");

    let eph = EphemeralKey::generate();
    let nonce = transcript_nonce();
    let transcript = request_transcript(local_did, remote_did, &eph.public_b58(), &nonce);
    let sig = wallet.sign(local_did, &transcript).await?;

    let request = HandshakeFrame::ConnectRequest {
        sender_did: local_did.to_string(),
        receiver_did: remote_did.to_string(),
        eph_pk: eph.public_b58(),
        nonce: nonce.clone(),
        sig: bs58::encode(sig).into_string(),
    };
    wire::write_frame(stream, &request.to_bytes()?, max_frame_len).await?;

    let reply = wire::read_frame(stream, max_frame_len).await?;
    match HandshakeFrame::from_bytes(&reply)? {
        HandshakeFrame::ConnectAccept {
            eph_pk: peer_eph,
            nonce: peer_nonce,
            sig,
        } => {
            let accept = accept_transcript(
                local_did,
                remote_did,
                &eph.public_b58(),
                &nonce,
                &peer_eph,
                &peer_nonce,
            );
            let sig_bytes = decode_sig(&sig)?;
            if !remote_verkey.verify(&accept, &sig_bytes) {
                phase = HandshakePhase::Failed;
                warn!(remote_did, %phase, "accept signature did not match resolved verkey");
                return Err(AgentError::AuthenticationFailed(format!(
                    "{} did not prove its ledger-published key",
                    remote_did
                )));
            }

            let session = eph.derive_session(
                &peer_eph,
                Role::Initiator,
                local_did,
                remote_did,
                &nonce,
                &peer_nonce,
            )?;

            phase = HandshakePhase::Established;
            debug!(local_did, remote_did, %phase, "handshake complete");
            Ok(Established {
                session,
                peer_verkey: *remote_verkey,
                sender_did: local_did.to_string(),
                receiver_did: remote_did.to_string(),
            })
        }
        HandshakeFrame::ConnectReject { code, reason } => {
            debug!(remote_did, ?code, %reason, "handshake rejected by peer");
            Err(map_reject(code, reason))
        }
        HandshakeFrame::ConnectRequest { .. } => Err(AgentError::Protocol(
            "unexpected connect-request from responder".to_string(),
        )),
    }
}

/// Drive the responding side of the handshake over an accepted stream
///
/// Implements the inbound accept algorithm: binding check, fresh sender
/// resolution, signature verification, then the signed acceptance. Every
/// refusal is written to the wire as a typed reject before erroring out.
pub(crate) async fn respond<S>(
    stream: &mut S,
    wallet: &dyn KeyStore,
    resolver: &IdentityResolver,
    identities: &RwLock<HashMap<String, IdentityBinding>>,
    max_frame_len: usize,
) -> AgentResult<Established>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut phase = HandshakePhase::Handshaking;

    let first = wire::read_frame(stream, max_frame_len).await?;
    let HandshakeFrame::ConnectRequest {
        sender_did,
        receiver_did,
        eph_pk: peer_eph,
        nonce: peer_nonce,
        sig,
    } = HandshakeFrame::from_bytes(&first)?
    else {
        return Err(AgentError::Protocol(
            "expected connect-request as first frame".to_string(),
        ));
    };
    debug!(%sender_did, %receiver_did, %phase, "inbound connection attempt");

    // The target DID must be bound at evaluation time
    if !identities.read().await.contains_key(&receiver_did) {
        metrics::CONNECTIONS_REJECTED_TOTAL
            .with_label_values(&["unknown-identity"])
            .inc();
        send_reject(
            stream,
            RejectCode::UnknownIdentity,
            format!("no identity bound for {}", receiver_did),
            max_frame_len,
        )
        .await;
        return Err(AgentError::UnknownIdentity(receiver_did));
    }

    // Trust decisions use live ledger data, never the cache
    phase = HandshakePhase::Resolving;
    debug!(%sender_did, %phase, "resolving sender verkey");
    let sender_verkey = match resolver.resolve_verkey_fresh(&sender_did).await {
        Ok(verkey) => verkey,
        Err(err) => {
            metrics::CONNECTIONS_REJECTED_TOTAL
                .with_label_values(&["peer-resolution-failed"])
                .inc();
            send_reject(
                stream,
                RejectCode::PeerResolutionFailed,
                err.to_string(),
                max_frame_len,
            )
            .await;
            return Err(err);
        }
    };

    phase = HandshakePhase::Handshaking;
    debug!(%sender_did, %phase, "verifying sender signature");
    let transcript = request_transcript(&sender_did, &receiver_did, &peer_eph, &peer_nonce);
    let sig_bytes = decode_sig(&sig)?;
    if !sender_verkey.verify(&transcript, &sig_bytes) {
        // A stale cached entry cannot have caused this, but any cached
        // route for the sender is now suspect
        resolver.invalidate(&sender_did).await;
        metrics::CONNECTIONS_REJECTED_TOTAL
            .with_label_values(&["authentication-failed"])
            .inc();
        send_reject(
            stream,
            RejectCode::AuthenticationFailed,
            format!("{} did not prove its ledger-published key", sender_did),
            max_frame_len,
        )
        .await;
        return Err(AgentError::AuthenticationFailed(format!(
            "signature from {} did not match its current verkey",
            sender_did
        )));
    }

    let eph = EphemeralKey::generate();
    let nonce = transcript_nonce();
    let accept = accept_transcript(
        &sender_did,
        &receiver_did,
        &peer_eph,
        &peer_nonce,
        &eph.public_b58(),
        &nonce,
    );
    let accept_sig = wallet.sign(&receiver_did, &accept).await?;

    let frame = HandshakeFrame::ConnectAccept {
        eph_pk: eph.public_b58(),
        nonce: nonce.clone(),
        sig: bs58::encode(accept_sig).into_string(),
    };
    wire::write_frame(stream, &frame.to_bytes()?, max_frame_len).await?;

    let session = eph.derive_session(
        &peer_eph,
        Role::Responder,
        &sender_did,
        &receiver_did,
        &peer_nonce,
        &nonce,
    )?;

    phase = HandshakePhase::Established;
    debug!(%sender_did, %receiver_did, %phase, "handshake complete");
    Ok(Established {
        session,
        peer_verkey: sender_verkey,
        sender_did,
        receiver_did,
    })
}

/// Best-effort typed refusal; the socket is closing either way
async fn send_reject<S>(stream: &mut S, code: RejectCode, reason: String, max_frame_len: usize)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = HandshakeFrame::ConnectReject { code, reason };
    if let Ok(bytes) = frame.to_bytes() {
        if let Err(err) = wire::write_frame(stream, &bytes, max_frame_len).await {
            debug!(%err, "could not deliver reject frame");
        }
    }
}

fn map_reject(code: RejectCode, reason: String) -> AgentError {
    match code {
        RejectCode::UnknownIdentity => AgentError::UnknownIdentity(reason),
        RejectCode::AuthenticationFailed => AgentError::AuthenticationFailed(reason),
        RejectCode::PeerResolutionFailed => {
            AgentError::PeerResolution(ResolutionError::NotFound(reason))
        }
    }
}

fn decode_sig(sig: &str) -> AgentResult<Vec<u8>> {
    bs58::decode(sig)
        .into_vec()
        .map_err(|e| AgentError::Protocol(format!("invalid signature encoding: {}", e)))
}

fn request_transcript(sender_did: &str, receiver_did: &str, eph_pk: &str, nonce: &str) -> Vec<u8> {
    let mut transcript = Vec::new();
    transcript.extend_from_slice(b"aurora-agent/connect-v1\n");
    for field in [sender_did, receiver_did, eph_pk, nonce] {
        transcript.extend_from_slice(field.as_bytes());
        transcript.push(b'\n');
    }
    transcript
}

fn accept_transcript(
    sender_did: &str,
    receiver_did: &str,
    request_eph: &str,
    request_nonce: &str,
    accept_eph: &str,
    accept_nonce: &str,
) -> Vec<u8> {
    let mut transcript = Vec::new();
    transcript.extend_from_slice(b"aurora-agent/accept-v1\n");
    for field in [
        sender_did,
        receiver_did,
        request_eph,
        request_nonce,
        accept_eph,
        accept_nonce,
    ] {
        transcript.extend_from_slice(field.as_bytes());
        transcript.push(b'\n');
    }
    transcript
}
