/// Wire framing and handshake message types
///
/// Every payload travels as a length-prefixed frame: a big-endian `u32`
/// byte count followed by that many bytes. Handshake frames carry JSON;
/// established connections carry sealed binary frames in the same framing.
use crate::error::{AgentError, AgentResult};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Bytes of the length prefix
pub const FRAME_HEADER_LEN: usize = 4;

/// Handshake frames exchanged before the channel is sealed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HandshakeFrame {
    /// Initiator's opening frame, signed by the sender's wallet key
    ConnectRequest {
        sender_did: String,
        receiver_did: String,
        eph_pk: String,
        nonce: String,
        sig: String,
    },
    /// Responder's acceptance, signed by the receiver identity's wallet key
    ConnectAccept {
        eph_pk: String,
        nonce: String,
        sig: String,
    },
    /// Responder's typed refusal, written before the socket closes
    ConnectReject { code: RejectCode, reason: String },
}

/// Why an inbound attempt was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectCode {
    UnknownIdentity,
    AuthenticationFailed,
    PeerResolutionFailed,
}

impl HandshakeFrame {
    /// Encode for the wire
    pub fn to_bytes(&self) -> AgentResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| AgentError::Protocol(format!("failed to encode handshake frame: {}", e)))
    }

    /// Decode from a received frame
    pub fn from_bytes(bytes: &[u8]) -> AgentResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| AgentError::Protocol(format!("malformed handshake frame: {}", e)))
    }
}

/// Write one length-prefixed frame
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], max_len: usize) -> AgentResult<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > max_len {
        return Err(AgentError::Protocol(format!(
            "frame of {} bytes exceeds cap of {}",
            payload.len(),
            max_len
        )));
    }

    writer
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> AgentResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut header).await?;

    let len = u32::from_be_bytes(header) as usize;
    if len > max_len {
        return Err(AgentError::Protocol(format!(
            "incoming frame of {} bytes exceeds cap of {}",
            len, max_len
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, b"hello frame", 1024).await.unwrap();
        let payload = read_frame(&mut server, 1024).await.unwrap();
        assert_eq!(payload, b"hello frame");
    }

    #[tokio::test]
    async fn test_empty_frame() {
        let (mut client, mut server) = tokio::io::duplex(64);

        write_frame(&mut client, b"", 64).await.unwrap();
        let payload = read_frame(&mut server, 64).await.unwrap();
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_on_write() {
        let (mut client, _server) = tokio::io::duplex(64);
        let err = write_frame(&mut client, &[0u8; 32], 16).await.unwrap_err();
        assert!(matches!(err, AgentError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_on_read() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, &[0u8; 512], 1024).await.unwrap();
        let err = read_frame(&mut server, 16).await.unwrap_err();
        assert!(matches!(err, AgentError::Protocol(_)));
    }

    #[test]
    fn test_handshake_frame_json_round_trip() {
        let frame = HandshakeFrame::ConnectRequest {
            sender_did: "did:aura:sender".to_string(),
            receiver_did: "did:aura:receiver".to_string(),
            eph_pk: "ephkey".to_string(),
            nonce: "abcd".to_string(),
            sig: "sig".to_string(),
        };

        let bytes = frame.to_bytes().unwrap();
        let decoded = HandshakeFrame::from_bytes(&bytes).unwrap();
        assert!(matches!(
            decoded,
            HandshakeFrame::ConnectRequest { sender_did, .. } if sender_did == "did:aura:sender"
        ));
    }

    #[test]
    fn test_malformed_handshake_frame() {
        let err = HandshakeFrame::from_bytes(b"not json").unwrap_err();
        assert!(matches!(err, AgentError::Protocol(_)));
    }

    #[test]
    fn test_reject_code_wire_form() {
        let json = serde_json::to_string(&RejectCode::UnknownIdentity).unwrap();
        assert_eq!(json, "\"unknown-identity\"");
    }
}
