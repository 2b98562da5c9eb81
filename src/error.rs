/// Unified error types for Aurora Agent
use thiserror::Error;

/// Failure modes of a ledger resolution
#[derive(Error, Debug)]
pub enum ResolutionError {
    /// The DID has no published ownership or routing record
    #[error("no routing record published for {0}")]
    NotFound(String),

    /// The ledger query could not complete
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),
}

/// Main error type for agent operations
#[derive(Error, Debug)]
pub enum AgentError {
    /// Endpoint could not be bound (address conflict or unreachable)
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Inbound attempt addressed to a DID with no active binding
    #[error("no identity bound for {0}")]
    UnknownIdentity(String),

    /// The peer's routing data could not be resolved from the ledger
    #[error("peer resolution failed: {0}")]
    PeerResolution(#[from] ResolutionError),

    /// Signature verification against the ledger-published verkey failed
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The resolved endpoint could not be dialed
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    /// A resolution or handshake exceeded its deadline
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// The local wallet holds no matching key material for the DID
    #[error("wallet holds no signing key for {0}")]
    WalletKeyMissing(String),

    /// Operation on a connection that is already closed
    #[error("connection closed")]
    ConnectionClosed,

    /// Malformed or unexpected wire data
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Socket-level failures outside the taxonomy above
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for agent operations
pub type AgentResult<T> = Result<T, AgentError>;
