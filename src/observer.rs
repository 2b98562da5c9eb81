/// Observer cascade for connection and message delivery
///
/// Each stage's return value supplies the next stage's observer, so state
/// scoped to one connection lives in the observer built for that
/// connection. An observer error terminates only that single delivery; it
/// is reported and never closes the connection or listener.
use crate::connection::Connection;
use crate::error::AgentResult;
use crate::listener::Listener;
use async_trait::async_trait;
use std::sync::Arc;

/// Invoked once per successfully handshaken inbound connection
#[async_trait]
pub trait ListenerObserver: Send + Sync {
    /// Returns the observer that will follow this specific connection
    async fn on_connection(
        &self,
        listener: Arc<Listener>,
        connection: Arc<Connection>,
        sender_did: &str,
        receiver_did: &str,
    ) -> AgentResult<Box<dyn ConnectionObserver>>;
}

/// Invoked once per connection, at the moment it is fully established
#[async_trait]
pub trait ConnectionObserver: Send + Sync {
    /// Returns the observer that will receive this connection's messages
    async fn on_established(
        &self,
        connection: Arc<Connection>,
    ) -> AgentResult<Box<dyn MessageObserver>>;
}

/// Invoked once per fully received message, in wire order per connection
#[async_trait]
pub trait MessageObserver: Send + Sync {
    async fn on_message(&self, connection: Arc<Connection>, message: &[u8]) -> AgentResult<()>;
}
