/// Aurora Agent demo: two parties, one ledger, one encrypted channel
///
/// Runs both sides in one process. The listener binds an endpoint and
/// publishes its routing data; the sender resolves it through the ledger,
/// connects, and delivers a message end to end.
use anyhow::Result;
use async_trait::async_trait;
use aurora_agent::{
    ledger::MemoryLedger, listen, publish_endpoint, wallet::MemoryWallet, AgentConfig,
    AgentResult, Connection, ConnectionObserver, Listener, ListenerObserver, MessageObserver,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct DemoListenerObserver {
    delivered: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl ListenerObserver for DemoListenerObserver {
    async fn on_connection(
        &self,
        _listener: Arc<Listener>,
        connection: Arc<Connection>,
        sender_did: &str,
        receiver_did: &str,
    ) -> AgentResult<Box<dyn ConnectionObserver>> {
        info!(id = %connection.id(), sender_did, receiver_did, "listener observed new connection");
        Ok(Box::new(DemoConnectionObserver {
            delivered: self.delivered.clone(),
        }))
    }
}

struct DemoConnectionObserver {
    delivered: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl ConnectionObserver for DemoConnectionObserver {
    async fn on_established(
        &self,
        connection: Arc<Connection>,
    ) -> AgentResult<Box<dyn MessageObserver>> {
        info!(id = %connection.id(), "connection established");
        Ok(Box::new(DemoMessageObserver {
            delivered: self.delivered.clone(),
        }))
    }
}

struct DemoMessageObserver {
    delivered: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl MessageObserver for DemoMessageObserver {
    async fn on_message(&self, connection: Arc<Connection>, message: &[u8]) -> AgentResult<()> {
        info!(
            id = %connection.id(),
            from = %connection.remote_did(),
            "received message: {}",
            String::from_utf8_lossy(message)
        );
        let _ = self.delivered.send(message.to_vec());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aurora_agent=debug,agent_demo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let endpoint = "127.0.0.1:9801";
    let config = AgentConfig::from_env();

    // One shared ledger, two independent wallets
    let ledger = MemoryLedger::new();
    let listener_wallet = MemoryWallet::new();
    let sender_wallet = MemoryWallet::new();

    let (listener_did, _) = listener_wallet.create_did().await;
    let (sender_did, sender_verkey) = sender_wallet.create_did().await;
    info!(%listener_did, %sender_did, "created identities");

    // Both parties anchor their keys; the listener also publishes routing
    publish_endpoint(
        Arc::new(ledger.clone()),
        Arc::new(listener_wallet.clone()),
        &listener_did,
        endpoint,
    )
    .await?;
    ledger.register_nym(&sender_did, sender_verkey).await;

    let (delivered_tx, mut delivered_rx) = mpsc::unbounded_channel();
    let listener = listen(
        endpoint,
        Arc::new(DemoListenerObserver {
            delivered: delivered_tx,
        }),
        Arc::new(ledger.clone()),
        Arc::new(listener_wallet.clone()),
        config.clone(),
    )
    .await?;
    listener.add_identity(&listener_did).await?;

    // The sender side resolves the listener through the ledger and dials
    let connection = aurora_agent::connect(
        Arc::new(ledger.clone()),
        Arc::new(sender_wallet.clone()),
        &sender_did,
        &listener_did,
        Arc::new(DemoConnectionObserver {
            delivered: mpsc::unbounded_channel().0,
        }),
        &config,
    )
    .await?;

    connection.send(b"hello through the ledger").await?;

    let received = delivered_rx
        .recv()
        .await
        .expect("listener side should receive the message");
    info!(
        "round trip complete: {:?} arrived intact",
        String::from_utf8_lossy(&received)
    );

    connection.close().await;
    listener.close().await;
    Ok(())
}
