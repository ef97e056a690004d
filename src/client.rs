//! Client entry point
//!
//! Wires the transport, dispatcher, bridge and orchestrator together:
//!
//! ```text
//!   WebSocket ─► reader task ─► MessageDispatcher ─┐
//!                                                  ├─► bridge ─► RoomOrchestrator ─► ClientEvent
//!   peer drivers ──────────────────────────────────┘                │
//!   WebSocket ◄─ writer task ◄─ outbound queue ◄────────────────────┘
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::binding::PeerFactory;
use crate::bridge::{bridge, BridgeMessage, BridgeSender};
use crate::config::ClientConfig;
use crate::dispatcher::MessageDispatcher;
use crate::error::Result;
use crate::model::ClientEvent;
use crate::orchestrator::RoomOrchestrator;
use crate::transaction::TransactionRegistry;
use crate::transport::Transport;

/// Connect to the gateway and start the session.
///
/// Returns once the link is open; the session itself is created in the
/// background and reported as [`ClientEvent::SessionCreated`].
pub async fn start(config: ClientConfig, peers: Box<dyn PeerFactory>) -> Result<ClientHandle> {
    config.validate()?;

    let transactions = Arc::new(TransactionRegistry::new(config.transaction_timeout));
    let (bridge_tx, bridge_rx) = bridge();
    let dispatcher = MessageDispatcher::new(Arc::clone(&transactions), bridge_tx.clone());

    let transport = Transport::connect(&config.gateway_url, dispatcher, bridge_tx.clone()).await?;

    let (events_tx, events) = mpsc::unbounded_channel();
    let orchestrator = RoomOrchestrator::new(
        config,
        transactions,
        transport.outbound(),
        bridge_tx.clone(),
        peers,
        events_tx,
    );
    let task = tokio::spawn(orchestrator.run(bridge_rx));

    bridge_tx.post(BridgeMessage::TransportUp);
    info!("Client started");

    Ok(ClientHandle {
        events,
        bridge: bridge_tx,
        task,
        transport: Some(transport),
    })
}

/// Running client
pub struct ClientHandle {
    events: mpsc::UnboundedReceiver<ClientEvent>,
    bridge: BridgeSender,
    task: JoinHandle<()>,
    transport: Option<Transport>,
}

impl ClientHandle {
    /// Next notification, `None` once the session is closed and drained
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Destroy the session and close the link
    pub async fn shutdown(mut self) {
        if self.bridge.post(BridgeMessage::Shutdown) {
            if let Err(e) = (&mut self.task).await {
                warn!("Orchestrator task failed: {e}");
            }
        }

        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        debug!("Client shut down");
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.task.abort();
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
    }
}
