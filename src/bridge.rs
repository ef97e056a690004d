//! Ordered handoff into the processing context
//!
//! Everything that mutates session, handle or peer state runs on the single
//! task that drains this queue. The transport reader, the peer connection
//! drivers and the orchestrator itself (for work it defers) only ever post
//! messages here. The queue is FIFO with one consumer, so messages concerning
//! the same handle are processed in the order they were posted.

use tokio::sync::mpsc;
use tracing::trace;

use crate::binding::{IceCandidate, PeerEvent};
use crate::model::{Frame, HandleId, Jsep, TxContext};
use crate::transaction::Resolved;

/// Work item for the processing context
#[derive(Debug)]
pub enum BridgeMessage {
    /// The gateway link is open; start the session
    TransportUp,

    /// A response matched to its pending transaction
    Resolved(Resolved<TxContext>),

    /// An `event` frame to inspect for room-level changes (publisher lists,
    /// departures), independent of transaction correlation
    RoomEvent(Frame),

    /// An informational frame (webrtcup, hangup, media, ...)
    Notice(Frame),

    /// Create the local offer for a publisher handle
    CreateOffer(HandleId),

    /// A peer connection finished producing a local description
    LocalSdp { handle: HandleId, jsep: Jsep },

    /// A peer connection produced a candidate, `None` when gathering is done
    LocalCandidate {
        handle: HandleId,
        candidate: Option<IceCandidate>,
    },

    /// Media-level event from a peer connection
    Peer { handle: HandleId, event: PeerEvent },

    /// The gateway link dropped
    TransportClosed { reason: String },

    /// Orderly shutdown requested by the application
    Shutdown,
}

impl BridgeMessage {
    /// Handle the message concerns, if any
    pub fn handle(&self) -> Option<HandleId> {
        match self {
            BridgeMessage::Resolved(resolved) => resolved.context.handle(),
            BridgeMessage::CreateOffer(handle)
            | BridgeMessage::LocalSdp { handle, .. }
            | BridgeMessage::LocalCandidate { handle, .. }
            | BridgeMessage::Peer { handle, .. } => Some(*handle),
            _ => None,
        }
    }
}

/// Producer side of the bridge. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BridgeSender {
    tx: mpsc::UnboundedSender<BridgeMessage>,
}

impl BridgeSender {
    /// Enqueue a message. Returns `false` once the processing context is gone.
    pub fn post(&self, msg: BridgeMessage) -> bool {
        trace!(handle = ?msg.handle(), "Bridge post");
        self.tx.send(msg).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of the bridge, owned by the processing context
#[derive(Debug)]
pub struct BridgeReceiver {
    rx: mpsc::UnboundedReceiver<BridgeMessage>,
}

impl BridgeReceiver {
    pub async fn recv(&mut self) -> Option<BridgeMessage> {
        self.rx.recv().await
    }

    /// Next message if one is already queued
    pub fn try_recv(&mut self) -> Option<BridgeMessage> {
        self.rx.try_recv().ok()
    }
}

/// Create a connected bridge pair
pub fn bridge() -> (BridgeSender, BridgeReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (BridgeSender { tx }, BridgeReceiver { rx })
}
