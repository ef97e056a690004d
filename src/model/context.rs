//! What an outstanding request was for
//!
//! A pending transaction stores one of these instead of a callback that
//! captures the orchestrator. The orchestrator matches on it when the response
//! comes back through the bridge.

use super::handle::HandleId;

/// Context of a pending transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxContext {
    /// `create`: opens the session
    CreateSession,
    /// `attach`: a handle for `feed_id` is being created (0 = local publisher)
    Attach { feed_id: u64, display: String },
    /// `message` joining the room
    Join { handle: HandleId },
    /// `message` carrying the local offer
    Publish { handle: HandleId },
    /// `message` carrying a subscriber's local answer
    Start { handle: HandleId },
    /// `message` capping the publisher bitrate
    Bitrate { handle: HandleId },
    /// `detach` of a closed handle
    Detach { handle: HandleId },
    /// `destroy` on shutdown
    Destroy,
}

impl TxContext {
    /// Handle the transaction belongs to, if any
    pub fn handle(&self) -> Option<HandleId> {
        match self {
            TxContext::Join { handle }
            | TxContext::Publish { handle }
            | TxContext::Start { handle }
            | TxContext::Bitrate { handle }
            | TxContext::Detach { handle } => Some(*handle),
            TxContext::CreateSession | TxContext::Attach { .. } | TxContext::Destroy => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TxContext::CreateSession => "create",
            TxContext::Attach { .. } => "attach",
            TxContext::Join { .. } => "join",
            TxContext::Publish { .. } => "publish",
            TxContext::Start { .. } => "start",
            TxContext::Bitrate { .. } => "bitrate",
            TxContext::Detach { .. } => "detach",
            TxContext::Destroy => "destroy",
        }
    }
}
