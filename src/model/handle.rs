use std::fmt;
use std::ops::Deref;

use tracing::{debug, warn};

use crate::binding::PeerConnection;

/// Gateway-assigned plugin handle id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl Deref for HandleId {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a handle does in the room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends local media
    Publisher,
    /// Receives one remote feed
    Subscriber,
}

impl Role {
    pub fn for_feed(feed_id: u64) -> Self {
        if feed_id == 0 {
            Role::Publisher
        } else {
            Role::Subscriber
        }
    }
}

/// Per-handle lifecycle.
///
/// `Attaching` has no record of its own: it lives in the attach transaction
/// until the gateway hands back a handle id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Attaching,
    Attached,
    Joining,
    JoinedPublisher,
    JoinedSubscriber,
    Negotiating,
    Active,
    Closed,
}

impl HandleState {
    /// Whether `next` is a legal successor of this state
    pub fn can_advance_to(self, next: HandleState) -> bool {
        use HandleState::*;

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Attaching, Attached) => true,
            (Attached, Joining) => true,
            (Joining, JoinedPublisher) | (Joining, JoinedSubscriber) => true,
            (JoinedPublisher, Negotiating) | (JoinedSubscriber, Negotiating) => true,
            (Negotiating, Active) => true,
            // Renegotiation of an established leg
            (Active, Negotiating) => true,
            _ => false,
        }
    }
}

/// A plugin handle attached on the gateway
pub struct Handle {
    pub id: HandleId,
    pub role: Role,
    /// Remote feed this handle subscribes to, 0 for the local publisher
    pub feed_id: u64,
    pub display: String,
    state: HandleState,
    peer: Option<Box<dyn PeerConnection>>,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("feed_id", &self.feed_id)
            .field("display", &self.display)
            .field("state", &self.state)
            .field("has_peer", &self.peer.is_some())
            .finish()
    }
}

impl Handle {
    /// A freshly attached handle
    pub fn attached(id: HandleId, feed_id: u64, display: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::for_feed(feed_id),
            feed_id,
            display: display.into(),
            state: HandleState::Attached,
            peer: None,
        }
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == HandleState::Closed
    }

    /// Move to `next` if the transition is legal. Returns whether it happened.
    pub fn advance(&mut self, next: HandleState) -> bool {
        if !self.state.can_advance_to(next) {
            warn!(
                handle = *self.id,
                from = ?self.state,
                to = ?next,
                "Rejected handle state transition"
            );
            return false;
        }

        debug!(handle = *self.id, from = ?self.state, to = ?next, "Handle state");
        self.state = next;
        true
    }

    /// Attach the peer connection that negotiates media for this handle.
    ///
    /// A previous binding, if any, is closed first.
    pub fn bind_peer(&mut self, peer: Box<dyn PeerConnection>) {
        if let Some(mut old) = self.peer.replace(peer) {
            old.close();
        }
    }

    pub fn peer_mut(&mut self) -> Option<&mut (dyn PeerConnection + 'static)> {
        self.peer.as_deref_mut()
    }

    pub fn has_peer(&self) -> bool {
        self.peer.is_some()
    }

    /// Close the handle and its peer connection. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut peer) = self.peer.take() {
            peer.close();
        }
        self.state = HandleState::Closed;
    }
}
