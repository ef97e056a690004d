//! Notifications for the presentation layer

use super::frame::FrameKind;
use super::handle::HandleId;
use super::tracks::RemoteTrack;

/// Events emitted by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The gateway accepted our session
    SessionCreated { session_id: u64 },

    /// The local publisher joined the room
    PublisherJoined { handle: HandleId, feed_id: Option<u64> },

    /// A remote track started arriving
    RemoteTrackAdded(RemoteTrack),

    /// A remote feed went away or its peer connection dropped
    RemoteTrackRemoved { handle: HandleId, feed_id: u64 },

    /// A request or SDP step failed for a handle (or for the session, when `None`)
    NegotiationFailed {
        handle: Option<HandleId>,
        code: i64,
        reason: String,
    },

    /// Informational frame from the gateway (webrtcup, hangup, media, ...)
    GatewayNotice { kind: FrameKind, sender: Option<u64> },

    /// The session is gone. Emitted once.
    SessionClosed { reason: String },
}
