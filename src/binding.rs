//! Peer connection capability
//!
//! The client negotiates media through this trait and never touches ICE, DTLS
//! or codecs itself. Implementations report completions by posting to the
//! bridge they were created with:
//!
//! - a local description → [`BridgeMessage::LocalSdp`]
//! - a local candidate → [`BridgeMessage::LocalCandidate`], `None` once gathering ends
//! - media-level events → [`BridgeMessage::Peer`]
//!
//! [`BridgeMessage::LocalSdp`]: crate::bridge::BridgeMessage::LocalSdp
//! [`BridgeMessage::LocalCandidate`]: crate::bridge::BridgeMessage::LocalCandidate
//! [`BridgeMessage::Peer`]: crate::bridge::BridgeMessage::Peer

use crate::bridge::BridgeSender;
use crate::error::Result;
use crate::model::{HandleId, Jsep, Role, TrackKind};

/// SDP offer/answer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    None,
    HaveLocalOffer,
    HaveRemoteOffer,
    Stable,
}

/// ICE candidate gathering state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatheringState {
    Gathering,
    Complete,
}

/// A local ICE candidate ready to be trickled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub sdp_mid: String,
    pub sdp_mline_index: u32,
    /// `candidate:...` attribute value
    pub candidate: String,
}

/// Media-level events reported by a peer connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// ICE and DTLS are up
    Connected,
    /// The remote side added a track
    TrackAdded { mid: String, kind: TrackKind },
    /// The connection dropped
    Disconnected,
    /// The media engine failed
    Failed(String),
}

/// One peer connection, owned by one handle
pub trait PeerConnection: Send {
    /// Handle this connection belongs to
    fn handle(&self) -> HandleId;

    /// Start creating a local offer. Completes with `LocalSdp`.
    fn create_offer(&mut self) -> Result<()>;

    /// Start creating a local answer to the remote offer. Completes with `LocalSdp`.
    fn create_answer(&mut self) -> Result<()>;

    /// Apply a remote offer or answer
    fn set_remote_description(&mut self, jsep: &Jsep) -> Result<()>;

    fn signaling_state(&self) -> SignalingState;

    fn gathering_state(&self) -> GatheringState;

    /// Release media resources. Idempotent.
    fn close(&mut self);
}

/// Creates peer connections for handles
pub trait PeerFactory: Send {
    fn create(
        &self,
        handle: HandleId,
        role: Role,
        bridge: BridgeSender,
    ) -> Result<Box<dyn PeerConnection>>;
}
