//! Remote media tracks
//!
//! Tracks surface from the peer connection of a handle. The client does not
//! render them; it reports them to the presentation layer.

use str0m::media::MediaKind;

use super::handle::HandleId;

/// The kind of media (audio or video)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl From<MediaKind> for TrackKind {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Audio => TrackKind::Audio,
            MediaKind::Video => TrackKind::Video,
        }
    }
}

/// An incoming media track on one of our handles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    /// Handle whose peer connection carries the track
    pub handle: HandleId,
    /// Remote feed the track belongs to, 0 for echoed local media
    pub feed_id: u64,
    /// Display name of the remote publisher
    pub display: String,
    /// The media ID (mid) assigned to this track
    pub mid: String,
    pub kind: TrackKind,
}
