//! Data models for the Janus signaling protocol
//!
//! This module contains the wire frames exchanged with the gateway and the
//! entities the client tracks while a session is alive.

pub mod context;
pub mod event;
pub mod frame;
pub mod handle;
pub mod request;
pub mod tracks;

pub use context::TxContext;
pub use event::ClientEvent;
pub use frame::{ErrorInfo, Frame, FrameKind, Publisher};
pub use handle::{Handle, HandleId, HandleState, Role};
pub use request::{Jsep, Request, SdpKind, TrickleCandidate};
pub use tracks::{RemoteTrack, TrackKind};
