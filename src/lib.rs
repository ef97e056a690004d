//! Janus WebRTC gateway signaling client
//!
//! Opens a session on a Janus gateway over WebSocket, joins a video room as a
//! publisher, subscribes to every remote publisher (or runs the echo test) and
//! negotiates media for each handle through a str0m peer connection.

pub mod binding;
pub mod bridge;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handles;
pub mod model;
pub mod orchestrator;
pub mod peer;
pub mod session;
pub mod transaction;
pub mod transport;

mod util;

pub use client::{start, ClientHandle};
pub use config::{ClientConfig, PluginFlow};
pub use error::{ClientError, Result};
pub use model::ClientEvent;
pub use peer::Str0mFactory;
