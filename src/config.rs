//! Client configuration
//!
//! The negotiation flow for the attached plugin is picked once here and carried
//! as a [`PluginFlow`] value, so the orchestrator never compares plugin names.

use std::time::Duration;

use serde_json::{json, Value};

use crate::error::{ClientError, Result};

/// Default Janus WebSocket endpoint
pub const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:8188";

/// Default bitrate cap requested after the publisher is up (bits per second)
pub const DEFAULT_BITRATE: u32 = 128_000;

const VIDEOROOM_PLUGIN: &str = "janus.plugin.videoroom";
const ECHOTEST_PLUGIN: &str = "janus.plugin.echotest";

/// Negotiation flow of the plugin the client attaches to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginFlow {
    /// Multi-party room: one local publisher, one subscriber handle per remote feed
    VideoRoom { room: u64 },
    /// Single loopback handle that echoes our own media back
    EchoTest,
}

impl PluginFlow {
    /// Gateway plugin package name
    pub fn plugin(&self) -> &'static str {
        match self {
            PluginFlow::VideoRoom { .. } => VIDEOROOM_PLUGIN,
            PluginFlow::EchoTest => ECHOTEST_PLUGIN,
        }
    }

    /// Whether remote publishers are fanned out into subscriber handles
    pub fn fans_out(&self) -> bool {
        matches!(self, PluginFlow::VideoRoom { .. })
    }

    /// Whether the offer is created as soon as the join request is sent,
    /// rather than when the plugin reports the join.
    pub fn offers_on_join(&self) -> bool {
        matches!(self, PluginFlow::EchoTest)
    }

    /// Body of the join request for a handle.
    ///
    /// `feed_id == 0` joins as the local publisher, anything else subscribes
    /// to that remote feed.
    pub fn join_body(&self, feed_id: u64, display: &str, private_id: Option<u64>) -> Value {
        match self {
            PluginFlow::VideoRoom { room } if feed_id == 0 => json!({
                "request": "join",
                "room": room,
                "ptype": "publisher",
                "display": display,
            }),
            PluginFlow::VideoRoom { room } => {
                let mut body = json!({
                    "request": "join",
                    "room": room,
                    "ptype": "subscriber",
                    "feed": feed_id,
                });
                if let Some(private_id) = private_id {
                    body["private_id"] = json!(private_id);
                }
                body
            }
            PluginFlow::EchoTest => json!({ "audio": true, "video": true }),
        }
    }

    /// Body sent alongside the local offer
    pub fn publish_body(&self) -> Value {
        match self {
            PluginFlow::VideoRoom { .. } => json!({
                "request": "configure",
                "audio": true,
                "video": true,
            }),
            PluginFlow::EchoTest => json!({ "audio": true, "video": true }),
        }
    }

    /// Body sent alongside a subscriber's local answer
    pub fn start_body(&self) -> Value {
        match self {
            PluginFlow::VideoRoom { room } => json!({ "request": "start", "room": room }),
            PluginFlow::EchoTest => json!({ "audio": true, "video": true }),
        }
    }

    /// Body of the bitrate cap request sent once the publisher is negotiated
    pub fn bitrate_body(&self, bitrate: u32) -> Value {
        match self {
            PluginFlow::VideoRoom { .. } => json!({ "request": "configure", "bitrate": bitrate }),
            PluginFlow::EchoTest => json!({ "bitrate": bitrate }),
        }
    }
}

/// Signaling client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Gateway WebSocket URL (ws:// or wss://)
    pub gateway_url: String,

    /// Plugin flow to drive
    pub flow: PluginFlow,

    /// Display name of the local publisher
    pub display: String,

    /// Interval between session keepalives (must stay under the gateway's session timeout)
    pub keepalive_interval: Duration,

    /// How long a request may wait for its first response before it fails
    pub transaction_timeout: Duration,

    /// Maximum number of concurrently subscribed remote feeds (0 = unlimited)
    pub max_subscribers: usize,

    /// Bitrate cap sent after the publisher is negotiated
    pub bitrate: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            flow: PluginFlow::VideoRoom { room: 1234 },
            display: "janus-rtc".to_string(),
            keepalive_interval: Duration::from_secs(25),
            transaction_timeout: Duration::from_secs(10),
            max_subscribers: 5,
            bitrate: DEFAULT_BITRATE,
        }
    }
}

impl ClientConfig {
    /// Create a new config for the given gateway URL
    pub fn new(gateway_url: impl Into<String>) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            ..Default::default()
        }
    }

    /// Set the plugin flow
    pub fn flow(mut self, flow: PluginFlow) -> Self {
        self.flow = flow;
        self
    }

    /// Set the publisher display name
    pub fn display(mut self, display: impl Into<String>) -> Self {
        self.display = display.into();
        self
    }

    /// Set the keepalive interval
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Set the per-transaction timeout
    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    /// Set the subscriber cap
    pub fn max_subscribers(mut self, max: usize) -> Self {
        self.max_subscribers = max;
        self
    }

    /// Set the bitrate cap
    pub fn bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// Check the configuration before connecting
    pub fn validate(&self) -> Result<()> {
        if !(self.gateway_url.starts_with("ws://") || self.gateway_url.starts_with("wss://")) {
            return Err(ClientError::InvalidConfig(format!(
                "gateway url must use ws:// or wss://, got {}",
                self.gateway_url
            )));
        }
        if self.keepalive_interval.is_zero() {
            return Err(ClientError::InvalidConfig(
                "keepalive interval must be non-zero".into(),
            ));
        }
        if self.transaction_timeout.is_zero() {
            return Err(ClientError::InvalidConfig(
                "transaction timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Whether another subscriber may be added given the current count
    pub fn allows_subscriber(&self, current: usize) -> bool {
        self.max_subscribers == 0 || current < self.max_subscribers
    }
}
