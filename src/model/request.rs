//! Outbound Janus requests
//!
//! Every request carries a fresh transaction token. Only the ones that expect
//! a `success`/`event`/`error` reply are registered for correlation; keepalives
//! and trickles are acknowledged with a bare `ack` and are fire-and-forget.

use serde::Serialize;
use serde_json::Value;

use super::handle::HandleId;

/// A request frame, tagged by its `janus` value
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "janus", rename_all = "lowercase")]
pub enum Request {
    Create {
        transaction: String,
    },
    Attach {
        transaction: String,
        session_id: u64,
        plugin: String,
    },
    Message {
        transaction: String,
        session_id: u64,
        handle_id: u64,
        body: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        jsep: Option<Jsep>,
    },
    Trickle {
        transaction: String,
        session_id: u64,
        handle_id: u64,
        candidate: TrickleCandidate,
    },
    Keepalive {
        transaction: String,
        session_id: u64,
    },
    Detach {
        transaction: String,
        session_id: u64,
        handle_id: u64,
    },
    Destroy {
        transaction: String,
        session_id: u64,
    },
}

impl Request {
    pub fn message(
        transaction: String,
        session_id: u64,
        handle: HandleId,
        body: Value,
        jsep: Option<Jsep>,
    ) -> Self {
        Request::Message {
            transaction,
            session_id,
            handle_id: *handle,
            body,
            jsep,
        }
    }

    pub fn transaction(&self) -> &str {
        match self {
            Request::Create { transaction }
            | Request::Attach { transaction, .. }
            | Request::Message { transaction, .. }
            | Request::Trickle { transaction, .. }
            | Request::Keepalive { transaction, .. }
            | Request::Detach { transaction, .. }
            | Request::Destroy { transaction, .. } => transaction,
        }
    }

    /// The `janus` discriminator of this request
    pub fn verb(&self) -> &'static str {
        match self {
            Request::Create { .. } => "create",
            Request::Attach { .. } => "attach",
            Request::Message { .. } => "message",
            Request::Trickle { .. } => "trickle",
            Request::Keepalive { .. } => "keepalive",
            Request::Detach { .. } => "detach",
            Request::Destroy { .. } => "destroy",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Session description kind
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description as carried in the `jsep` member
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Jsep {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl Jsep {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Body of a `trickle` request
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum TrickleCandidate {
    Candidate {
        #[serde(rename = "sdpMid")]
        sdp_mid: String,
        #[serde(rename = "sdpMLineIndex")]
        sdp_mline_index: u32,
        candidate: String,
    },
    /// End-of-candidates marker
    Completed { completed: bool },
}

impl TrickleCandidate {
    pub fn completed() -> Self {
        TrickleCandidate::Completed { completed: true }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_message_shape() {
        let request = Request::message(
            "abc".into(),
            11,
            HandleId(22),
            json!({ "request": "configure" }),
            Some(Jsep::offer("v=0")),
        );

        let value: Value = serde_json::from_str(&request.to_json().unwrap()).unwrap();
        assert_eq!(value["janus"], "message");
        assert_eq!(value["transaction"], "abc");
        assert_eq!(value["session_id"], 11);
        assert_eq!(value["handle_id"], 22);
        assert_eq!(value["jsep"]["type"], "offer");
        assert_eq!(value["jsep"]["sdp"], "v=0");
    }

    #[test]
    fn test_message_without_jsep_omits_field() {
        let request = Request::message("t".into(), 1, HandleId(2), json!({}), None);
        let value: Value = serde_json::from_str(&request.to_json().unwrap()).unwrap();
        assert!(value.get("jsep").is_none());
    }

    #[test]
    fn test_trickle_shapes() {
        let candidate = Request::Trickle {
            transaction: "t".into(),
            session_id: 1,
            handle_id: 2,
            candidate: TrickleCandidate::Candidate {
                sdp_mid: "0".into(),
                sdp_mline_index: 0,
                candidate: "candidate:1 1 udp 2130706431 10.0.0.2 5000 typ host".into(),
            },
        };
        let value = serde_json::to_value(&candidate).unwrap();
        assert_eq!(value["janus"], "trickle");
        assert_eq!(value["candidate"]["sdpMid"], "0");
        assert_eq!(value["candidate"]["sdpMLineIndex"], 0);

        let done = serde_json::to_value(TrickleCandidate::completed()).unwrap();
        assert_eq!(done, json!({ "completed": true }));
    }

    #[test]
    fn test_keepalive_and_create_shapes() {
        let keepalive = serde_json::to_value(Request::Keepalive {
            transaction: "k".into(),
            session_id: 9,
        })
        .unwrap();
        assert_eq!(keepalive, json!({ "janus": "keepalive", "transaction": "k", "session_id": 9 }));

        let create = serde_json::to_value(Request::Create {
            transaction: "c".into(),
        })
        .unwrap();
        assert_eq!(create, json!({ "janus": "create", "transaction": "c" }));
    }
}
