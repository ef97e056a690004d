//! Inbound Janus frames
//!
//! Frames are kept as a parsed [`serde_json::Value`] with typed accessors for
//! the handful of fields the client acts on. Anything else in the frame is left
//! alone, so unknown plugin payloads never fail parsing.

use serde_json::Value;

use super::request::{Jsep, SdpKind};
use crate::error::{ClientError, Result};

/// Error code reported when a transaction gets no response in time
pub const TIMEOUT_CODE: i64 = 0;

/// The `janus` discriminator of an inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Ack,
    Success,
    Event,
    Error,
    Trickle,
    WebrtcUp,
    Hangup,
    Detached,
    Media,
    Slowlink,
    /// The gateway expired our session
    Timeout,
}

impl FrameKind {
    pub fn parse(value: &str) -> Option<Self> {
        let kind = match value {
            "ack" => FrameKind::Ack,
            "success" => FrameKind::Success,
            "event" => FrameKind::Event,
            "error" => FrameKind::Error,
            "trickle" => FrameKind::Trickle,
            "webrtcup" => FrameKind::WebrtcUp,
            "hangup" => FrameKind::Hangup,
            "detached" => FrameKind::Detached,
            "media" => FrameKind::Media,
            "slowlink" => FrameKind::Slowlink,
            "timeout" => FrameKind::Timeout,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Ack => "ack",
            FrameKind::Success => "success",
            FrameKind::Event => "event",
            FrameKind::Error => "error",
            FrameKind::Trickle => "trickle",
            FrameKind::WebrtcUp => "webrtcup",
            FrameKind::Hangup => "hangup",
            FrameKind::Detached => "detached",
            FrameKind::Media => "media",
            FrameKind::Slowlink => "slowlink",
            FrameKind::Timeout => "timeout",
        }
    }

}

/// A publisher advertised by the room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publisher {
    pub id: u64,
    pub display: String,
}

/// Error code and reason reported by the gateway or a plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: i64,
    pub reason: String,
}

impl ErrorInfo {
    pub fn timeout() -> Self {
        Self {
            code: TIMEOUT_CODE,
            reason: "timeout".to_string(),
        }
    }
}

impl From<ErrorInfo> for ClientError {
    fn from(info: ErrorInfo) -> Self {
        ClientError::Negotiation {
            code: info.code,
            reason: info.reason,
        }
    }
}

/// A parsed inbound frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub transaction: Option<String>,
    /// Handle the frame concerns, when the gateway says so
    pub sender: Option<u64>,
    body: Value,
}

impl Frame {
    /// Parse a text frame from the gateway
    pub fn parse(text: &str) -> Result<Frame> {
        let body: Value = serde_json::from_str(text)
            .map_err(|e| ClientError::Protocol(format!("malformed frame: {e}")))?;

        let janus = body
            .get("janus")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Protocol("frame has no janus field".into()))?;

        let kind = FrameKind::parse(janus)
            .ok_or_else(|| ClientError::Protocol(format!("unknown janus value {janus:?}")))?;

        let transaction = body
            .get("transaction")
            .and_then(Value::as_str)
            .map(str::to_string);
        let sender = body.get("sender").and_then(Value::as_u64);

        Ok(Frame {
            kind,
            transaction,
            sender,
            body,
        })
    }

    /// `data.id` of a `success` reply (new session or handle id)
    pub fn data_id(&self) -> Option<u64> {
        self.body.pointer("/data/id").and_then(Value::as_u64)
    }

    /// `plugindata.data`, the plugin-specific payload
    pub fn plugin_data(&self) -> Option<&Value> {
        self.body.pointer("/plugindata/data")
    }

    fn plugin_str(&self, key: &str) -> Option<&str> {
        self.plugin_data()?.get(key)?.as_str()
    }

    fn plugin_u64(&self, key: &str) -> Option<u64> {
        self.plugin_data()?.get(key)?.as_u64()
    }

    /// `plugindata.data.videoroom`
    pub fn videoroom(&self) -> Option<&str> {
        self.plugin_str("videoroom")
    }

    /// `plugindata.data.result`; echo test and configure replies use `"ok"`
    pub fn result(&self) -> Option<&str> {
        self.plugin_str("result")
            .or_else(|| self.plugin_str("configured"))
            .or_else(|| self.plugin_str("started"))
    }

    /// Our own feed id in a `joined` reply
    pub fn joined_feed(&self) -> Option<u64> {
        self.plugin_u64("id")
    }

    /// `plugindata.data.private_id` in a `joined` reply
    pub fn private_id(&self) -> Option<u64> {
        self.plugin_u64("private_id")
    }

    /// Remote session description, if the frame carries one
    pub fn jsep(&self) -> Option<Jsep> {
        let jsep = self.body.get("jsep")?;
        let sdp = jsep.get("sdp")?.as_str()?;
        let kind = match jsep.get("type").and_then(Value::as_str) {
            Some("answer") => SdpKind::Answer,
            _ => SdpKind::Offer,
        };
        Some(Jsep {
            kind,
            sdp: sdp.to_string(),
        })
    }

    /// `plugindata.data.publishers`, entries without a numeric id are skipped
    pub fn publishers(&self) -> Vec<Publisher> {
        let Some(list) = self
            .plugin_data()
            .and_then(|d| d.get("publishers"))
            .and_then(Value::as_array)
        else {
            return Vec::new();
        };

        list.iter()
            .filter_map(|entry| {
                let id = entry.get("id")?.as_u64()?;
                let display = entry
                    .get("display")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Some(Publisher { id, display })
            })
            .collect()
    }

    /// Feed that left or stopped publishing, from a room push event
    pub fn departed_feed(&self) -> Option<u64> {
        let data = self.plugin_data()?;
        ["leaving", "unpublished"]
            .iter()
            .find_map(|key| data.get(*key).and_then(Value::as_u64))
    }

    /// Error carried by the frame.
    ///
    /// Gateway errors live in `error{code, reason}`; plugin errors live in
    /// `plugindata.data{error_code, error}`.
    pub fn error_info(&self) -> Option<ErrorInfo> {
        if let Some(error) = self.body.get("error") {
            return Some(ErrorInfo {
                code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                reason: error
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }

        let data = self.plugin_data()?;
        let reason = data.get("error").and_then(Value::as_str);
        let code = data.get("error_code").and_then(Value::as_i64);
        if reason.is_none() && code.is_none() {
            return None;
        }

        Some(ErrorInfo {
            code: code.unwrap_or_default(),
            reason: reason.unwrap_or("plugin error").to_string(),
        })
    }

    /// Whether a plugin event carries the outcome of the request it answers.
    ///
    /// Plugins may push intermediate events on a transaction before the one
    /// that settles it; those carry none of these markers.
    pub fn settles_request(&self) -> bool {
        self.error_info().is_some()
            || self.body.get("jsep").is_some()
            || matches!(self.videoroom(), Some("joined" | "attached"))
            || self.result().is_some()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn frame(value: Value) -> Frame {
        Frame::parse(&value.to_string()).unwrap()
    }

    #[test]
    fn test_parse_success() {
        let f = frame(json!({ "janus": "success", "transaction": "abc", "data": { "id": 42 } }));
        assert_eq!(f.kind, FrameKind::Success);
        assert_eq!(f.transaction.as_deref(), Some("abc"));
        assert_eq!(f.data_id(), Some(42));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            Frame::parse("{not json"),
            Err(ClientError::Protocol(_))
        ));
        assert!(matches!(
            Frame::parse(r#"{"transaction":"x"}"#),
            Err(ClientError::Protocol(_))
        ));
        assert!(matches!(
            Frame::parse(r#"{"janus":"bogus"}"#),
            Err(ClientError::Protocol(_))
        ));
    }

    #[test]
    fn test_event_accessors() {
        let f = frame(json!({
            "janus": "event",
            "sender": 99,
            "transaction": "t1",
            "plugindata": {
                "plugin": "janus.plugin.videoroom",
                "data": {
                    "videoroom": "joined",
                    "id": 3,
                    "private_id": 555,
                    "publishers": [
                        { "id": 5, "display": "A" },
                        { "id": 9 },
                        { "display": "no id" }
                    ]
                }
            },
            "jsep": { "type": "answer", "sdp": "v=0" }
        }));

        assert_eq!(f.sender, Some(99));
        assert_eq!(f.videoroom(), Some("joined"));
        assert_eq!(f.joined_feed(), Some(3));
        assert_eq!(f.private_id(), Some(555));
        assert_eq!(
            f.publishers(),
            vec![
                Publisher { id: 5, display: "A".into() },
                Publisher { id: 9, display: String::new() },
            ]
        );
        assert_eq!(f.jsep(), Some(Jsep::answer("v=0")));
        assert!(f.error_info().is_none());
    }

    #[test]
    fn test_error_info_sources() {
        let gateway = frame(json!({
            "janus": "error",
            "transaction": "t",
            "error": { "code": 458, "reason": "No such session" }
        }));
        assert_eq!(
            gateway.error_info(),
            Some(ErrorInfo { code: 458, reason: "No such session".into() })
        );

        let plugin = frame(json!({
            "janus": "event",
            "plugindata": { "data": { "error_code": 426, "error": "No such room" } }
        }));
        assert_eq!(
            plugin.error_info(),
            Some(ErrorInfo { code: 426, reason: "No such room".into() })
        );
    }

    #[test]
    fn test_departed_feed() {
        let leaving = frame(json!({
            "janus": "event",
            "plugindata": { "data": { "videoroom": "event", "leaving": 5 } }
        }));
        assert_eq!(leaving.departed_feed(), Some(5));

        let unpublished = frame(json!({
            "janus": "event",
            "plugindata": { "data": { "videoroom": "event", "unpublished": 9 } }
        }));
        assert_eq!(unpublished.departed_feed(), Some(9));
    }

    #[test]
    fn test_settles_request() {
        let event = |data: Value| {
            frame(json!({ "janus": "event", "plugindata": { "data": data } }))
        };

        assert!(!event(json!({ "videoroom": "event" })).settles_request());
        assert!(!event(json!({ "videoroom": "event", "publishers": [] })).settles_request());
        assert!(event(json!({ "videoroom": "joined", "id": 3 })).settles_request());
        assert!(event(json!({ "videoroom": "event", "configured": "ok" })).settles_request());
        assert!(event(json!({ "videoroom": "event", "started": "ok" })).settles_request());
        assert!(event(json!({ "echotest": "event", "result": "ok" })).settles_request());
        assert!(event(json!({ "error_code": 426, "error": "No such room" })).settles_request());

        let answer = frame(json!({
            "janus": "event",
            "plugindata": { "data": { "videoroom": "event" } },
            "jsep": { "type": "answer", "sdp": "v=0" }
        }));
        assert!(answer.settles_request());
    }

    #[test]
    fn test_notice_kinds_round_trip_names() {
        for name in ["trickle", "webrtcup", "hangup", "detached", "media", "slowlink", "timeout"] {
            let kind = FrameKind::parse(name).unwrap();
            assert_eq!(kind.as_str(), name);
        }
        assert_eq!(FrameKind::parse("bogus"), None);
    }
}
