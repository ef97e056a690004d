//! Gateway session
//!
//! Holds the session id handed out by the gateway and builds the session-level
//! requests. The id is 0 while no session exists.

use std::time::Duration;

use tracing::{debug, info};

use crate::model::Request;
use crate::transaction::new_transaction_id;

/// Session lifecycle state
#[derive(Debug)]
pub struct SignalingSession {
    id: u64,
    keepalive_interval: Duration,
}

impl SignalingSession {
    pub fn new(keepalive_interval: Duration) -> Self {
        Self {
            id: 0,
            keepalive_interval,
        }
    }

    /// Current session id, 0 when none
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.id != 0
    }

    pub fn keepalive_interval(&self) -> Duration {
        self.keepalive_interval
    }

    /// `create` request opening a new session
    pub fn create_request(&self) -> Request {
        Request::Create {
            transaction: new_transaction_id(),
        }
    }

    /// Record the id from a successful `create`
    pub fn establish(&mut self, id: u64) {
        info!(session_id = id, "Session created");
        self.id = id;
    }

    /// `keepalive` for the current session, or nothing if there is none yet
    pub fn keepalive_request(&self) -> Option<Request> {
        if !self.is_active() {
            debug!("No session yet, keepalive skipped");
            return None;
        }

        Some(Request::Keepalive {
            transaction: new_transaction_id(),
            session_id: self.id,
        })
    }

    /// `destroy` for the current session, if any
    pub fn destroy_request(&self) -> Option<Request> {
        self.is_active().then(|| Request::Destroy {
            transaction: new_transaction_id(),
            session_id: self.id,
        })
    }

    /// Forget the session id
    pub fn reset(&mut self) {
        if self.id != 0 {
            info!(session_id = self.id, "Session reset");
        }
        self.id = 0;
    }
}
