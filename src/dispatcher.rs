//! Inbound frame dispatch
//!
//! Runs on the transport's reader task. Every text frame goes through
//! [`MessageDispatcher::dispatch`], which classifies it by its `janus` value,
//! resolves pending transactions and hands the results to the processing
//! context through the bridge. Nothing here touches session or handle state.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bridge::{BridgeMessage, BridgeSender};
use crate::error::{ClientError, Result};
use crate::model::{Frame, FrameKind, TxContext};
use crate::transaction::{ResponseKind, TransactionRegistry};

pub struct MessageDispatcher {
    transactions: Arc<TransactionRegistry<TxContext>>,
    bridge: BridgeSender,
}

impl MessageDispatcher {
    pub fn new(transactions: Arc<TransactionRegistry<TxContext>>, bridge: BridgeSender) -> Self {
        Self {
            transactions,
            bridge,
        }
    }

    /// Route one inbound text frame.
    ///
    /// Malformed frames and responses to unknown transactions are logged and
    /// dropped; the returned error is informational only.
    pub fn dispatch(&self, text: &str) -> Result<()> {
        let result = self.route(text);

        if let Err(ClientError::Protocol(reason)) = &result {
            warn!(%reason, len = text.len(), "Dropped malformed frame");
        }

        result
    }

    fn route(&self, text: &str) -> Result<()> {
        let frame = Frame::parse(text)?;
        debug!(kind = frame.kind.as_str(), transaction = ?frame.transaction, "Frame received");

        match frame.kind {
            FrameKind::Ack => {
                debug!(transaction = ?frame.transaction, "Ack");
                Ok(())
            }
            FrameKind::Success => self.resolve(ResponseKind::Success, frame),
            FrameKind::Error => self.resolve(ResponseKind::Error, frame),
            FrameKind::Event => {
                let room = frame.clone();
                let correlated = match frame.transaction.is_some() {
                    true => self.resolve(ResponseKind::Event, frame),
                    false => Ok(()),
                };

                // Room-level content is inspected whatever the event was tied to
                self.bridge.post(BridgeMessage::RoomEvent(room));
                correlated
            }
            kind => {
                info!(
                    kind = kind.as_str(),
                    sender = ?frame.sender,
                    "Gateway notice"
                );
                self.bridge.post(BridgeMessage::Notice(frame));
                Ok(())
            }
        }
    }

    fn resolve(&self, kind: ResponseKind, frame: Frame) -> Result<()> {
        let Some(id) = frame.transaction.clone() else {
            return Err(ClientError::Protocol(format!(
                "{} frame without transaction",
                frame.kind.as_str()
            )));
        };

        let resolved = self.transactions.resolve(&id, kind, frame)?;
        self.bridge.post(BridgeMessage::Resolved(resolved));
        Ok(())
    }
}
