//! Room orchestration
//!
//! The orchestrator is the processing context. It owns the session, the
//! handle arena and every peer connection, and is the only consumer of the
//! bridge. Requests go out through the outbound queue; their responses come
//! back as [`BridgeMessage::Resolved`] carrying the [`TxContext`] they were
//! registered with.
//!
//! ```text
//!   create ─► attach(publisher) ─► join ─► joined ─► offer ─► configure ─► answer ─► Active
//!                                            │
//!                                            └─ publishers ─► attach(feed) ─► join ─► attached(offer)
//!                                                                              ─► answer ─► start ─► Active
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::binding::{IceCandidate, PeerConnection, PeerEvent, PeerFactory};
use crate::bridge::{BridgeMessage, BridgeReceiver, BridgeSender};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::handles::HandleRegistry;
use crate::model::{
    ClientEvent, ErrorInfo, Frame, FrameKind, Handle, HandleId, HandleState, Jsep, Publisher,
    RemoteTrack, Request, Role, SdpKind, TrickleCandidate, TxContext,
};
use crate::session::SignalingSession;
use crate::transaction::{new_transaction_id, Resolved, ResponseKind, TransactionRegistry};

/// How often pending transactions are checked for expiry
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Error code reported for failures raised locally rather than by the gateway
pub const LOCAL_FAILURE_CODE: i64 = -1;

pub struct RoomOrchestrator {
    config: ClientConfig,
    session: SignalingSession,
    handles: HandleRegistry,
    transactions: Arc<TransactionRegistry<TxContext>>,
    outbound: mpsc::UnboundedSender<String>,
    bridge: BridgeSender,
    peers: Box<dyn PeerFactory>,
    events: mpsc::UnboundedSender<ClientEvent>,
    /// Publisher's private id, sent with subscriber joins
    private_id: Option<u64>,
    /// Our own feed id in the room
    own_feed: Option<u64>,
    closed: bool,
}

impl RoomOrchestrator {
    pub fn new(
        config: ClientConfig,
        transactions: Arc<TransactionRegistry<TxContext>>,
        outbound: mpsc::UnboundedSender<String>,
        bridge: BridgeSender,
        peers: Box<dyn PeerFactory>,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Self {
        let session = SignalingSession::new(config.keepalive_interval);

        Self {
            config,
            session,
            handles: HandleRegistry::new(),
            transactions,
            outbound,
            bridge,
            peers,
            events,
            private_id: None,
            own_feed: None,
            closed: false,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session.id()
    }

    pub fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    /// Whether the session has been torn down
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Drain the bridge until the session is torn down
    pub async fn run(mut self, mut bridge: BridgeReceiver) {
        // First ticks one full period from now
        let period = self.session.keepalive_interval();
        let mut keepalive = time::interval_at(time::Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep = time::interval_at(time::Instant::now() + SWEEP_INTERVAL, SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.closed {
            tokio::select! {
                msg = bridge.recv() => match msg {
                    Some(msg) => self.handle(msg),
                    None => self.teardown("bridge closed"),
                },
                _ = keepalive.tick() => self.keep_alive(),
                _ = sweep.tick() => self.expire_transactions(Instant::now()),
            }
        }

        debug!("Orchestrator stopped");
    }

    /// Process one bridge message
    pub fn handle(&mut self, msg: BridgeMessage) {
        if self.closed {
            trace!(handle = ?msg.handle(), "Message after teardown dropped");
            return;
        }

        match msg {
            BridgeMessage::TransportUp => self.create_session(),
            BridgeMessage::Resolved(resolved) => self.on_resolved(resolved),
            BridgeMessage::RoomEvent(frame) => self.inspect_room_event(&frame),
            BridgeMessage::Notice(frame) => self.on_notice(&frame),
            BridgeMessage::CreateOffer(handle) => self.on_create_offer(handle),
            BridgeMessage::LocalSdp { handle, jsep } => self.on_local_sdp(handle, jsep),
            BridgeMessage::LocalCandidate { handle, candidate } => {
                self.on_local_candidate(handle, candidate)
            }
            BridgeMessage::Peer { handle, event } => self.on_peer_event(handle, event),
            BridgeMessage::TransportClosed { reason } => self.teardown(reason),
            BridgeMessage::Shutdown => self.shutdown(),
        }
    }

    /// Open a session on the gateway
    pub fn create_session(&mut self) {
        if self.session.is_active() {
            debug!(session_id = self.session.id(), "Session already open");
            return;
        }

        let request = self.session.create_request();
        self.send_tracked(request, TxContext::CreateSession);
    }

    /// Send a keepalive for the current session, if there is one
    pub fn keep_alive(&mut self) {
        if let Some(request) = self.session.keepalive_request() {
            trace!(session_id = self.session.id(), "Keepalive");
            self.send(request);
        }
    }

    /// Attach a plugin handle for `feed_id` (0 = local publisher)
    pub fn create_handle(&mut self, feed_id: u64, name: String) {
        if !self.session.is_active() {
            warn!(feed = feed_id, "No session, attach skipped");
            return;
        }

        let request = Request::Attach {
            transaction: new_transaction_id(),
            session_id: self.session.id(),
            plugin: self.config.flow.plugin().to_string(),
        };
        debug!(feed = feed_id, display = %name, "Attaching handle");
        self.send_tracked(
            request,
            TxContext::Attach {
                feed_id,
                display: name,
            },
        );
    }

    /// Send the join request for an attached handle
    pub fn join_room(&mut self, id: HandleId) {
        let session_id = self.session.id();
        let Some(handle) = self.handles.live(id) else {
            debug!(handle = *id, "Join for unknown handle skipped");
            return;
        };

        let private_id = match handle.role {
            Role::Subscriber => self.private_id,
            Role::Publisher => None,
        };
        let body = self
            .config
            .flow
            .join_body(handle.feed_id, &handle.display, private_id);
        if !handle.advance(HandleState::Joining) {
            return;
        }

        let request = Request::message(new_transaction_id(), session_id, id, body, None);
        self.send_tracked(request, TxContext::Join { handle: id });

        if self.config.flow.offers_on_join() {
            if let Some(handle) = self.handles.live(id) {
                handle.advance(HandleState::JoinedPublisher);
            }
            self.schedule_offer(id);
        }
    }

    /// Fail every transaction that went unanswered for too long
    pub fn expire_transactions(&mut self, now: Instant) {
        for expired in self.transactions.expire(now) {
            if let Some(handle) = expired.context.handle() {
                if !self.handles.is_live(handle) {
                    continue;
                }
            }

            warn!(
                transaction = %expired.id,
                context = expired.context.name(),
                "Request timed out"
            );
            self.on_error(expired.context, ErrorInfo::timeout());
        }
    }

    fn on_resolved(&mut self, resolved: Resolved<TxContext>) {
        let Resolved {
            id,
            kind,
            context,
            frame,
        } = resolved;

        // Detach replies always concern a closed handle
        if let Some(handle) = context.handle() {
            if !matches!(context, TxContext::Detach { .. }) && !self.handles.is_live(handle) {
                debug!(handle = *handle, transaction = %id, "Response for closed handle dropped");
                self.transactions.complete(&id);
                return;
            }
        }

        match kind {
            ResponseKind::Success => self.on_success(context, &frame),
            ResponseKind::Event => self.on_event(&id, context, &frame),
            ResponseKind::Error => {
                let info = frame.error_info().unwrap_or_else(|| ErrorInfo {
                    code: LOCAL_FAILURE_CODE,
                    reason: "error without details".to_string(),
                });
                self.on_error(context, info);
            }
        }
    }

    fn on_success(&mut self, context: TxContext, frame: &Frame) {
        match context {
            TxContext::CreateSession => match frame.data_id() {
                Some(id) => {
                    self.session.establish(id);
                    self.emit(ClientEvent::SessionCreated { session_id: id });
                    let display = self.config.display.clone();
                    self.create_handle(0, display);
                }
                None => self.on_error(context, missing("session id")),
            },
            TxContext::Attach { feed_id, display } => match frame.data_id() {
                Some(id) => self.on_attached(HandleId(id), feed_id, display),
                None => self.on_error(TxContext::Attach { feed_id, display }, missing("handle id")),
            },
            TxContext::Detach { handle } => debug!(handle = *handle, "Handle detached"),
            TxContext::Destroy => self.teardown("session destroyed"),
            // Synchronous plugin replies
            context => match frame.error_info() {
                Some(info) => self.on_error(context, info),
                None => self.on_plugin_reply(context, frame),
            },
        }
    }

    /// Janus plugin requests finish with the event carrying their outcome,
    /// which completes the transaction. Intermediate events leave it pending.
    fn on_event(&mut self, id: &str, context: TxContext, frame: &Frame) {
        if !frame.settles_request() {
            debug!(transaction = %id, context = context.name(), "Intermediate event, still pending");
            return;
        }
        self.transactions.complete(id);

        match frame.error_info() {
            Some(info) => self.on_error(context, info),
            None => self.on_plugin_reply(context, frame),
        }
    }

    fn on_error(&mut self, context: TxContext, info: ErrorInfo) {
        warn!(
            context = context.name(),
            code = info.code,
            reason = %info.reason,
            "Request failed"
        );
        self.emit(ClientEvent::NegotiationFailed {
            handle: context.handle(),
            code: info.code,
            reason: info.reason.clone(),
        });

        match context {
            TxContext::CreateSession => {
                self.teardown(format!("session not created: {}", info.reason))
            }
            TxContext::Attach { feed_id, .. } => {
                // Let a later publisher list retry this feed
                if feed_id != 0 {
                    self.handles.release_feed(feed_id);
                }
            }
            TxContext::Join { handle }
            | TxContext::Publish { handle }
            | TxContext::Start { handle } => self.close_handle(handle),
            TxContext::Bitrate { .. } | TxContext::Detach { .. } => {}
            TxContext::Destroy => self.teardown("session destroyed"),
        }
    }

    fn on_attached(&mut self, id: HandleId, feed_id: u64, display: String) {
        // The feed may have left while the attach was in flight
        let wanted = feed_id == 0 || self.handles.is_known_feed(feed_id);

        let handle = Handle::attached(id, feed_id, display);
        let role = handle.role;
        info!(handle = *id, feed = feed_id, ?role, "Handle attached");
        self.handles.insert(handle);

        if !wanted {
            debug!(handle = *id, feed = feed_id, "Feed gone before attach completed");
            self.close_handle(id);
            return;
        }

        self.join_room(id);
    }

    fn on_plugin_reply(&mut self, context: TxContext, frame: &Frame) {
        match context {
            TxContext::Join { handle } => self.on_join_reply(handle, frame),
            TxContext::Publish { handle } => self.on_publish_reply(handle, frame),
            TxContext::Start { handle } => self.on_start_reply(handle, frame),
            TxContext::Bitrate { handle } => debug!(handle = *handle, "Bitrate cap applied"),
            other => debug!(context = other.name(), "Unexpected plugin reply ignored"),
        }
    }

    fn on_join_reply(&mut self, id: HandleId, frame: &Frame) {
        match frame.videoroom() {
            Some("joined") => {
                if !self.advance(id, HandleState::JoinedPublisher) {
                    return;
                }
                self.private_id = frame.private_id().or(self.private_id);
                self.own_feed = frame.joined_feed();
                info!(handle = *id, feed = ?self.own_feed, "Joined room as publisher");

                self.emit(ClientEvent::PublisherJoined {
                    handle: id,
                    feed_id: self.own_feed,
                });
                self.schedule_offer(id);
            }
            Some("attached") => {
                let Some(jsep) = frame.jsep() else {
                    self.fail_handle(
                        id,
                        ClientError::Protocol("subscriber attached without offer".into()),
                    );
                    return;
                };
                if !self.advance(id, HandleState::JoinedSubscriber) {
                    return;
                }
                self.start_answer(id, jsep);
            }
            other => match frame.result() {
                Some(result) => debug!(handle = *id, result, "Join acknowledged"),
                None => debug!(handle = *id, videoroom = ?other, "Join reply ignored"),
            },
        }
    }

    fn on_publish_reply(&mut self, id: HandleId, frame: &Frame) {
        let Some(jsep) = frame.jsep() else {
            debug!(handle = *id, result = ?frame.result(), "Configure acknowledged");
            return;
        };
        if jsep.kind != SdpKind::Answer {
            warn!(handle = *id, "Expected an answer to our offer");
            return;
        }

        if let Err(e) = self.with_peer(id, |peer| peer.set_remote_description(&jsep)) {
            self.fail_handle(id, e);
            return;
        }
        if !self.advance(id, HandleState::Active) {
            return;
        }
        info!(handle = *id, "Publisher negotiated");

        let body = self.config.flow.bitrate_body(self.config.bitrate);
        let request = Request::message(new_transaction_id(), self.session.id(), id, body, None);
        self.send_tracked(request, TxContext::Bitrate { handle: id });
    }

    fn on_start_reply(&mut self, id: HandleId, frame: &Frame) {
        match frame.result() {
            Some(result) => {
                if self.advance(id, HandleState::Active) {
                    info!(handle = *id, result, "Subscriber started");
                }
            }
            None => debug!(handle = *id, "Start reply without result"),
        }
    }

    /// Publisher lists and departures carried by any `event` frame
    fn inspect_room_event(&mut self, frame: &Frame) {
        if !self.config.flow.fans_out() {
            return;
        }

        if let Some(feed_id) = frame.departed_feed() {
            self.on_feed_departed(feed_id);
        }

        let publishers = frame.publishers();
        if !publishers.is_empty() {
            self.fan_out(publishers);
        }
    }

    /// Attach one subscriber per unknown remote feed, up to the configured cap
    fn fan_out(&mut self, publishers: Vec<Publisher>) {
        if !self.session.is_active() {
            return;
        }

        for publisher in publishers {
            if Some(publisher.id) == self.own_feed || self.handles.is_known_feed(publisher.id) {
                continue;
            }
            if !self.config.allows_subscriber(self.handles.subscriber_count()) {
                info!(
                    feed = publisher.id,
                    max = self.config.max_subscribers,
                    "Subscriber cap reached, feed skipped"
                );
                continue;
            }

            self.handles.claim_feed(publisher.id);
            info!(feed = publisher.id, display = %publisher.display, "New publisher");
            self.create_handle(publisher.id, publisher.display);
        }
    }

    fn on_feed_departed(&mut self, feed_id: u64) {
        let Some(id) = self.handles.release_feed(feed_id) else {
            return;
        };

        info!(handle = *id, feed = feed_id, "Publisher left");
        self.close_handle(id);
        self.emit(ClientEvent::RemoteTrackRemoved {
            handle: id,
            feed_id,
        });
    }

    fn on_notice(&mut self, frame: &Frame) {
        self.emit(ClientEvent::GatewayNotice {
            kind: frame.kind,
            sender: frame.sender,
        });

        match frame.kind {
            FrameKind::Timeout => self.teardown("gateway session timed out"),
            FrameKind::Detached => {
                let Some(id) = frame.sender.map(HandleId) else {
                    return;
                };
                let Some((role, feed_id)) = self.handles.get(id).map(|h| (h.role, h.feed_id))
                else {
                    return;
                };

                // The gateway already dropped the handle, no detach needed
                if !self.handles.close(id) {
                    return;
                }
                self.transactions.forget_handle(id);
                if role == Role::Subscriber {
                    self.emit(ClientEvent::RemoteTrackRemoved {
                        handle: id,
                        feed_id,
                    });
                }
            }
            FrameKind::Hangup => info!(handle = ?frame.sender, "Peer connection hung up"),
            _ => {}
        }
    }

    fn schedule_offer(&self, id: HandleId) {
        self.bridge.post(BridgeMessage::CreateOffer(id));
    }

    fn on_create_offer(&mut self, id: HandleId) {
        if !self.handles.is_live(id) {
            debug!(handle = *id, "Offer for closed handle dropped");
            return;
        }

        if let Err(e) = self.with_peer(id, |peer| peer.create_offer()) {
            self.fail_handle(id, e);
        }
    }

    fn start_answer(&mut self, id: HandleId, offer: Jsep) {
        let result = self.with_peer(id, |peer| {
            peer.set_remote_description(&offer)?;
            peer.create_answer()
        });

        if let Err(e) = result {
            self.fail_handle(id, e);
        }
    }

    /// Send a finished local description with the matching plugin request
    fn on_local_sdp(&mut self, id: HandleId, jsep: Jsep) {
        let session_id = self.session.id();
        let Some(handle) = self.handles.live(id) else {
            debug!(handle = *id, "Local description for closed handle dropped");
            return;
        };
        if !handle.advance(HandleState::Negotiating) {
            return;
        }

        let (body, context) = match jsep.kind {
            SdpKind::Offer => (
                self.config.flow.publish_body(),
                TxContext::Publish { handle: id },
            ),
            SdpKind::Answer => (
                self.config.flow.start_body(),
                TxContext::Start { handle: id },
            ),
        };

        let request = Request::message(new_transaction_id(), session_id, id, body, Some(jsep));
        self.send_tracked(request, context);
    }

    fn on_local_candidate(&mut self, id: HandleId, candidate: Option<IceCandidate>) {
        if !self.session.is_active() || !self.handles.is_live(id) {
            trace!(handle = *id, "Candidate for closed handle dropped");
            return;
        }

        let candidate = match candidate {
            Some(c) => TrickleCandidate::Candidate {
                sdp_mid: c.sdp_mid,
                sdp_mline_index: c.sdp_mline_index,
                candidate: c.candidate,
            },
            None => TrickleCandidate::completed(),
        };

        self.send(Request::Trickle {
            transaction: new_transaction_id(),
            session_id: self.session.id(),
            handle_id: *id,
            candidate,
        });
    }

    fn on_peer_event(&mut self, id: HandleId, event: PeerEvent) {
        let Some(handle) = self.handles.get(id).filter(|h| !h.is_closed()) else {
            trace!(handle = *id, "Peer event for closed handle dropped");
            return;
        };
        let role = handle.role;
        let feed_id = handle.feed_id;

        match event {
            PeerEvent::Connected => info!(handle = *id, "Media connected"),
            PeerEvent::TrackAdded { mid, kind } => {
                // A room publisher only sends; echoed media comes back on the same handle
                if role == Role::Publisher && self.config.flow.fans_out() {
                    return;
                }

                let track = RemoteTrack {
                    handle: id,
                    feed_id,
                    display: handle.display.clone(),
                    mid,
                    kind,
                };
                info!(handle = *id, feed = feed_id, mid = %track.mid, kind = ?track.kind, "Remote track");
                self.emit(ClientEvent::RemoteTrackAdded(track));
            }
            PeerEvent::Disconnected => {
                warn!(handle = *id, "Media disconnected");
                self.close_handle(id);
                if role == Role::Subscriber {
                    self.emit(ClientEvent::RemoteTrackRemoved {
                        handle: id,
                        feed_id,
                    });
                }
            }
            PeerEvent::Failed(reason) => self.fail_handle(id, ClientError::Peer(reason)),
        }
    }

    /// Run `f` against the handle's peer connection, creating it on first use
    fn with_peer<F>(&mut self, id: HandleId, f: F) -> Result<()>
    where
        F: FnOnce(&mut (dyn PeerConnection + 'static)) -> Result<()>,
    {
        let handle = self
            .handles
            .live(id)
            .ok_or_else(|| ClientError::Peer(format!("handle {id} is closed")))?;

        if !handle.has_peer() {
            let peer = self.peers.create(id, handle.role, self.bridge.clone())?;
            handle.bind_peer(peer);
        }

        match handle.peer_mut() {
            Some(peer) => f(peer),
            None => Err(ClientError::Peer(format!("handle {id} has no peer"))),
        }
    }

    fn advance(&mut self, id: HandleId, next: HandleState) -> bool {
        self.handles
            .live(id)
            .is_some_and(|handle| handle.advance(next))
    }

    /// Report a local failure on a handle and close it
    fn fail_handle(&mut self, id: HandleId, err: ClientError) {
        let info = match err {
            ClientError::Negotiation { code, reason } => ErrorInfo { code, reason },
            other => ErrorInfo {
                code: LOCAL_FAILURE_CODE,
                reason: other.to_string(),
            },
        };

        warn!(handle = *id, code = info.code, reason = %info.reason, "Handle failed");
        self.emit(ClientEvent::NegotiationFailed {
            handle: Some(id),
            code: info.code,
            reason: info.reason,
        });
        self.close_handle(id);
    }

    /// Close a handle locally and detach it on the gateway
    pub fn close_handle(&mut self, id: HandleId) {
        if !self.handles.close(id) {
            return;
        }

        let dropped = self.transactions.forget_handle(id);
        debug!(
            handle = *id,
            dropped,
            live = self.handles.active_count(),
            "Handle released"
        );

        if self.session.is_active() {
            let request = Request::Detach {
                transaction: new_transaction_id(),
                session_id: self.session.id(),
                handle_id: *id,
            };
            self.send_tracked(request, TxContext::Detach { handle: id });
        }
    }

    /// Destroy the session on the gateway; teardown follows its reply
    fn shutdown(&mut self) {
        match self.session.destroy_request() {
            Some(request) => {
                info!(session_id = self.session.id(), "Destroying session");
                if !self.send_tracked(request, TxContext::Destroy) {
                    self.teardown("shutdown");
                }
            }
            None => self.teardown("shutdown"),
        }
    }

    /// Drop every handle, the session and all pending requests. Runs once.
    pub fn teardown(&mut self, reason: impl Into<String>) {
        if self.closed {
            return;
        }
        self.closed = true;

        let reason = reason.into();
        let handles = self.handles.close_all();
        self.session.reset();
        let pending = self.transactions.clear();
        self.private_id = None;
        self.own_feed = None;

        info!(handles, pending, %reason, "Session closed");
        self.emit(ClientEvent::SessionClosed { reason });
    }

    /// Queue a request without tracking its response. Returns `false` if the link is gone.
    fn send(&self, request: Request) -> bool {
        let text = match request.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!(verb = request.verb(), "Failed to serialise request: {e}");
                return false;
            }
        };

        trace!(verb = request.verb(), transaction = request.transaction(), "Sending");
        if self.outbound.send(text).is_err() {
            warn!(verb = request.verb(), "Outbound queue closed, request dropped");
            return false;
        }
        true
    }

    /// Queue a request and register its transaction
    fn send_tracked(&mut self, request: Request, context: TxContext) -> bool {
        let id = request.transaction().to_string();
        debug!(verb = request.verb(), context = context.name(), transaction = %id, "Request");

        if !self.transactions.begin(&id, context) {
            return false;
        }
        if !self.send(request) {
            self.transactions.complete(&id);
            return false;
        }
        true
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            trace!("No event listener");
        }
    }
}

fn missing(what: &str) -> ErrorInfo {
    ErrorInfo {
        code: LOCAL_FAILURE_CODE,
        reason: format!("reply has no {what}"),
    }
}
