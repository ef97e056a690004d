//! str0m-backed peer connection
//!
//! Each handle gets its own [`Rtc`] instance and UDP socket. A driver task
//! runs the sans-IO loop: poll output until the next timeout, transmit, then
//! wait for a datagram, the timeout, or a wake-up after an SDP change. The
//! orchestrator side only applies SDP changes under the lock and posts the
//! results to the bridge.

use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use str0m::change::{SdpAnswer, SdpOffer, SdpPendingOffer};
use str0m::media::{Direction, MediaKind};
use str0m::net::{Protocol, Receive};
use str0m::{Candidate, Event, IceConnectionState, Input, Output, Rtc};
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::binding::{
    GatheringState, IceCandidate, PeerConnection, PeerEvent, PeerFactory, SignalingState,
};
use crate::bridge::{BridgeMessage, BridgeSender};
use crate::error::{ClientError, Result};
use crate::model::{HandleId, Jsep, Role, SdpKind};
use crate::util::{first_mid, host_candidate, select_host_address};

/// Largest datagram we expect to receive
const RECV_BUF_SIZE: usize = 2000;

/// State shared between the handle and its driver task
struct Shared {
    rtc: Mutex<Rtc>,
    wake: Notify,
}

impl Shared {
    fn rtc(&self) -> MutexGuard<'_, Rtc> {
        self.rtc.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Creates [`Str0mPeer`]s bound to the host's routable address
#[derive(Debug, Clone, Default)]
pub struct Str0mFactory;

impl PeerFactory for Str0mFactory {
    fn create(
        &self,
        handle: HandleId,
        role: Role,
        bridge: BridgeSender,
    ) -> Result<Box<dyn PeerConnection>> {
        let host = select_host_address()?;
        let socket = StdUdpSocket::bind(SocketAddr::new(host, 0))
            .map_err(|e| ClientError::Peer(format!("binding UDP socket: {e}")))?;
        Ok(Box::new(Str0mPeer::new(handle, role, socket, bridge)?))
    }
}

pub struct Str0mPeer {
    handle: HandleId,
    role: Role,
    shared: Arc<Shared>,
    candidate: Candidate,
    pending: Option<SdpPendingOffer>,
    remote_offer: Option<SdpOffer>,
    signaling: SignalingState,
    gathering: GatheringState,
    bridge: BridgeSender,
    driver: Option<JoinHandle<()>>,
}

impl Str0mPeer {
    /// Wrap a bound socket and start its driver task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        handle: HandleId,
        role: Role,
        socket: StdUdpSocket,
        bridge: BridgeSender,
    ) -> Result<Self> {
        let local = socket
            .local_addr()
            .map_err(|e| ClientError::Peer(e.to_string()))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| ClientError::Peer(e.to_string()))?;
        let socket = UdpSocket::from_std(socket).map_err(|e| ClientError::Peer(e.to_string()))?;

        let candidate = host_candidate(local)?;
        let mut rtc = Rtc::builder().build();
        rtc.add_local_candidate(candidate.clone());
        info!(handle = *handle, %local, ?role, "Peer connection bound");

        let shared = Arc::new(Shared {
            rtc: Mutex::new(rtc),
            wake: Notify::new(),
        });
        let driver = tokio::spawn(drive(
            handle,
            Arc::clone(&shared),
            socket,
            local,
            bridge.clone(),
        ));

        Ok(Self {
            handle,
            role,
            shared,
            candidate,
            pending: None,
            remote_offer: None,
            signaling: SignalingState::None,
            gathering: GatheringState::Gathering,
            bridge,
            driver: Some(driver),
        })
    }

    /// Post the local description followed by our candidates and the end marker
    fn announce(&mut self, jsep: Jsep) {
        let sdp_mid = first_mid(&jsep.sdp).unwrap_or_else(|| "0".to_string());
        self.bridge.post(BridgeMessage::LocalSdp {
            handle: self.handle,
            jsep,
        });

        self.bridge.post(BridgeMessage::LocalCandidate {
            handle: self.handle,
            candidate: Some(IceCandidate {
                sdp_mid,
                sdp_mline_index: 0,
                candidate: self.candidate.to_sdp_string(),
            }),
        });
        self.bridge.post(BridgeMessage::LocalCandidate {
            handle: self.handle,
            candidate: None,
        });
        self.gathering = GatheringState::Complete;

        // Let the driver pick up whatever the SDP change queued
        self.shared.wake.notify_one();
    }
}

impl PeerConnection for Str0mPeer {
    fn handle(&self) -> HandleId {
        self.handle
    }

    fn create_offer(&mut self) -> Result<()> {
        let (offer, pending) = {
            let mut rtc = self.shared.rtc();
            let mut change = rtc.sdp_api();
            for kind in [MediaKind::Audio, MediaKind::Video] {
                let direction = match self.role {
                    Role::Publisher => Direction::SendRecv,
                    Role::Subscriber => Direction::RecvOnly,
                };
                change.add_media(kind, direction, None, None, None);
            }
            change
                .apply()
                .ok_or_else(|| ClientError::Peer("offer has no changes".into()))?
        };

        debug!(handle = *self.handle, "Local offer created");
        self.pending = Some(pending);
        self.signaling = SignalingState::HaveLocalOffer;
        self.announce(Jsep::offer(offer.to_sdp_string()));
        Ok(())
    }

    fn create_answer(&mut self) -> Result<()> {
        let offer = self
            .remote_offer
            .take()
            .ok_or_else(|| ClientError::Peer("no remote offer to answer".into()))?;

        let answer = self
            .shared
            .rtc()
            .sdp_api()
            .accept_offer(offer)
            .map_err(|e| ClientError::Peer(format!("accepting offer: {e}")))?;

        debug!(handle = *self.handle, "Local answer created");
        self.signaling = SignalingState::Stable;
        self.announce(Jsep::answer(answer.to_sdp_string()));
        Ok(())
    }

    fn set_remote_description(&mut self, jsep: &Jsep) -> Result<()> {
        match jsep.kind {
            SdpKind::Answer => {
                let pending = self
                    .pending
                    .take()
                    .ok_or_else(|| ClientError::Peer("answer without local offer".into()))?;
                let answer = SdpAnswer::from_sdp_string(&jsep.sdp)
                    .map_err(|e| ClientError::Peer(format!("parsing answer: {e}")))?;
                self.shared
                    .rtc()
                    .sdp_api()
                    .accept_answer(pending, answer)
                    .map_err(|e| ClientError::Peer(format!("accepting answer: {e}")))?;
                self.signaling = SignalingState::Stable;
                self.shared.wake.notify_one();
            }
            SdpKind::Offer => {
                let offer = SdpOffer::from_sdp_string(&jsep.sdp)
                    .map_err(|e| ClientError::Peer(format!("parsing offer: {e}")))?;
                self.remote_offer = Some(offer);
                self.signaling = SignalingState::HaveRemoteOffer;
            }
        }

        debug!(handle = *self.handle, kind = ?jsep.kind, "Remote description applied");
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        self.signaling
    }

    fn gathering_state(&self) -> GatheringState {
        self.gathering
    }

    fn close(&mut self) {
        let Some(driver) = self.driver.take() else {
            return;
        };

        self.shared.rtc().disconnect();
        driver.abort();
        self.pending = None;
        self.remote_offer = None;
        info!(handle = *self.handle, "Peer connection closed");
    }
}

impl Drop for Str0mPeer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drive one `Rtc` until it dies
async fn drive(
    handle: HandleId,
    shared: Arc<Shared>,
    socket: UdpSocket,
    local: SocketAddr,
    bridge: BridgeSender,
) {
    let mut buf = vec![0; RECV_BUF_SIZE];

    loop {
        let deadline = {
            let mut rtc = shared.rtc();
            match poll_until_timeout(handle, &mut rtc, &socket, &bridge) {
                Some(deadline) => deadline,
                None => break,
            }
        };

        let wait = deadline.saturating_duration_since(Instant::now());
        if wait.is_zero() {
            let mut rtc = shared.rtc();
            if let Err(e) = rtc.handle_input(Input::Timeout(Instant::now())) {
                fail(handle, &bridge, e.to_string());
                break;
            }
            continue;
        }

        let received = tokio::select! {
            received = socket.recv_from(&mut buf) => Some(received),
            _ = tokio::time::sleep(wait) => None,
            _ = shared.wake.notified() => continue,
        };

        let input = match received {
            None => Input::Timeout(Instant::now()),
            Some(Ok((n, source))) => match buf[..n].try_into() {
                Ok(contents) => Input::Receive(
                    Instant::now(),
                    Receive {
                        proto: Protocol::Udp,
                        source,
                        destination: local,
                        contents,
                    },
                ),
                Err(_) => {
                    trace!(handle = *handle, %source, "Ignoring unrecognised datagram");
                    continue;
                }
            },
            Some(Err(e)) => {
                warn!(handle = *handle, "UDP receive failed: {e}");
                continue;
            }
        };

        let mut rtc = shared.rtc();
        if let Err(e) = rtc.handle_input(input) {
            fail(handle, &bridge, e.to_string());
            break;
        }
    }

    debug!(handle = *handle, "Peer driver stopped");
}

/// Transmit and report until the `Rtc` asks to be woken later.
///
/// Returns `None` once the connection is dead.
fn poll_until_timeout(
    handle: HandleId,
    rtc: &mut Rtc,
    socket: &UdpSocket,
    bridge: &BridgeSender,
) -> Option<Instant> {
    loop {
        if !rtc.is_alive() {
            return None;
        }

        let output = match rtc.poll_output() {
            Ok(output) => output,
            Err(e) => {
                fail(handle, bridge, e.to_string());
                return None;
            }
        };

        match output {
            Output::Timeout(t) => return Some(t),
            Output::Transmit(transmit) => {
                if let Err(e) = socket.try_send_to(&transmit.contents, transmit.destination) {
                    trace!(handle = *handle, "UDP send dropped: {e}");
                }
            }
            Output::Event(event) => {
                if let Some(event) = peer_event(handle, rtc, event) {
                    bridge.post(BridgeMessage::Peer { handle, event });
                }
            }
        }
    }
}

fn peer_event(handle: HandleId, rtc: &mut Rtc, event: Event) -> Option<PeerEvent> {
    match event {
        Event::Connected => {
            info!(handle = *handle, "Peer connected");
            Some(PeerEvent::Connected)
        }
        Event::IceConnectionStateChange(state) => {
            debug!(handle = *handle, ?state, "ICE state");
            if state == IceConnectionState::Disconnected {
                rtc.disconnect();
                return Some(PeerEvent::Disconnected);
            }
            None
        }
        Event::MediaAdded(media) => Some(PeerEvent::TrackAdded {
            mid: media.mid.to_string(),
            kind: media.kind.into(),
        }),
        other => {
            trace!(handle = *handle, "Event: {:?}", other);
            None
        }
    }
}

fn fail(handle: HandleId, bridge: &BridgeSender, reason: String) {
    warn!(handle = *handle, %reason, "Peer connection failed");
    bridge.post(BridgeMessage::Peer {
        handle,
        event: PeerEvent::Failed(reason),
    });
}
