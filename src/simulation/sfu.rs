//! Loopback SFU node, peer connections and migration host

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::error::{DeliveryError, MigrationError};
use crate::migration::collaborators::{
    MigrationHost, OfferOptions, PeerConnection, PeerConnectionFactory, SignalingConnector,
    SignalingTransport,
};
use crate::protocol::{
    LocalTrack, MigrationTarget, PeerRole, SessionDescription, SfuEvent, SfuRequest,
};
use crate::stats::reporter::{StatsDelivery, StatsPayload};

/// Offer produced by simulated peer connections
pub const SAMPLE_OFFER_SDP: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111 63 0\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=fmtp:111 minptime=10;useinbandfec=1\r\n\
a=rtpmap:63 red/48000/2\r\n\
a=fmtp:63 111/111\r\n\
a=rtpmap:0 PCMU/8000\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
a=rtpmap:96 VP8/90000\r\n";

const SUBSCRIBER_OFFER_SDP: &str = "v=0\r\ns=subscriber\r\n";
const PUBLISHER_ANSWER_SDP: &str = "v=0\r\ns=publisher-answer\r\n";

/// Operations a [`LoopbackSignaling`] can be told to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    Connect,
    Join,
    /// Answer the join request with an SFU error event
    RejectJoin,
    /// Never complete sending the join request
    StallJoin,
    HealthCheck,
    SetPublisher,
    SendStats,
}

/// SFU node that answers the migration handshake in-process
pub struct LoopbackSignaling {
    hostname: String,
    events: broadcast::Sender<SfuEvent>,
    sent: Mutex<Vec<SfuRequest>>,
    publisher_offers: Mutex<Vec<SessionDescription>>,
    delivered: Mutex<Vec<StatsPayload>>,
    failures: Mutex<HashSet<FailurePoint>>,
    connected: AtomicBool,
    hold_subscriber_offer: AtomicBool,
}

impl LoopbackSignaling {
    pub fn new(hostname: impl Into<String>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            hostname: hostname.into(),
            events,
            sent: Mutex::new(Vec::new()),
            publisher_offers: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
            failures: Mutex::new(HashSet::new()),
            connected: AtomicBool::new(false),
            hold_subscriber_offer: AtomicBool::new(false),
        })
    }

    pub fn fail_at(&self, point: FailurePoint) {
        self.failures.lock().insert(point);
    }

    pub fn recover(&self, point: FailurePoint) {
        self.failures.lock().remove(&point);
    }

    /// Keep the subscriber offer back until [`Self::send_subscriber_offer`]
    pub fn hold_subscriber_offer(&self, hold: bool) {
        self.hold_subscriber_offer.store(hold, Ordering::SeqCst);
    }

    pub fn send_subscriber_offer(&self) {
        self.emit(SfuEvent::SubscriberOffer {
            sdp: SUBSCRIBER_OFFER_SDP.to_string(),
        });
    }

    pub fn emit(&self, event: SfuEvent) {
        debug!(hostname = %self.hostname, event = event.name(), "Loopback event");
        let _ = self.events.send(event);
    }

    pub fn sent(&self) -> Vec<SfuRequest> {
        self.sent.lock().clone()
    }

    pub fn publisher_offers(&self) -> Vec<SessionDescription> {
        self.publisher_offers.lock().clone()
    }

    pub fn delivered_stats(&self) -> Vec<StatsPayload> {
        self.delivered.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn fails(&self, point: FailurePoint) -> bool {
        self.failures.lock().contains(&point)
    }
}

#[async_trait]
impl SignalingTransport for LoopbackSignaling {
    fn hostname(&self) -> String {
        self.hostname.clone()
    }

    async fn connect(&self) -> Result<(), MigrationError> {
        if self.fails(FailurePoint::Connect) {
            return Err(MigrationError::Signaling(format!("{} refused the connection", self.hostname)));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, request: SfuRequest) -> Result<(), MigrationError> {
        let point = match request {
            SfuRequest::Join(_) => Some(FailurePoint::Join),
            SfuRequest::HealthCheck { .. } => Some(FailurePoint::HealthCheck),
            SfuRequest::UpdateMuteStates { .. } => None,
        };
        if point.is_some_and(|point| self.fails(point)) {
            return Err(MigrationError::Signaling(format!("{} dropped {}", self.hostname, request.name())));
        }

        let is_join = matches!(request, SfuRequest::Join(_));
        self.sent.lock().push(request);

        if is_join {
            if self.fails(FailurePoint::StallJoin) {
                std::future::pending::<()>().await;
            }
            if self.fails(FailurePoint::RejectJoin) {
                self.emit(SfuEvent::Error {
                    message: "join rejected".into(),
                });
                return Ok(());
            }
            self.emit(SfuEvent::JoinResponse { reconnected: false });
            if !self.hold_subscriber_offer.load(Ordering::SeqCst) {
                self.send_subscriber_offer();
            }
        }
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<SfuEvent> {
        self.events.subscribe()
    }

    async fn set_publisher(
        &self,
        _session_id: &str,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, MigrationError> {
        if self.fails(FailurePoint::SetPublisher) {
            return Err(MigrationError::Signaling("setPublisher failed".into()));
        }
        self.publisher_offers.lock().push(offer.clone());
        Ok(SessionDescription::answer(PUBLISHER_ANSWER_SDP))
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl StatsDelivery for LoopbackSignaling {
    fn hostname(&self) -> String {
        self.hostname.clone()
    }

    async fn send_stats(&self, payload: StatsPayload) -> Result<(), DeliveryError> {
        if self.fails(FailurePoint::SendStats) {
            return Err(DeliveryError::Send(format!("{} unreachable", self.hostname)));
        }
        serde_json::to_string(&payload).map_err(|e| DeliveryError::Encoding(e.to_string()))?;
        self.delivered.lock().push(payload);
        Ok(())
    }
}

/// Hands out one [`LoopbackSignaling`] per hostname
#[derive(Default)]
pub struct SimulatedConnector {
    nodes: Mutex<HashMap<String, Arc<LoopbackSignaling>>>,
}

impl SimulatedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The node for `hostname`, created on first use
    pub fn node(&self, hostname: &str) -> Arc<LoopbackSignaling> {
        self.nodes
            .lock()
            .entry(hostname.to_string())
            .or_insert_with(|| LoopbackSignaling::new(hostname))
            .clone()
    }
}

impl SignalingConnector for SimulatedConnector {
    fn connect_to(&self, target: &MigrationTarget) -> Arc<dyn SignalingTransport> {
        self.node(&target.hostname)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCall {
    CreateOffer { ice_restart: bool },
    SetLocalDescription(SessionDescription),
    SetRemoteDescription(SessionDescription),
    Rebind(String),
    AddTrack(String),
    UnpublishAllTracks,
    Close,
}

pub struct SimulatedPeerConnection {
    role: PeerRole,
    signaling: Mutex<Option<String>>,
    calls: Mutex<Vec<PeerCall>>,
    fail_offer: AtomicBool,
}

impl SimulatedPeerConnection {
    pub fn new(role: PeerRole) -> Arc<Self> {
        Arc::new(Self {
            role,
            signaling: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            fail_offer: AtomicBool::new(false),
        })
    }

    pub fn calls(&self) -> Vec<PeerCall> {
        self.calls.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.calls.lock().contains(&PeerCall::Close)
    }

    /// Hostname of the signaling channel the connection negotiates through
    pub fn signaling_hostname(&self) -> Option<String> {
        self.signaling.lock().clone()
    }

    pub fn fail_offer(&self, fail: bool) {
        self.fail_offer.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: PeerCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl PeerConnection for SimulatedPeerConnection {
    fn role(&self) -> PeerRole {
        self.role
    }

    async fn create_offer(&self, options: OfferOptions) -> Result<SessionDescription, MigrationError> {
        self.record(PeerCall::CreateOffer {
            ice_restart: options.ice_restart,
        });
        if self.fail_offer.load(Ordering::SeqCst) {
            return Err(MigrationError::PeerConnection(format!("{} offer failed", self.role)));
        }
        Ok(SessionDescription::offer(SAMPLE_OFFER_SDP))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), MigrationError> {
        self.record(PeerCall::SetLocalDescription(description));
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), MigrationError> {
        self.record(PeerCall::SetRemoteDescription(description));
        Ok(())
    }

    fn rebind(&self, signaling: Arc<dyn SignalingTransport>) {
        let hostname = signaling.hostname();
        self.record(PeerCall::Rebind(hostname.clone()));
        *self.signaling.lock() = Some(hostname);
    }

    fn add_track(&self, track: LocalTrack) {
        self.record(PeerCall::AddTrack(track.id));
    }

    fn unpublish_all_tracks(&self) {
        self.record(PeerCall::UnpublishAllTracks);
    }

    async fn close(&self) {
        self.record(PeerCall::Close);
    }
}

#[derive(Default)]
pub struct SimulatedPeerConnectionFactory {
    created: Mutex<Vec<Arc<SimulatedPeerConnection>>>,
    fail: AtomicBool,
}

impl SimulatedPeerConnectionFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every connection created so far, in creation order
    pub fn created(&self) -> Vec<Arc<SimulatedPeerConnection>> {
        self.created.lock().clone()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeerConnectionFactory for SimulatedPeerConnectionFactory {
    async fn create(
        &self,
        role: PeerRole,
        signaling: Arc<dyn SignalingTransport>,
    ) -> Result<Arc<dyn PeerConnection>, MigrationError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MigrationError::PeerConnection("factory unavailable".into()));
        }
        let connection = SimulatedPeerConnection::new(role);
        *connection.signaling.lock() = Some(signaling.hostname());
        self.created.lock().push(connection.clone());
        Ok(connection)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    RebindSignaling(String),
    PauseSubscriber,
    ReplaceSubscriber(PeerRole),
    SetUpUserMedia,
}

/// Call session stand-in that owns the live subscriber
pub struct RecordingMigrationHost {
    calls: Mutex<Vec<HostCall>>,
    subscriber: Mutex<Option<Arc<dyn PeerConnection>>>,
    tracks: Vec<LocalTrack>,
    fail_media: AtomicBool,
}

impl RecordingMigrationHost {
    pub fn new(subscriber: Option<Arc<dyn PeerConnection>>, tracks: Vec<LocalTrack>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            subscriber: Mutex::new(subscriber),
            tracks,
            fail_media: AtomicBool::new(false),
        })
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().clone()
    }

    pub fn fail_media(&self, fail: bool) {
        self.fail_media.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MigrationHost for RecordingMigrationHost {
    fn rebind_signaling(&self, signaling: Arc<dyn SignalingTransport>) {
        self.calls
            .lock()
            .push(HostCall::RebindSignaling(signaling.hostname()));
    }

    fn pause_subscriber(&self) {
        self.calls.lock().push(HostCall::PauseSubscriber);
    }

    async fn replace_subscriber(&self, subscriber: Arc<dyn PeerConnection>) {
        self.calls
            .lock()
            .push(HostCall::ReplaceSubscriber(subscriber.role()));
        let previous = self.subscriber.lock().replace(subscriber);
        if let Some(previous) = previous {
            previous.close().await;
        }
    }

    async fn set_up_user_media(&self) -> Result<Vec<LocalTrack>, MigrationError> {
        self.calls.lock().push(HostCall::SetUpUserMedia);
        if self.fail_media.load(Ordering::SeqCst) {
            return Err(MigrationError::PeerConnection("camera unavailable".into()));
        }
        Ok(self.tracks.clone())
    }
}
