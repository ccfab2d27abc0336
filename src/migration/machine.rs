//! Drives one migration attempt through the stage sequence

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::collaborators::{
    MigrationHost, OfferOptions, PeerConnection, PeerConnectionFactory, SignalingConnector,
    SignalingTransport,
};
use super::sdp::rewrite_publisher_offer;
use super::stage::{MigrationStage, StageEvent, StageSlot};
use crate::config::MigrationConfig;
use crate::error::MigrationError;
use crate::protocol::{
    CallSettings, JoinRequest, MigrationTarget, PeerRole, SessionDescription, SfuEvent, SfuRequest,
};

/// Collaborators shared by every migration of a call
#[derive(Clone)]
pub struct MigrationEnvironment {
    pub connector: Arc<dyn SignalingConnector>,
    pub factory: Arc<dyn PeerConnectionFactory>,
    pub host: Arc<dyn MigrationHost>,
    pub config: MigrationConfig,
}

/// The relocate signal plus the state of the call at that moment
#[derive(Clone)]
pub struct MigrationSignal {
    pub session_id: String,
    /// Node the call is leaving
    pub from_hostname: String,
    pub target: MigrationTarget,
    pub call_settings: CallSettings,
    pub publisher: Arc<dyn PeerConnection>,
}

pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// Events from the new node. Events that arrive before a stage asks for
/// them are kept until it does.
struct EventInbox {
    events: broadcast::Receiver<SfuEvent>,
    pending: VecDeque<SfuEvent>,
}

impl EventInbox {
    fn new(events: broadcast::Receiver<SfuEvent>) -> Self {
        Self {
            events,
            pending: VecDeque::new(),
        }
    }

    /// Wait for the first event matching `accept`. An SFU error event fails the wait.
    async fn wait_for(&mut self, accept: impl Fn(&SfuEvent) -> bool) -> Result<SfuEvent, MigrationError> {
        if let Some(index) = self.pending.iter().position(&accept) {
            if let Some(event) = self.pending.remove(index) {
                return Ok(event);
            }
        }
        loop {
            match self.events.recv().await {
                Ok(SfuEvent::Error { message }) => {
                    return Err(MigrationError::UnexpectedResponse(message));
                }
                Ok(event) if accept(&event) => return Ok(event),
                Ok(event) => {
                    debug!(event = event.name(), "Migration event buffered");
                    self.pending.push_back(event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Migration event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(MigrationError::Signaling("event stream closed".into()));
                }
            }
        }
    }
}

/// One migration attempt. Consumed by [`MigrationMachine::start`].
pub struct MigrationMachine {
    id: Uuid,
    environment: MigrationEnvironment,
    signal: MigrationSignal,
    slot: Arc<StageSlot>,
}

impl MigrationMachine {
    pub fn new(environment: MigrationEnvironment, signal: MigrationSignal) -> Self {
        Self {
            id: Uuid::new_v4(),
            environment,
            signal,
            slot: Arc::new(StageSlot::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn stage(&self) -> MigrationStage {
        self.slot.current()
    }

    /// Run the migration in the background; `on_completed` fires on success only
    pub fn start(self, on_completed: CompletionCallback) -> MigrationHandle {
        let id = self.id;
        let slot = self.slot.clone();
        let stages = slot.subscribe();
        let cancelled = CancellationToken::new();
        let task = tokio::spawn(self.run(on_completed, cancelled.clone()));
        MigrationHandle {
            id,
            slot,
            stages,
            cancelled,
            task,
        }
    }

    async fn run(self, on_completed: CompletionCallback, cancelled: CancellationToken) {
        let target = &self.signal.target;
        info!(
            from = %self.signal.from_hostname,
            to = %target.hostname,
            "Session migration started"
        );
        let signaling = self.environment.connector.connect_to(target);
        // Subscribe before connecting so the join response cannot be missed
        let mut inbox = EventInbox::new(signaling.events());
        let mut work = StageWork::default();
        let mut on_completed = Some(on_completed);
        let mut completed = false;

        let mut event = StageEvent::Advance;
        loop {
            if cancelled.is_cancelled() {
                break;
            }
            let stage = match self.slot.apply(event) {
                Ok(stage) => stage,
                Err(e) => {
                    warn!(error = %e, "Migration halted");
                    break;
                }
            };
            event = match stage {
                MigrationStage::Completed => {
                    info!(to = %target.hostname, "Session migration completed");
                    if let Some(callback) = on_completed.take() {
                        callback();
                    }
                    completed = true;
                    break;
                }
                MigrationStage::Error(_) => break,
                stage => tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => {
                        info!(stage = %stage, "Session migration abandoned");
                        break;
                    }
                    result = self.execute(&stage, &signaling, &mut inbox, &mut work) => match result {
                        Ok(event) => event,
                        Err(e) => StageEvent::Failed(e.to_string()),
                    },
                },
            };
        }

        if !completed && work.adopted.is_none() {
            signaling.disconnect().await;
        }
        // Dropping the inbox detaches from the node's event stream
        drop(inbox);
    }

    async fn execute(
        &self,
        stage: &MigrationStage,
        signaling: &Arc<dyn SignalingTransport>,
        inbox: &mut EventInbox,
        work: &mut StageWork,
    ) -> Result<StageEvent, MigrationError> {
        let environment = &self.environment;
        let signal = &self.signal;
        match stage {
            MigrationStage::Preparing => {
                signaling.connect().await?;
            }
            MigrationStage::SendJoinRequest => {
                let subscriber_sdp = self.join_offer(signaling).await?;
                signaling
                    .send(SfuRequest::Join(JoinRequest {
                        session_id: signal.session_id.clone(),
                        token: signal.target.token.clone(),
                        subscriber_sdp,
                        migrating_from: Some(signal.from_hostname.clone()),
                    }))
                    .await?;
                inbox
                    .wait_for(|event| matches!(event, SfuEvent::JoinResponse { .. }))
                    .await?;
            }
            MigrationStage::Joined => {
                environment.host.rebind_signaling(signaling.clone());
                signal.publisher.rebind(signaling.clone());
                work.adopted = Some(signaling.hostname());
            }
            MigrationStage::SetUpSubscriber => {
                environment.host.pause_subscriber();
                let subscriber = environment
                    .factory
                    .create(PeerRole::Subscriber, signaling.clone())
                    .await?;
                environment.host.replace_subscriber(subscriber).await;
                signaling
                    .send(SfuRequest::HealthCheck {
                        session_id: signal.session_id.clone(),
                    })
                    .await?;
            }
            MigrationStage::RestartIce => {
                let initial = signal
                    .publisher
                    .create_offer(OfferOptions { ice_restart: true })
                    .await?;
                let offer = SessionDescription {
                    kind: initial.kind,
                    sdp: rewrite_publisher_offer(&initial.sdp, &environment.config),
                };
                signal.publisher.set_local_description(offer.clone()).await?;
                work.publisher_offer = Some(offer);
            }
            MigrationStage::WaitingSubscriberOffer => {
                inbox
                    .wait_for(|event| matches!(event, SfuEvent::SubscriberOffer { .. }))
                    .await?;
                return Ok(StageEvent::SubscriberOffer);
            }
            MigrationStage::SetPublisher => {
                let offer = work
                    .publisher_offer
                    .as_ref()
                    .ok_or_else(|| MigrationError::UnexpectedResponse("no publisher offer".into()))?;
                let answer = signaling.set_publisher(&signal.session_id, offer).await?;
                work.publisher_answer = Some(answer);
            }
            MigrationStage::SetPublisherAnswer => {
                let answer = work
                    .publisher_answer
                    .take()
                    .ok_or_else(|| MigrationError::UnexpectedResponse("no publisher answer".into()))?;
                signal.publisher.set_remote_description(answer).await?;
            }
            MigrationStage::PublishLocalTracks => {
                if signal.call_settings.should_publish() {
                    signal.publisher.unpublish_all_tracks();
                    let tracks = environment.host.set_up_user_media().await?;
                    for track in tracks {
                        signal.publisher.add_track(track);
                    }
                } else {
                    debug!("Nothing to publish after migration");
                }
            }
            MigrationStage::Ready | MigrationStage::Completed | MigrationStage::Error(_) => {}
        }
        Ok(StageEvent::Advance)
    }

    /// Offer from a throwaway subscriber, closed right after use
    async fn join_offer(&self, signaling: &Arc<dyn SignalingTransport>) -> Result<String, MigrationError> {
        let temporary = self
            .environment
            .factory
            .create(PeerRole::Subscriber, signaling.clone())
            .await?;
        let offer = temporary.create_offer(OfferOptions::default()).await;
        temporary.close().await;
        Ok(offer?.sdp)
    }
}

#[derive(Default)]
struct StageWork {
    publisher_offer: Option<SessionDescription>,
    publisher_answer: Option<SessionDescription>,
    /// Set once the call switched over to the new node's signaling
    adopted: Option<String>,
}

/// Observes a running migration. Dropping the handle abandons it.
pub struct MigrationHandle {
    id: Uuid,
    slot: Arc<StageSlot>,
    stages: watch::Receiver<MigrationStage>,
    cancelled: CancellationToken,
    task: JoinHandle<()>,
}

impl MigrationHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn stage(&self) -> MigrationStage {
        self.stages.borrow().clone()
    }

    pub fn stages(&self) -> watch::Receiver<MigrationStage> {
        self.stages.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the migration completes or fails
    pub async fn wait(&mut self) -> MigrationStage {
        match self.stages.wait_for(MigrationStage::is_terminal).await {
            Ok(stage) => stage.clone(),
            Err(_) => self.slot.current(),
        }
    }

    /// Stop the migration wherever it is and mark it failed. A connection
    /// to the new node that was never adopted is closed by the run loop.
    pub fn abandon(&self) {
        if self.task.is_finished() || self.cancelled.is_cancelled() {
            return;
        }
        self.cancelled.cancel();
        let _ = self
            .slot
            .apply(StageEvent::Failed(MigrationError::Abandoned.to_string()));
    }
}

impl Drop for MigrationHandle {
    fn drop(&mut self) {
        self.abandon();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{LocalTrack, TrackKind};
    use crate::simulation::{
        wait_until, FailurePoint, HostCall, LoopbackSignaling, PeerCall, RecordingMigrationHost, SimulatedConnector,
        SimulatedPeerConnection, SimulatedPeerConnectionFactory,
    };

    struct Fixture {
        connector: Arc<SimulatedConnector>,
        factory: Arc<SimulatedPeerConnectionFactory>,
        host: Arc<RecordingMigrationHost>,
        publisher: Arc<SimulatedPeerConnection>,
        old_subscriber: Arc<SimulatedPeerConnection>,
    }

    impl Fixture {
        fn new() -> Self {
            let old_subscriber = SimulatedPeerConnection::new(PeerRole::Subscriber);
            let tracks = vec![
                LocalTrack {
                    id: "mic".into(),
                    kind: TrackKind::Audio,
                },
                LocalTrack {
                    id: "camera".into(),
                    kind: TrackKind::Video,
                },
            ];
            Self {
                connector: SimulatedConnector::new(),
                factory: SimulatedPeerConnectionFactory::new(),
                host: RecordingMigrationHost::new(Some(old_subscriber.clone()), tracks),
                publisher: SimulatedPeerConnection::new(PeerRole::Publisher),
                old_subscriber,
            }
        }

        fn node(&self) -> Arc<LoopbackSignaling> {
            self.connector.node("sfu-b")
        }

        fn machine(&self, call_settings: CallSettings) -> MigrationMachine {
            let environment = MigrationEnvironment {
                connector: self.connector.clone(),
                factory: self.factory.clone(),
                host: self.host.clone(),
                config: MigrationConfig::default(),
            };
            let signal = MigrationSignal {
                session_id: "session-1".into(),
                from_hostname: "sfu-a".into(),
                target: MigrationTarget {
                    hostname: "sfu-b".into(),
                    url: "wss://sfu-b/ws".into(),
                    token: "token-b".into(),
                },
                call_settings,
                publisher: self.publisher.clone(),
            };
            MigrationMachine::new(environment, signal)
        }
    }

    fn completion() -> (CompletionCallback, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            Box::new(move || {
                let _ = tx.send(true);
            }),
            rx,
        )
    }

    #[tokio::test]
    async fn test_full_migration_protocol() {
        let fixture = Fixture::new();
        let (callback, completed) = completion();
        let mut handle = fixture.machine(CallSettings::default()).start(callback);

        assert_eq!(handle.wait().await, MigrationStage::Completed);
        assert!(*completed.borrow());

        let node = fixture.node();
        let sent = node.sent();
        assert_eq!(sent.len(), 2);
        let SfuRequest::Join(join) = &sent[0] else {
            panic!("expected join request, got {:?}", sent[0]);
        };
        assert_eq!(join.token, "token-b");
        assert_eq!(join.migrating_from.as_deref(), Some("sfu-a"));
        assert!(matches!(sent[1], SfuRequest::HealthCheck { .. }));

        // Throwaway join subscriber is closed, the new subscriber stays open
        let created = fixture.factory.created();
        assert_eq!(created.len(), 2);
        assert!(created[0].is_closed());
        assert!(!created[1].is_closed());
        assert_eq!(created[1].signaling_hostname().as_deref(), Some("sfu-b"));
        assert!(fixture.old_subscriber.is_closed());

        assert_eq!(
            fixture.host.calls(),
            vec![
                HostCall::RebindSignaling("sfu-b".into()),
                HostCall::PauseSubscriber,
                HostCall::ReplaceSubscriber(PeerRole::Subscriber),
                HostCall::SetUpUserMedia,
            ]
        );

        let calls = fixture.publisher.calls();
        assert_eq!(calls[0], PeerCall::Rebind("sfu-b".into()));
        assert_eq!(calls[1], PeerCall::CreateOffer { ice_restart: true });
        let PeerCall::SetLocalDescription(local) = &calls[2] else {
            panic!("expected local description, got {:?}", calls[2]);
        };
        assert!(local.sdp.contains("useinbandfec=1;usedtx=1"));
        assert_eq!(node.publisher_offers(), vec![local.clone()]);
        assert!(matches!(calls[3], PeerCall::SetRemoteDescription(_)));
        assert_eq!(
            &calls[4..],
            &[
                PeerCall::UnpublishAllTracks,
                PeerCall::AddTrack("mic".into()),
                PeerCall::AddTrack("camera".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_waits_for_subscriber_offer() {
        let fixture = Fixture::new();
        fixture.node().hold_subscriber_offer(true);
        let (callback, _completed) = completion();
        let mut handle = fixture.machine(CallSettings::default()).start(callback);

        let mut stages = handle.stages();
        stages
            .wait_for(|stage| *stage == MigrationStage::WaitingSubscriberOffer)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(handle.stage(), MigrationStage::WaitingSubscriberOffer);
        assert!(fixture.node().publisher_offers().is_empty());

        fixture.node().send_subscriber_offer();
        assert_eq!(handle.wait().await, MigrationStage::Completed);
    }

    #[tokio::test]
    async fn test_publishing_skipped_when_not_required() {
        let fixture = Fixture::new();
        let settings = CallSettings {
            audio_on: false,
            video_on: false,
            ..CallSettings::default()
        };
        let (callback, completed) = completion();
        let mut handle = fixture.machine(settings).start(callback);

        assert_eq!(handle.wait().await, MigrationStage::Completed);
        assert!(*completed.borrow());
        assert!(!fixture.host.calls().contains(&HostCall::SetUpUserMedia));
        assert!(!fixture
            .publisher
            .calls()
            .contains(&PeerCall::UnpublishAllTracks));
    }

    #[tokio::test]
    async fn test_join_failure_leaves_session_untouched() {
        let fixture = Fixture::new();
        fixture.node().fail_at(FailurePoint::Join);
        let (callback, completed) = completion();
        let mut handle = fixture.machine(CallSettings::default()).start(callback);

        let stage = handle.wait().await;
        assert!(matches!(stage, MigrationStage::Error(_)));
        assert!(!*completed.borrow());
        assert!(fixture.publisher.calls().is_empty());
        assert!(fixture.old_subscriber.calls().is_empty());
        assert!(fixture.host.calls().is_empty());
        assert!(!fixture.node().is_connected());
    }

    #[tokio::test]
    async fn test_sfu_error_event_fails_join() {
        let fixture = Fixture::new();
        fixture.node().fail_at(FailurePoint::RejectJoin);
        let (callback, _completed) = completion();
        let mut handle = fixture.machine(CallSettings::default()).start(callback);

        assert_eq!(
            handle.wait().await,
            MigrationStage::Error("Unexpected response: join rejected".into())
        );
    }

    #[tokio::test]
    async fn test_set_publisher_failure_halts_without_rollback() {
        let fixture = Fixture::new();
        fixture.node().fail_at(FailurePoint::SetPublisher);
        let (callback, completed) = completion();
        let mut handle = fixture.machine(CallSettings::default()).start(callback);

        assert!(matches!(handle.wait().await, MigrationStage::Error(_)));
        assert!(!*completed.borrow());

        let calls = fixture.publisher.calls();
        assert_eq!(calls.len(), 3);
        assert!(!calls.contains(&PeerCall::Close));
        assert!(fixture.node().is_connected());
    }

    #[tokio::test]
    async fn test_abandon_marks_error() {
        let fixture = Fixture::new();
        fixture.node().hold_subscriber_offer(true);
        let (callback, completed) = completion();
        let mut handle = fixture.machine(CallSettings::default()).start(callback);
        let mut stages = handle.stages();
        stages
            .wait_for(|stage| *stage == MigrationStage::WaitingSubscriberOffer)
            .await
            .unwrap();

        handle.abandon();
        assert_eq!(
            handle.wait().await,
            MigrationStage::Error(MigrationError::Abandoned.to_string())
        );
        fixture.node().send_subscriber_offer();
        tokio::task::yield_now().await;
        assert!(!*completed.borrow());
    }

    #[tokio::test]
    async fn test_abandon_before_join_disconnects_new_node() {
        let fixture = Fixture::new();
        fixture.node().fail_at(FailurePoint::StallJoin);
        let (callback, completed) = completion();
        let mut handle = fixture.machine(CallSettings::default()).start(callback);
        wait_until(|| !fixture.node().sent().is_empty()).await;
        assert_eq!(handle.stage(), MigrationStage::SendJoinRequest);
        assert!(fixture.node().is_connected());

        handle.abandon();
        assert_eq!(
            handle.wait().await,
            MigrationStage::Error(MigrationError::Abandoned.to_string())
        );
        wait_until(|| handle.is_finished()).await;
        assert!(!fixture.node().is_connected());
        assert!(!*completed.borrow());
        assert!(fixture.host.calls().is_empty());
    }
}
