//! Call-scoped owner of the audio store and its effects
//!
//! Activating a call attaches the effects and a policy loop that turns call
//! settings and capabilities into OS configuration. Deactivating detaches
//! all of them before the hardware module is released.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::action::{Action, ActionBatch};
use super::device::AudioDeviceModule;
use super::effects::{
    ActiveCallAudio, ActiveCallEffect, EffectHandle, EffectSet, InterruptionEffect, RouteChangeEffect,
    StereoPlayoutEffect, SystemMirrorEffect,
};
use super::middleware::{HardwareAudioBinding, SessionConfigurationMiddleware};
use super::policy::{AudioSessionPolicy, DefaultAudioSessionPolicy, PolicyConfiguration};
use super::state::{AudioSessionState, SessionConfiguration};
use super::store::{AudioStore, Dispatcher};
use super::system::{RouteSnapshotSource, SystemAudioSession};
use crate::config::AudioConfig;
use crate::error::Result;
use crate::protocol::{CallSettings, OwnCapabilities, OwnCapability};

/// Receives route-driven speaker changes the call settings should adopt
pub trait AudioSessionDelegate: Send + Sync {
    fn did_update_speaker_on(&self, speaker_on: bool);
}

/// Inputs of an active call
pub struct CallContext {
    pub call_settings: watch::Receiver<CallSettings>,
    pub capabilities: watch::Receiver<OwnCapabilities>,
    pub active_call: watch::Receiver<Option<ActiveCallAudio>>,
    pub delegate: Arc<dyn AudioSessionDelegate>,
}

const POLICY_EFFECT: &str = "call-policy";

pub struct CallAudioSession {
    store: AudioStore,
    system: Arc<dyn SystemAudioSession>,
    snapshots: RouteSnapshotSource,
    policy: watch::Sender<Arc<dyn AudioSessionPolicy>>,
    effects: EffectSet,
}

impl CallAudioSession {
    /// Build the store from the OS snapshot and install the standard middleware
    pub fn new(system: Arc<dyn SystemAudioSession>, config: &AudioConfig) -> Self {
        let snapshot = system.snapshot();
        let session_configuration = if snapshot.configuration.is_valid() {
            snapshot.configuration
        } else {
            warn!(category = %snapshot.configuration.category, "OS reported an invalid configuration");
            SessionConfiguration::default()
        };

        let store = AudioStore::new(AudioSessionState {
            is_active: snapshot.is_active,
            has_recording_permission: snapshot.has_recording_permission,
            current_route: snapshot.route.clone(),
            session_configuration,
            ..AudioSessionState::default()
        });
        store.add_middleware(Arc::new(SessionConfigurationMiddleware::new(system.clone())));
        store.add_middleware(Arc::new(HardwareAudioBinding::new(store.dispatcher())));

        if !session_configuration.is_call_configuration() {
            store.dispatch(Action::SetSessionConfiguration(SessionConfiguration::call_default()));
        }

        let default_policy: Arc<dyn AudioSessionPolicy> = Arc::new(DefaultAudioSessionPolicy);
        let (policy, _) = watch::channel(default_policy);

        Self {
            snapshots: RouteSnapshotSource::new(system.clone(), config.system_poll_interval()),
            store,
            system,
            policy,
            effects: EffectSet::new(),
        }
    }

    pub fn store(&self) -> &AudioStore {
        &self.store
    }

    pub fn current_route_is_external(&self) -> bool {
        self.store.state().current_route.is_external()
    }

    pub fn attached_effects(&self) -> Vec<&'static str> {
        self.effects.names()
    }

    /// Install (or clear) the hardware module owned by the store
    pub async fn set_audio_device_module(&self, module: Option<AudioDeviceModule>) -> Result<()> {
        self.store.dispatch_async(Action::SetAudioDeviceModule(module)).await
    }

    pub fn activate(&self, context: CallContext) {
        self.effects.detach_all();
        info!("Activating call audio session");

        let token = CancellationToken::new();
        let store = &self.store;
        let system = &self.system;

        self.effects.replace(InterruptionEffect::NAME, || {
            InterruptionEffect::attach(store, system, token.child_token())
        });
        self.effects.replace(RouteChangeEffect::NAME, || {
            RouteChangeEffect::attach(store, system, token.child_token())
        });
        self.effects.replace(SystemMirrorEffect::NAME, || {
            SystemMirrorEffect::attach(store, &self.snapshots, token.child_token())
        });
        self.effects.replace(StereoPlayoutEffect::NAME, || {
            StereoPlayoutEffect::attach(store, token.child_token())
        });
        self.effects.replace(ActiveCallEffect::NAME, || {
            ActiveCallEffect::attach(store, context.active_call, token.child_token())
        });

        let policy_loop = PolicyLoop {
            dispatcher: store.dispatcher(),
            settings: context.call_settings,
            capabilities: context.capabilities,
            policy: self.policy.subscribe(),
            states: store.subscribe(),
            delegate: context.delegate,
            applied: None,
        };
        let policy_token = token.child_token();
        self.effects.replace(POLICY_EFFECT, || {
            EffectHandle::spawn(POLICY_EFFECT, policy_token.clone(), policy_loop.run(policy_token))
        });
    }

    /// Detach every effect, then deactivate the session and release the module
    pub async fn deactivate(&self) -> Result<()> {
        self.effects.detach_all();
        info!("Deactivating call audio session");
        self.store
            .dispatch_async(
                ActionBatch::new(Action::SetActive(false)).then(Action::SetAudioDeviceModule(None)),
            )
            .await
    }

    /// Swap the policy; an active call re-evaluates immediately
    pub fn did_update_policy(&self, policy: Arc<dyn AudioSessionPolicy>) {
        debug!(?policy, "Audio session policy updated");
        self.policy.send_replace(policy);
    }
}

impl Drop for CallAudioSession {
    fn drop(&mut self) {
        self.effects.detach_all();
    }
}

/// What the policy loop last dispatched
#[derive(Debug, Clone, Copy, PartialEq)]
struct Applied {
    configuration: PolicyConfiguration,
    should_record: bool,
    muted: bool,
}

impl Applied {
    fn actions(&self) -> Option<ActionBatch> {
        let c = self.configuration;
        let mut actions = Vec::new();
        if c.is_active {
            actions.push(Action::SetSessionConfiguration(c.session));
            if let Some(port) = c.override_output_port {
                actions.push(Action::SetOverrideOutputPort(port));
            }
        }
        actions.push(Action::SetActive(c.is_active));
        actions.push(Action::SetRecording(self.should_record));
        actions.push(Action::SetMicrophoneMuted(self.muted));
        if c.prefers_stereo_playout {
            actions.push(Action::SetStereoPlayoutPreferred(true));
        }
        ActionBatch::from_vec(actions)
    }
}

struct PolicyLoop {
    dispatcher: Dispatcher,
    settings: watch::Receiver<CallSettings>,
    capabilities: watch::Receiver<OwnCapabilities>,
    policy: watch::Receiver<Arc<dyn AudioSessionPolicy>>,
    states: watch::Receiver<AudioSessionState>,
    delegate: Arc<dyn AudioSessionDelegate>,
    applied: Option<Applied>,
}

impl PolicyLoop {
    async fn run(mut self, cancelled: CancellationToken) {
        let initial = self.states.borrow_and_update().clone();
        let mut last_route = initial.current_route;
        let mut last_configuration = initial.session_configuration;
        self.settings.borrow_and_update();
        self.capabilities.borrow_and_update();
        self.policy.borrow_and_update();
        self.evaluate(false);

        loop {
            tokio::select! {
                _ = cancelled.cancelled() => break,
                changed = self.settings.changed() => {
                    if changed.is_err() { break; }
                    self.settings.borrow_and_update();
                    self.evaluate(false);
                }
                changed = self.capabilities.changed() => {
                    if changed.is_err() { break; }
                    self.capabilities.borrow_and_update();
                    self.evaluate(false);
                }
                changed = self.policy.changed() => {
                    if changed.is_err() { break; }
                    self.policy.borrow_and_update();
                    self.evaluate(false);
                }
                changed = self.states.changed() => {
                    if changed.is_err() { break; }
                    let state = self.states.borrow_and_update().clone();
                    if state.current_route != last_route {
                        last_route = state.current_route.clone();
                        self.did_change_route(&state);
                    }
                    if state.session_configuration != last_configuration {
                        last_configuration = state.session_configuration;
                        self.did_change_configuration(&state);
                    }
                }
            }
        }
        debug!("Call policy loop stopped");
    }

    fn evaluate(&mut self, force: bool) {
        let settings = *self.settings.borrow();
        let capabilities = self.capabilities.borrow().clone();
        let policy = self.policy.borrow().clone();

        let configuration = policy.configuration(&settings, &capabilities);
        let applied = Applied {
            configuration,
            should_record: configuration.is_active
                && settings.audio_on
                && capabilities.contains(&OwnCapability::SendAudio),
            muted: !settings.audio_on,
        };
        if !force && self.applied == Some(applied) {
            return;
        }
        if !configuration.session.is_valid() {
            warn!(?policy, category = %configuration.session.category, mode = %configuration.session.mode, "Policy produced an invalid configuration");
        }

        if let Some(batch) = applied.actions() {
            self.dispatcher.dispatch(batch);
        }
        self.applied = Some(applied);
    }

    fn did_change_route(&mut self, state: &AudioSessionState) {
        let speaker_on = self.settings.borrow().speaker_on;
        let route_speaker = state.current_route.is_speaker();
        if route_speaker == speaker_on {
            debug!(reason = ?state.current_route.reason, "Route matches call settings, reapplying policy");
            self.evaluate(true);
        } else {
            debug!(route_speaker, "Route diverged from call settings");
            self.delegate.did_update_speaker_on(route_speaker);
        }
    }

    /// The OS may drop category options behind our back; put them back
    fn did_change_configuration(&mut self, state: &AudioSessionState) {
        let Some(applied) = self.applied else {
            return;
        };
        let intended = applied.configuration.session;
        let current = state.session_configuration;
        if applied.configuration.is_active
            && intended.is_valid()
            && current.category == intended.category
            && current.mode == intended.mode
            && current.options != intended.options
        {
            info!(current = ?current.options, intended = ?intended.options, "Reapplying category options cleared by the OS");
            self.dispatcher.dispatch(Action::SetSessionConfiguration(intended));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::policy::LivestreamAudioSessionPolicy;
    use crate::audio::state::{AudioCategory, AudioMode, CategoryOptions, RouteChangeReason, RouteDescriptor};
    use crate::simulation::{wait_until, SimulatedAudioModule, SimulatedSystemAudio, SystemCall};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingPolicy {
        queries: AtomicUsize,
    }

    impl AudioSessionPolicy for CountingPolicy {
        fn configuration(&self, settings: &CallSettings, capabilities: &OwnCapabilities) -> PolicyConfiguration {
            self.queries.fetch_add(1, Ordering::SeqCst);
            DefaultAudioSessionPolicy.configuration(settings, capabilities)
        }
    }

    impl CountingPolicy {
        fn count(&self) -> usize {
            self.queries.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingDelegate {
        updates: Mutex<Vec<bool>>,
    }

    impl AudioSessionDelegate for RecordingDelegate {
        fn did_update_speaker_on(&self, speaker_on: bool) {
            self.updates.lock().push(speaker_on);
        }
    }

    struct Harness {
        session: CallAudioSession,
        system: Arc<SimulatedSystemAudio>,
        policy: Arc<CountingPolicy>,
        delegate: Arc<RecordingDelegate>,
        _settings: watch::Sender<CallSettings>,
        _capabilities: watch::Sender<OwnCapabilities>,
        _active_call: watch::Sender<Option<ActiveCallAudio>>,
    }

    fn activate(settings: CallSettings, initial: SessionConfiguration) -> Harness {
        let system = SimulatedSystemAudio::new(initial);
        let session = CallAudioSession::new(system.clone(), &AudioConfig::default());
        let policy = Arc::new(CountingPolicy::default());
        session.did_update_policy(policy.clone());

        let delegate = Arc::new(RecordingDelegate::default());
        let (settings_tx, settings_rx) = watch::channel(settings);
        let (caps_tx, caps_rx) = watch::channel([OwnCapability::SendAudio].into_iter().collect());
        let (call_tx, call_rx) = watch::channel(None);
        session.activate(CallContext {
            call_settings: settings_rx,
            capabilities: caps_rx,
            active_call: call_rx,
            delegate: delegate.clone(),
        });

        Harness {
            session,
            system,
            policy,
            delegate,
            _settings: settings_tx,
            _capabilities: caps_tx,
            _active_call: call_tx,
        }
    }

    fn speaker_settings() -> CallSettings {
        CallSettings {
            speaker_on: true,
            ..CallSettings::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_session_moves_to_call_configuration() {
        let system = SimulatedSystemAudio::new(SessionConfiguration::default());
        let session = CallAudioSession::new(system.clone(), &AudioConfig::default());
        let store = session.store().clone();

        wait_until(|| store.state().session_configuration == SessionConfiguration::call_default()).await;
        assert_eq!(
            system.calls(),
            vec![SystemCall::SetConfiguration(SessionConfiguration::call_default())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_activation_applies_policy() {
        let harness = activate(CallSettings::default(), SessionConfiguration::call_default());
        let store = harness.session.store().clone();

        wait_until(|| harness.policy.count() == 1).await;
        wait_until(|| store.state().is_active).await;

        let state = store.state();
        assert_eq!(state.session_configuration.options, CategoryOptions::CALL);
        assert!(state.is_recording);
        assert!(!state.is_microphone_muted);
        assert_eq!(
            harness.session.attached_effects(),
            vec!["active-call", "call-policy", "interruption", "route-change", "stereo-playout", "system-mirror"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_matching_speaker_route_reapplies_policy() {
        let harness = activate(speaker_settings(), SessionConfiguration::call_default());
        wait_until(|| harness.policy.count() == 1).await;

        harness
            .session
            .store()
            .dispatch(Action::SetCurrentRoute(RouteDescriptor::speaker(RouteChangeReason::OldDeviceUnavailable)));

        wait_until(|| harness.policy.count() == 2).await;
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        harness
            .session
            .store()
            .dispatch_async(Action::SetHasRecordingPermission(true))
            .await
            .unwrap();
        assert_eq!(harness.policy.count(), 2);
        assert!(harness.delegate.updates.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_diverging_route_notifies_delegate() {
        let harness = activate(CallSettings::default(), SessionConfiguration::call_default());
        wait_until(|| harness.policy.count() == 1).await;

        harness.system.simulate_route_change(RouteDescriptor::speaker(RouteChangeReason::Override));

        wait_until(|| !harness.delegate.updates.lock().is_empty()).await;
        assert_eq!(*harness.delegate.updates.lock(), vec![true]);
        assert_eq!(harness.policy.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleared_options_are_reapplied() {
        let harness = activate(CallSettings::default(), SessionConfiguration::call_default());
        let store = harness.session.store().clone();
        wait_until(|| store.state().session_configuration.options == CategoryOptions::CALL).await;
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;

        let intended = store.state().session_configuration;
        let applied_before = harness
            .system
            .calls()
            .into_iter()
            .filter(|c| *c == SystemCall::SetConfiguration(intended))
            .count();

        harness.system.simulate_os_configuration(SessionConfiguration {
            options: CategoryOptions::empty(),
            ..intended
        });

        wait_until(|| {
            harness
                .system
                .calls()
                .into_iter()
                .filter(|c| *c == SystemCall::SetConfiguration(intended))
                .count()
                > applied_before
        })
        .await;
        wait_until(|| store.state().session_configuration == intended).await;
        assert_eq!(harness.policy.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_livestream_policy_prefers_stereo() {
        let harness = activate(CallSettings::default(), SessionConfiguration::call_default());
        let store = harness.session.store().clone();
        harness.session.did_update_policy(Arc::new(LivestreamAudioSessionPolicy));

        wait_until(|| store.state().stereo.preferred).await;
        assert_eq!(store.state().session_configuration.mode, AudioMode::Default);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_detaches_effects_and_releases_module() {
        let harness = activate(CallSettings::default(), SessionConfiguration::call_default());
        let store = harness.session.store().clone();
        let hardware = SimulatedAudioModule::new();
        harness
            .session
            .set_audio_device_module(Some(AudioDeviceModule::new(hardware.clone())))
            .await
            .unwrap();
        wait_until(|| store.state().is_active).await;

        harness.session.deactivate().await.unwrap();

        let state = store.state();
        assert!(!state.is_active);
        assert!(state.audio_device_module.is_none());
        assert!(harness.session.attached_effects().is_empty());
        assert_eq!(hardware.recording_calls().last(), Some(&false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_snapshot_seeds_route() {
        let system = SimulatedSystemAudio::new(SessionConfiguration::new(
            AudioCategory::PlayAndRecord,
            AudioMode::VideoChat,
            CategoryOptions::CALL,
        ));
        system.simulate_route_change(RouteDescriptor::receiver(RouteChangeReason::Unknown));
        let session = CallAudioSession::new(system.clone(), &AudioConfig::default());

        assert!(session.store().state().current_route.is_receiver());
        assert!(!session.current_route_is_external());
        assert!(system.calls().is_empty());
    }
}
