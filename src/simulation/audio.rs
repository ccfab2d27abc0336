//! Simulated hardware audio module and OS audio session

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

use crate::audio::device::HardwareAudioModule;
use crate::audio::state::{PortOverride, RouteDescriptor, SessionConfiguration};
use crate::audio::system::{SystemAudioEvent, SystemAudioSession, SystemAudioSnapshot};
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::error::HardwareError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleCall {
    SetRecording(bool),
    SetMuted(bool),
    SetStereoPlayoutEnabled(bool),
    SetRecordingAlwaysPreparedMode(bool),
}

fn set_flag(sender: &watch::Sender<bool>, value: bool) {
    sender.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    });
}

pub struct SimulatedAudioModule {
    recording: watch::Sender<bool>,
    muted: watch::Sender<bool>,
    stereo_available: watch::Sender<bool>,
    calls: Mutex<Vec<ModuleCall>>,
    fail_stereo: AtomicBool,
}

impl SimulatedAudioModule {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            recording: watch::channel(false).0,
            muted: watch::channel(false).0,
            stereo_available: watch::channel(false).0,
            calls: Mutex::new(Vec::new()),
            fail_stereo: AtomicBool::new(false),
        })
    }

    pub fn calls(&self) -> Vec<ModuleCall> {
        self.calls.lock().clone()
    }

    /// Arguments of every `set_recording` call, in order
    pub fn recording_calls(&self) -> Vec<bool> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                ModuleCall::SetRecording(enabled) => Some(*enabled),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Hardware-side recording change, e.g. the OS stopping capture
    pub fn simulate_recording(&self, recording: bool) {
        set_flag(&self.recording, recording);
    }

    pub fn simulate_muted(&self, muted: bool) {
        set_flag(&self.muted, muted);
    }

    pub fn simulate_stereo_available(&self, available: bool) {
        set_flag(&self.stereo_available, available);
    }

    pub fn fail_stereo(&self, fail: bool) {
        self.fail_stereo.store(fail, Ordering::SeqCst);
    }
}

impl HardwareAudioModule for SimulatedAudioModule {
    fn is_recording(&self) -> bool {
        *self.recording.borrow()
    }

    fn is_microphone_muted(&self) -> bool {
        *self.muted.borrow()
    }

    fn is_stereo_playout_available(&self) -> bool {
        *self.stereo_available.borrow()
    }

    fn recording_updates(&self) -> watch::Receiver<bool> {
        self.recording.subscribe()
    }

    fn microphone_muted_updates(&self) -> watch::Receiver<bool> {
        self.muted.subscribe()
    }

    fn stereo_playout_available_updates(&self) -> watch::Receiver<bool> {
        self.stereo_available.subscribe()
    }

    fn set_recording(&self, enabled: bool) -> Result<(), HardwareError> {
        self.calls.lock().push(ModuleCall::SetRecording(enabled));
        set_flag(&self.recording, enabled);
        Ok(())
    }

    fn set_muted(&self, muted: bool) -> Result<(), HardwareError> {
        self.calls.lock().push(ModuleCall::SetMuted(muted));
        set_flag(&self.muted, muted);
        Ok(())
    }

    fn set_stereo_playout_enabled(&self, enabled: bool) -> Result<(), HardwareError> {
        self.calls.lock().push(ModuleCall::SetStereoPlayoutEnabled(enabled));
        if self.fail_stereo.load(Ordering::SeqCst) {
            return Err(HardwareError::Stereo("playout device busy".into()));
        }
        Ok(())
    }

    fn set_recording_always_prepared_mode(&self, enabled: bool) -> Result<(), HardwareError> {
        self.calls
            .lock()
            .push(ModuleCall::SetRecordingAlwaysPreparedMode(enabled));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SystemCall {
    SetConfiguration(SessionConfiguration),
    SetActive(bool),
    OverrideOutputPort(PortOverride),
}

pub struct SimulatedSystemAudio {
    snapshot: Mutex<SystemAudioSnapshot>,
    events: broadcast::Sender<SystemAudioEvent>,
    calls: Mutex<Vec<SystemCall>>,
    reject_configuration: AtomicBool,
}

impl SimulatedSystemAudio {
    pub fn new(configuration: SessionConfiguration) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            snapshot: Mutex::new(SystemAudioSnapshot {
                configuration,
                has_recording_permission: true,
                ..SystemAudioSnapshot::default()
            }),
            events,
            calls: Mutex::new(Vec::new()),
            reject_configuration: AtomicBool::new(false),
        })
    }

    pub fn calls(&self) -> Vec<SystemCall> {
        self.calls.lock().clone()
    }

    pub fn reject_configuration(&self, reject: bool) {
        self.reject_configuration.store(reject, Ordering::SeqCst);
    }

    /// Another process reconfigured the session
    pub fn simulate_os_configuration(&self, configuration: SessionConfiguration) {
        self.snapshot.lock().configuration = configuration;
    }

    pub fn simulate_route_change(&self, route: RouteDescriptor) {
        self.snapshot.lock().route = route.clone();
        let _ = self.events.send(SystemAudioEvent::RouteChanged { route });
    }

    pub fn begin_interruption(&self) {
        let _ = self.events.send(SystemAudioEvent::InterruptionBegan);
    }

    pub fn end_interruption(&self, should_resume: bool) {
        let _ = self.events.send(SystemAudioEvent::InterruptionEnded { should_resume });
    }
}

impl SystemAudioSession for SimulatedSystemAudio {
    fn snapshot(&self) -> SystemAudioSnapshot {
        self.snapshot.lock().clone()
    }

    fn events(&self) -> broadcast::Receiver<SystemAudioEvent> {
        self.events.subscribe()
    }

    fn set_configuration(&self, configuration: &SessionConfiguration) -> Result<(), HardwareError> {
        self.calls
            .lock()
            .push(SystemCall::SetConfiguration(*configuration));
        if self.reject_configuration.load(Ordering::SeqCst) {
            return Err(HardwareError::SessionConfiguration("simulated rejection".into()));
        }
        self.snapshot.lock().configuration = *configuration;
        Ok(())
    }

    fn set_active(&self, active: bool) -> Result<(), HardwareError> {
        self.calls.lock().push(SystemCall::SetActive(active));
        self.snapshot.lock().is_active = active;
        Ok(())
    }

    fn override_output_port(&self, port: PortOverride) -> Result<(), HardwareError> {
        self.calls.lock().push(SystemCall::OverrideOutputPort(port));
        Ok(())
    }
}
