//! Binding between store actions and the hardware audio module
//!
//! The binding strongly owns the installed module. State only carries a
//! weak [`AudioModuleHandle`](crate::audio::AudioModuleHandle), so nothing
//! outside this middleware can drive the hardware.

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Middleware;
use crate::audio::action::Action;
use crate::audio::device::{AudioDeviceModule, HardwareAudioModule};
use crate::audio::state::AudioSessionState;
use crate::audio::store::Dispatcher;

pub struct HardwareAudioBinding {
    dispatcher: Dispatcher,
    module: Mutex<Option<AudioDeviceModule>>,
    feedback: Mutex<Option<CancellationToken>>,
}

impl HardwareAudioBinding {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            module: Mutex::new(None),
            feedback: Mutex::new(None),
        }
    }

    /// Id of the module currently owned by the binding
    pub fn installed_module(&self) -> Option<uuid::Uuid> {
        self.module.lock().as_ref().map(|m| m.id())
    }

    fn install(&self, state: &AudioSessionState, next: Option<AudioDeviceModule>) -> Vec<Action> {
        let mut slot = self.module.lock();
        if slot.as_ref().map(|m| m.id()) == next.as_ref().map(|m| m.id()) {
            return Vec::new();
        }

        if let Some(token) = self.feedback.lock().take() {
            token.cancel();
        }

        if let Some(previous) = slot.take() {
            if let Err(e) = previous.hardware().set_recording(false) {
                warn!(module = %previous.id(), error = %e, "Failed to stop outgoing audio module");
            }
            info!(module = %previous.id(), "Released audio device module");
        }

        let Some(next) = next else {
            return Vec::new();
        };

        let hardware = next.hardware();
        if let Err(e) = hardware.set_muted(state.is_microphone_muted) {
            warn!(module = %next.id(), error = %e, "Failed to apply mute to new audio module");
        }
        if let Err(e) = hardware.set_recording_always_prepared_mode(true) {
            warn!(module = %next.id(), error = %e, "Failed to prepare recording on new audio module");
        }

        if state.is_recording && !state.is_interrupted && !hardware.is_recording() {
            self.toggle_recording(&next, true);
        }

        *self.feedback.lock() = Some(self.spawn_feedback(&next));
        info!(module = %next.id(), "Installed audio device module");

        let further = vec![
            Action::HardwareRecordingChanged(hardware.is_recording()),
            Action::SetStereoPlayoutAvailable(hardware.is_stereo_playout_available()),
        ];
        *slot = Some(next);
        further
    }

    /// Forward hardware-originated changes back into the store
    fn spawn_feedback(&self, module: &AudioDeviceModule) -> CancellationToken {
        let token = CancellationToken::new();
        let hardware = module.hardware();
        let mut recording = hardware.recording_updates();
        let mut muted = hardware.microphone_muted_updates();
        let mut stereo = hardware.stereo_playout_available_updates();
        recording.borrow_and_update();
        muted.borrow_and_update();
        stereo.borrow_and_update();

        let dispatcher = self.dispatcher.clone();
        let cancelled = token.clone();
        let id = module.id();

        tokio::spawn(async move {
            loop {
                let action = tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    changed = recording.changed() => match changed {
                        Ok(()) => Action::HardwareRecordingChanged(*recording.borrow_and_update()),
                        Err(_) => break,
                    },
                    changed = muted.changed() => match changed {
                        Ok(()) => Action::SetMicrophoneMuted(*muted.borrow_and_update()),
                        Err(_) => break,
                    },
                    changed = stereo.changed() => match changed {
                        Ok(()) => Action::SetStereoPlayoutAvailable(*stereo.borrow_and_update()),
                        Err(_) => break,
                    },
                };
                if cancelled.is_cancelled() || !dispatcher.dispatch(action) {
                    break;
                }
            }
            debug!(module = %id, "Audio module feedback stopped");
        });

        token
    }

    fn toggle_recording(&self, module: &AudioDeviceModule, enabled: bool) {
        match module.hardware().set_recording(enabled) {
            Ok(()) => debug!(module = %module.id(), enabled, "Toggled hardware recording"),
            Err(e) => warn!(module = %module.id(), enabled, error = %e, "Hardware recording toggle failed"),
        }
    }

    fn apply_stereo(&self, hardware: &dyn HardwareAudioModule, state: &AudioSessionState) -> Vec<Action> {
        if !state.stereo.available {
            return vec![Action::SetStereoPlayoutEnabled(false)];
        }
        let preferred = state.stereo.preferred;
        match hardware.set_stereo_playout_enabled(preferred) {
            Ok(()) => vec![Action::SetStereoPlayoutEnabled(preferred)],
            Err(e) => {
                warn!(preferred, error = %e, "Stereo playout update failed");
                vec![Action::SetStereoPlayoutEnabled(false)]
            }
        }
    }
}

impl Middleware for HardwareAudioBinding {
    fn apply(&self, state: &AudioSessionState, action: &Action) -> Vec<Action> {
        if let Action::SetAudioDeviceModule(next) = action {
            return self.install(state, next.clone());
        }

        let Some(module) = self.module.lock().clone() else {
            return Vec::new();
        };
        let hardware = module.hardware();

        match action {
            Action::SetRecording(enabled) => {
                if hardware.is_recording() != *enabled {
                    self.toggle_recording(&module, *enabled);
                }
            }
            Action::SetInterrupted(_) if !(state.is_active && state.is_recording) => {}
            Action::SetInterrupted(true) => {
                if hardware.is_recording() {
                    self.toggle_recording(&module, false);
                }
            }
            Action::SetInterrupted(false) => {
                // Restart the module
                if hardware.is_recording() {
                    self.toggle_recording(&module, false);
                }
                self.toggle_recording(&module, true);
            }
            Action::SetMicrophoneMuted(muted) => {
                if state.is_recording {
                    if let Err(e) = hardware.set_muted(*muted) {
                        warn!(module = %module.id(), muted, error = %e, "Hardware mute toggle failed");
                    }
                }
            }
            Action::ApplyStereoPlayout => return self.apply_stereo(hardware, state),
            _ => {}
        }

        Vec::new()
    }
}

impl Drop for HardwareAudioBinding {
    fn drop(&mut self) {
        if let Some(token) = self.feedback.lock().take() {
            token.cancel();
        }
    }
}
