//! Pure state transitions for the audio session store

use super::action::Action;
use super::state::{AudioSessionState, SessionConfiguration};
use crate::error::ConfigurationError;

/// Compute the state that follows `action`.
///
/// Configuration changes are validated against the allow-list; a rejected
/// action leaves the caller's state untouched.
pub fn reduce(
    state: &AudioSessionState,
    action: &Action,
) -> Result<AudioSessionState, ConfigurationError> {
    let mut next = state.clone();

    match action {
        Action::SetActive(value) => next.is_active = *value,
        Action::SetInterrupted(value) => next.is_interrupted = *value,
        Action::SetRecording(value) => next.is_recording = *value,
        Action::HardwareRecordingChanged(value) => next.hardware_recording = *value,
        Action::SetMicrophoneMuted(value) => next.is_microphone_muted = *value,
        Action::SetHasRecordingPermission(value) => next.has_recording_permission = *value,
        Action::SetAudioDeviceModule(module) => {
            next.audio_device_module = module.as_ref().map(|m| m.handle());
            if module.is_none() {
                next.hardware_recording = false;
            }
        }
        Action::SetCurrentRoute(route) => next.current_route = route.clone(),
        Action::SetSessionConfiguration(config) | Action::SystemSetConfiguration(config) => {
            next.session_configuration = checked(*config)?;
        }
        Action::SetOverrideOutputPort(port) => next.override_output_port = *port,
        Action::SystemSetCategory(category) => {
            next.session_configuration = checked(SessionConfiguration {
                category: *category,
                ..state.session_configuration
            })?;
        }
        Action::SystemSetMode(mode) => {
            next.session_configuration = checked(SessionConfiguration {
                mode: *mode,
                ..state.session_configuration
            })?;
        }
        Action::SystemSetCategoryOptions(options) => {
            next.session_configuration = checked(SessionConfiguration {
                options: *options,
                ..state.session_configuration
            })?;
        }
        Action::SetStereoPlayoutPreferred(value) => next.stereo.preferred = *value,
        Action::SetStereoPlayoutAvailable(value) => next.stereo.available = *value,
        Action::ApplyStereoPlayout => {}
        Action::SetStereoPlayoutEnabled(value) => next.stereo.enabled = *value,
    }

    Ok(next)
}

fn checked(config: SessionConfiguration) -> Result<SessionConfiguration, ConfigurationError> {
    config.validate()?;
    Ok(config)
}
