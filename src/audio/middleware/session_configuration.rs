//! Pushes intended session configuration and activation to the OS

use std::sync::Arc;

use tracing::{debug, warn};

use super::Middleware;
use crate::audio::action::Action;
use crate::audio::state::{AudioCategory, AudioSessionState, CategoryOptions, PortOverride};
use crate::audio::system::SystemAudioSession;

pub struct SessionConfigurationMiddleware {
    system: Arc<dyn SystemAudioSession>,
}

impl SessionConfigurationMiddleware {
    pub fn new(system: Arc<dyn SystemAudioSession>) -> Self {
        Self { system }
    }

    /// Outside playAndRecord the OS has no port override; the speaker is
    /// selected through the defaultToSpeaker option instead.
    fn override_port(&self, state: &AudioSessionState, port: PortOverride) -> Vec<Action> {
        let current = state.session_configuration;
        if current.category == AudioCategory::PlayAndRecord {
            if let Err(e) = self.system.override_output_port(port) {
                warn!(?port, error = %e, "Output port override failed");
            }
            return Vec::new();
        }

        let mut options = current.options;
        options.set(CategoryOptions::DEFAULT_TO_SPEAKER, port == PortOverride::Speaker);
        if options == current.options {
            return Vec::new();
        }

        let mut next = current;
        next.options = options;
        if next.is_valid() {
            vec![Action::SetSessionConfiguration(next)]
        } else {
            debug!(category = %current.category, "Speaker option not allowed for category");
            Vec::new()
        }
    }
}

impl Middleware for SessionConfigurationMiddleware {
    fn apply(&self, state: &AudioSessionState, action: &Action) -> Vec<Action> {
        match action {
            Action::SetSessionConfiguration(config) => {
                if config.is_valid() && *config != state.session_configuration {
                    if let Err(e) = self.system.set_configuration(config) {
                        warn!(category = %config.category, mode = %config.mode, error = %e, "OS rejected session configuration");
                    }
                }
            }
            Action::SetActive(active) => {
                if *active != state.is_active {
                    if let Err(e) = self.system.set_active(*active) {
                        warn!(active, error = %e, "OS session activation failed");
                    }
                }
            }
            Action::SetOverrideOutputPort(port) => {
                if *port != state.override_output_port {
                    return self.override_port(state, *port);
                }
            }
            _ => {}
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::state::{AudioMode, SessionConfiguration};
    use crate::audio::store::AudioStore;
    use crate::simulation::{SimulatedSystemAudio, SystemCall};

    fn setup(initial: SessionConfiguration) -> (AudioStore, Arc<SimulatedSystemAudio>) {
        let system = SimulatedSystemAudio::new(initial);
        let store = AudioStore::new(AudioSessionState {
            session_configuration: initial,
            ..AudioSessionState::default()
        });
        store.add_middleware(Arc::new(SessionConfigurationMiddleware::new(system.clone())));
        (store, system)
    }

    #[tokio::test]
    async fn test_configuration_applied_once_when_changed() {
        let (store, system) = setup(SessionConfiguration::default());
        let call = SessionConfiguration::call_default();

        store.dispatch_async(Action::SetSessionConfiguration(call)).await.unwrap();
        store.dispatch_async(Action::SetSessionConfiguration(call)).await.unwrap();

        assert_eq!(system.calls(), vec![SystemCall::SetConfiguration(call)]);
    }

    #[tokio::test]
    async fn test_invalid_configuration_never_reaches_os() {
        let (store, system) = setup(SessionConfiguration::default());
        let invalid = SessionConfiguration::new(AudioCategory::Record, AudioMode::VoiceChat, CategoryOptions::empty());
        assert!(store.dispatch_async(Action::SetSessionConfiguration(invalid)).await.is_err());
        assert!(system.calls().is_empty());
    }

    #[tokio::test]
    async fn test_speaker_override_in_call_category() {
        let (store, system) = setup(SessionConfiguration::call_default());
        store.dispatch_async(Action::SetOverrideOutputPort(PortOverride::Speaker)).await.unwrap();
        assert_eq!(system.calls(), vec![SystemCall::OverrideOutputPort(PortOverride::Speaker)]);
    }

    #[tokio::test]
    async fn test_speaker_override_outside_call_category_uses_option() {
        let playback = SessionConfiguration::new(AudioCategory::Playback, AudioMode::Default, CategoryOptions::PLAYBACK);
        let (store, system) = setup(playback);

        store.dispatch_async(Action::SetOverrideOutputPort(PortOverride::Speaker)).await.unwrap();
        // The rewritten configuration is queued as a follow-up dispatch.
        store.dispatch_async(Action::SetHasRecordingPermission(true)).await.unwrap();

        let expected = SessionConfiguration {
            options: CategoryOptions::PLAYBACK | CategoryOptions::DEFAULT_TO_SPEAKER,
            ..playback
        };
        assert_eq!(store.state().session_configuration, expected);
        assert_eq!(system.calls(), vec![SystemCall::SetConfiguration(expected)]);
    }

    #[tokio::test]
    async fn test_activation_forwarded_on_change() {
        let (store, system) = setup(SessionConfiguration::default());
        store.dispatch_async(Action::SetActive(true)).await.unwrap();
        store.dispatch_async(Action::SetActive(true)).await.unwrap();
        assert_eq!(system.calls(), vec![SystemCall::SetActive(true)]);
    }
}
