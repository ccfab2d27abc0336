//! Allow-list of OS session configurations

use super::state::{AudioCategory, AudioMode, CategoryOptions, SessionConfiguration};
use crate::error::ConfigurationError;

/// Modes and options the OS accepts for one category
struct Allowed {
    modes: &'static [AudioMode],
    options: CategoryOptions,
}

const SHARED_OPTIONS: CategoryOptions = CategoryOptions::MIX_WITH_OTHERS
    .union(CategoryOptions::DUCK_OTHERS)
    .union(CategoryOptions::INTERRUPT_SPOKEN_AUDIO_AND_MIX_WITH_OTHERS);

fn allowed(category: AudioCategory) -> Allowed {
    match category {
        AudioCategory::Playback => Allowed {
            modes: &[
                AudioMode::Default,
                AudioMode::MoviePlayback,
                AudioMode::SpokenAudio,
                AudioMode::VoicePrompt,
            ],
            options: SHARED_OPTIONS
                .union(CategoryOptions::DEFAULT_TO_SPEAKER)
                .union(CategoryOptions::ALLOW_BLUETOOTH_A2DP),
        },
        AudioCategory::PlayAndRecord => Allowed {
            modes: &[
                AudioMode::Default,
                AudioMode::VoiceChat,
                AudioMode::VideoChat,
                AudioMode::GameChat,
                AudioMode::VideoRecording,
                AudioMode::Measurement,
                AudioMode::SpokenAudio,
                AudioMode::VoicePrompt,
            ],
            options: SHARED_OPTIONS
                .union(CategoryOptions::DEFAULT_TO_SPEAKER)
                .union(CategoryOptions::ALLOW_BLUETOOTH_HFP)
                .union(CategoryOptions::ALLOW_BLUETOOTH_A2DP),
        },
        AudioCategory::Record => Allowed {
            modes: &[AudioMode::Default, AudioMode::Measurement],
            options: CategoryOptions::DUCK_OTHERS,
        },
        AudioCategory::MultiRoute => Allowed {
            modes: &[AudioMode::Default, AudioMode::Measurement],
            options: CategoryOptions::MIX_WITH_OTHERS,
        },
        AudioCategory::Ambient | AudioCategory::SoloAmbient => Allowed {
            modes: &[AudioMode::Default],
            options: SHARED_OPTIONS,
        },
    }
}

impl SessionConfiguration {
    /// Mode allowed for the category and options a subset of its allowed set
    pub fn is_valid(&self) -> bool {
        let allowed = allowed(self.category);
        allowed.modes.contains(&self.mode) && allowed.options.contains(self.options)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(ConfigurationError::InvalidCombination {
                category: self.category,
                mode: self.mode,
                options: self.options,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::action::Action;
    use crate::audio::state::AudioSessionState;
    use crate::audio::store::AudioStore;
    use proptest::prelude::*;

    #[test]
    fn test_measurement_with_ducking_is_valid() {
        let config = SessionConfiguration::new(
            AudioCategory::PlayAndRecord,
            AudioMode::Measurement,
            CategoryOptions::DUCK_OTHERS,
        );
        assert!(config.is_valid());
    }

    #[test]
    fn test_record_rejects_bluetooth_hfp() {
        let config = SessionConfiguration::new(
            AudioCategory::Record,
            AudioMode::Default,
            CategoryOptions::ALLOW_BLUETOOTH_HFP,
        );
        assert!(!config.is_valid());
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidCombination {
                category: AudioCategory::Record,
                ..
            })
        ));
    }

    #[test]
    fn test_mode_outside_category_is_invalid() {
        let config = SessionConfiguration::new(
            AudioCategory::Playback,
            AudioMode::VoiceChat,
            CategoryOptions::empty(),
        );
        assert!(!config.is_valid());
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(SessionConfiguration::default().is_valid());
        assert!(SessionConfiguration::call_default().is_valid());
    }

    fn any_configuration() -> impl Strategy<Value = SessionConfiguration> {
        (
            proptest::sample::select(AudioCategory::ALL.to_vec()),
            proptest::sample::select(AudioMode::ALL.to_vec()),
            0u32..64,
        )
            .prop_map(|(category, mode, bits)| {
                SessionConfiguration::new(category, mode, CategoryOptions::from_bits_truncate(bits))
            })
    }

    fn any_configuration_action() -> impl Strategy<Value = Action> {
        prop_oneof![
            any_configuration().prop_map(Action::SetSessionConfiguration),
            any_configuration().prop_map(Action::SystemSetConfiguration),
            proptest::sample::select(AudioCategory::ALL.to_vec()).prop_map(Action::SystemSetCategory),
            proptest::sample::select(AudioMode::ALL.to_vec()).prop_map(Action::SystemSetMode),
            (0u32..64).prop_map(|bits| Action::SystemSetCategoryOptions(CategoryOptions::from_bits_truncate(bits))),
        ]
    }

    proptest! {
        #[test]
        fn test_dispatched_configuration_stays_valid(
            actions in proptest::collection::vec(any_configuration_action(), 1..24)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let store = AudioStore::new(AudioSessionState::default());
                for action in actions {
                    let _ = store.dispatch_async(action).await;
                    prop_assert!(store.state().session_configuration.is_valid());
                }
                Ok(())
            })?;
        }

        #[test]
        fn test_subsets_of_valid_options_stay_valid(config in any_configuration(), mask in 0u32..64) {
            if config.is_valid() {
                let narrowed = SessionConfiguration {
                    options: config.options & CategoryOptions::from_bits_truncate(mask),
                    ..config
                };
                prop_assert!(narrowed.is_valid());
            }
        }
    }
}
