//! Keeps the store's configuration in line with what the OS reports

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::EffectHandle;
use crate::audio::action::{Action, ActionBatch};
use crate::audio::state::SessionConfiguration;
use crate::audio::store::AudioStore;
use crate::audio::system::RouteSnapshotSource;

pub struct SystemMirrorEffect;

impl SystemMirrorEffect {
    pub const NAME: &'static str = "system-mirror";

    /// Only snapshots that changed since the previous poll are mirrored
    pub fn attach(
        store: &AudioStore,
        source: &RouteSnapshotSource,
        token: CancellationToken,
    ) -> EffectHandle {
        let dispatcher = store.dispatcher();
        let mut snapshots = source.start(token.child_token());
        snapshots.borrow_and_update();
        let cancelled = token.clone();

        EffectHandle::spawn(Self::NAME, token, async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    changed = snapshots.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                let reported = snapshots.borrow_and_update().configuration;
                let Some(current) = dispatcher.state().map(|s| s.session_configuration) else {
                    break;
                };
                if let Some(batch) = Self::mirror_actions(&current, &reported) {
                    debug!(category = %reported.category, mode = %reported.mode, "Mirroring OS session configuration");
                    dispatcher.dispatch(batch);
                }
            }
        })
    }

    /// Single-field mirrors when one field diverged, a combined mirror otherwise
    pub fn mirror_actions(
        current: &SessionConfiguration,
        reported: &SessionConfiguration,
    ) -> Option<ActionBatch> {
        let category = current.category != reported.category;
        let mode = current.mode != reported.mode;
        let options = current.options != reported.options;

        let action = match (category, mode, options) {
            (false, false, false) => return None,
            (true, false, false) => Action::SystemSetCategory(reported.category),
            (false, true, false) => Action::SystemSetMode(reported.mode),
            (false, false, true) => Action::SystemSetCategoryOptions(reported.options),
            _ => Action::SystemSetConfiguration(*reported),
        };
        Some(ActionBatch::new(action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::state::{AudioCategory, AudioMode, AudioSessionState, CategoryOptions};
    use crate::simulation::SimulatedSystemAudio;
    use std::time::Duration;

    #[test]
    fn test_mirror_action_selection() {
        let call = SessionConfiguration::call_default();
        assert!(SystemMirrorEffect::mirror_actions(&call, &call).is_none());

        let options_only = SessionConfiguration {
            options: CategoryOptions::empty(),
            ..call
        };
        let batch = SystemMirrorEffect::mirror_actions(&call, &options_only).unwrap();
        assert_eq!(batch.actions(), &[Action::SystemSetCategoryOptions(CategoryOptions::empty())]);

        let playback = SessionConfiguration::new(AudioCategory::Playback, AudioMode::MoviePlayback, CategoryOptions::PLAYBACK);
        let batch = SystemMirrorEffect::mirror_actions(&call, &playback).unwrap();
        assert_eq!(batch.actions(), &[Action::SystemSetConfiguration(playback)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_os_changes_are_mirrored() {
        let call = SessionConfiguration::call_default();
        let system = SimulatedSystemAudio::new(call);
        let store = AudioStore::new(AudioSessionState {
            session_configuration: call,
            ..AudioSessionState::default()
        });
        let source = RouteSnapshotSource::new(system.clone(), Duration::from_millis(100));
        let _effect = SystemMirrorEffect::attach(&store, &source, CancellationToken::new());
        let mut state = store.subscribe();

        let cleared = SessionConfiguration {
            options: CategoryOptions::empty(),
            ..call
        };
        system.simulate_os_configuration(cleared);

        state.changed().await.unwrap();
        assert_eq!(state.borrow().session_configuration, cleared);
    }
}
