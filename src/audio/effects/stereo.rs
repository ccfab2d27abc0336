//! Re-applies stereo playout whenever preference or availability changes

use tokio_util::sync::CancellationToken;

use super::EffectHandle;
use crate::audio::action::Action;
use crate::audio::store::AudioStore;

pub struct StereoPlayoutEffect;

impl StereoPlayoutEffect {
    pub const NAME: &'static str = "stereo-playout";

    pub fn attach(store: &AudioStore, token: CancellationToken) -> EffectHandle {
        let dispatcher = store.dispatcher();
        let mut states = store.subscribe();
        let cancelled = token.clone();

        EffectHandle::spawn(Self::NAME, token, async move {
            let mut last = None;
            loop {
                let stereo = states.borrow_and_update().stereo;
                let key = (stereo.preferred, stereo.available);
                if last != Some(key) {
                    last = Some(key);
                    if !dispatcher.dispatch(Action::ApplyStereoPlayout) {
                        break;
                    }
                }

                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    changed = states.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
