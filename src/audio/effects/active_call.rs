//! Stereo preference from the active call's negotiated settings

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::EffectHandle;
use crate::audio::action::Action;
use crate::audio::store::AudioStore;

/// Audio-relevant settings of the call currently in progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveCallAudio {
    pub call_id: String,
    pub hifi_audio_enabled: bool,
}

pub struct ActiveCallEffect;

impl ActiveCallEffect {
    pub const NAME: &'static str = "active-call";

    pub fn attach(
        store: &AudioStore,
        mut calls: watch::Receiver<Option<ActiveCallAudio>>,
        token: CancellationToken,
    ) -> EffectHandle {
        let dispatcher = store.dispatcher();
        let cancelled = token.clone();

        EffectHandle::spawn(Self::NAME, token, async move {
            let mut last = None;
            loop {
                let preferred = calls
                    .borrow_and_update()
                    .as_ref()
                    .map(|call| call.hifi_audio_enabled)
                    .unwrap_or(false);
                if last != Some(preferred) {
                    last = Some(preferred);
                    if !dispatcher.dispatch(Action::SetStereoPlayoutPreferred(preferred)) {
                        break;
                    }
                }

                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    changed = calls.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
