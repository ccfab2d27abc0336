//! OS interruption handling

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::EffectHandle;
use crate::audio::action::{Action, ActionBatch};
use crate::audio::state::AudioSessionState;
use crate::audio::store::AudioStore;
use crate::audio::system::{SystemAudioEvent, SystemAudioSession};

pub struct InterruptionEffect;

impl InterruptionEffect {
    pub const NAME: &'static str = "interruption";

    pub fn attach(
        store: &AudioStore,
        system: &Arc<dyn SystemAudioSession>,
        token: CancellationToken,
    ) -> EffectHandle {
        let dispatcher = store.dispatcher();
        let mut events = system.events();
        let cancelled = token.clone();

        EffectHandle::spawn(Self::NAME, token, async move {
            loop {
                let event = tokio::select! {
                    _ = cancelled.cancelled() => break,
                    event = events.recv() => event,
                };
                let batch = match event {
                    Ok(SystemAudioEvent::InterruptionBegan) => {
                        info!("Audio session interruption began");
                        Some(ActionBatch::new(Action::SetInterrupted(true)))
                    }
                    Ok(SystemAudioEvent::InterruptionEnded { should_resume }) => {
                        info!(should_resume, "Audio session interruption ended");
                        dispatcher
                            .state()
                            .and_then(|state| Self::actions_on_end(&state, should_resume))
                    }
                    Ok(_) => None,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Interruption effect lagged behind OS events");
                        None
                    }
                    Err(RecvError::Closed) => break,
                };
                if let Some(batch) = batch {
                    if !dispatcher.dispatch(batch) {
                        break;
                    }
                }
            }
            debug!("Interruption effect stopped");
        })
    }

    /// Actions for the end of an interruption.
    ///
    /// Nothing is resumed without recording permission. Clearing the flag
    /// lets the hardware binding restart recording; with the resume hint
    /// and an attached module the current mute flag is re-applied.
    pub fn actions_on_end(state: &AudioSessionState, should_resume: bool) -> Option<ActionBatch> {
        if !state.has_recording_permission {
            return None;
        }

        let mut batch = ActionBatch::new(Action::SetInterrupted(false));
        if should_resume && state.audio_device_module.is_some() && state.is_recording {
            batch = batch.then(Action::SetMicrophoneMuted(state.is_microphone_muted));
        }
        Some(batch)
    }
}
