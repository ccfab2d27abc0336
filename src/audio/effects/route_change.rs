//! Mirrors OS route changes into the store

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::EffectHandle;
use crate::audio::action::Action;
use crate::audio::store::AudioStore;
use crate::audio::system::{SystemAudioEvent, SystemAudioSession};

pub struct RouteChangeEffect;

impl RouteChangeEffect {
    pub const NAME: &'static str = "route-change";

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
                match event {
                    Ok(SystemAudioEvent::RouteChanged { route }) => {
                        debug!(reason = ?route.reason, speaker = route.is_speaker(), "Audio route changed");
                        if !dispatcher.dispatch(Action::SetCurrentRoute(route)) {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Route change effect lagged behind OS events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
