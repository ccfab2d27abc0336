//! Store effects
//!
//! Each effect observes one external source and turns it into dispatches.
//! Effects run as tasks under a [`CancellationToken`]; dropping the
//! [`EffectHandle`] cancels the subscription.

pub mod active_call;
pub mod interruption;
pub mod route_change;
pub mod stereo;
pub mod system_mirror;

pub use active_call::{ActiveCallAudio, ActiveCallEffect};
pub use interruption::InterruptionEffect;
pub use route_change::RouteChangeEffect;
pub use stereo::StereoPlayoutEffect;
pub use system_mirror::SystemMirrorEffect;

use std::collections::HashMap;
use std::future::Future;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A running effect
pub struct EffectHandle {
    name: &'static str,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl EffectHandle {
    pub fn spawn<F>(name: &'static str, token: CancellationToken, effect: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(effect = name, "Attaching effect");
        Self {
            name,
            token,
            task: tokio::spawn(effect),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for EffectHandle {
    fn drop(&mut self) {
        self.token.cancel();
        self.task.abort();
        debug!(effect = self.name, "Detached effect");
    }
}

/// Effects keyed by name; attaching under a taken name replaces the old one
#[derive(Default)]
pub struct EffectSet {
    effects: Mutex<HashMap<&'static str, EffectHandle>>,
}

impl EffectSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detach any effect named `name`, then attach the one `make` builds
    pub fn replace(&self, name: &'static str, make: impl FnOnce() -> EffectHandle) {
        let mut effects = self.effects.lock();
        drop(effects.remove(name));
        let handle = make();
        effects.insert(name, handle);
    }

    pub fn detach(&self, name: &str) -> bool {
        self.effects.lock().remove(name).is_some()
    }

    pub fn detach_all(&self) {
        self.effects.lock().clear();
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.effects.lock().keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.effects.lock().is_empty()
    }
}
