//! Serialized dispatcher for audio session actions
//!
//! Every dispatch is processed on one [`SerialQueue`]: middleware first,
//! then the reducer, then the new state is published to subscribers.
//! Actions returned by middleware are queued behind the current dispatch,
//! never executed re-entrantly.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::action::{Action, ActionBatch};
use super::middleware::Middleware;
use super::reducer;
use super::state::AudioSessionState;
use crate::error::{Error, Result};
use crate::sync::SerialQueue;

struct StoreInner {
    state: watch::Sender<AudioSessionState>,
    middleware: RwLock<Vec<Arc<dyn Middleware>>>,
    queue: SerialQueue,
}

/// Owner handle for the audio session store
#[derive(Clone)]
pub struct AudioStore {
    inner: Arc<StoreInner>,
}

/// Non-owning sender handle held by effects and middleware
#[derive(Clone)]
pub struct Dispatcher {
    inner: Weak<StoreInner>,
}

impl AudioStore {
    /// Must be called inside a Tokio runtime
    pub fn new(initial: AudioSessionState) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            inner: Arc::new(StoreInner {
                state,
                middleware: RwLock::new(Vec::new()),
                queue: SerialQueue::new("audio-store"),
            }),
        }
    }

    pub fn add_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.inner.middleware.write().push(middleware);
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Queue actions and return immediately
    pub fn dispatch(&self, actions: impl Into<ActionBatch>) {
        enqueue(&self.inner, actions.into());
    }

    /// Queue actions and wait until they have been applied.
    ///
    /// Fails with the first rejection in the batch; the remaining actions
    /// are still applied. Must not be awaited from inside middleware.
    pub async fn dispatch_async(&self, actions: impl Into<ActionBatch>) -> Result<()> {
        let inner = self.inner.clone();
        let batch = actions.into();
        self.inner
            .queue
            .run(async move { perform(&inner, batch) })
            .await
            .unwrap_or_else(|| Err(Error::Config("audio store queue stopped".into())))
    }

    pub fn state(&self) -> AudioSessionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AudioSessionState> {
        self.inner.state.subscribe()
    }
}

impl Dispatcher {
    /// Returns false once the store is gone
    pub fn dispatch(&self, actions: impl Into<ActionBatch>) -> bool {
        match self.inner.upgrade() {
            Some(inner) => {
                enqueue(&inner, actions.into());
                true
            }
            None => false,
        }
    }

    pub fn state(&self) -> Option<AudioSessionState> {
        self.inner.upgrade().map(|inner| inner.state.borrow().clone())
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

fn enqueue(inner: &Arc<StoreInner>, batch: ActionBatch) {
    let job_inner = inner.clone();
    let submitted = inner.queue.submit(async move {
        let _ = perform(&job_inner, batch);
    });
    if !submitted {
        warn!("Audio store queue stopped, dropping dispatch");
    }
}

fn perform(inner: &Arc<StoreInner>, batch: ActionBatch) -> Result<()> {
    let middleware = inner.middleware.read().clone();
    let mut further = Vec::new();
    let mut outcome = Ok(());

    for action in batch {
        let state = inner.state.borrow().clone();

        for m in &middleware {
            further.extend(m.apply(&state, &action));
        }

        match reducer::reduce(&state, &action) {
            Ok(next) => {
                let changed = inner.state.send_if_modified(|current| {
                    if *current == next {
                        false
                    } else {
                        *current = next;
                        true
                    }
                });
                debug!(action = action.name(), changed, "Audio store applied action");
            }
            Err(e) => {
                warn!(action = action.name(), error = %e, "Audio store rejected action");
                if outcome.is_ok() {
                    outcome = Err(e.into());
                }
            }
        }
    }

    if let Some(batch) = ActionBatch::from_vec(further) {
        enqueue(inner, batch);
    }

    outcome
}

impl std::fmt::Debug for AudioStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStore")
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::state::{AudioCategory, AudioMode, CategoryOptions, SessionConfiguration};
    use parking_lot::Mutex;

    struct Recorder {
        seen: Mutex<Vec<&'static str>>,
    }

    impl Middleware for Recorder {
        fn apply(&self, _state: &AudioSessionState, action: &Action) -> Vec<Action> {
            self.seen.lock().push(action.name());
            match action {
                Action::SetActive(true) => vec![Action::SetRecording(true)],
                _ => Vec::new(),
            }
        }
    }

    #[tokio::test]
    async fn test_dispatch_async_applies_in_order() {
        let store = AudioStore::new(AudioSessionState::default());
        store
            .dispatch_async(ActionBatch::new(Action::SetRecording(true)).then(Action::SetRecording(false)))
            .await
            .unwrap();
        assert!(!store.state().is_recording);
    }

    #[tokio::test]
    async fn test_rejected_configuration_keeps_previous_state() {
        let store = AudioStore::new(AudioSessionState::default());
        let before = store.state().session_configuration;

        let invalid = SessionConfiguration::new(
            AudioCategory::Record,
            AudioMode::Default,
            CategoryOptions::ALLOW_BLUETOOTH_HFP,
        );
        let result = store.dispatch_async(Action::SetSessionConfiguration(invalid)).await;

        assert!(matches!(result, Err(Error::AudioConfiguration(_))));
        assert_eq!(store.state().session_configuration, before);
    }

    #[tokio::test]
    async fn test_middleware_actions_are_queued_behind_current_batch() {
        let store = AudioStore::new(AudioSessionState::default());
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        store.add_middleware(recorder.clone());

        store
            .dispatch_async(ActionBatch::new(Action::SetActive(true)).then(Action::SetMicrophoneMuted(true)))
            .await
            .unwrap();
        // The follow-up runs as its own job after the batch above.
        store.dispatch_async(Action::SetInterrupted(false)).await.unwrap();

        assert_eq!(
            *recorder.seen.lock(),
            vec!["setActive", "setMicrophoneMuted", "setRecording", "setInterrupted"]
        );
        assert!(store.state().is_recording);
    }

    #[tokio::test]
    async fn test_dispatcher_outlives_store_safely() {
        let store = AudioStore::new(AudioSessionState::default());
        let dispatcher = store.dispatcher();
        assert!(dispatcher.dispatch(Action::SetActive(true)));
        store.dispatch_async(Action::SetInterrupted(true)).await.unwrap();
        assert_eq!(dispatcher.state().map(|s| s.is_active), Some(true));

        drop(store);
        tokio::task::yield_now().await;
        assert!(!dispatcher.is_alive());
        assert!(!dispatcher.dispatch(Action::SetActive(false)));
    }

    #[tokio::test]
    async fn test_subscribers_see_changes_only() {
        let store = AudioStore::new(AudioSessionState::default());
        let mut rx = store.subscribe();
        rx.borrow_and_update();

        store.dispatch_async(Action::SetActive(false)).await.unwrap();
        assert!(!rx.has_changed().unwrap());

        store.dispatch_async(Action::SetActive(true)).await.unwrap();
        assert!(rx.has_changed().unwrap());
    }
}
