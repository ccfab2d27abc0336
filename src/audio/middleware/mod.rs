//! Store middleware
//!
//! Middleware sees every action before the reducer, together with the
//! state the action will be applied to. Side effects happen here; further
//! actions are returned and queued by the store.

pub mod hardware;
pub mod session_configuration;

pub use hardware::HardwareAudioBinding;
pub use session_configuration::SessionConfigurationMiddleware;

use super::action::Action;
use super::state::AudioSessionState;

pub trait Middleware: Send + Sync {
    /// React to `action` about to be applied on top of `state`
    fn apply(&self, state: &AudioSessionState, action: &Action) -> Vec<Action>;
}
