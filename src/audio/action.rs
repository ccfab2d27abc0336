//! Actions accepted by the audio session store

use super::device::AudioDeviceModule;
use super::state::{
    AudioCategory, AudioMode, CategoryOptions, PortOverride, RouteDescriptor, SessionConfiguration,
};

/// A discrete state-change request
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SetActive(bool),
    SetInterrupted(bool),
    /// Recording intent
    SetRecording(bool),
    /// Recording state reported back by the hardware module
    HardwareRecordingChanged(bool),
    SetMicrophoneMuted(bool),
    SetHasRecordingPermission(bool),
    SetAudioDeviceModule(Option<AudioDeviceModule>),
    SetCurrentRoute(RouteDescriptor),
    SetSessionConfiguration(SessionConfiguration),
    SetOverrideOutputPort(PortOverride),
    /// Mirrors of what the OS reports, never pushed back to the OS
    SystemSetCategory(AudioCategory),
    SystemSetMode(AudioMode),
    SystemSetCategoryOptions(CategoryOptions),
    SystemSetConfiguration(SessionConfiguration),
    SetStereoPlayoutPreferred(bool),
    SetStereoPlayoutAvailable(bool),
    /// Push the current stereo preference to the hardware
    ApplyStereoPlayout,
    SetStereoPlayoutEnabled(bool),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::SetActive(_) => "setActive",
            Action::SetInterrupted(_) => "setInterrupted",
            Action::SetRecording(_) => "setRecording",
            Action::HardwareRecordingChanged(_) => "hardwareRecordingChanged",
            Action::SetMicrophoneMuted(_) => "setMicrophoneMuted",
            Action::SetHasRecordingPermission(_) => "setHasRecordingPermission",
            Action::SetAudioDeviceModule(_) => "setAudioDeviceModule",
            Action::SetCurrentRoute(_) => "setCurrentRoute",
            Action::SetSessionConfiguration(_) => "setSessionConfiguration",
            Action::SetOverrideOutputPort(_) => "setOverrideOutputPort",
            Action::SystemSetCategory(_) => "systemSetCategory",
            Action::SystemSetMode(_) => "systemSetMode",
            Action::SystemSetCategoryOptions(_) => "systemSetCategoryOptions",
            Action::SystemSetConfiguration(_) => "systemSetConfiguration",
            Action::SetStereoPlayoutPreferred(_) => "setStereoPlayoutPreferred",
            Action::SetStereoPlayoutAvailable(_) => "setStereoPlayoutAvailable",
            Action::ApplyStereoPlayout => "applyStereoPlayout",
            Action::SetStereoPlayoutEnabled(_) => "setStereoPlayoutEnabled",
        }
    }
}

/// Non-empty, ordered group of actions processed as one dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct ActionBatch(Vec<Action>);

impl ActionBatch {
    pub fn new(first: Action) -> Self {
        Self(vec![first])
    }

    /// `None` when `actions` is empty
    pub fn from_vec(actions: Vec<Action>) -> Option<Self> {
        if actions.is_empty() {
            None
        } else {
            Some(Self(actions))
        }
    }

    pub fn then(mut self, action: Action) -> Self {
        self.0.push(action);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn actions(&self) -> &[Action] {
        &self.0
    }
}

impl From<Action> for ActionBatch {
    fn from(action: Action) -> Self {
        Self::new(action)
    }
}

impl IntoIterator for ActionBatch {
    type Item = Action;
    type IntoIter = std::vec::IntoIter<Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_batches_are_unrepresentable() {
        assert!(ActionBatch::from_vec(Vec::new()).is_none());

        let batch = ActionBatch::new(Action::SetActive(true)).then(Action::SetRecording(true));
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.actions()[1].name(), "setRecording");
    }
}
