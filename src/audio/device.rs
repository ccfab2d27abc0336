//! Hardware audio module collaborator and the handles that refer to it

use std::fmt;
use std::sync::{Arc, Weak};

use serde::{Serialize, Serializer};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::HardwareError;

/// The platform audio device module: microphone capture, mute and stereo playout.
///
/// Only the hardware binding middleware calls the mutating methods.
pub trait HardwareAudioModule: Send + Sync {
    fn is_recording(&self) -> bool;

    fn is_microphone_muted(&self) -> bool;

    fn is_stereo_playout_available(&self) -> bool;

    /// Recording state as reported by the hardware
    fn recording_updates(&self) -> watch::Receiver<bool>;

    /// Mute state as reported by the hardware
    fn microphone_muted_updates(&self) -> watch::Receiver<bool>;

    fn stereo_playout_available_updates(&self) -> watch::Receiver<bool>;

    fn set_recording(&self, enabled: bool) -> Result<(), HardwareError>;

    fn set_muted(&self, muted: bool) -> Result<(), HardwareError>;

    fn set_stereo_playout_enabled(&self, enabled: bool) -> Result<(), HardwareError>;

    /// Keep the capture pipeline initialised while not recording
    fn set_recording_always_prepared_mode(&self, enabled: bool) -> Result<(), HardwareError> {
        let _ = enabled;
        Ok(())
    }
}

/// Owning reference to an installed hardware module
#[derive(Clone)]
pub struct AudioDeviceModule {
    id: Uuid,
    module: Arc<dyn HardwareAudioModule>,
}

impl AudioDeviceModule {
    pub fn new(module: Arc<dyn HardwareAudioModule>) -> Self {
        Self {
            id: Uuid::new_v4(),
            module,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Non-owning handle stored in state
    pub fn handle(&self) -> AudioModuleHandle {
        AudioModuleHandle {
            id: self.id,
            module: Arc::downgrade(&self.module),
        }
    }

    pub(crate) fn hardware(&self) -> &dyn HardwareAudioModule {
        self.module.as_ref()
    }
}

impl PartialEq for AudioDeviceModule {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for AudioDeviceModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioDeviceModule").field("id", &self.id).finish()
    }
}

/// Capability-scoped reference to the installed module.
///
/// It identifies the module and reports whether it is still alive, but
/// cannot drive the hardware.
#[derive(Clone)]
pub struct AudioModuleHandle {
    id: Uuid,
    module: Weak<dyn HardwareAudioModule>,
}

impl AudioModuleHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.module.strong_count() > 0
    }
}

impl PartialEq for AudioModuleHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for AudioModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioModuleHandle")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl Serialize for AudioModuleHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.id.serialize(serializer)
    }
}
