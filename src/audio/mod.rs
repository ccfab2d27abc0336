//! Audio session subsystem
//!
//! A reducer-style store owns [`AudioSessionState`]. Effects observe the OS
//! and the active call, middleware drives the hardware module and the OS
//! session, and [`CallAudioSession`] wires all of it to a call.

pub mod action;
pub mod call_session;
pub mod device;
pub mod effects;
pub mod middleware;
pub mod policy;
pub mod reducer;
pub mod state;
pub mod store;
pub mod system;
pub mod validator;

pub use action::{Action, ActionBatch};
pub use call_session::{AudioSessionDelegate, CallAudioSession, CallContext};
pub use device::{AudioDeviceModule, AudioModuleHandle, HardwareAudioModule};
pub use effects::ActiveCallAudio;
pub use policy::{
    AudioSessionPolicy, DefaultAudioSessionPolicy, LivestreamAudioSessionPolicy,
    OwnCapabilitiesAudioSessionPolicy, PolicyConfiguration,
};
pub use state::{
    AudioCategory, AudioMode, AudioPort, AudioSessionState, CategoryOptions, PortOverride, PortType,
    RouteChangeReason, RouteDescriptor, SessionConfiguration, StereoConfiguration,
};
pub use store::{AudioStore, Dispatcher};
pub use system::{RouteSnapshotSource, SystemAudioEvent, SystemAudioSession, SystemAudioSnapshot};
