//! Audio session state and the value types it is built from

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::device::AudioModuleHandle;

/// OS audio session category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AudioCategory {
    Ambient,
    SoloAmbient,
    Playback,
    Record,
    PlayAndRecord,
    MultiRoute,
}

impl AudioCategory {
    pub const ALL: [AudioCategory; 6] = [
        AudioCategory::Ambient,
        AudioCategory::SoloAmbient,
        AudioCategory::Playback,
        AudioCategory::Record,
        AudioCategory::PlayAndRecord,
        AudioCategory::MultiRoute,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioCategory::Ambient => "ambient",
            AudioCategory::SoloAmbient => "soloAmbient",
            AudioCategory::Playback => "playback",
            AudioCategory::Record => "record",
            AudioCategory::PlayAndRecord => "playAndRecord",
            AudioCategory::MultiRoute => "multiRoute",
        }
    }
}

impl fmt::Display for AudioCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OS audio session mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AudioMode {
    Default,
    VoiceChat,
    VideoChat,
    GameChat,
    VideoRecording,
    Measurement,
    MoviePlayback,
    SpokenAudio,
    VoicePrompt,
}

impl AudioMode {
    pub const ALL: [AudioMode; 9] = [
        AudioMode::Default,
        AudioMode::VoiceChat,
        AudioMode::VideoChat,
        AudioMode::GameChat,
        AudioMode::VideoRecording,
        AudioMode::Measurement,
        AudioMode::MoviePlayback,
        AudioMode::SpokenAudio,
        AudioMode::VoicePrompt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioMode::Default => "default",
            AudioMode::VoiceChat => "voiceChat",
            AudioMode::VideoChat => "videoChat",
            AudioMode::GameChat => "gameChat",
            AudioMode::VideoRecording => "videoRecording",
            AudioMode::Measurement => "measurement",
            AudioMode::MoviePlayback => "moviePlayback",
            AudioMode::SpokenAudio => "spokenAudio",
            AudioMode::VoicePrompt => "voicePrompt",
        }
    }
}

impl fmt::Display for AudioMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// OS audio session category options
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct CategoryOptions: u32 {
        const MIX_WITH_OTHERS = 1 << 0;
        const DUCK_OTHERS = 1 << 1;
        const INTERRUPT_SPOKEN_AUDIO_AND_MIX_WITH_OTHERS = 1 << 2;
        const DEFAULT_TO_SPEAKER = 1 << 3;
        const ALLOW_BLUETOOTH_HFP = 1 << 4;
        const ALLOW_BLUETOOTH_A2DP = 1 << 5;
    }
}

impl CategoryOptions {
    /// Options used when only playing audio back
    pub const PLAYBACK: CategoryOptions = CategoryOptions::ALLOW_BLUETOOTH_A2DP;

    /// Options used for two-way calls
    pub const CALL: CategoryOptions = CategoryOptions::ALLOW_BLUETOOTH_HFP
        .union(CategoryOptions::ALLOW_BLUETOOTH_A2DP);
}

/// Category, mode and options applied together to the OS session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionConfiguration {
    pub category: AudioCategory,
    pub mode: AudioMode,
    pub options: CategoryOptions,
}

impl Default for SessionConfiguration {
    /// The OS defaults for a fresh process
    fn default() -> Self {
        Self {
            category: AudioCategory::SoloAmbient,
            mode: AudioMode::Default,
            options: CategoryOptions::empty(),
        }
    }
}

impl SessionConfiguration {
    pub fn new(category: AudioCategory, mode: AudioMode, options: CategoryOptions) -> Self {
        Self {
            category,
            mode,
            options,
        }
    }

    /// Configuration used for a call before any policy has run
    pub fn call_default() -> Self {
        Self::new(
            AudioCategory::PlayAndRecord,
            AudioMode::VoiceChat,
            CategoryOptions::ALLOW_BLUETOOTH_HFP,
        )
    }

    /// Whether this is already a voice or video call configuration
    pub fn is_call_configuration(&self) -> bool {
        self.category == AudioCategory::PlayAndRecord
            && matches!(self.mode, AudioMode::VoiceChat | AudioMode::VideoChat)
    }
}

/// Output port override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PortOverride {
    #[default]
    None,
    Speaker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RouteChangeReason {
    #[default]
    Unknown,
    NewDeviceAvailable,
    OldDeviceUnavailable,
    CategoryChange,
    Override,
    WakeFromSleep,
    NoSuitableRouteForCategory,
    RouteConfigurationChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PortType {
    BuiltInSpeaker,
    BuiltInReceiver,
    BuiltInMic,
    Headphones,
    BluetoothHfp,
    BluetoothA2dp,
    BluetoothLe,
    CarAudio,
    UsbAudio,
    Other,
}

impl PortType {
    pub fn is_external(&self) -> bool {
        !matches!(
            self,
            PortType::BuiltInSpeaker | PortType::BuiltInReceiver | PortType::BuiltInMic
        )
    }
}

/// One input or output port of the current route
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioPort {
    pub port_type: PortType,
    pub name: String,
    pub id: String,
}

impl AudioPort {
    pub fn new(port_type: PortType, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            port_type,
            id: name.to_lowercase().replace(' ', "-"),
            name,
        }
    }

    pub fn speaker() -> Self {
        Self::new(PortType::BuiltInSpeaker, "Speaker")
    }

    pub fn receiver() -> Self {
        Self::new(PortType::BuiltInReceiver, "Receiver")
    }

    pub fn microphone() -> Self {
        Self::new(PortType::BuiltInMic, "iPhone Microphone")
    }
}

/// Snapshot of the current audio route
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RouteDescriptor {
    pub inputs: Vec<AudioPort>,
    pub outputs: Vec<AudioPort>,
    pub reason: RouteChangeReason,
}

impl RouteDescriptor {
    pub fn new(inputs: Vec<AudioPort>, outputs: Vec<AudioPort>, reason: RouteChangeReason) -> Self {
        Self {
            inputs,
            outputs,
            reason,
        }
    }

    /// Built-in microphone routed to the loudspeaker
    pub fn speaker(reason: RouteChangeReason) -> Self {
        Self::new(vec![AudioPort::microphone()], vec![AudioPort::speaker()], reason)
    }

    /// Built-in microphone routed to the earpiece
    pub fn receiver(reason: RouteChangeReason) -> Self {
        Self::new(vec![AudioPort::microphone()], vec![AudioPort::receiver()], reason)
    }

    pub fn is_speaker(&self) -> bool {
        self.outputs
            .iter()
            .any(|port| port.port_type == PortType::BuiltInSpeaker)
    }

    pub fn is_receiver(&self) -> bool {
        self.outputs
            .iter()
            .any(|port| port.port_type == PortType::BuiltInReceiver)
    }

    pub fn is_external(&self) -> bool {
        self.outputs.iter().any(|port| port.port_type.is_external())
    }
}

/// Stereo playout preference, hardware availability and outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StereoConfiguration {
    pub preferred: bool,
    pub available: bool,
    pub enabled: bool,
}

/// Single source of truth for the call's audio session.
///
/// `is_recording` and `is_microphone_muted` carry intent; they are stale
/// whenever no hardware module is installed. `hardware_recording` mirrors
/// what the module last reported.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AudioSessionState {
    pub is_active: bool,
    pub is_interrupted: bool,
    pub is_recording: bool,
    pub hardware_recording: bool,
    pub is_microphone_muted: bool,
    pub has_recording_permission: bool,
    pub audio_device_module: Option<AudioModuleHandle>,
    pub current_route: RouteDescriptor,
    pub session_configuration: SessionConfiguration,
    pub override_output_port: PortOverride,
    pub stereo: StereoConfiguration,
}

impl AudioSessionState {
    /// Recording intent, or `None` while it is stale
    pub fn recording(&self) -> Option<bool> {
        self.audio_device_module.as_ref().map(|_| self.is_recording)
    }

    /// Mute intent, or `None` while it is stale
    pub fn microphone_muted(&self) -> Option<bool> {
        self.audio_device_module
            .as_ref()
            .map(|_| self.is_microphone_muted)
    }
}
