//! Audio session policies: call settings and capabilities in, OS configuration out

use std::fmt::Debug;

use serde::Serialize;

use super::state::{AudioCategory, AudioMode, CategoryOptions, PortOverride, SessionConfiguration};
use crate::protocol::{CallSettings, OwnCapabilities, OwnCapability};

/// Configuration a policy wants applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PolicyConfiguration {
    pub is_active: bool,
    pub session: SessionConfiguration,
    pub override_output_port: Option<PortOverride>,
    pub prefers_stereo_playout: bool,
}

pub trait AudioSessionPolicy: Send + Sync + Debug {
    fn configuration(&self, settings: &CallSettings, capabilities: &OwnCapabilities) -> PolicyConfiguration;
}

fn port_for(settings: &CallSettings) -> PortOverride {
    if settings.speaker_on {
        PortOverride::Speaker
    } else {
        PortOverride::None
    }
}

/// Call options, routing to the speaker by default while it is on
fn call_options(settings: &CallSettings) -> CategoryOptions {
    if settings.speaker_on {
        CategoryOptions::CALL | CategoryOptions::DEFAULT_TO_SPEAKER
    } else {
        CategoryOptions::CALL
    }
}

/// Two-way call on the voice or video chat mode
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAudioSessionPolicy;

impl AudioSessionPolicy for DefaultAudioSessionPolicy {
    fn configuration(&self, settings: &CallSettings, _capabilities: &OwnCapabilities) -> PolicyConfiguration {
        let mode = if settings.video_on {
            AudioMode::VideoChat
        } else {
            AudioMode::VoiceChat
        };
        PolicyConfiguration {
            is_active: settings.audio_output_on,
            session: SessionConfiguration::new(AudioCategory::PlayAndRecord, mode, call_options(settings)),
            override_output_port: Some(port_for(settings)),
            prefers_stereo_playout: false,
        }
    }
}

/// Falls back to playback-only when the participant cannot send audio
#[derive(Debug, Clone, Copy)]
pub struct OwnCapabilitiesAudioSessionPolicy {
    /// Devices without an earpiece cannot route a call away from the speaker
    pub has_earpiece: bool,
}

impl Default for OwnCapabilitiesAudioSessionPolicy {
    fn default() -> Self {
        Self { has_earpiece: true }
    }
}

impl AudioSessionPolicy for OwnCapabilitiesAudioSessionPolicy {
    fn configuration(&self, settings: &CallSettings, capabilities: &OwnCapabilities) -> PolicyConfiguration {
        let can_send_audio = capabilities.contains(&OwnCapability::SendAudio);
        let needs_record = settings.audio_on || (settings.speaker_on && self.has_earpiece);

        if !can_send_audio || !needs_record {
            return PolicyConfiguration {
                is_active: settings.audio_output_on,
                session: SessionConfiguration::new(AudioCategory::Playback, AudioMode::Default, CategoryOptions::PLAYBACK),
                override_output_port: None,
                prefers_stereo_playout: false,
            };
        }

        PolicyConfiguration {
            is_active: settings.audio_output_on,
            session: SessionConfiguration::new(AudioCategory::PlayAndRecord, AudioMode::VoiceChat, CategoryOptions::CALL),
            override_output_port: Some(port_for(settings)),
            prefers_stereo_playout: false,
        }
    }
}

/// Playback-first configuration with stereo output for livestream viewers
#[derive(Debug, Clone, Copy, Default)]
pub struct LivestreamAudioSessionPolicy;

impl AudioSessionPolicy for LivestreamAudioSessionPolicy {
    fn configuration(&self, settings: &CallSettings, _capabilities: &OwnCapabilities) -> PolicyConfiguration {
        PolicyConfiguration {
            is_active: settings.audio_output_on,
            session: SessionConfiguration::new(AudioCategory::PlayAndRecord, AudioMode::Default, CategoryOptions::CALL),
            override_output_port: Some(port_for(settings)),
            prefers_stereo_playout: true,
        }
    }
}
