//! Shared call and signaling models
//!
//! Requests the client sends to the SFU, events it receives back, session
//! descriptions, and the call settings the audio policy and the migration
//! machine both read.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Which of the two peer connections a value belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PeerRole {
    Publisher,
    Subscriber,
}

impl PeerRole {
    /// Short id used to tag traces from this connection
    pub fn trace_id(&self) -> &'static str {
        match self {
            PeerRole::Publisher => "pub",
            PeerRole::Subscriber => "sub",
        }
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PeerRole::Publisher => "publisher",
            PeerRole::Subscriber => "subscriber",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// SDP blob plus its negotiation role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Media kind of a published or received track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackKind {
    Audio,
    Video,
    ScreenShare,
}

impl TrackKind {
    pub fn is_video(&self) -> bool {
        matches!(self, TrackKind::Video | TrackKind::ScreenShare)
    }
}

/// Locally captured media ready to be attached to the publisher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalTrack {
    pub id: String,
    pub kind: TrackKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMuteState {
    pub kind: TrackKind,
    pub muted: bool,
}

/// Join request for a (possibly migrating) session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub session_id: String,
    pub token: String,
    pub subscriber_sdp: String,
    /// Hostname of the node being migrated away from
    pub migrating_from: Option<String>,
}

/// Messages sent to the SFU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SfuRequest {
    Join(JoinRequest),
    HealthCheck { session_id: String },
    UpdateMuteStates { session_id: String, states: Vec<TrackMuteState> },
}

impl SfuRequest {
    pub fn name(&self) -> &'static str {
        match self {
            SfuRequest::Join(_) => "joinRequest",
            SfuRequest::HealthCheck { .. } => "healthCheckRequest",
            SfuRequest::UpdateMuteStates { .. } => "updateMuteStates",
        }
    }
}

/// Events received from the SFU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SfuEvent {
    JoinResponse { reconnected: bool },
    SubscriberOffer { sdp: String },
    HealthCheckResponse,
    GoAway { reason: String },
    CallEnded,
    ChangePublishQuality { video_enabled: bool },
    Error { message: String },
}

impl SfuEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SfuEvent::JoinResponse { .. } => "joinResponse",
            SfuEvent::SubscriberOffer { .. } => "subscriberOffer",
            SfuEvent::HealthCheckResponse => "healthCheckResponse",
            SfuEvent::GoAway { .. } => "goAway",
            SfuEvent::CallEnded => "callEnded",
            SfuEvent::ChangePublishQuality { .. } => "changePublishQuality",
            SfuEvent::Error { .. } => "error",
        }
    }
}

/// Relocation signal: the node the session must move to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationTarget {
    pub hostname: String,
    pub url: String,
    pub token: String,
}

/// Negotiated call settings for the local participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSettings {
    pub audio_on: bool,
    pub video_on: bool,
    pub speaker_on: bool,
    pub audio_output_on: bool,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            audio_on: true,
            video_on: false,
            speaker_on: false,
            audio_output_on: true,
        }
    }
}

impl CallSettings {
    /// Whether local media has to be published at all
    pub fn should_publish(&self) -> bool {
        self.audio_on || self.video_on
    }
}

/// What the local participant is allowed to do in the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OwnCapability {
    SendAudio,
    SendVideo,
    Screenshare,
}

pub type OwnCapabilities = HashSet<OwnCapability>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_ids() {
        assert_eq!(PeerRole::Publisher.trace_id(), "pub");
        assert_eq!(PeerRole::Subscriber.trace_id(), "sub");
    }

    #[test]
    fn test_should_publish() {
        let mut settings = CallSettings {
            audio_on: false,
            video_on: false,
            ..CallSettings::default()
        };
        assert!(!settings.should_publish());
        settings.video_on = true;
        assert!(settings.should_publish());
    }

    #[test]
    fn test_sfu_event_json_shape() {
        let json = serde_json::to_value(SfuEvent::GoAway {
            reason: "rebalance".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "goAway");
        assert_eq!(json["reason"], "rebalance");
    }
}
