//! Error types for the call control plane

use thiserror::Error;

use crate::audio::{AudioCategory, AudioMode, CategoryOptions};

/// Main error type for the control plane
#[derive(Error, Debug)]
pub enum Error {
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Audio configuration error: {0}")]
    AudioConfiguration(#[from] ConfigurationError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Session migration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MigrationError {
    #[error("Signaling failed: {0}")]
    Signaling(String),

    #[error("Peer connection failed: {0}")]
    PeerConnection(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Migration abandoned")]
    Abandoned,
}

/// Hardware audio module and OS audio session errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    #[error("Recording toggle failed: {0}")]
    Recording(String),

    #[error("Mute toggle failed: {0}")]
    Mute(String),

    #[error("Stereo playout failed: {0}")]
    Stereo(String),

    #[error("Session configuration rejected by the OS: {0}")]
    SessionConfiguration(String),

    #[error("Audio module unavailable")]
    ModuleUnavailable,
}

/// Stats and trace delivery errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("No delivery target")]
    Unavailable,

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Encoding failed: {0}")]
    Encoding(String),
}

/// Audio session configuration validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Invalid combination: category {category}, mode {mode}, options {options:?}")]
    InvalidCombination {
        category: AudioCategory,
        mode: AudioMode,
        options: CategoryOptions,
    },
}

/// Result type alias for the control plane
pub type Result<T> = std::result::Result<T, Error>;
