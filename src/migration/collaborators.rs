//! Collaborators the migration machine drives

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::MigrationError;
use crate::protocol::{
    LocalTrack, MigrationTarget, PeerRole, SessionDescription, SfuEvent, SfuRequest,
};

/// Signaling channel to one SFU node
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    fn hostname(&self) -> String;

    async fn connect(&self) -> Result<(), MigrationError>;

    async fn send(&self, request: SfuRequest) -> Result<(), MigrationError>;

    /// Subscribe to events from the node. Events sent before subscribing are lost.
    fn events(&self) -> broadcast::Receiver<SfuEvent>;

    /// Send the publisher offer and wait for the node's answer
    async fn set_publisher(
        &self,
        session_id: &str,
        offer: &SessionDescription,
    ) -> Result<SessionDescription, MigrationError>;

    async fn disconnect(&self);
}

/// Builds the signaling channel for a migration target
pub trait SignalingConnector: Send + Sync {
    fn connect_to(&self, target: &MigrationTarget) -> Arc<dyn SignalingTransport>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OfferOptions {
    pub ice_restart: bool,
}

/// One direction of the media path
#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn role(&self) -> PeerRole;

    async fn create_offer(&self, options: OfferOptions) -> Result<SessionDescription, MigrationError>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), MigrationError>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), MigrationError>;

    /// Route future negotiation through a different signaling channel
    fn rebind(&self, signaling: Arc<dyn SignalingTransport>);

    fn add_track(&self, track: LocalTrack);

    fn unpublish_all_tracks(&self);

    async fn close(&self);
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        role: PeerRole,
        signaling: Arc<dyn SignalingTransport>,
    ) -> Result<Arc<dyn PeerConnection>, MigrationError>;
}

/// The call session that owns the live connections
#[async_trait]
pub trait MigrationHost: Send + Sync {
    /// Point the session's signaling at the new node
    fn rebind_signaling(&self, signaling: Arc<dyn SignalingTransport>);

    fn pause_subscriber(&self);

    /// Replace the subscriber connection; the old one is closed by the host
    async fn replace_subscriber(&self, subscriber: Arc<dyn PeerConnection>);

    /// Acquire local media for publishing
    async fn set_up_user_media(&self) -> Result<Vec<LocalTrack>, MigrationError>;
}
