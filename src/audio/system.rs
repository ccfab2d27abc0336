//! OS audio session collaborator and the snapshot source that polls it

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::state::{PortOverride, RouteDescriptor, SessionConfiguration};
use crate::error::HardwareError;

/// What the OS currently reports about its audio session
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SystemAudioSnapshot {
    pub configuration: SessionConfiguration,
    pub route: RouteDescriptor,
    pub is_active: bool,
    pub has_recording_permission: bool,
}

/// Notifications pushed by the OS
#[derive(Debug, Clone, PartialEq)]
pub enum SystemAudioEvent {
    InterruptionBegan,
    InterruptionEnded { should_resume: bool },
    RouteChanged { route: RouteDescriptor },
}

/// The OS audio session
pub trait SystemAudioSession: Send + Sync {
    fn snapshot(&self) -> SystemAudioSnapshot;

    fn events(&self) -> broadcast::Receiver<SystemAudioEvent>;

    fn set_configuration(&self, configuration: &SessionConfiguration) -> Result<(), HardwareError>;

    fn set_active(&self, active: bool) -> Result<(), HardwareError>;

    fn override_output_port(&self, port: PortOverride) -> Result<(), HardwareError>;
}

/// Leaf component that turns the OS session into a stream of snapshots.
///
/// Polling runs on a timer task; subscribers only see snapshots that differ
/// from the previous one.
#[derive(Clone)]
pub struct RouteSnapshotSource {
    system: Arc<dyn SystemAudioSession>,
    interval: Duration,
}

impl RouteSnapshotSource {
    pub fn new(system: Arc<dyn SystemAudioSession>, interval: Duration) -> Self {
        Self { system, interval }
    }

    pub fn current(&self) -> SystemAudioSnapshot {
        self.system.snapshot()
    }

    /// Start polling until `token` is cancelled or every receiver is dropped
    pub fn start(&self, token: CancellationToken) -> watch::Receiver<SystemAudioSnapshot> {
        let (tx, rx) = watch::channel(self.system.snapshot());
        let system = self.system.clone();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.is_closed() {
                            break;
                        }
                        let snapshot = system.snapshot();
                        tx.send_if_modified(|current| {
                            if *current == snapshot {
                                false
                            } else {
                                *current = snapshot;
                                true
                            }
                        });
                    }
                }
            }
            debug!("Route snapshot polling stopped");
        });

        rx
    }
}
