//! In-memory collaborators
//!
//! Stand-ins for the hardware audio module, the OS audio session, SFU
//! signaling and peer connections. Every collaborator records the calls it
//! receives so behaviour can be asserted on.

pub mod audio;
pub mod sfu;
pub mod stats;

pub use audio::{ModuleCall, SimulatedAudioModule, SimulatedSystemAudio, SystemCall};
pub use sfu::{
    FailurePoint, HostCall, LoopbackSignaling, PeerCall, RecordingMigrationHost, SimulatedConnector,
    SimulatedPeerConnection, SimulatedPeerConnectionFactory, SAMPLE_OFFER_SDP,
};
pub use stats::{SimulatedStatsSource, StaticTrackStorage};

/// Poll `condition` until it holds, sleeping between checks
#[cfg(test)]
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
