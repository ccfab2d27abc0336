//! Control Plane Demo
//!
//! Runs one simulated call: audio session activation and an interruption,
//! a stats delivery, and a migration to a second SFU node.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use call_control_plane::{
    audio::{
        ActiveCallAudio, AudioDeviceModule, AudioSessionDelegate, CallAudioSession, CallContext,
        SessionConfiguration,
    },
    config::ControlPlaneConfig,
    migration::{
        MigrationCoordinator, MigrationEnvironment, MigrationSignal, MigrationStage, SignalingTransport,
    },
    protocol::{CallSettings, MigrationTarget, OwnCapability, PeerRole, SfuEvent},
    simulation::{
        LoopbackSignaling, RecordingMigrationHost, SimulatedAudioModule, SimulatedConnector,
        SimulatedPeerConnection, SimulatedPeerConnectionFactory, SimulatedStatsSource,
        SimulatedSystemAudio, StaticTrackStorage,
    },
    stats::{RtcStatistics, StatEntry, StatsAdapter},
};

struct LoggingDelegate;

impl AudioSessionDelegate for LoggingDelegate {
    fn did_update_speaker_on(&self, speaker_on: bool) {
        tracing::info!(speaker_on, "Speaker state changed by the OS");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting call control plane demo");

    let config = match std::env::args().nth(1) {
        Some(path) => ControlPlaneConfig::load(path)?,
        None => ControlPlaneConfig::load_or_default()?,
    };

    // Audio session
    let system = SimulatedSystemAudio::new(SessionConfiguration::default());
    let audio = CallAudioSession::new(system.clone(), &config.audio);
    let module = SimulatedAudioModule::new();
    audio
        .set_audio_device_module(Some(AudioDeviceModule::new(module.clone())))
        .await?;

    let (settings_tx, settings) = watch::channel(CallSettings::default());
    let (_capabilities_tx, capabilities) =
        watch::channel([OwnCapability::SendAudio, OwnCapability::SendVideo].into_iter().collect());
    let (_active_tx, active_call) = watch::channel(Some(ActiveCallAudio {
        call_id: "demo-call".into(),
        hifi_audio_enabled: false,
    }));
    audio.activate(CallContext {
        call_settings: settings,
        capabilities,
        active_call,
        delegate: Arc::new(LoggingDelegate),
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    system.begin_interruption();
    tokio::time::sleep(Duration::from_millis(50)).await;
    system.end_interruption(true);
    tokio::time::sleep(Duration::from_millis(100)).await;
    tracing::info!(
        recording_calls = ?module.recording_calls(),
        effects = ?audio.attached_effects(),
        "Audio session settled"
    );

    // Stats for the current node
    let node_a = LoopbackSignaling::new("sfu-a");
    let stats = StatsAdapter::new("demo-session", &config.stats, Arc::new(StaticTrackStorage::default()));
    let publisher_stats = SimulatedStatsSource::new(PeerRole::Publisher);
    publisher_stats.set_statistics(RtcStatistics::new(vec![StatEntry::new("OT01A", "outbound-rtp", 0.0)
        .with("kind", "audio")
        .with("bytesSent", 48_000)]));
    stats.set_delivery(Some(node_a.clone()));
    stats.set_publisher(Some(publisher_stats));
    stats.observe_events(node_a.events());
    stats.collect().await;
    let outcome = stats.reporter().deliver().await;
    tracing::info!(?outcome, hostname = "sfu-a", "Stats delivery finished");

    // Migration to a second node
    node_a.emit(SfuEvent::GoAway {
        reason: "rebalance".into(),
    });
    let connector = SimulatedConnector::new();
    let coordinator = MigrationCoordinator::new(MigrationEnvironment {
        connector: connector.clone(),
        factory: SimulatedPeerConnectionFactory::new(),
        host: RecordingMigrationHost::new(None, Vec::new()),
        config: config.migration.clone(),
    });
    coordinator.trigger(
        MigrationSignal {
            session_id: "demo-session".into(),
            from_hostname: "sfu-a".into(),
            target: MigrationTarget {
                hostname: "sfu-b".into(),
                url: "wss://sfu-b.example/ws".into(),
                token: "demo-token".into(),
            },
            call_settings: *settings_tx.borrow(),
            publisher: SimulatedPeerConnection::new(PeerRole::Publisher),
        },
        Box::new(|| tracing::info!("Migration adopted")),
    );

    if let Some(mut stages) = coordinator.stages() {
        let stage = stages.wait_for(MigrationStage::is_terminal).await?.clone();
        tracing::info!(%stage, "Migration finished");
    }

    stats.set_reconnect_attempts(1);
    stats.set_delivery(Some(connector.node("sfu-b")));
    stats.collect().await;
    let outcome = stats.reporter().deliver().await;
    tracing::info!(?outcome, hostname = "sfu-b", "Stats delivery finished");

    audio.deactivate().await?;
    tracing::info!("Demo finished");
    Ok(())
}
