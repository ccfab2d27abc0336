//! Wiring of collector, compressor, trace buckets and reporter for one call

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::collector::{StatsCollector, StatsSource, TrackStorage};
use super::compressor::StatsCompressor;
use super::report::StatsReport;
use super::reporter::{PayloadProvider, StatsDelivery, StatsPayload, StatsReporter};
use super::traces::{TraceBuckets, TraceEvent};
use crate::config::StatsConfig;
use crate::constants::SFU_TRACE_ID;
use crate::protocol::{CallSettings, PeerRole, SfuEvent, SfuRequest};
use crate::sync::DisposableBag;

const PUBLISHER_UPDATED: &str = "publisherUpdated";
const TRACK_MUTE_STATE_UPDATED: &str = "trackMuteStateUpdated";
const SFU_EVENTS: &str = "sfuEvents";

/// Rewrite a source id with the reconnect attempt it was produced under
fn tag_with_attempt(id: Option<String>, attempt: u32) -> Option<String> {
    let id = id?;
    let tagged = match id.as_str() {
        "pub" | "sub" => format!("{attempt}-{id}"),
        SFU_TRACE_ID => format!("{attempt}-{SFU_TRACE_ID}"),
        _ => id,
    };
    Some(tagged)
}

struct PayloadSource {
    session_id: String,
    collector: StatsCollector,
    traces: Arc<TraceBuckets>,
    compressor: Mutex<StatsCompressor>,
    reconnect_attempts: AtomicU32,
}

impl PayloadProvider for PayloadSource {
    fn prepare(&self) -> Option<StatsPayload> {
        let report = self.collector.latest()?;
        let compressed = self.compressor.lock().compress(&report);

        if let Some(stats) = &compressed.publisher {
            self.traces
                .trace(TraceEvent::peer(PeerRole::Publisher, "getstats", Some(stats.clone())));
        }
        if let Some(stats) = &compressed.subscriber {
            self.traces
                .trace(TraceEvent::peer(PeerRole::Subscriber, "getstats", Some(stats.clone())));
        }

        let attempt = self.reconnect_attempts.load(Ordering::SeqCst);
        let traces: Vec<TraceEvent> = self
            .traces
            .flush_traces()
            .into_iter()
            .map(|mut event| {
                event.id = tag_with_attempt(event.id.take(), attempt);
                event
            })
            .collect();
        debug!(count = traces.len(), attempt, "Traces flushed");

        Some(StatsPayload {
            session_id: self.session_id.clone(),
            report: compressed,
            traces,
            encoder_stats: self.traces.flush_encoder_stats(),
            decoder_stats: self.traces.flush_decoder_stats(),
        })
    }

    fn delivery_failed(&self, payload: StatsPayload) {
        self.traces.restore(payload.traces);
    }
}

/// Stats and traces for one call session
pub struct StatsAdapter {
    source: Arc<PayloadSource>,
    reporter: StatsReporter,
    collection_interval: Duration,
    urgent_delay: Duration,
    subscriptions: DisposableBag,
    token: CancellationToken,
    collection: Mutex<Option<JoinHandle<()>>>,
}

impl StatsAdapter {
    pub fn new(session_id: impl Into<String>, config: &StatsConfig, tracks: Arc<dyn TrackStorage>) -> Self {
        let source = Arc::new(PayloadSource {
            session_id: session_id.into(),
            collector: StatsCollector::new(tracks),
            traces: Arc::new(TraceBuckets::new(config.tracing_enabled)),
            compressor: Mutex::new(StatsCompressor::new()),
            reconnect_attempts: AtomicU32::new(0),
        });
        let reporter = StatsReporter::new(source.clone(), config.delivery_interval());
        Self {
            source,
            reporter,
            collection_interval: config.collection_interval(),
            urgent_delay: config.urgent_delivery_delay(),
            subscriptions: DisposableBag::new(),
            token: CancellationToken::new(),
            collection: Mutex::new(None),
        }
    }

    /// Start sampling and feeding the performance transformers
    pub fn start(&self) {
        let mut collection = self.collection.lock();
        if collection.is_some() {
            return;
        }
        *collection = Some(
            self.source
                .collector
                .start(self.collection_interval, self.token.child_token()),
        );

        let mut reports = self.source.collector.subscribe();
        let traces = self.source.traces.clone();
        let token = self.token.child_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = reports.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let report = reports.borrow_and_update().clone();
                        if let Some(report) = report {
                            traces.ingest_report(&report);
                        }
                    }
                }
            }
        });
    }

    pub fn traces(&self) -> &Arc<TraceBuckets> {
        &self.source.traces
    }

    pub fn reporter(&self) -> &StatsReporter {
        &self.reporter
    }

    pub fn latest_report(&self) -> Option<Arc<StatsReport>> {
        self.source.collector.latest()
    }

    pub fn reports(&self) -> watch::Receiver<Option<Arc<StatsReport>>> {
        self.source.collector.subscribe()
    }

    /// Run one collection cycle now
    pub async fn collect(&self) -> Option<Arc<StatsReport>> {
        let report = self.source.collector.collect().await;
        // A running collection loop ingests every published report itself
        if self.collection.lock().is_none() {
            if let Some(report) = &report {
                self.source.traces.ingest_report(report);
            }
        }
        report
    }

    pub fn trace(&self, event: TraceEvent) {
        self.source.traces.trace(event);
    }

    pub fn is_tracing_enabled(&self) -> bool {
        self.source.traces.is_enabled()
    }

    pub fn set_tracing_enabled(&self, enabled: bool) {
        self.source.traces.set_enabled(enabled);
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.source.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn set_reconnect_attempts(&self, attempts: u32) {
        self.source.reconnect_attempts.store(attempts, Ordering::SeqCst);
    }

    pub fn set_delivery_interval(&self, interval: Duration) {
        self.reporter.set_interval(interval);
    }

    pub fn set_delivery(&self, delivery: Option<Arc<dyn StatsDelivery>>) {
        if let Some(delivery) = &delivery {
            self.trace(TraceEvent::sfu(
                "create",
                Some(json!({ "hostname": delivery.hostname() })),
            ));
        }
        self.reporter.set_delivery(delivery);
    }

    /// A new publisher connection triggers an expedited delivery
    pub fn set_publisher(&self, publisher: Option<Arc<dyn StatsSource>>) {
        let attached = publisher.is_some();
        self.source.collector.set_publisher(publisher);
        self.source.compressor.lock().reset(PeerRole::Publisher);
        if attached {
            self.trace(TraceEvent::peer(PeerRole::Publisher, "create", None));
            self.reporter.schedule_urgent(PUBLISHER_UPDATED, self.urgent_delay);
        } else {
            self.reporter.cancel_urgent(PUBLISHER_UPDATED);
        }
    }

    pub fn set_subscriber(&self, subscriber: Option<Arc<dyn StatsSource>>) {
        let attached = subscriber.is_some();
        self.source.collector.set_subscriber(subscriber);
        self.source.compressor.lock().reset(PeerRole::Subscriber);
        if attached {
            self.trace(TraceEvent::peer(PeerRole::Subscriber, "create", None));
        }
    }

    pub fn did_update_call_settings(&self, settings: &CallSettings) {
        self.trace(TraceEvent::generic(
            "callSettings",
            serde_json::to_value(settings).ok(),
        ));
    }

    /// Trace an outgoing request; a video mute change expedites delivery
    pub fn record_request(&self, request: &SfuRequest) {
        self.trace(TraceEvent::sfu(request.name(), serde_json::to_value(request).ok()));
        if let SfuRequest::UpdateMuteStates { states, .. } = request {
            if states.iter().any(|state| state.kind.is_video()) {
                self.reporter
                    .schedule_urgent(TRACK_MUTE_STATE_UPDATED, self.urgent_delay);
            }
        }
    }

    /// Trace the SFU events worth keeping for diagnostics
    pub fn record_event(&self, event: &SfuEvent) {
        if let Some(trace) = event_trace(event) {
            self.trace(trace);
        }
    }

    /// Record events from a signaling channel until replaced or dropped
    pub fn observe_events(&self, mut events: broadcast::Receiver<SfuEvent>) {
        let traces = self.source.traces.clone();
        let token = self.token.child_token();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(event) => {
                            if let Some(trace) = event_trace(&event) {
                                traces.trace(trace);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(skipped, "SFU event trace lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
        self.subscriptions.insert(SFU_EVENTS, task);
    }

    /// Deliver now, unless a delivery is already running
    pub fn schedule_stats_reporting(&self) {
        self.reporter.trigger_delivery();
    }
}

fn event_trace(event: &SfuEvent) -> Option<TraceEvent> {
    match event {
        SfuEvent::CallEnded
        | SfuEvent::ChangePublishQuality { .. }
        | SfuEvent::GoAway { .. }
        | SfuEvent::Error { .. } => Some(TraceEvent::sfu(event.name(), serde_json::to_value(event).ok())),
        _ => None,
    }
}

impl Drop for StatsAdapter {
    fn drop(&mut self) {
        self.token.cancel();
        self.reporter.set_delivery(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::SignalingTransport;
    use crate::protocol::{TrackKind, TrackMuteState};
    use crate::simulation::{wait_until, FailurePoint, LoopbackSignaling, SimulatedStatsSource, StaticTrackStorage};
    use crate::stats::report::{RtcStatistics, StatEntry};
    use crate::stats::reporter::DeliveryOutcome;

    fn adapter() -> StatsAdapter {
        StatsAdapter::new(
            "session-1",
            &StatsConfig::default(),
            Arc::new(StaticTrackStorage::default()),
        )
    }

    fn publisher_source() -> Arc<SimulatedStatsSource> {
        let source = SimulatedStatsSource::new(PeerRole::Publisher);
        source.set_statistics(RtcStatistics::new(vec![StatEntry::new(
            "OT01A",
            "outbound-rtp",
            1.0,
        )
        .with("kind", "audio")]));
        source
    }

    #[test]
    fn test_tag_with_attempt() {
        assert_eq!(tag_with_attempt(Some("pub".into()), 2).as_deref(), Some("2-pub"));
        assert_eq!(tag_with_attempt(Some("sub".into()), 0).as_deref(), Some("0-sub"));
        assert_eq!(tag_with_attempt(Some("sfu".into()), 1).as_deref(), Some("1-sfu"));
        assert_eq!(tag_with_attempt(Some("custom".into()), 1).as_deref(), Some("custom"));
        assert_eq!(tag_with_attempt(None, 1), None);
    }

    #[tokio::test]
    async fn test_delivery_carries_tagged_traces_and_getstats() {
        let stats = adapter();
        let signaling = LoopbackSignaling::new("sfu-a");
        stats.set_delivery(Some(signaling.clone()));
        stats.set_publisher(Some(publisher_source()));
        stats.set_reconnect_attempts(3);
        stats.collect().await.unwrap();

        assert_eq!(
            stats.reporter().deliver().await,
            DeliveryOutcome::Delivered { traces: 3 }
        );
        let delivered = signaling.delivered_stats();
        let payload = &delivered[0];
        assert_eq!(payload.session_id, "session-1");
        let ids: Vec<_> = payload
            .traces
            .iter()
            .map(|t| (t.id.clone().unwrap_or_default(), t.tag.clone()))
            .collect();
        assert_eq!(
            ids,
            vec![
                ("3-pub".to_string(), "create".to_string()),
                ("3-pub".to_string(), "getstats".to_string()),
                ("3-sfu".to_string(), "create".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_delivery_restores_traces() {
        let stats = adapter();
        let signaling = LoopbackSignaling::new("sfu-a");
        signaling.fail_at(FailurePoint::SendStats);
        stats.set_delivery(Some(signaling.clone()));
        stats.set_publisher(Some(publisher_source()));
        stats.collect().await.unwrap();

        assert_eq!(
            stats.reporter().deliver().await,
            DeliveryOutcome::Failed { restored: 3 }
        );
        assert_eq!(stats.traces().pending_traces(), 3);

        signaling.recover(FailurePoint::SendStats);
        stats.trace(TraceEvent::sfu("healthCheckRequest", None));
        assert!(matches!(
            stats.reporter().deliver().await,
            DeliveryOutcome::Delivered { .. }
        ));
        let payload = &signaling.delivered_stats()[0];
        let tags: Vec<_> = payload.traces.iter().map(|t| t.tag.as_str()).collect();
        // Restored pub traces, a new getstats, then sfu traces restored ahead of the new one
        assert_eq!(
            tags,
            vec!["create", "getstats", "getstats", "create", "healthCheckRequest"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_video_mute_update_expedites_delivery() {
        let stats = adapter();
        let video = SfuRequest::UpdateMuteStates {
            session_id: "session-1".into(),
            states: vec![TrackMuteState {
                kind: TrackKind::Video,
                muted: true,
            }],
        };
        let audio = SfuRequest::UpdateMuteStates {
            session_id: "session-1".into(),
            states: vec![TrackMuteState {
                kind: TrackKind::Audio,
                muted: true,
            }],
        };

        stats.record_request(&audio);
        assert!(!stats.reporter().has_timer(TRACK_MUTE_STATE_UPDATED));
        stats.record_request(&video);
        assert!(stats.reporter().has_timer(TRACK_MUTE_STATE_UPDATED));
        assert_eq!(stats.traces().pending_traces(), 2);
    }

    #[tokio::test]
    async fn test_publisher_swap_schedules_and_cancels_urgent_delivery() {
        let stats = adapter();
        stats.set_publisher(Some(publisher_source()));
        assert!(stats.reporter().has_timer(PUBLISHER_UPDATED));
        stats.set_publisher(None);
        assert!(!stats.reporter().has_timer(PUBLISHER_UPDATED));
    }

    #[tokio::test]
    async fn test_observed_events_are_traced() {
        let stats = adapter();
        let signaling = LoopbackSignaling::new("sfu-a");
        stats.observe_events(signaling.events());

        signaling.emit(SfuEvent::HealthCheckResponse);
        signaling.emit(SfuEvent::GoAway {
            reason: "rebalance".into(),
        });
        crate::simulation::wait_until(|| stats.traces().pending_traces() == 1).await;

        let traces = stats.traces().flush_traces();
        assert_eq!(traces[0].tag, "goAway");
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_collect_ingests_once_while_started() {
        let tracks = StaticTrackStorage {
            kinds: [("camera".to_string(), TrackKind::Video)].into_iter().collect(),
        };
        let config = StatsConfig {
            collection_interval_ms: 60_000,
            ..StatsConfig::default()
        };
        let stats = StatsAdapter::new("session-1", &config, Arc::new(tracks));
        let source = SimulatedStatsSource::new(PeerRole::Publisher);
        source.set_statistics(RtcStatistics::new(vec![
            StatEntry::new("OT01V", "outbound-rtp", 1.0)
                .with("kind", "video")
                .with("codecId", "COT01_96")
                .with("mediaSourceId", "SV1")
                .with("framesSent", 30),
            StatEntry::new("SV1", "media-source", 0.0).with("trackIdentifier", "camera"),
            StatEntry::new("COT01_96", "codec", 0.0)
                .with("mimeType", "video/VP8")
                .with("clockRate", 90_000)
                .with("payloadType", 96),
        ]));
        stats.set_publisher(Some(source));
        stats.start();

        let mut encoded = Vec::new();
        wait_until(|| {
            encoded.extend(stats.traces().flush_encoder_stats());
            !encoded.is_empty()
        })
        .await;
        assert_eq!(encoded.len(), 1);

        stats.collect().await.unwrap();
        let mut encoded = Vec::new();
        wait_until(|| {
            encoded.extend(stats.traces().flush_encoder_stats());
            !encoded.is_empty()
        })
        .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        encoded.extend(stats.traces().flush_encoder_stats());
        assert_eq!(encoded.len(), 1);
    }
}
