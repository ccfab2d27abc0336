//! Periodic and expedited delivery of stats and traces to the SFU

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::compressor::CompressedReport;
use super::traces::TraceEvent;
use super::transformer::PerformanceStats;
use crate::error::DeliveryError;
use crate::sync::DisposableBag;

const DELIVERY_TIMER_KEY: &str = "delivery";

/// Everything sent to the SFU in one delivery
#[derive(Debug, Clone, Serialize)]
pub struct StatsPayload {
    pub session_id: String,
    pub report: CompressedReport,
    pub traces: Vec<TraceEvent>,
    pub encoder_stats: Vec<PerformanceStats>,
    pub decoder_stats: Vec<PerformanceStats>,
}

/// The SFU endpoint that accepts stats
#[async_trait]
pub trait StatsDelivery: Send + Sync {
    fn hostname(&self) -> String;

    async fn send_stats(&self, payload: StatsPayload) -> Result<(), DeliveryError>;
}

/// Builds payloads and takes back the ones that could not be delivered
pub trait PayloadProvider: Send + Sync {
    fn prepare(&self) -> Option<StatsPayload>;

    fn delivery_failed(&self, payload: StatsPayload);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { traces: usize },
    Failed { restored: usize },
    /// Another delivery was still running
    InFlight,
    /// No endpoint or nothing collected yet
    Skipped,
}

struct ReporterInner {
    provider: Arc<dyn PayloadProvider>,
    delivery: RwLock<Option<Arc<dyn StatsDelivery>>>,
    interval: Mutex<Duration>,
    in_flight: AtomicBool,
    timers: DisposableBag,
}

/// Clears the in-flight flag however the delivery ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct StatsReporter {
    inner: Arc<ReporterInner>,
}

impl StatsReporter {
    pub fn new(provider: Arc<dyn PayloadProvider>, interval: Duration) -> Self {
        Self {
            inner: Arc::new(ReporterInner {
                provider,
                delivery: RwLock::new(None),
                interval: Mutex::new(interval),
                in_flight: AtomicBool::new(false),
                timers: DisposableBag::new(),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        *self.inner.interval.lock()
    }

    /// Replacing the endpoint restarts the delivery timer
    pub fn set_delivery(&self, delivery: Option<Arc<dyn StatsDelivery>>) {
        let hostname = delivery.as_ref().map(|d| d.hostname());
        *self.inner.delivery.write() = delivery;
        match hostname {
            Some(hostname) => {
                debug!(%hostname, interval = ?self.interval(), "Stats delivery scheduled");
                self.schedule_periodic();
            }
            None => {
                self.inner.timers.remove(DELIVERY_TIMER_KEY);
            }
        }
    }

    pub fn set_interval(&self, interval: Duration) {
        *self.inner.interval.lock() = interval;
        if self.inner.delivery.read().is_some() {
            self.schedule_periodic();
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub async fn deliver(&self) -> DeliveryOutcome {
        deliver(&self.inner).await
    }

    /// Deliver in the background without waiting for the outcome
    pub fn trigger_delivery(&self) {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            if let Some(inner) = weak.upgrade() {
                deliver(&inner).await;
            }
        });
    }

    /// One delivery after `delay`. Scheduling the same key again restarts the wait.
    pub fn schedule_urgent(&self, key: &str, delay: Duration) {
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                deliver(&inner).await;
            }
        });
        self.inner.timers.insert(key, task);
    }

    pub fn cancel_urgent(&self, key: &str) {
        self.inner.timers.remove(key);
    }

    pub fn has_timer(&self, key: &str) -> bool {
        self.inner.timers.contains(key)
    }

    fn schedule_periodic(&self) {
        let interval = self.interval();
        if interval.is_zero() {
            warn!("Delivery interval should be greater than 0");
            self.inner.timers.remove(DELIVERY_TIMER_KEY);
            return;
        }

        let weak: Weak<ReporterInner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                deliver(&inner).await;
            }
        });
        self.inner.timers.insert(DELIVERY_TIMER_KEY, task);
    }
}

async fn deliver(inner: &ReporterInner) -> DeliveryOutcome {
    let Some(delivery) = inner.delivery.read().clone() else {
        return DeliveryOutcome::Skipped;
    };
    if inner
        .in_flight
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        debug!("Stats delivery already in flight");
        return DeliveryOutcome::InFlight;
    }
    let _guard = InFlight(&inner.in_flight);

    let Some(payload) = inner.provider.prepare() else {
        return DeliveryOutcome::Skipped;
    };

    let traces = payload.traces.len();
    debug!(
        hostname = %delivery.hostname(),
        timestamp = payload.report.timestamp_ms,
        traces,
        "Delivering stats report"
    );
    match delivery.send_stats(payload.clone()).await {
        Ok(()) => DeliveryOutcome::Delivered { traces },
        Err(e) => {
            warn!(error = %e, restored = traces, "Stats delivery failed");
            inner.provider.delivery_failed(payload);
            DeliveryOutcome::Failed { restored: traces }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct CountingProvider {
        prepared: AtomicUsize,
        failed: Mutex<Vec<StatsPayload>>,
    }

    impl PayloadProvider for CountingProvider {
        fn prepare(&self) -> Option<StatsPayload> {
            let n = self.prepared.fetch_add(1, Ordering::SeqCst);
            Some(StatsPayload {
                session_id: "session".into(),
                report: CompressedReport::default(),
                traces: vec![TraceEvent::generic(format!("trace-{n}"), None)],
                encoder_stats: Vec::new(),
                decoder_stats: Vec::new(),
            })
        }

        fn delivery_failed(&self, payload: StatsPayload) {
            self.failed.lock().push(payload);
        }
    }

    #[derive(Default)]
    struct ScriptedDelivery {
        fail: AtomicBool,
        gate: Option<Arc<Notify>>,
        delivered: AtomicUsize,
    }

    #[async_trait]
    impl StatsDelivery for ScriptedDelivery {
        fn hostname(&self) -> String {
            "sfu-test".into()
        }

        async fn send_stats(&self, _payload: StatsPayload) -> Result<(), DeliveryError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(DeliveryError::Send("connection reset".into()));
            }
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_no_endpoint_skips() {
        let provider = Arc::new(CountingProvider::default());
        let reporter = StatsReporter::new(provider.clone(), Duration::from_secs(5));
        assert_eq!(reporter.deliver().await, DeliveryOutcome::Skipped);
        assert_eq!(provider.prepared.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_hands_payload_back() {
        let provider = Arc::new(CountingProvider::default());
        let reporter = StatsReporter::new(provider.clone(), Duration::from_secs(5));
        let delivery = Arc::new(ScriptedDelivery::default());
        delivery.fail.store(true, Ordering::SeqCst);
        reporter.set_delivery(Some(delivery));

        assert_eq!(reporter.deliver().await, DeliveryOutcome::Failed { restored: 1 });
        assert_eq!(provider.failed.lock().len(), 1);
        assert!(!reporter.is_in_flight());
    }

    #[tokio::test]
    async fn test_single_delivery_in_flight() {
        let provider = Arc::new(CountingProvider::default());
        let reporter = StatsReporter::new(provider.clone(), Duration::from_secs(5));
        let gate = Arc::new(Notify::new());
        let delivery = Arc::new(ScriptedDelivery {
            gate: Some(gate.clone()),
            ..ScriptedDelivery::default()
        });
        reporter.set_delivery(Some(delivery.clone()));

        let first = tokio::spawn({
            let reporter = reporter.clone();
            async move { reporter.deliver().await }
        });
        while !reporter.is_in_flight() {
            tokio::task::yield_now().await;
        }
        assert_eq!(reporter.deliver().await, DeliveryOutcome::InFlight);

        gate.notify_one();
        assert_eq!(first.await.unwrap(), DeliveryOutcome::Delivered { traces: 1 });
        assert_eq!(provider.prepared.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_and_urgent_delivery() {
        let provider = Arc::new(CountingProvider::default());
        let reporter = StatsReporter::new(provider.clone(), Duration::from_secs(5));
        let delivery = Arc::new(ScriptedDelivery::default());
        reporter.set_delivery(Some(delivery.clone()));

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(delivery.delivered.load(Ordering::SeqCst), 1);

        reporter.schedule_urgent("publisherUpdated", Duration::from_secs(3));
        assert!(reporter.has_timer("publisherUpdated"));
        tokio::time::sleep(Duration::from_millis(3_100)).await;
        assert_eq!(delivery.delivered.load(Ordering::SeqCst), 2);
        assert!(!reporter.has_timer("publisherUpdated"));

        reporter.set_delivery(None);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(delivery.delivered.load(Ordering::SeqCst), 2);
    }
}
