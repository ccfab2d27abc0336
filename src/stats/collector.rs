//! Periodic sampling of peer connection statistics

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::report::{RtcStatistics, StatsReport};
use crate::error::Result;
use crate::protocol::{PeerRole, TrackKind};

const MIN_COLLECTION_INTERVAL: Duration = Duration::from_millis(1);

/// A peer connection that can report statistics
#[async_trait]
pub trait StatsSource: Send + Sync {
    fn role(&self) -> PeerRole;

    async fn statistics(&self) -> Result<RtcStatistics>;
}

/// Maps track ids to media kinds
pub trait TrackStorage: Send + Sync {
    fn track_kinds(&self) -> HashMap<String, TrackKind>;
}

struct CollectorInner {
    publisher: RwLock<Option<Arc<dyn StatsSource>>>,
    subscriber: RwLock<Option<Arc<dyn StatsSource>>>,
    tracks: Arc<dyn TrackStorage>,
    latest: watch::Sender<Option<Arc<StatsReport>>>,
}

/// Samples both peer connections and keeps only the latest report
#[derive(Clone)]
pub struct StatsCollector {
    inner: Arc<CollectorInner>,
}

impl StatsCollector {
    pub fn new(tracks: Arc<dyn TrackStorage>) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            inner: Arc::new(CollectorInner {
                publisher: RwLock::new(None),
                subscriber: RwLock::new(None),
                tracks,
                latest,
            }),
        }
    }

    pub fn set_publisher(&self, source: Option<Arc<dyn StatsSource>>) {
        *self.inner.publisher.write() = source;
    }

    pub fn set_subscriber(&self, source: Option<Arc<dyn StatsSource>>) {
        *self.inner.subscriber.write() = source;
    }

    pub fn has_publisher(&self) -> bool {
        self.inner.publisher.read().is_some()
    }

    pub fn latest(&self) -> Option<Arc<StatsReport>> {
        self.inner.latest.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<StatsReport>>> {
        self.inner.latest.subscribe()
    }

    /// Run one collection cycle. Returns `None` when no connection is attached.
    pub async fn collect(&self) -> Option<Arc<StatsReport>> {
        let publisher = self.inner.publisher.read().clone();
        let subscriber = self.inner.subscriber.read().clone();
        if publisher.is_none() && subscriber.is_none() {
            return None;
        }

        let report = Arc::new(StatsReport {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            publisher: sample(publisher).await,
            subscriber: sample(subscriber).await,
            track_kinds: self.inner.tracks.track_kinds(),
        });
        self.inner.latest.send_replace(Some(report.clone()));
        Some(report)
    }

    /// Collect every `interval` until `token` is cancelled
    pub fn start(&self, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        let collector = self.clone();
        let interval = if interval.is_zero() {
            warn!("Collection interval should be greater than 0");
            MIN_COLLECTION_INTERVAL
        } else {
            interval
        };
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        collector.collect().await;
                    }
                }
            }
            debug!("Stats collection stopped");
        })
    }
}

async fn sample(source: Option<Arc<dyn StatsSource>>) -> Option<RtcStatistics> {
    let source = source?;
    match source.statistics().await {
        Ok(stats) => Some(stats),
        Err(e) => {
            warn!(role = %source.role(), error = %e, "Failed to collect statistics");
            None
        }
    }
}
