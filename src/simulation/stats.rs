//! Simulated statistics sources

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::protocol::{PeerRole, TrackKind};
use crate::stats::collector::{StatsSource, TrackStorage};
use crate::stats::report::RtcStatistics;

pub struct SimulatedStatsSource {
    role: PeerRole,
    statistics: Mutex<RtcStatistics>,
    fail: AtomicBool,
}

impl SimulatedStatsSource {
    pub fn new(role: PeerRole) -> Arc<Self> {
        Arc::new(Self {
            role,
            statistics: Mutex::new(RtcStatistics::default()),
            fail: AtomicBool::new(false),
        })
    }

    pub fn set_statistics(&self, statistics: RtcStatistics) {
        *self.statistics.lock() = statistics;
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StatsSource for SimulatedStatsSource {
    fn role(&self) -> PeerRole {
        self.role
    }

    async fn statistics(&self) -> Result<RtcStatistics> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Config(format!("{} statistics unavailable", self.role)));
        }
        Ok(self.statistics.lock().clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticTrackStorage {
    pub kinds: HashMap<String, TrackKind>,
}

impl TrackStorage for StaticTrackStorage {
    fn track_kinds(&self) -> HashMap<String, TrackKind> {
        self.kinds.clone()
    }
}
