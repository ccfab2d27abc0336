//! Diagnostic trace events and their per-source buckets

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use super::report::StatsReport;
use super::transformer::{DecoderStatsTransformer, EncoderStatsTransformer, PerformanceStats};
use crate::constants::SFU_TRACE_ID;
use crate::protocol::PeerRole;
use crate::sync::ConsumableBucket;

/// One diagnostic event awaiting delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub id: Option<String>,
    pub tag: String,
    pub data: Option<Value>,
    pub timestamp_ms: i64,
}

impl TraceEvent {
    pub fn new(id: Option<String>, tag: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            id,
            tag: tag.into(),
            data,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Event produced by the signaling channel
    pub fn sfu(tag: impl Into<String>, data: Option<Value>) -> Self {
        Self::new(Some(SFU_TRACE_ID.to_string()), tag, data)
    }

    pub fn peer(role: PeerRole, tag: impl Into<String>, data: Option<Value>) -> Self {
        Self::new(Some(role.trace_id().to_string()), tag, data)
    }

    /// Event with no source, e.g. a call settings change
    pub fn generic(tag: impl Into<String>, data: Option<Value>) -> Self {
        Self::new(None, tag, data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Sfu,
    PeerConnection,
    Generic,
}

impl Bucket {
    fn for_trace(id: Option<&str>) -> Self {
        match id {
            None | Some("") => Bucket::Generic,
            Some(SFU_TRACE_ID) => Bucket::Sfu,
            Some(_) => Bucket::PeerConnection,
        }
    }

    /// Flushed ids carry a reconnect prefix, so restore matches on the suffix
    fn for_restore(id: Option<&str>) -> Self {
        match id {
            None | Some("") => Bucket::Generic,
            Some(id) if id.ends_with(SFU_TRACE_ID) => Bucket::Sfu,
            Some(_) => Bucket::PeerConnection,
        }
    }
}

/// Buffers traces and performance stats until the reporter drains them
pub struct TraceBuckets {
    enabled: AtomicBool,
    sfu: ConsumableBucket<TraceEvent>,
    peer_connection: ConsumableBucket<TraceEvent>,
    generic: ConsumableBucket<TraceEvent>,
    encoder_stats: ConsumableBucket<PerformanceStats>,
    decoder_stats: ConsumableBucket<PerformanceStats>,
    encoder: Mutex<EncoderStatsTransformer>,
    decoder: Mutex<DecoderStatsTransformer>,
}

impl TraceBuckets {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            sfu: ConsumableBucket::new(),
            peer_connection: ConsumableBucket::new(),
            generic: ConsumableBucket::new(),
            encoder_stats: ConsumableBucket::new(),
            decoder_stats: ConsumableBucket::new(),
            encoder: Mutex::new(EncoderStatsTransformer::new()),
            decoder: Mutex::new(DecoderStatsTransformer::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Turning tracing off discards everything buffered so far
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.sfu.drain();
            self.peer_connection.drain();
            self.generic.drain();
            self.encoder_stats.drain();
            self.decoder_stats.drain();
        }
    }

    pub fn trace(&self, event: TraceEvent) {
        if !self.is_enabled() {
            return;
        }
        trace!(id = ?event.id, tag = %event.tag, "Trace recorded");
        self.bucket(Bucket::for_trace(event.id.as_deref())).append(event);
    }

    /// Feed a fresh collector report through the performance transformers
    pub fn ingest_report(&self, report: &StatsReport) {
        let encoded = self.encoder.lock().transform(report);
        let decoded = self.decoder.lock().transform(report);
        if !self.is_enabled() {
            return;
        }
        self.encoder_stats.extend(encoded);
        self.decoder_stats.extend(decoded);
    }

    /// Drain every trace bucket: peer connection, then SFU, then generic
    pub fn flush_traces(&self) -> Vec<TraceEvent> {
        let mut events = self.peer_connection.consume(true);
        events.extend(self.sfu.consume(true));
        events.extend(self.generic.consume(true));
        events
    }

    pub fn flush_encoder_stats(&self) -> Vec<PerformanceStats> {
        self.encoder_stats.consume(true)
    }

    pub fn flush_decoder_stats(&self) -> Vec<PerformanceStats> {
        self.decoder_stats.consume(true)
    }

    /// Return undelivered traces to the front of the buckets they came from
    pub fn restore(&self, events: Vec<TraceEvent>) {
        let mut sfu = Vec::new();
        let mut peer_connection = Vec::new();
        let mut generic = Vec::new();
        for event in events {
            match Bucket::for_restore(event.id.as_deref()) {
                Bucket::Sfu => sfu.push(event),
                Bucket::PeerConnection => peer_connection.push(event),
                Bucket::Generic => generic.push(event),
            }
        }
        self.sfu.insert_at_front(sfu);
        self.peer_connection.insert_at_front(peer_connection);
        self.generic.insert_at_front(generic);
    }

    pub fn pending_traces(&self) -> usize {
        self.sfu.len() + self.peer_connection.len() + self.generic.len()
    }

    fn bucket(&self, bucket: Bucket) -> &ConsumableBucket<TraceEvent> {
        match bucket {
            Bucket::Sfu => &self.sfu,
            Bucket::PeerConnection => &self.peer_connection,
            Bucket::Generic => &self.generic,
        }
    }
}

impl Default for TraceBuckets {
    fn default() -> Self {
        Self::new(true)
    }
}
