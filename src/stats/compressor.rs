//! Delivery-sized encoding of collector reports
//!
//! Only the stat types the SFU consumes are kept, and every entry after the
//! first carries just the values that changed since the previous report.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::{Map, Value};

use super::report::{RtcStatistics, StatsReport};
use crate::protocol::PeerRole;

/// Stat types forwarded to the SFU
pub const RETAINED_TYPES: &[&str] = &[
    "codec",
    "candidate-pair",
    "inbound-rtp",
    "media-source",
    "outbound-rtp",
    "remote-inbound-rtp",
    "remote-outbound-rtp",
    "transport",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompressedReport {
    pub timestamp_ms: i64,
    pub publisher: Option<Value>,
    pub subscriber: Option<Value>,
}

#[derive(Debug, Default)]
pub struct StatsCompressor {
    previous: HashMap<PeerRole, HashMap<String, BTreeMap<String, Value>>>,
}

impl StatsCompressor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compress(&mut self, report: &StatsReport) -> CompressedReport {
        CompressedReport {
            timestamp_ms: report.timestamp_ms,
            publisher: report
                .publisher
                .as_ref()
                .map(|stats| self.compress_side(PeerRole::Publisher, stats)),
            subscriber: report
                .subscriber
                .as_ref()
                .map(|stats| self.compress_side(PeerRole::Subscriber, stats)),
        }
    }

    /// Forget earlier reports, e.g. after the peer connection was replaced
    pub fn reset(&mut self, role: PeerRole) {
        self.previous.remove(&role);
    }

    fn compress_side(&mut self, role: PeerRole, stats: &RtcStatistics) -> Value {
        let previous = self.previous.entry(role).or_default();
        let mut next = HashMap::new();
        let mut output = Map::new();

        for entry in stats.entries.values() {
            if !RETAINED_TYPES.contains(&entry.stat_type.as_str()) {
                continue;
            }
            let last = previous.get(&entry.id);
            let mut object = Map::new();
            if last.is_none() {
                object.insert("type".into(), Value::String(entry.stat_type.clone()));
            }
            object.insert("timestamp".into(), Value::from(entry.timestamp_ms));
            for (key, value) in &entry.values {
                let unchanged = last.and_then(|values| values.get(key)) == Some(value);
                if !unchanged {
                    object.insert(key.clone(), value.clone());
                }
            }
            output.insert(entry.id.clone(), Value::Object(object));
            next.insert(entry.id.clone(), entry.values.clone());
        }

        *previous = next;
        Value::Object(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::report::StatEntry;

    fn report(bytes: u64, timestamp: f64) -> StatsReport {
        StatsReport {
            publisher: Some(RtcStatistics::new(vec![
                StatEntry::new("OT01V", "outbound-rtp", timestamp)
                    .with("bytesSent", bytes)
                    .with("kind", "video"),
                StatEntry::new("CERT", "certificate", timestamp).with("fingerprint", "ab:cd"),
            ])),
            ..StatsReport::default()
        }
    }

    #[test]
    fn test_drops_unretained_types() {
        let compressed = StatsCompressor::new().compress(&report(10, 1.0));
        let publisher = compressed.publisher.unwrap();
        assert!(publisher.get("OT01V").is_some());
        assert!(publisher.get("CERT").is_none());
        assert!(compressed.subscriber.is_none());
    }

    #[test]
    fn test_second_report_carries_only_changes() {
        let mut compressor = StatsCompressor::new();
        compressor.compress(&report(10, 1.0));
        let second = compressor.compress(&report(25, 2.0)).publisher.unwrap();

        let entry = second.get("OT01V").unwrap();
        assert_eq!(entry.get("bytesSent"), Some(&Value::from(25u64)));
        assert_eq!(entry.get("timestamp"), Some(&Value::from(2.0)));
        assert!(entry.get("kind").is_none());
        assert!(entry.get("type").is_none());
    }

    #[test]
    fn test_reset_sends_full_entries_again() {
        let mut compressor = StatsCompressor::new();
        compressor.compress(&report(10, 1.0));
        compressor.reset(PeerRole::Publisher);
        let again = compressor.compress(&report(10, 2.0)).publisher.unwrap();
        assert_eq!(again["OT01V"]["kind"], Value::from("video"));
        assert_eq!(again["OT01V"]["type"], Value::from("outbound-rtp"));
    }
}
