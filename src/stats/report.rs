//! Raw statistics as sampled from the peer connections

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::TrackKind;

/// One statistics object, e.g. an `outbound-rtp` stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub stat_type: String,
    pub timestamp_ms: f64,
    pub values: BTreeMap<String, Value>,
}

impl StatEntry {
    pub fn new(id: impl Into<String>, stat_type: impl Into<String>, timestamp_ms: f64) -> Self {
        Self {
            id: id.into(),
            stat_type: stat_type.into(),
            timestamp_ms,
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }

    pub fn u64(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(Value::as_u64)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }
}

/// Statistics of one peer connection, keyed by entry id
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RtcStatistics {
    pub entries: BTreeMap<String, StatEntry>,
}

impl RtcStatistics {
    pub fn new(entries: impl IntoIterator<Item = StatEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&StatEntry> {
        self.entries.get(id)
    }

    pub fn of_type<'a>(&'a self, stat_type: &'a str) -> impl Iterator<Item = &'a StatEntry> + 'a {
        self.entries.values().filter(move |e| e.stat_type == stat_type)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Immutable snapshot produced by one collection cycle
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StatsReport {
    pub timestamp_ms: i64,
    pub publisher: Option<RtcStatistics>,
    pub subscriber: Option<RtcStatistics>,
    /// Track id to media kind, for the tracks referenced by the stats
    pub track_kinds: HashMap<String, TrackKind>,
}

impl StatsReport {
    pub fn kind_of(&self, entry: &StatEntry) -> Option<TrackKind> {
        entry
            .str("trackIdentifier")
            .and_then(|id| self.track_kinds.get(id).copied())
            .or_else(|| match entry.str("kind") {
                Some("audio") => Some(TrackKind::Audio),
                Some("video") => Some(TrackKind::Video),
                _ => None,
            })
    }
}
