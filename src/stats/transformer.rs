//! Encoder and decoder performance stats derived from consecutive reports

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::report::{RtcStatistics, StatEntry, StatsReport};
use crate::protocol::TrackKind;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodecInfo {
    pub name: String,
    pub clock_rate: u64,
    pub payload_type: u64,
    pub fmtp: String,
}

impl CodecInfo {
    fn from_entry(entry: &StatEntry) -> Self {
        let name = entry
            .str("mimeType")
            .and_then(|mime| mime.rsplit('/').next())
            .unwrap_or_default()
            .to_string();
        Self {
            name,
            clock_rate: entry.u64("clockRate").unwrap_or(0),
            payload_type: entry.u64("payloadType").unwrap_or(0),
            fmtp: entry.str("sdpFmtpLine").unwrap_or_default().to_string(),
        }
    }
}

/// Per-interval encode or decode performance of one video stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub track_kind: TrackKind,
    pub codec: CodecInfo,
    pub avg_frame_time_ms: f64,
    pub avg_fps: f64,
    pub width: u64,
    pub height: u64,
    pub target_bitrate: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
struct Counters {
    timestamp_ms: i64,
    total_time_s: f64,
    frames: u64,
}

/// Average frame time and frame rate since `previous`
fn deltas(previous: Option<&Counters>, current: &Counters) -> (f64, f64) {
    let Some(previous) = previous else {
        return (0.0, 0.0);
    };
    let frames = current.frames.saturating_sub(previous.frames);
    let elapsed_ms = current.timestamp_ms - previous.timestamp_ms;
    if frames == 0 {
        return (0.0, 0.0);
    }
    let frame_time_ms = (current.total_time_s - previous.total_time_s).max(0.0) / frames as f64 * 1000.0;
    let fps = if elapsed_ms > 0 {
        frames as f64 * 1000.0 / elapsed_ms as f64
    } else {
        0.0
    };
    (frame_time_ms, fps)
}

fn resolve_kind(report: &StatsReport, stats: &RtcStatistics, entry: &StatEntry) -> Option<TrackKind> {
    entry
        .str("mediaSourceId")
        .and_then(|id| stats.get(id))
        .and_then(|source| report.kind_of(source))
        .or_else(|| report.kind_of(entry))
}

/// Derives encoder stats from the publisher's outbound video stream
#[derive(Debug, Default)]
pub struct EncoderStatsTransformer {
    previous: HashMap<TrackKind, Counters>,
}

impl EncoderStatsTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transform(&mut self, report: &StatsReport) -> Vec<PerformanceStats> {
        let Some(stats) = report.publisher.as_ref() else {
            self.previous.clear();
            return Vec::new();
        };

        let candidate = stats
            .of_type("outbound-rtp")
            .filter(|entry| entry.str("kind") != Some("audio"))
            .find_map(|entry| {
                let codec = stats.get(entry.str("codecId")?)?;
                let kind = resolve_kind(report, stats, entry)?;
                Some((entry, codec, kind))
            });

        let Some((entry, codec, kind)) = candidate else {
            self.previous.clear();
            return Vec::new();
        };

        let counters = Counters {
            timestamp_ms: report.timestamp_ms,
            total_time_s: entry.f64("totalEncodeTime").unwrap_or(0.0),
            frames: entry.u64("framesSent").unwrap_or(0),
        };
        let (avg_frame_time_ms, avg_fps) = deltas(self.previous.get(&kind), &counters);
        self.previous.insert(kind, counters);

        vec![PerformanceStats {
            track_kind: kind,
            codec: CodecInfo::from_entry(codec),
            avg_frame_time_ms,
            avg_fps,
            width: entry.u64("frameWidth").unwrap_or(0),
            height: entry.u64("frameHeight").unwrap_or(0),
            target_bitrate: entry.u64("targetBitrate"),
        }]
    }
}

/// Derives decoder stats from the largest inbound video stream
#[derive(Debug, Default)]
pub struct DecoderStatsTransformer {
    previous: Option<(String, Counters)>,
}

impl DecoderStatsTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transform(&mut self, report: &StatsReport) -> Vec<PerformanceStats> {
        let Some(stats) = report.subscriber.as_ref() else {
            self.previous = None;
            return Vec::new();
        };

        let area = |entry: &StatEntry| {
            entry.u64("frameWidth").unwrap_or(0) * entry.u64("frameHeight").unwrap_or(0)
        };
        let largest = stats
            .of_type("inbound-rtp")
            .filter(|entry| entry.str("kind") == Some("video"))
            .max_by_key(|entry| area(entry));

        let Some(entry) = largest else {
            self.previous = None;
            return Vec::new();
        };
        let Some(codec) = entry.str("codecId").and_then(|id| stats.get(id)) else {
            return Vec::new();
        };
        let kind = resolve_kind(report, stats, entry).unwrap_or(TrackKind::Video);

        let counters = Counters {
            timestamp_ms: report.timestamp_ms,
            total_time_s: entry.f64("totalDecodeTime").unwrap_or(0.0),
            frames: entry.u64("framesDecoded").unwrap_or(0),
        };
        // A different stream becoming the largest restarts the deltas
        let previous = self
            .previous
            .as_ref()
            .filter(|(id, _)| *id == entry.id)
            .map(|(_, counters)| counters);
        let (avg_frame_time_ms, avg_fps) = deltas(previous, &counters);
        self.previous = Some((entry.id.clone(), counters));

        vec![PerformanceStats {
            track_kind: kind,
            codec: CodecInfo::from_entry(codec),
            avg_frame_time_ms,
            avg_fps,
            width: entry.u64("frameWidth").unwrap_or(0),
            height: entry.u64("frameHeight").unwrap_or(0),
            target_bitrate: None,
        }]
    }
}
