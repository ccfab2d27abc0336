//! Stats and trace pipeline
//!
//! The collector samples both peer connections into an immutable report;
//! the reporter compresses the latest report, drains the trace buckets and
//! hands both to the SFU, restoring the traces if the delivery fails.

pub mod adapter;
pub mod collector;
pub mod compressor;
pub mod report;
pub mod reporter;
pub mod traces;
pub mod transformer;

pub use adapter::StatsAdapter;
pub use collector::{StatsCollector, StatsSource, TrackStorage};
pub use compressor::{CompressedReport, StatsCompressor};
pub use report::{RtcStatistics, StatEntry, StatsReport};
pub use reporter::{DeliveryOutcome, PayloadProvider, StatsDelivery, StatsPayload, StatsReporter};
pub use traces::{TraceBuckets, TraceEvent};
pub use transformer::{CodecInfo, DecoderStatsTransformer, EncoderStatsTransformer, PerformanceStats};
