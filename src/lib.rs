//! # Call Control Plane
//!
//! Client-side session control for real-time calls: live SFU migration,
//! a reducer-style audio session store, and a stats/trace delivery pipeline.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                              CALL SESSION                                    │
//! │                                                                             │
//! │  ┌───────────────────────────┐        ┌──────────────────────────────────┐  │
//! │  │  Migration (migration::)  │        │     Audio Store (audio::)         │  │
//! │  │                           │        │                                  │  │
//! │  │  ready → preparing →      │        │  effects ──▶ dispatch ──▶ queue  │  │
//! │  │  join → joined →          │        │                  │               │  │
//! │  │  subscriber → ICE restart │        │                  ▼               │  │
//! │  │  → wait offer ◀── SFU     │        │        middleware ──▶ reducer    │  │
//! │  │  → publisher → answer     │        │          │              │        │  │
//! │  │  → publish → completed    │        │          ▼              ▼        │  │
//! │  │                           │        │   hardware module    state       │  │
//! │  └──────────┬────────────────┘        └───────────────┬──────────────────┘  │
//! │             │ signaling / peer connections            │ state snapshots     │
//! │             ▼                                         ▼                     │
//! │  ┌─────────────────────────────────────────────────────────────────────┐   │
//! │  │                     Stats Pipeline (stats::)                         │   │
//! │  │   collector (2s) → compressor → trace buckets → reporter (5s)        │   │
//! │  │        failure: traces restored to the front of their buckets        │   │
//! │  └─────────────────────────────────────────────────────────────────────┘   │
//! │                                     │                                       │
//! └─────────────────────────────────────┼───────────────────────────────────────┘
//!                                       │ sendStats
//!                                       ▼
//!                                   SFU node
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod migration;
pub mod protocol;
pub mod stats;
pub mod sync;

#[cfg(any(test, feature = "simulation"))]
pub mod simulation;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default stats collection interval in milliseconds
    pub const DEFAULT_COLLECTION_INTERVAL_MS: u64 = 2_000;

    /// Default stats delivery interval in milliseconds
    pub const DEFAULT_DELIVERY_INTERVAL_MS: u64 = 5_000;

    /// Delay before an expedited delivery in milliseconds
    pub const DEFAULT_URGENT_DELIVERY_DELAY_MS: u64 = 3_000;

    /// OS audio session poll period in milliseconds
    pub const DEFAULT_SYSTEM_POLL_INTERVAL_MS: u64 = 100;

    /// Capacity of broadcast event channels
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;

    /// Trace id reserved for signaling-server events
    pub const SFU_TRACE_ID: &str = "sfu";
}
