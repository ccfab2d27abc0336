//! Shared concurrency primitives
//!
//! - [`SerialQueue`]: runs submitted jobs one at a time, in submission order
//! - [`ConsumableBucket`]: lock-guarded buffer with consume/restore semantics
//! - [`DisposableBag`]: keyed set of background tasks aborted on removal

pub mod bucket;
pub mod disposable;
pub mod serial;

pub use bucket::ConsumableBucket;
pub use disposable::DisposableBag;
pub use serial::SerialQueue;
