//! Statistics and persistence
//!
//! [`RelayStats`] is updated by the broadcaster (bytes) and the listener
//! registry (peak listeners). [`StatsStore`] saves snapshots on an interval
//! and seeds the counters at start-up so they survive restarts within an
//! accounting period.

pub mod metrics;
pub mod store;

pub use metrics::{current_period, period_of, period_parts, RelayStats, StatsSnapshot};
pub use store::{PeakRecord, StatsRecord, StatsStore};
