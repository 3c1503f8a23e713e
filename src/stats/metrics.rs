//! Relay statistics
//!
//! Byte counters for the current accounting period plus peak values. All
//! counters live behind one lock so a snapshot never mixes values from
//! different updates.

use chrono::{DateTime, Datelike, Local, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Accounting period of the current local time
///
/// Periods are calendar months counted from year 0, so the same month of
/// different years never compares equal.
pub fn current_period() -> i32 {
    let now = Local::now();
    period_of(now.year(), now.month0())
}

/// Period for a year and 0-based month
pub fn period_of(year: i32, month0: u32) -> i32 {
    year * 12 + month0 as i32
}

/// Year and 0-based month of a period
pub fn period_parts(period: i32) -> (i32, u32) {
    (period.div_euclid(12), period.rem_euclid(12) as u32)
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    bytes_received: u64,
    bytes_sent: u64,
    peak_listeners: usize,
    peak_bytes_sent: u64,
    period: i32,
}

/// Point-in-time view of [`RelayStats`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Bytes read from upstream this period
    pub bytes_received: u64,
    /// Bytes queued to listeners this period
    pub bytes_sent: u64,
    /// Most listeners ever attached at once
    pub peak_listeners: usize,
    /// Largest `bytes_sent` seen at the end of any period or status read
    pub peak_bytes_sent: u64,
    /// Process start, milliseconds since the Unix epoch
    pub started_at: i64,
    /// Accounting period the byte counters belong to
    pub period: i32,
}

/// Shared relay counters
#[derive(Debug)]
pub struct RelayStats {
    counters: Mutex<Counters>,
    started_at: DateTime<Utc>,
}

impl RelayStats {
    /// Fresh counters for the current period
    pub fn new() -> Self {
        Self::seeded(0, 0, 0, 0, current_period())
    }

    /// Counters resumed from a previous run
    ///
    /// A negative `period` means the previous run never recorded one; the
    /// current period is used instead.
    pub fn seeded(
        bytes_received: u64,
        bytes_sent: u64,
        peak_listeners: usize,
        peak_bytes_sent: u64,
        period: i32,
    ) -> Self {
        let period = if period < 0 { current_period() } else { period };

        Self {
            counters: Mutex::new(Counters {
                bytes_received,
                bytes_sent,
                peak_listeners,
                peak_bytes_sent,
                period,
            }),
            started_at: Utc::now(),
        }
    }

    /// When this process started counting
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Account for one upstream chunk queued to `deliveries` listeners
    pub fn record_chunk(&self, len: usize, deliveries: usize) {
        let len = len as u64;
        let mut counters = self.counters.lock();
        counters.bytes_received += len;
        counters.bytes_sent += len * deliveries as u64;
    }

    /// Raise the listener peak to `count` if it is higher
    pub fn record_listeners(&self, count: usize) {
        let mut counters = self.counters.lock();
        if count > counters.peak_listeners {
            counters.peak_listeners = count;
        }
    }

    /// Raise the bytes-out peak to the current period's total; returns the peak
    pub fn observe_bytes_sent_peak(&self) -> u64 {
        let mut counters = self.counters.lock();
        if counters.bytes_sent > counters.peak_bytes_sent {
            counters.peak_bytes_sent = counters.bytes_sent;
        }
        counters.peak_bytes_sent
    }

    /// Start a new accounting period if `period` differs from the current one
    ///
    /// Byte counters restart from zero; peaks carry over. Returns whether a
    /// rollover happened.
    pub fn roll_period(&self, period: i32) -> bool {
        let mut counters = self.counters.lock();
        if counters.period == period {
            return false;
        }

        if counters.bytes_sent > counters.peak_bytes_sent {
            counters.peak_bytes_sent = counters.bytes_sent;
        }
        counters.bytes_received = 0;
        counters.bytes_sent = 0;
        counters.period = period;
        true
    }

    /// Consistent copy of every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = *self.counters.lock();

        StatsSnapshot {
            bytes_received: counters.bytes_received,
            bytes_sent: counters.bytes_sent,
            peak_listeners: counters.peak_listeners,
            peak_bytes_sent: counters.peak_bytes_sent,
            started_at: self.started_at.timestamp_millis(),
            period: counters.period,
        }
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}
