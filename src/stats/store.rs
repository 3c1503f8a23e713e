//! Statistics persistence
//!
//! Stats are kept in a small JSON file:
//!
//! ```json
//! {"bytes_in_month": 0, "bytes_out_month": 0, "month": 9, "year": 2013,
//!  "peaks": {"listeners": 0, "bytes_out_month": 0}}
//! ```
//!
//! `month` is the 0-based calendar month of the accounting period, `-1` if
//! unknown. Records written without a `year` are taken to be from the
//! current year.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Local};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

use super::metrics::{current_period, period_of, period_parts, RelayStats, StatsSnapshot};

/// Peak values in the persisted record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeakRecord {
    #[serde(default)]
    pub listeners: usize,
    #[serde(default)]
    pub bytes_out_month: u64,
}

/// Persisted statistics record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsRecord {
    #[serde(default)]
    pub bytes_in_month: u64,
    #[serde(default)]
    pub bytes_out_month: u64,
    #[serde(default = "unset_month")]
    pub month: i32,
    #[serde(default = "unset_year")]
    pub year: i32,
    #[serde(default)]
    pub peaks: PeakRecord,
}

fn unset_month() -> i32 {
    -1
}

fn unset_year() -> i32 {
    -1
}

impl Default for StatsRecord {
    fn default() -> Self {
        Self {
            bytes_in_month: 0,
            bytes_out_month: 0,
            month: unset_month(),
            year: unset_year(),
            peaks: PeakRecord::default(),
        }
    }
}

impl StatsRecord {
    /// Accounting period of this record, `-1` if it never recorded one
    pub fn period(&self) -> i32 {
        let Ok(month0) = u32::try_from(self.month) else {
            return -1;
        };
        let year = if self.year < 0 {
            Local::now().year()
        } else {
            self.year
        };
        period_of(year, month0.min(11))
    }

    /// Live counters seeded from this record
    pub fn into_stats(self) -> RelayStats {
        let period = self.period();
        RelayStats::seeded(
            self.bytes_in_month,
            self.bytes_out_month,
            self.peaks.listeners,
            self.peaks.bytes_out_month,
            period,
        )
    }
}

impl From<&StatsSnapshot> for StatsRecord {
    fn from(snapshot: &StatsSnapshot) -> Self {
        let (year, month0) = period_parts(snapshot.period);
        Self {
            bytes_in_month: snapshot.bytes_received,
            bytes_out_month: snapshot.bytes_sent,
            month: month0 as i32,
            year,
            peaks: PeakRecord {
                listeners: snapshot.peak_listeners,
                bytes_out_month: snapshot.peak_bytes_sent,
            },
        }
    }
}

/// File-backed statistics store
#[derive(Debug, Clone)]
pub struct StatsStore {
    path: PathBuf,
}

impl StatsStore {
    /// Store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File the record lives in
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Read the last saved record
    ///
    /// A missing file yields a fresh record; a malformed one is an error.
    pub fn load(&self) -> Result<StatsRecord> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No saved statistics, starting fresh");
                Ok(StatsRecord::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write a record, replacing the previous file atomically
    pub async fn save(&self, record: &StatsRecord) -> Result<()> {
        let json = serde_json::to_vec(record)?;
        let temp = self.temp_path();

        tokio::fs::write(&temp, json).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }

    /// Roll the accounting period if the month changed, then save a snapshot
    ///
    /// Failures are logged and reported as `false`; they never stop the relay.
    pub async fn persist(&self, stats: &RelayStats) -> bool {
        let period = current_period();
        if stats.roll_period(period) {
            tracing::info!(period = period, "Accounting period rolled over");
        }

        let record = StatsRecord::from(&stats.snapshot());
        match self.save(&record).await {
            Ok(()) => {
                tracing::info!(
                    path = %self.path.display(),
                    bytes_in = record.bytes_in_month,
                    bytes_out = record.bytes_out_month,
                    "Saved statistics"
                );
                true
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Could not save statistics");
                false
            }
        }
    }

    /// Spawn a task that persists `stats` every `interval` until cancelled
    pub fn spawn_persist_task(
        &self,
        stats: Arc<RelayStats>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let store = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        store.persist(&stats).await;
                    }
                }
            }
        })
    }
}
