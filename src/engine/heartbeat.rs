//! Periodic task bookkeeping.
//!
//! The long-running loop wakes on a short tick and asks which tasks are
//! due. State is a plain `task -> last run` map persisted between runs, so
//! a restart does not re-run a 6-hourly settlement straight away.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use crate::config::AppConfig;
use crate::storage::{self, StorageError};

pub const MARKET_SCAN: &str = "market_scan";
pub const MOLTBOOK_CHECK: &str = "moltbook_check";
pub const SETTLEMENT: &str = "settlement";

/// How often each task runs.
#[derive(Debug, Clone)]
pub struct HeartbeatSchedule {
    pub market_scan: Duration,
    pub moltbook_check: Duration,
    pub settlement: Duration,
    /// The presence check only runs when Moltbook is in use.
    pub moltbook_enabled: bool,
}

/// Negative and NaN inputs are zero; out-of-range inputs saturate.
fn hours(h: f64) -> Duration {
    let secs = (h.max(0.0) * 3600.0) as i64;
    Duration::try_seconds(secs).unwrap_or(Duration::MAX)
}

impl HeartbeatSchedule {
    pub fn from_config(cfg: &AppConfig, moltbook_enabled: bool) -> Self {
        Self {
            market_scan: Duration::from_std(cfg.scan_interval()).unwrap_or(Duration::MAX),
            moltbook_check: hours(cfg.heartbeat.moltbook_check_hours),
            settlement: hours(cfg.heartbeat.settlement_hours),
            moltbook_enabled,
        }
    }

    fn tasks(&self) -> Vec<(&'static str, Duration)> {
        let mut tasks = vec![(MARKET_SCAN, self.market_scan)];
        if self.moltbook_enabled {
            tasks.push((MOLTBOOK_CHECK, self.moltbook_check));
        }
        tasks.push((SETTLEMENT, self.settlement));
        tasks
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeartbeatState {
    pub last_run: BTreeMap<String, DateTime<Utc>>,
}

impl HeartbeatState {
    /// Hours since `task` last ran; `None` if it never has.
    pub fn hours_since(&self, task: &str, now: DateTime<Utc>) -> Option<f64> {
        self.last_run
            .get(task)
            .map(|last| (now - *last).num_seconds() as f64 / 3600.0)
    }

    pub fn is_due(&self, task: &str, now: DateTime<Utc>, every: Duration) -> bool {
        match self.last_run.get(task) {
            Some(last) => now - *last >= every,
            None => true,
        }
    }

    /// Due tasks in run order: scan, presence check, settlement.
    pub fn due_tasks(&self, now: DateTime<Utc>, schedule: &HeartbeatSchedule) -> Vec<&'static str> {
        schedule
            .tasks()
            .into_iter()
            .filter(|(task, every)| self.is_due(task, now, *every))
            .map(|(task, _)| task)
            .collect()
    }

    pub fn completed(mut self, task: &str, now: DateTime<Utc>) -> Self {
        self.last_run.insert(task.to_string(), now);
        self
    }

    /// One line per task: `task: 1.5h ago (2026-01-01T00:00:00Z)`.
    pub fn summary(&self, now: DateTime<Utc>) -> Vec<String> {
        self.last_run
            .iter()
            .map(|(task, last)| {
                format!(
                    "{task}: {:.1}h ago ({})",
                    (now - *last).num_seconds() as f64 / 3600.0,
                    last.to_rfc3339()
                )
            })
            .collect()
    }

    pub fn load(path: &Path) -> Result<Self, StorageError> {
        Ok(storage::load_json(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        storage::save_json_atomic(self, path)
    }
}

/// Drive `work` unless `shutdown` resolves first. `None` means the work
/// was abandoned and its future dropped mid-flight.
pub async fn unless_shutdown<W, S>(work: W, shutdown: Pin<&mut S>) -> Option<W::Output>
where
    W: Future,
    S: Future,
{
    tokio::select! {
        out = work => Some(out),
        _ = shutdown => None,
    }
}
