//! Alert dedupe window.
//!
//! Maps `market_id -> last_alerted_at`. A market may be alerted again only
//! once the configured cooldown has fully elapsed. Alerts that no sink
//! accepted are kept as pending until a later delivery succeeds. Both maps
//! are persisted between runs so a restart doesn't re-spam every open edge.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::storage::{self, StorageError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertCooldown {
    last_alerted: HashMap<String, DateTime<Utc>>,
    /// Markets whose alert was emitted but never delivered.
    #[serde(default)]
    pending: HashMap<String, DateTime<Utc>>,
}

impl AlertCooldown {
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff the market has never been alerted or `now - last >= cooldown`.
    pub fn should_alert(&self, market_id: &str, now: DateTime<Utc>, cooldown: Duration) -> bool {
        match self.last_alerted.get(market_id) {
            None => true,
            Some(last) => now - *last >= cooldown,
        }
    }

    /// Record a delivered alert. Clears any pending entry.
    pub fn record(&mut self, market_id: &str, now: DateTime<Utc>) {
        self.pending.remove(market_id);
        self.last_alerted.insert(market_id.to_string(), now);
    }

    /// Remember an alert that no sink accepted. Keeps the first attempt time.
    pub fn mark_pending(&mut self, market_id: &str, at: DateTime<Utc>) {
        self.pending.entry(market_id.to_string()).or_insert(at);
    }

    pub fn is_pending(&self, market_id: &str) -> bool {
        self.pending.contains_key(market_id)
    }

    /// Keep only pending entries for which `keep` returns true.
    pub fn retain_pending(&mut self, mut keep: impl FnMut(&str) -> bool) -> usize {
        let before = self.pending.len();
        self.pending.retain(|market_id, _| keep(market_id));
        before - self.pending.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn last_alerted(&self, market_id: &str) -> Option<DateTime<Utc>> {
        self.last_alerted.get(market_id).copied()
    }

    /// Drop entries whose window has expired. Returns how many were removed.
    pub fn prune(&mut self, now: DateTime<Utc>, cooldown: Duration) -> usize {
        let before = self.last_alerted.len();
        self.last_alerted.retain(|_, last| now - *last < cooldown);
        before - self.last_alerted.len()
    }

    pub fn len(&self) -> usize {
        self.last_alerted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_alerted.is_empty() && self.pending.is_empty()
    }

    /// Load from disk; a missing file is an empty map.
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let cooldown = storage::load_json(path)?.unwrap_or_default();
        Ok(cooldown)
    }

    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        storage::save_json_atomic(self, path)?;
        debug!(
            entries = self.len(),
            pending = self.pending_count(),
            "Alert cooldown saved"
        );
        Ok(())
    }
}
