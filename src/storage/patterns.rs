//! sled-backed pattern store
//!
//! Two trees, `outcomes` and `issues`. Keys are the record timestamp in
//! big-endian milliseconds followed by a big-endian sequence number, so
//! iteration order is chronological and records sharing a millisecond never
//! overwrite each other. Values are JSON.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{summarize, IntegrationReliability, PatternRecorder, StorageError};
use crate::types::{HealingOutcome, HealthIssue};

const OUTCOMES_TREE: &str = "outcomes";
const ISSUES_TREE: &str = "issues";

/// Persistent pattern recorder
#[derive(Clone)]
pub struct PatternStore {
    db: sled::Db,
    outcomes: sled::Tree,
    issues: sled::Tree,
}

fn timestamp_prefix(at: DateTime<Utc>) -> [u8; 8] {
    // Pre-epoch timestamps sort first.
    u64::try_from(at.timestamp_millis()).unwrap_or(0).to_be_bytes()
}

impl PatternStore {
    /// Open or create the store under `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let db = sled::open(path)?;
        let store = Self::from_db(db)?;
        tracing::info!(path = ?path, outcomes = store.outcomes.len(), issues = store.issues.len(), "Pattern store opened");
        Ok(store)
    }

    /// Temporary store removed on drop
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StorageError> {
        let outcomes = db.open_tree(OUTCOMES_TREE)?;
        let issues = db.open_tree(ISSUES_TREE)?;
        Ok(Self { db, outcomes, issues })
    }

    fn key(&self, at: DateTime<Utc>) -> Result<[u8; 16], StorageError> {
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&timestamp_prefix(at));
        key[8..].copy_from_slice(&self.db.generate_id()?.to_be_bytes());
        Ok(key)
    }

    fn insert<T: Serialize>(&self, tree: &sled::Tree, at: DateTime<Utc>, record: &T) -> Result<(), StorageError> {
        let value = serde_json::to_vec(record)?;
        tree.insert(self.key(at)?, value)?;
        Ok(())
    }

    /// Newest-first scan. Corrupt entries are skipped with a warning.
    fn newest<T: DeserializeOwned>(tree: &sled::Tree, limit: usize) -> Result<Vec<T>, StorageError> {
        let mut records = Vec::with_capacity(limit.min(256));
        for item in tree.iter().rev() {
            if records.len() >= limit {
                break;
            }
            let (_key, value) = item?;
            match serde_json::from_slice::<T>(&value) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable pattern record"),
            }
        }
        Ok(records)
    }

    /// Most recent health issues, newest first
    pub fn recent_issues(&self, limit: usize) -> Result<Vec<HealthIssue>, StorageError> {
        Self::newest(&self.issues, limit)
    }

    /// Delete every record older than `cutoff`. Returns the number removed.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let bound = timestamp_prefix(cutoff);
        let mut removed = 0;
        for tree in [&self.outcomes, &self.issues] {
            let keys: Vec<sled::IVec> = tree
                .range(..&bound[..])
                .keys()
                .collect::<Result<_, _>>()?;
            for key in keys {
                tree.remove(key)?;
                removed += 1;
            }
        }
        if removed > 0 {
            self.db.flush()?;
            tracing::info!(removed, cutoff = %cutoff, "Pruned old pattern records");
        }
        Ok(removed)
    }

    /// Apply a retention window measured back from `now`
    pub fn apply_retention(&self, retention_days: u32, now: DateTime<Utc>) -> Result<usize, StorageError> {
        self.prune_before(now - Duration::days(i64::from(retention_days)))
    }

    pub fn outcome_count(&self) -> usize {
        self.outcomes.len()
    }

    pub fn issue_count(&self) -> usize {
        self.issues.len()
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

impl PatternRecorder for PatternStore {
    fn record_outcome(&self, outcome: &HealingOutcome) -> Result<(), StorageError> {
        self.insert(&self.outcomes, outcome.attempted_at, outcome)?;
        tracing::debug!(
            entity_id = %outcome.entity_id,
            integration = ?outcome.integration_id,
            success = outcome.success,
            "Recorded healing outcome"
        );
        Ok(())
    }

    fn record_issue(&self, issue: &HealthIssue) -> Result<(), StorageError> {
        self.insert(&self.issues, issue.detected_at, issue)
    }

    fn recent_outcomes(&self, limit: usize) -> Result<Vec<HealingOutcome>, StorageError> {
        Self::newest(&self.outcomes, limit)
    }

    fn integration_reliability(&self) -> Result<Vec<IntegrationReliability>, StorageError> {
        let mut outcomes = Vec::new();
        for item in self.outcomes.iter() {
            let (_key, value) = item?;
            if let Ok(outcome) = serde_json::from_slice::<HealingOutcome>(&value) {
                outcomes.push(outcome);
            }
        }
        Ok(summarize(outcomes.iter()))
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}
