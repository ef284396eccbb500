//! Durable, file-backed session progress.
//!
//! One JSON file per deployment holds the whole [`SessionProgress`]
//! record; every update is a read-merge-write of the in-memory copy,
//! persisted atomically (temp file + rename) and overwritten wholesale.
//! An interior mutex serializes updates issued by concurrent region
//! tracks; writes are last-write-wins, assuming a single orchestrator
//! process. An absent or unparsable file means "no progress", never an
//! error.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::Result;
use crate::models::{
    RegionKey, RegionProgress, RegionStatus, SessionProgress, SessionStatus,
};

pub struct ProgressStore {
    path: PathBuf,
    state: Mutex<SessionProgress>,
}

impl ProgressStore {
    /// Open the store, loading any previous record from disk.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = load_from_disk(&path).await;
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    /// Current record; corrupt or missing files surface as defaults.
    pub async fn read(&self) -> SessionProgress {
        self.state.lock().await.clone()
    }

    /// Merge a mutation into the record and persist it.
    pub async fn update<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut SessionProgress),
    {
        let mut state = self.state.lock().await;
        mutate(&mut state);
        self.persist(&state).await
    }

    /// Reset the record for a new session and seed one pending
    /// [`RegionProgress`] per region. Returns the new session id,
    /// monotonically derived from the clock.
    pub async fn start_session(
        &self,
        source_ids: &[String],
        regions: &[RegionKey],
        quota_per_region: usize,
    ) -> Result<i64> {
        let mut state = self.state.lock().await;
        let previous_id = state.session_id;
        let session_id = Utc::now().timestamp_millis().max(previous_id + 1);

        *state = SessionProgress {
            session_id,
            status: SessionStatus::Crawling,
            total_sources: source_ids.len(),
            region_quota: quota_per_region,
            started_at: Some(Utc::now()),
            regions: regions.iter().map(RegionProgress::new).collect(),
            ..Default::default()
        };
        self.persist(&state).await?;
        info!(session_id, sources = source_ids.len(), regions = regions.len(), "Session started");
        Ok(session_id)
    }

    /// Upsert the progress entry for one region.
    pub async fn update_region<F>(&self, key: &RegionKey, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut RegionProgress),
    {
        let mut state = self.state.lock().await;
        if state.region_mut(key).is_none() {
            state.regions.push(RegionProgress::new(key));
        }
        if let Some(region) = state.region_mut(key) {
            mutate(region);
        }
        self.persist(&state).await
    }

    /// Record a source as processed, idempotently.
    pub async fn mark_source_processed(&self, source_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.processed_sources.iter().any(|id| id == source_id) {
            state.processed_sources.push(source_id.to_string());
        }
        self.persist(&state).await
    }

    /// Whether a source was already handled by the given (still-running)
    /// session. A stored id from any other session never counts.
    pub async fn is_source_processed(&self, session_id: i64, source_id: &str) -> bool {
        let state = self.state.lock().await;
        state.session_id == session_id
            && state.processed_sources.iter().any(|id| id == source_id)
    }

    /// Mark the session terminal. Any region still pending is failed with
    /// the same message so no track is left dangling.
    pub async fn finish_session(
        &self,
        status: SessionStatus,
        error: Option<String>,
    ) -> Result<()> {
        self.update(|state| {
            state.status = status;
            state.finished_at = Some(Utc::now());
            state.current_source = None;
            state.error = error.clone();
            if status == SessionStatus::Failed {
                let message = error
                    .clone()
                    .unwrap_or_else(|| "session failed".to_string());
                for region in &mut state.regions {
                    if !region.status.is_terminal() {
                        region.status = RegionStatus::Failed;
                        region.error = Some(message.clone());
                        region.finished_at = Some(Utc::now());
                    }
                }
            }
        })
        .await
    }

    /// Read-only report with computed fields for the progress query.
    pub async fn report(&self) -> ProgressReport {
        let state = self.state.lock().await;
        ProgressReport::from_progress(&state, Utc::now())
    }

    async fn persist(&self, state: &SessionProgress) -> Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

async fn load_from_disk(path: &Path) -> SessionProgress {
    match fs::read_to_string(path).await {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt progress file; starting fresh");
                SessionProgress::default()
            }
        },
        Err(_) => SessionProgress::default(),
    }
}

/// Snapshot of session progress with derived figures: overall percentage
/// (crawl phase weighted 50%, polish phase weighted 50%), elapsed time,
/// and a naive remaining-time estimate.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub session_id: i64,
    pub status: SessionStatus,
    pub percent: f64,
    pub elapsed_secs: Option<u64>,
    pub eta_secs: Option<u64>,
    pub articles_found: usize,
    pub articles_processed: usize,
    pub articles_polished: usize,
    pub current_source: Option<String>,
    pub regions: Vec<RegionProgress>,
    pub error: Option<String>,
}

impl ProgressReport {
    fn from_progress(state: &SessionProgress, now: DateTime<Utc>) -> Self {
        let crawl_fraction = if state.total_sources == 0 {
            0.0
        } else {
            state.completed_sources as f64 / state.total_sources as f64
        };
        let polish_fraction = if state.articles_processed == 0 {
            0.0
        } else {
            state.articles_polished as f64 / state.articles_processed as f64
        };
        let percent = match state.status {
            SessionStatus::Completed => 100.0,
            _ => (crawl_fraction * 50.0 + polish_fraction * 50.0).clamp(0.0, 100.0),
        };

        let elapsed_secs = state.started_at.map(|start| {
            let end = state.finished_at.unwrap_or(now);
            (end - start).num_seconds().max(0) as u64
        });

        let completed_units = state.completed_sources + state.articles_polished;
        let total_units = state.total_sources + state.articles_processed;
        let eta_secs = match (elapsed_secs, state.status.is_terminal()) {
            (Some(elapsed), false) if completed_units > 0 && total_units > completed_units => {
                let per_unit = elapsed as f64 / completed_units as f64;
                Some((per_unit * (total_units - completed_units) as f64).round() as u64)
            }
            _ => None,
        };

        Self {
            session_id: state.session_id,
            status: state.status,
            percent,
            elapsed_secs,
            eta_secs,
            articles_found: state.articles_found,
            articles_processed: state.articles_processed,
            articles_polished: state.articles_polished,
            current_source: state.current_source.clone(),
            regions: state.regions.clone(),
            error: state.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_in(dir: &tempfile::TempDir) -> ProgressStore {
        ProgressStore::open(dir.path().join("progress.json")).await
    }

    #[tokio::test]
    async fn absent_file_reads_as_idle_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        let state = store.read().await;
        assert_eq!(state.status, SessionStatus::Idle);
        assert_eq!(state.session_id, 0);
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        tokio::fs::write(&path, "{{{ not json").await.unwrap();
        let store = ProgressStore::open(&path).await;
        assert_eq!(store.read().await.status, SessionStatus::Idle);
    }

    #[tokio::test]
    async fn start_session_seeds_pending_regions_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        let regions = vec![RegionKey::new("de", "DE"), RegionKey::new("fr", "FR")];
        let sources = vec!["a".to_string(), "b".to_string(), "c".to_string()];

        let id = store.start_session(&sources, &regions, 5).await.unwrap();
        assert!(id > 0);

        // Reopen from disk: the record survived the restart.
        let reopened = ProgressStore::open(dir.path().join("progress.json")).await;
        let state = reopened.read().await;
        assert_eq!(state.session_id, id);
        assert_eq!(state.status, SessionStatus::Crawling);
        assert_eq!(state.total_sources, 3);
        assert_eq!(state.region_quota, 5);
        assert_eq!(state.regions.len(), 2);
        assert!(state.regions.iter().all(|r| r.status == RegionStatus::Pending));
    }

    #[tokio::test]
    async fn session_ids_are_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        let regions = vec![RegionKey::new("en", "US")];
        let first = store.start_session(&[], &regions, 1).await.unwrap();
        let second = store.start_session(&[], &regions, 1).await.unwrap();
        let third = store.start_session(&[], &regions, 1).await.unwrap();
        assert!(second > first);
        assert!(third > second);
    }

    #[tokio::test]
    async fn mark_source_processed_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        let id = store
            .start_session(&["s1".to_string()], &[RegionKey::new("en", "US")], 5)
            .await
            .unwrap();

        store.mark_source_processed("s1").await.unwrap();
        store.mark_source_processed("s1").await.unwrap();
        assert_eq!(store.read().await.processed_sources, vec!["s1".to_string()]);

        assert!(store.is_source_processed(id, "s1").await);
        // A different session id never honors the stored list.
        assert!(!store.is_source_processed(id + 1, "s1").await);
    }

    #[tokio::test]
    async fn update_region_upserts_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        let key = RegionKey::new("nl", "NL");

        store
            .update_region(&key, |r| {
                r.status = RegionStatus::Crawling;
                r.articles_found = 4;
            })
            .await
            .unwrap();
        store
            .update_region(&key, |r| r.articles_processed = 2)
            .await
            .unwrap();

        let state = store.read().await;
        assert_eq!(state.regions.len(), 1);
        assert_eq!(state.regions[0].articles_found, 4);
        assert_eq!(state.regions[0].articles_processed, 2);
    }

    #[tokio::test]
    async fn failing_session_fails_pending_regions() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        let regions = vec![RegionKey::new("de", "DE"), RegionKey::new("fr", "FR")];
        store.start_session(&[], &regions, 5).await.unwrap();
        store
            .update_region(&RegionKey::new("de", "DE"), |r| {
                r.status = RegionStatus::Completed;
            })
            .await
            .unwrap();

        store
            .finish_session(SessionStatus::Failed, Some("store unwritable".to_string()))
            .await
            .unwrap();

        let state = store.read().await;
        assert_eq!(state.status, SessionStatus::Failed);
        assert_eq!(state.regions[0].status, RegionStatus::Completed);
        assert_eq!(state.regions[1].status, RegionStatus::Failed);
        assert_eq!(state.regions[1].error.as_deref(), Some("store unwritable"));
    }

    #[test]
    fn report_percent_and_eta_math() {
        let mut state = SessionProgress {
            session_id: 42,
            status: SessionStatus::Polishing,
            total_sources: 4,
            completed_sources: 4,
            articles_processed: 10,
            articles_polished: 5,
            started_at: Some(Utc::now() - chrono::Duration::seconds(90)),
            ..Default::default()
        };

        let report = ProgressReport::from_progress(&state, Utc::now());
        // Crawl phase done (50%) plus half the polish phase (25%).
        assert!((report.percent - 75.0).abs() < 0.01);
        assert_eq!(report.elapsed_secs, Some(90));
        // 9 of 14 units done in 90s -> 10s per unit, 5 remaining.
        assert_eq!(report.eta_secs, Some(50));

        state.status = SessionStatus::Completed;
        state.articles_polished = 10;
        let done = ProgressReport::from_progress(&state, Utc::now());
        assert_eq!(done.percent, 100.0);
        assert_eq!(done.eta_secs, None);
    }
}
