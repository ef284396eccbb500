//! Region crawl coordinator: the orchestrator for one full session.
//!
//! Sources are grouped into (language, region) tracks which run
//! concurrently; within a track sources run sequentially against a
//! shared duplicate detector, so a track's quota and dedup decisions are
//! deterministic. The Progress Store is updated after every source.
//!
//! Failure policy: a failing source is logged and skipped, a failing
//! region track is failed without touching its siblings, but a progress
//! write failure aborts the whole session — a session whose state cannot
//! be recorded must not keep running.

use chrono::Utc;
use futures::future::join_all;
use itertools::Itertools;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::crawl::run_source_job;
use crate::dedup::DuplicateDetector;
use crate::enrich::{Enricher, run_enrichment};
use crate::error::{NewsdeskError, Result};
use crate::fetcher::Fetch;
use crate::models::{AcceptedItem, RegionKey, RegionStatus, SessionStatus, Source};
use crate::progress::ProgressStore;
use crate::store::ArticleStore;

/// Caller-facing knobs for one session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// Restrict the crawl to one configured source.
    pub source_id: Option<String>,
    /// Languages articles should exist in afterwards. Also restricts
    /// which sources are crawled when no explicit source is given.
    pub target_languages: Vec<String>,
    /// Acceptance quota per (language, region) track.
    pub articles_per_language: usize,
    /// Reject candidates without a same-day publish timestamp.
    pub only_today: bool,
}

/// What one completed session amounted to.
#[derive(Debug, Clone, Copy)]
pub struct SessionSummary {
    pub session_id: i64,
    pub accepted: usize,
    pub persisted: usize,
    pub polished: usize,
    pub enrichment_failures: usize,
    pub duration: Duration,
}

pub struct CrawlCoordinator {
    store: Arc<dyn ArticleStore>,
    progress: Arc<ProgressStore>,
    fetcher: Arc<dyn Fetch>,
}

impl CrawlCoordinator {
    pub fn new(
        store: Arc<dyn ArticleStore>,
        progress: Arc<ProgressStore>,
        fetcher: Arc<dyn Fetch>,
    ) -> Self {
        Self {
            store,
            progress,
            fetcher,
        }
    }

    /// Run one complete session: crawl all matching sources, then polish
    /// and persist everything accepted.
    #[instrument(level = "info", skip_all)]
    pub async fn run_session(
        &self,
        params: &SessionParams,
        enricher: &dyn Enricher,
    ) -> Result<SessionSummary> {
        let started = Instant::now();
        let sources = self.select_sources(params).await?;
        if sources.is_empty() {
            warn!("No matching active sources; session will complete empty");
        }

        let source_ids: Vec<String> = sources.iter().map(|s| s.id.clone()).collect();
        let regions: Vec<RegionKey> = sources.iter().map(|s| s.region_key()).unique().collect();
        let session_id = self
            .progress
            .start_session(&source_ids, &regions, params.articles_per_language)
            .await?;
        info!(
            session_id,
            sources = sources.len(),
            regions = regions.len(),
            quota = params.articles_per_language,
            "Session starting"
        );

        let accepted = match self.run_crawl(session_id, sources, params).await {
            Ok(accepted) => accepted,
            Err(e) => return self.abort(e).await,
        };
        let accepted_count = accepted.len();

        if let Err(e) = self
            .progress
            .update(|s| s.status = SessionStatus::Polishing)
            .await
        {
            return self.abort(e).await;
        }

        let outcome = match run_enrichment(
            accepted,
            &params.target_languages,
            self.store.as_ref(),
            enricher,
            &self.progress,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => return self.abort(e).await,
        };

        self.progress
            .finish_session(SessionStatus::Completed, None)
            .await?;

        let summary = SessionSummary {
            session_id,
            accepted: accepted_count,
            persisted: outcome.persisted,
            polished: outcome.polished,
            enrichment_failures: outcome.failed,
            duration: started.elapsed(),
        };
        info!(
            session_id,
            accepted = summary.accepted,
            persisted = summary.persisted,
            polished = summary.polished,
            failures = summary.enrichment_failures,
            duration_ms = summary.duration.as_millis() as u64,
            "Session completed"
        );
        Ok(summary)
    }

    async fn select_sources(&self, params: &SessionParams) -> Result<Vec<Source>> {
        if let Some(id) = &params.source_id {
            let source = self
                .store
                .find_source_by_id(id)
                .await?
                .ok_or_else(|| NewsdeskError::Config(format!("unknown source id: {id}")))?;
            if !source.active {
                return Err(NewsdeskError::Config(format!("source {id} is not active")));
            }
            return Ok(vec![source]);
        }

        let mut sources = self.store.list_active_sources().await?;
        if !params.target_languages.is_empty() {
            sources.retain(|s| params.target_languages.iter().any(|l| l == &s.language));
        }
        Ok(sources)
    }

    async fn run_crawl(
        &self,
        session_id: i64,
        sources: Vec<Source>,
        params: &SessionParams,
    ) -> Result<Vec<AcceptedItem>> {
        let groups = sources
            .into_iter()
            .map(|s| (s.region_key(), s))
            .into_group_map();

        let tracks = groups.into_iter().map(|(key, group)| {
            self.run_region_track(
                session_id,
                key,
                group,
                params.articles_per_language,
                params.only_today,
            )
        });

        let mut accepted = Vec::new();
        for result in join_all(tracks).await {
            accepted.extend(result?);
        }
        Ok(accepted)
    }

    /// One region's crawl track: sequential sources, shared detector,
    /// early stop at quota. Always leaves the region terminal.
    #[instrument(level = "info", skip_all, fields(region = %key))]
    async fn run_region_track(
        &self,
        session_id: i64,
        key: RegionKey,
        sources: Vec<Source>,
        quota: usize,
        only_today: bool,
    ) -> Result<Vec<AcceptedItem>> {
        self.progress
            .update_region(&key, |r| {
                r.status = RegionStatus::Crawling;
                r.started_at = Some(Utc::now());
            })
            .await?;

        let mut detector = DuplicateDetector::new();
        if let Err(e) = detector.hydrate(self.store.as_ref()).await {
            warn!(error = %e, "Detector hydration failed; failing region track");
            self.progress
                .update_region(&key, |r| {
                    r.status = RegionStatus::Failed;
                    r.error = Some(e.to_string());
                    r.finished_at = Some(Utc::now());
                })
                .await?;
            return Ok(Vec::new());
        }

        let mut accepted: Vec<AcceptedItem> = Vec::new();
        let mut quota_reached = false;

        for source in &sources {
            if accepted.len() >= quota {
                quota_reached = true;
                break;
            }
            if self.progress.is_source_processed(session_id, &source.id).await {
                debug!(source = %source.id, "Already processed this session; skipping");
                continue;
            }

            self.progress
                .update(|s| s.current_source = Some(source.name.clone()))
                .await?;
            self.progress
                .update_region(&key, |r| r.current_source = Some(source.name.clone()))
                .await?;

            let remaining = quota - accepted.len();
            let result =
                run_source_job(self.fetcher.as_ref(), &mut detector, source, remaining, only_today)
                    .await;
            if !result.completed {
                warn!(
                    source = %source.id,
                    errors = ?result.errors,
                    "Source crawl failed; continuing with remaining sources"
                );
            }

            let taken = result.accepted.len();
            self.progress
                .update_region(&key, |r| {
                    r.articles_found += result.found;
                    r.articles_processed += taken;
                    r.current_source = None;
                    if let Some(err) = result.errors.first() {
                        r.error = Some(err.clone());
                    }
                })
                .await?;
            self.progress
                .update(|s| {
                    s.articles_found += result.found;
                    s.articles_processed += taken;
                    s.completed_sources += 1;
                    s.current_source = None;
                })
                .await?;
            self.progress.mark_source_processed(&source.id).await?;

            accepted.extend(result.accepted);
        }
        if quota > 0 && accepted.len() >= quota {
            quota_reached = true;
        }

        let message = if quota_reached {
            "quota reached"
        } else if accepted.is_empty() {
            "no articles found"
        } else {
            "sources exhausted before quota"
        };
        self.progress
            .update_region(&key, |r| {
                r.status = RegionStatus::Completed;
                r.message = Some(message.to_string());
                r.finished_at = Some(Utc::now());
            })
            .await?;
        info!(accepted = accepted.len(), message, "Region crawl track finished");
        Ok(accepted)
    }

    /// Record the failure and surface it as a session abort. A secondary
    /// progress failure is logged, not raised; the original cause wins.
    async fn abort<T>(&self, cause: NewsdeskError) -> Result<T> {
        let message = cause.to_string();
        if let Err(e) = self
            .progress
            .finish_session(SessionStatus::Failed, Some(message.clone()))
            .await
        {
            warn!(error = %e, "Could not record session failure");
        }
        Err(NewsdeskError::SessionAbort(message))
    }
}
