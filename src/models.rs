//! Data models for sources, candidate items, articles, and session progress.
//!
//! Three lifetimes of data live here:
//! - configuration ([`Source`]) — loaded from the catalog, read-only to the
//!   pipeline
//! - ephemeral crawl data ([`CandidateItem`], [`AcceptedItem`],
//!   [`CrawlJobResult`]) — scoped to one crawl job / session
//! - durable records ([`Article`], [`SessionProgress`], [`RegionProgress`])
//!   — serialized as camelCase JSON, matching the stored layouts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// How a source's content is retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchKind {
    /// RSS/Atom feed.
    Feed,
    /// JSON API endpoint.
    Api,
    /// HTML page scrape.
    Scrape,
}

impl fmt::Display for FetchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchKind::Feed => write!(f, "feed"),
            FetchKind::Api => write!(f, "api"),
            FetchKind::Scrape => write!(f, "scrape"),
        }
    }
}

/// Optional acceptance rules a source declares for its own content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceFilters {
    pub required_keywords: Option<Vec<String>>,
    pub excluded_keywords: Option<Vec<String>>,
    pub min_content_length: Option<usize>,
    pub max_content_length: Option<usize>,
    pub min_quality_score: Option<u8>,
    pub max_articles_per_crawl: Option<usize>,
}

/// A configured feed/endpoint descriptor. Created by configuration,
/// read-only to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: String,
    pub name: String,
    pub kind: FetchKind,
    pub url: String,
    pub category: String,
    pub language: String,
    pub region: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_minutes: u32,
    #[serde(default)]
    pub filters: SourceFilters,
}

fn default_active() -> bool {
    true
}

fn default_poll_interval() -> u32 {
    60
}

impl Source {
    pub fn region_key(&self) -> RegionKey {
        RegionKey {
            language: self.language.clone(),
            region: self.region.clone(),
        }
    }

    /// Accept/reject gate for scored candidates. Default 25.
    pub fn min_quality_score(&self) -> u8 {
        self.filters.min_quality_score.unwrap_or(25)
    }

    /// Per-source acceptance cap for one crawl job. Default 50.
    pub fn max_articles_per_crawl(&self) -> usize {
        self.filters.max_articles_per_crawl.unwrap_or(50)
    }
}

/// A (language, region) pairing used to group sources and track progress.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionKey {
    pub language: String,
    pub region: String,
}

impl RegionKey {
    pub fn new(language: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            region: region.into(),
        }
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.language, self.region)
    }
}

/// Raw extracted content, produced by the fetcher. Exists only within one
/// crawl job's lifetime and is never persisted directly.
#[derive(Debug, Clone)]
pub struct CandidateItem {
    pub title: String,
    pub body: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub image_url: Option<String>,
}

/// A candidate that passed every gate, tagged with its origin for the
/// enrichment stage.
#[derive(Debug, Clone)]
pub struct AcceptedItem {
    pub item: CandidateItem,
    pub source_id: String,
    pub source_name: String,
    pub source_kind: FetchKind,
    pub category: String,
    pub region: RegionKey,
    pub quality_score: u8,
}

/// Statistics from one run of a single-source crawl job. Consumed by the
/// coordinator immediately; only aggregate counts outlive it.
#[derive(Debug, Default)]
pub struct CrawlJobResult {
    pub source_id: String,
    pub found: usize,
    pub processed: usize,
    pub duplicates: usize,
    pub filtered: usize,
    pub failed: usize,
    pub accepted: Vec<AcceptedItem>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    /// False when the fetch itself failed.
    pub completed: bool,
}

/// Enrichment state of a persisted article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentStatus {
    Pending,
    Completed,
    Failed,
}

/// The final accepted unit, persisted by the article store. Title, body,
/// and summary are per-language maps keyed by language code; the origin
/// language always holds the original text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    pub title: HashMap<String, String>,
    pub body: HashMap<String, String>,
    pub summary: HashMap<String, String>,
    pub slug: String,
    pub category: String,
    pub original_url: String,
    pub original_language: String,
    pub source_id: String,
    pub source_name: String,
    pub source_kind: FetchKind,
    pub quality_score: u8,
    pub enrichment_status: EnrichmentStatus,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub likes: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Overall state of one crawl + enrichment session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Crawling,
    Polishing,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

/// State of one region's crawl track within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionStatus {
    Pending,
    Crawling,
    Polishing,
    Completed,
    Failed,
}

impl RegionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RegionStatus::Completed | RegionStatus::Failed)
    }
}

/// Durable per-region progress record. Counters are monotonic within a
/// session: `articles_found` counts fetcher output, `articles_processed`
/// counts crawl acceptances (bounded by the region quota), and
/// `articles_polished` counts successful enrichments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionProgress {
    pub language: String,
    pub region: String,
    pub status: RegionStatus,
    pub articles_found: usize,
    pub articles_processed: usize,
    pub articles_polished: usize,
    pub current_source: Option<String>,
    pub error: Option<String>,
    pub message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RegionProgress {
    pub fn new(key: &RegionKey) -> Self {
        Self {
            language: key.language.clone(),
            region: key.region.clone(),
            status: RegionStatus::Pending,
            articles_found: 0,
            articles_processed: 0,
            articles_polished: 0,
            current_source: None,
            error: None,
            message: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn key(&self) -> RegionKey {
        RegionKey::new(self.language.clone(), self.region.clone())
    }
}

/// The durable root progress record, stored as one JSON file per
/// deployment and overwritten wholesale on every update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionProgress {
    /// Millisecond-timestamp session id; 0 means no session has run.
    pub session_id: i64,
    pub status: SessionStatus,
    pub total_sources: usize,
    pub completed_sources: usize,
    pub current_source: Option<String>,
    pub articles_found: usize,
    pub articles_processed: usize,
    pub articles_polished: usize,
    pub region_quota: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub processed_sources: Vec<String>,
    pub regions: Vec<RegionProgress>,
    pub error: Option<String>,
}

impl Default for SessionProgress {
    fn default() -> Self {
        Self {
            session_id: 0,
            status: SessionStatus::Idle,
            total_sources: 0,
            completed_sources: 0,
            current_source: None,
            articles_found: 0,
            articles_processed: 0,
            articles_polished: 0,
            region_quota: 0,
            started_at: None,
            finished_at: None,
            processed_sources: Vec::new(),
            regions: Vec::new(),
            error: None,
        }
    }
}

impl SessionProgress {
    pub fn region_mut(&mut self, key: &RegionKey) -> Option<&mut RegionProgress> {
        self.regions
            .iter_mut()
            .find(|r| r.language == key.language && r.region == key.region)
    }
}
