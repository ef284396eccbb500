//! Single-source crawl job: fetch, then gate every candidate through
//! duplicate check, filter rules, and the quality score.
//!
//! A job never raises for a single bad item — every rejection is counted
//! by category. Only a total fetch failure marks the job as not completed,
//! and even that is recorded in the result rather than thrown.

use chrono::Utc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::dedup::DuplicateDetector;
use crate::fetcher::Fetch;
use crate::models::{AcceptedItem, CandidateItem, CrawlJobResult, Source};
use crate::quality;

/// Run one crawl job for `source`, accepting at most `quota` items.
///
/// The effective cap is the smaller of the caller's quota and the source's
/// own `maxArticlesPerCrawl`. With `only_today`, candidates without a
/// same-day publish timestamp are filtered out.
#[instrument(level = "info", skip_all, fields(source = %source.id))]
pub async fn run_source_job(
    fetcher: &dyn Fetch,
    detector: &mut DuplicateDetector,
    source: &Source,
    quota: usize,
    only_today: bool,
) -> CrawlJobResult {
    let started = Instant::now();
    let mut result = CrawlJobResult {
        source_id: source.id.clone(),
        ..Default::default()
    };

    let outcome = match fetcher.fetch(source).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "Source fetch failed");
            result.errors.push(format!("{}: {e}", source.name));
            result.duration_ms = started.elapsed().as_millis() as u64;
            return result;
        }
    };

    result.found = outcome.items.len();
    result.failed = outcome.failed;
    let cap = quota.min(source.max_articles_per_crawl());

    for item in outcome.items {
        if result.accepted.len() >= cap {
            debug!(cap, "Quota reached; stopping early");
            break;
        }
        result.processed += 1;

        if detector.is_duplicate(&item.title, &item.url) {
            result.duplicates += 1;
            continue;
        }
        if !passes_filters(source, &item, only_today) {
            result.filtered += 1;
            continue;
        }
        let score =
            quality::score_with_tier(&item.title, &item.body, source.filters.min_quality_score);
        if score < source.min_quality_score() {
            debug!(score, gate = source.min_quality_score(), "Below quality gate");
            result.filtered += 1;
            continue;
        }

        if quality::is_high_quality(score) {
            debug!(score, "High-quality acceptance");
        }
        detector.add_content(&item.title, &item.url);
        result.accepted.push(AcceptedItem {
            item,
            source_id: source.id.clone(),
            source_name: source.name.clone(),
            source_kind: source.kind,
            category: source.category.clone(),
            region: source.region_key(),
            quality_score: score,
        });
    }

    result.completed = true;
    result.duration_ms = started.elapsed().as_millis() as u64;
    info!(
        found = result.found,
        accepted = result.accepted.len(),
        duplicates = result.duplicates,
        filtered = result.filtered,
        failed = result.failed,
        duration_ms = result.duration_ms,
        "Crawl job finished"
    );
    result
}

/// Keyword/length/date rules: ANY required keyword present if configured,
/// NONE of the excluded keywords, body length within bounds.
fn passes_filters(source: &Source, item: &CandidateItem, only_today: bool) -> bool {
    let haystack = format!("{} {}", item.title, item.body).to_lowercase();
    let filters = &source.filters;

    if let Some(required) = &filters.required_keywords {
        if !required.is_empty()
            && !required.iter().any(|kw| haystack.contains(&kw.to_lowercase()))
        {
            return false;
        }
    }
    if let Some(excluded) = &filters.excluded_keywords {
        if excluded.iter().any(|kw| haystack.contains(&kw.to_lowercase())) {
            return false;
        }
    }

    let len = item.body.chars().count();
    if let Some(min) = filters.min_content_length {
        if len < min {
            return false;
        }
    }
    if let Some(max) = filters.max_content_length {
        if len > max {
            return false;
        }
    }

    if only_today {
        // Undated items cannot be proven fresh, so they are excluded.
        match item.published_at {
            Some(published) => {
                if published.date_naive() != Utc::now().date_naive() {
                    return false;
                }
            }
            None => return false,
        }
    }

    true
}
