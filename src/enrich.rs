//! Enrichment stage: localized title/body/summary for accepted items.
//!
//! The enrichment capability is opaque behind the [`Enricher`] trait.
//! [`HttpEnricher`] talks to an OpenAI-compatible chat endpoint;
//! [`RetryEnricher`] is a decorator that adds exponential backoff with
//! jitter around any implementation.
//!
//! The stage never drops an accepted item: when polishing fails, the
//! original un-enriched text is persisted with enrichment status
//! `failed` instead.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{EnrichmentError, Result};
use crate::models::{AcceptedItem, Article, EnrichmentStatus, RegionKey, RegionStatus};
use crate::progress::ProgressStore;
use crate::store::ArticleStore;
use crate::utils::{excerpt, slugify};

/// Localized text produced by one polish call.
#[derive(Debug, Clone, Deserialize)]
pub struct PolishedText {
    pub title: String,
    pub body: String,
    pub summary: String,
}

/// Opaque translate/polish capability.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn polish(
        &self,
        title: &str,
        body: &str,
        summary: &str,
        target_language: &str,
    ) -> std::result::Result<PolishedText, EnrichmentError>;
}

/// Enricher backed by an OpenAI-compatible chat completions endpoint.
pub struct HttpEnricher {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl HttpEnricher {
    pub fn new(endpoint: String, api_key: Option<String>, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl Enricher for HttpEnricher {
    #[instrument(level = "debug", skip_all, fields(target_language))]
    async fn polish(
        &self,
        title: &str,
        body: &str,
        summary: &str,
        target_language: &str,
    ) -> std::result::Result<PolishedText, EnrichmentError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| EnrichmentError::Api("no API key configured".to_string()))?;

        let prompt = format!(
            "Translate and polish the following news article into {target_language}. \
             Respond with JSON only, using the keys \"title\", \"body\" and \"summary\".\n\n\
             TITLE: {title}\n\nSUMMARY: {summary}\n\nBODY: {body}"
        );
        let payload = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a professional news editor and translator."},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.3,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| EnrichmentError::Api(e.to_string()))?
            .error_for_status()
            .map_err(|e| EnrichmentError::Api(e.to_string()))?;

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EnrichmentError::InvalidResponse(e.to_string()))?;
        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .ok_or(EnrichmentError::MissingField("choices[0].message.content"))?;
        debug!(content = %crate::utils::truncate_for_log(content, 200), "Model response");

        // Models occasionally fence the JSON; strip that before parsing.
        let trimmed = content
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();
        serde_json::from_str(trimmed)
            .map_err(|e| EnrichmentError::InvalidResponse(e.to_string()))
    }
}

/// Decorator adding retry with exponential backoff and jitter to any
/// [`Enricher`]. The delay doubles per attempt, capped at `max_delay`,
/// plus 0-250 ms of random jitter.
pub struct RetryEnricher<E> {
    inner: E,
    max_retries: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl<E: Enricher> RetryEnricher<E> {
    pub fn new(inner: E, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl<E: Enricher> Enricher for RetryEnricher<E> {
    async fn polish(
        &self,
        title: &str,
        body: &str,
        summary: &str,
        target_language: &str,
    ) -> std::result::Result<PolishedText, EnrichmentError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match self.inner.polish(title, body, summary, target_language).await {
                Ok(polished) => return Ok(polished),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                            error = %e,
                            "polish() exhausted retries"
                        );
                        return Err(e);
                    }

                    let mut delay = self.base_delay.saturating_mul(1u32 << (attempt - 1).min(31));
                    if delay > self.max_delay {
                        delay = self.max_delay;
                    }
                    let jitter_ms: u64 = rand::rng().random_range(0..=250);
                    let delay = delay + Duration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        ?delay,
                        error = %e,
                        "polish() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Aggregate outcome of one enrichment pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnrichmentOutcome {
    /// Articles handed to the store, enriched or not.
    pub persisted: usize,
    /// Articles whose every target language polished successfully.
    pub polished: usize,
    /// Articles persisted un-enriched after a polish failure.
    pub failed: usize,
}

/// Run the enrichment pass over the crawl's accepted items.
///
/// Items are grouped by origin region and each group is processed
/// sequentially in accumulation order. Store failures abort the pass;
/// polish failures only downgrade the affected item.
#[instrument(level = "info", skip_all, fields(items = items.len()))]
pub async fn run_enrichment(
    items: Vec<AcceptedItem>,
    target_languages: &[String],
    store: &dyn ArticleStore,
    enricher: &dyn Enricher,
    progress: &ProgressStore,
) -> Result<EnrichmentOutcome> {
    let mut outcome = EnrichmentOutcome::default();

    let mut groups: Vec<(RegionKey, Vec<AcceptedItem>)> = Vec::new();
    for item in items {
        match groups.iter_mut().find(|(key, _)| *key == item.region) {
            Some((_, group)) => group.push(item),
            None => groups.push((item.region.clone(), vec![item])),
        }
    }

    for (key, group) in groups {
        progress
            .update_region(&key, |r| r.status = RegionStatus::Polishing)
            .await?;
        info!(region = %key, items = group.len(), "Polishing region");

        for accepted in group {
            let article = enrich_item(&accepted, target_languages, enricher).await;
            let enriched = article.enrichment_status == EnrichmentStatus::Completed;
            store.create_article(article).await?;
            outcome.persisted += 1;
            if enriched {
                outcome.polished += 1;
                progress
                    .update_region(&key, |r| r.articles_polished += 1)
                    .await?;
                progress.update(|s| s.articles_polished += 1).await?;
            } else {
                outcome.failed += 1;
            }
        }

        progress
            .update_region(&key, |r| {
                r.status = RegionStatus::Completed;
                r.finished_at = Some(Utc::now());
            })
            .await?;
    }

    info!(
        persisted = outcome.persisted,
        polished = outcome.polished,
        failed = outcome.failed,
        "Enrichment pass finished"
    );
    Ok(outcome)
}

/// Polish one item into every target language. Any failure falls back to
/// the original-only article with status `failed`; the original fields
/// are preserved under the origin language either way.
async fn enrich_item(
    accepted: &AcceptedItem,
    target_languages: &[String],
    enricher: &dyn Enricher,
) -> Article {
    let origin_language = &accepted.region.language;
    let original_summary = excerpt(&accepted.item.body, 280);

    let mut article = base_article(accepted, &original_summary);

    for language in target_languages {
        if language == origin_language {
            continue;
        }
        match enricher
            .polish(&accepted.item.title, &accepted.item.body, &original_summary, language)
            .await
        {
            Ok(polished) => {
                article.title.insert(language.clone(), polished.title);
                article.body.insert(language.clone(), polished.body);
                article.summary.insert(language.clone(), polished.summary);
            }
            Err(e) => {
                warn!(
                    url = %accepted.item.url,
                    target_language = %language,
                    error = %e,
                    "Polish failed; persisting original un-enriched"
                );
                return base_article(accepted, &original_summary);
            }
        }
    }

    article.enrichment_status = EnrichmentStatus::Completed;
    debug!(url = %accepted.item.url, "Item enriched");
    article
}

/// Article carrying only the original-language fields, status `failed`
/// until enrichment proves otherwise.
fn base_article(accepted: &AcceptedItem, original_summary: &str) -> Article {
    let origin_language = accepted.region.language.clone();
    let now = Utc::now();
    let slug = slugify(&accepted.item.title);

    let mut title = HashMap::new();
    let mut body = HashMap::new();
    let mut summary = HashMap::new();
    title.insert(origin_language.clone(), accepted.item.title.clone());
    body.insert(origin_language.clone(), accepted.item.body.clone());
    summary.insert(origin_language.clone(), original_summary.to_string());

    Article {
        id: format!("{}-{}", now.timestamp_millis(), slug),
        title,
        body,
        summary,
        slug,
        category: accepted.category.clone(),
        original_url: accepted.item.url.clone(),
        original_language: origin_language,
        source_id: accepted.source_id.clone(),
        source_name: accepted.source_name.clone(),
        source_kind: accepted.source_kind,
        quality_score: accepted.quality_score,
        enrichment_status: EnrichmentStatus::Failed,
        views: 0,
        likes: 0,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CandidateItem, FetchKind};
    use crate::store::{ArticleFilter, MemoryArticleStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn accepted(title: &str, url: &str, region: RegionKey) -> AcceptedItem {
        AcceptedItem {
            item: CandidateItem {
                title: title.to_string(),
                body: "Original body text of the accepted story.".to_string(),
                url: url.to_string(),
                published_at: None,
                author: None,
                image_url: None,
            },
            source_id: "src-1".to_string(),
            source_name: "Source One".to_string(),
            source_kind: FetchKind::Feed,
            category: "general".to_string(),
            region,
            quality_score: 80,
        }
    }

    /// Succeeds for every call except titles listed in `fail_titles`.
    struct ScriptedEnricher {
        fail_titles: Vec<String>,
        calls: AtomicUsize,
    }

    impl ScriptedEnricher {
        fn new(fail_titles: &[&str]) -> Self {
            Self {
                fail_titles: fail_titles.iter().map(|s| s.to_string()).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Enricher for ScriptedEnricher {
        async fn polish(
            &self,
            title: &str,
            body: &str,
            _summary: &str,
            target_language: &str,
        ) -> std::result::Result<PolishedText, EnrichmentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_titles.iter().any(|t| t == title) {
                return Err(EnrichmentError::Api("scripted failure".to_string()));
            }
            Ok(PolishedText {
                title: format!("[{target_language}] {title}"),
                body: format!("[{target_language}] {body}"),
                summary: format!("[{target_language}] summary"),
            })
        }
    }

    /// Fails a fixed number of times, then succeeds.
    struct FlakyEnricher {
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl Enricher for FlakyEnricher {
        async fn polish(
            &self,
            title: &str,
            _body: &str,
            _summary: &str,
            _target_language: &str,
        ) -> std::result::Result<PolishedText, EnrichmentError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(EnrichmentError::Api("transient".to_string()));
            }
            Ok(PolishedText {
                title: title.to_string(),
                body: "b".to_string(),
                summary: "s".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn failed_item_is_persisted_with_original_text() {
        let dir = tempfile::tempdir().unwrap();
        let progress = ProgressStore::open(dir.path().join("progress.json")).await;
        let store = MemoryArticleStore::new(vec![]);
        let enricher = ScriptedEnricher::new(&["Doomed story headline"]);
        let region = RegionKey::new("en", "US");

        let items = vec![
            accepted("Successful story headline", "https://e.com/1", region.clone()),
            accepted("Doomed story headline", "https://e.com/2", region.clone()),
        ];
        let targets = vec!["en".to_string(), "de".to_string()];

        let outcome = run_enrichment(items, &targets, &store, &enricher, &progress)
            .await
            .unwrap();
        assert_eq!(outcome.persisted, 2);
        assert_eq!(outcome.polished, 1);
        assert_eq!(outcome.failed, 1);

        let articles = store.list_articles(ArticleFilter::default()).await.unwrap();
        assert_eq!(articles.len(), 2);

        let ok = articles
            .iter()
            .find(|a| a.original_url == "https://e.com/1")
            .unwrap();
        assert_eq!(ok.enrichment_status, EnrichmentStatus::Completed);
        assert_eq!(ok.title["de"], "[de] Successful story headline");
        assert_eq!(ok.title["en"], "Successful story headline");

        let failed = articles
            .iter()
            .find(|a| a.original_url == "https://e.com/2")
            .unwrap();
        assert_eq!(failed.enrichment_status, EnrichmentStatus::Failed);
        assert_eq!(failed.title["en"], "Doomed story headline");
        assert!(!failed.title.contains_key("de"));

        // Region finished despite the partial failure.
        let state = progress.read().await;
        let record = &state.regions[0];
        assert_eq!(record.status, RegionStatus::Completed);
        assert_eq!(record.articles_polished, 1);
    }

    #[tokio::test]
    async fn origin_language_is_never_re_polished() {
        let dir = tempfile::tempdir().unwrap();
        let progress = ProgressStore::open(dir.path().join("progress.json")).await;
        let store = MemoryArticleStore::new(vec![]);
        let enricher = ScriptedEnricher::new(&[]);

        let items = vec![accepted(
            "Nur auf Deutsch",
            "https://e.de/1",
            RegionKey::new("de", "DE"),
        )];
        run_enrichment(
            items,
            &["de".to_string()],
            &store,
            &enricher,
            &progress,
        )
        .await
        .unwrap();

        // The only target language is the origin, so no polish call happens.
        assert_eq!(enricher.calls.load(Ordering::SeqCst), 0);
        let articles = store.list_articles(ArticleFilter::default()).await.unwrap();
        assert_eq!(articles[0].enrichment_status, EnrichmentStatus::Completed);
    }

    #[tokio::test]
    async fn store_failure_aborts_the_pass() {
        let dir = tempfile::tempdir().unwrap();
        let progress = ProgressStore::open(dir.path().join("progress.json")).await;
        let store = MemoryArticleStore::new(vec![]).fail_creates();
        let enricher = ScriptedEnricher::new(&[]);

        let items = vec![accepted("Any story", "https://e.com/1", RegionKey::new("en", "US"))];
        let result = run_enrichment(
            items,
            &["en".to_string()],
            &store,
            &enricher,
            &progress,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_decorator_recovers_from_transient_failures() {
        let flaky = FlakyEnricher {
            failures_left: AtomicUsize::new(2),
        };
        let retry = RetryEnricher::new(flaky, 5, Duration::from_millis(10));
        let polished = retry.polish("t", "b", "s", "de").await.unwrap();
        assert_eq!(polished.title, "t");
    }

    #[tokio::test(start_paused = true)]
    async fn retry_decorator_gives_up_after_max_retries() {
        let flaky = FlakyEnricher {
            failures_left: AtomicUsize::new(100),
        };
        let retry = RetryEnricher::new(flaky, 2, Duration::from_millis(10));
        assert!(retry.polish("t", "b", "s", "de").await.is_err());
    }
}
