//! Duplicate detection for candidate items.
//!
//! The detector keeps process-local sets of seen URLs and canonical
//! lowercased titles, lazily hydrated once per detector lifetime from the
//! article store's existing accepted articles. Decision order:
//! exact URL match, exact normalized title match, then token-set (Jaccard)
//! similarity against every seen title with a 0.8 threshold.

use std::collections::HashSet;
use tracing::{debug, info};

use crate::error::Result;
use crate::store::{ArticleFilter, ArticleStore};

const TITLE_SIMILARITY_THRESHOLD: f64 = 0.8;

#[derive(Debug, Default)]
pub struct DuplicateDetector {
    seen_titles: HashSet<String>,
    seen_urls: HashSet<String>,
    hydrated: bool,
}

impl DuplicateDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load seen titles/URLs from the store's existing articles.
    /// Idempotent: a second call is a no-op until [`reset`](Self::reset).
    pub async fn hydrate(&mut self, store: &dyn ArticleStore) -> Result<()> {
        if self.hydrated {
            return Ok(());
        }
        let articles = store.list_articles(ArticleFilter::default()).await?;
        for article in &articles {
            for title in article.title.values() {
                self.seen_titles.insert(normalize_title(title));
            }
            self.seen_urls.insert(article.original_url.clone());
        }
        self.hydrated = true;
        info!(
            articles = articles.len(),
            titles = self.seen_titles.len(),
            urls = self.seen_urls.len(),
            "Hydrated duplicate detector"
        );
        Ok(())
    }

    pub fn is_duplicate(&self, title: &str, url: &str) -> bool {
        if self.seen_urls.contains(url) {
            debug!(%url, "Duplicate by URL");
            return true;
        }
        let normalized = normalize_title(title);
        if self.seen_titles.contains(&normalized) {
            debug!(title = %normalized, "Duplicate by exact title");
            return true;
        }
        let tokens = tokenize(&normalized);
        if tokens.is_empty() {
            return false;
        }
        self.seen_titles.iter().any(|seen| {
            let similarity = jaccard(&tokens, &tokenize(seen));
            if similarity > TITLE_SIMILARITY_THRESHOLD {
                debug!(title = %normalized, %seen, similarity, "Duplicate by title similarity");
                true
            } else {
                false
            }
        })
    }

    /// Register an accepted item so later candidates in the same run are
    /// checked against it too.
    pub fn add_content(&mut self, title: &str, url: &str) {
        self.seen_titles.insert(normalize_title(title));
        self.seen_urls.insert(url.to_string());
    }

    /// Clear the cache and the hydrated flag, forcing rehydration on next
    /// use. Never touches the durable article set.
    pub fn reset(&mut self) {
        self.seen_titles.clear();
        self.seen_urls.clear();
        self.hydrated = false;
    }
}

fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_string()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}
