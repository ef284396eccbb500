//! Article store collaborator interface and shipped implementations.
//!
//! The pipeline never owns long-lived article collections; everything
//! durable goes through [`ArticleStore`]. Two implementations ship with
//! the binary:
//! - [`JsonArticleStore`] — one JSON file per article under a directory,
//!   sources from a YAML catalog
//! - [`MemoryArticleStore`] — in-memory, used by tests and embedders

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{NewsdeskError, Result};
use crate::models::{Article, Source};

/// Listing filter; empty means everything.
#[derive(Debug, Clone, Default)]
pub struct ArticleFilter {
    pub language: Option<String>,
    pub category: Option<String>,
    pub source_id: Option<String>,
}

impl ArticleFilter {
    fn matches(&self, article: &Article) -> bool {
        if let Some(lang) = &self.language {
            if !article.title.contains_key(lang) {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if &article.category != category {
                return false;
            }
        }
        if let Some(source_id) = &self.source_id {
            if &article.source_id != source_id {
                return false;
            }
        }
        true
    }
}

/// External article/source store consumed by the pipeline.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn create_article(&self, article: Article) -> Result<Article>;
    async fn list_articles(&self, filter: ArticleFilter) -> Result<Vec<Article>>;
    async fn find_source_by_id(&self, id: &str) -> Result<Option<Source>>;
    async fn list_active_sources(&self) -> Result<Vec<Source>>;
}

#[derive(Debug, Deserialize)]
struct SourceCatalog {
    sources: Vec<Source>,
}

/// Directory-of-JSON-files store: `{dir}/{article_id}.json`, sources from
/// a YAML catalog loaded at construction.
pub struct JsonArticleStore {
    dir: PathBuf,
    sources: Vec<Source>,
}

impl JsonArticleStore {
    pub async fn open(dir: impl Into<PathBuf>, catalog_path: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        let raw = fs::read_to_string(catalog_path.as_ref()).await?;
        let catalog: SourceCatalog = serde_yaml::from_str(&raw)?;
        info!(
            articles_dir = %dir.display(),
            sources = catalog.sources.len(),
            "Opened article store"
        );
        Ok(Self {
            dir,
            sources: catalog.sources,
        })
    }
}

#[async_trait]
impl ArticleStore for JsonArticleStore {
    async fn create_article(&self, article: Article) -> Result<Article> {
        let path = self.dir.join(format!("{}.json", article.id));
        let json = serde_json::to_string_pretty(&article)?;
        fs::write(&path, json).await?;
        debug!(path = %path.display(), id = %article.id, "Wrote article");
        Ok(article)
    }

    async fn list_articles(&self, filter: ArticleFilter) -> Result<Vec<Article>> {
        let mut articles = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = fs::read_to_string(&path).await?;
            match serde_json::from_str::<Article>(&raw) {
                Ok(article) => {
                    if filter.matches(&article) {
                        articles.push(article);
                    }
                }
                Err(e) => {
                    // One unreadable file must not hide the rest.
                    warn!(path = %path.display(), error = %e, "Skipping unparsable article file");
                }
            }
        }
        Ok(articles)
    }

    async fn find_source_by_id(&self, id: &str) -> Result<Option<Source>> {
        Ok(self.sources.iter().find(|s| s.id == id).cloned())
    }

    async fn list_active_sources(&self) -> Result<Vec<Source>> {
        Ok(self.sources.iter().filter(|s| s.active).cloned().collect())
    }
}

/// In-memory store. `create_article` failures can be forced with
/// [`MemoryArticleStore::fail_creates`] to exercise abort paths.
#[derive(Default)]
pub struct MemoryArticleStore {
    articles: Mutex<Vec<Article>>,
    sources: Vec<Source>,
    fail_creates: bool,
}

impl MemoryArticleStore {
    pub fn new(sources: Vec<Source>) -> Self {
        Self {
            articles: Mutex::new(Vec::new()),
            sources,
            fail_creates: false,
        }
    }

    pub fn with_articles(sources: Vec<Source>, articles: Vec<Article>) -> Self {
        Self {
            articles: Mutex::new(articles),
            sources,
            fail_creates: false,
        }
    }

    pub fn fail_creates(mut self) -> Self {
        self.fail_creates = true;
        self
    }
}

#[async_trait]
impl ArticleStore for MemoryArticleStore {
    async fn create_article(&self, article: Article) -> Result<Article> {
        if self.fail_creates {
            return Err(NewsdeskError::Store("create_article disabled".to_string()));
        }
        self.articles.lock().await.push(article.clone());
        Ok(article)
    }

    async fn list_articles(&self, filter: ArticleFilter) -> Result<Vec<Article>> {
        Ok(self
            .articles
            .lock()
            .await
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect())
    }

    async fn find_source_by_id(&self, id: &str) -> Result<Option<Source>> {
        Ok(self.sources.iter().find(|s| s.id == id).cloned())
    }

    async fn list_active_sources(&self) -> Result<Vec<Source>> {
        Ok(self.sources.iter().filter(|s| s.active).cloned().collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{EnrichmentStatus, FetchKind};
    use chrono::Utc;
    use std::collections::HashMap;

    pub(crate) fn sample_article(id: &str, lang: &str, title: &str, url: &str) -> Article {
        let mut titles = HashMap::new();
        titles.insert(lang.to_string(), title.to_string());
        Article {
            id: id.to_string(),
            title: titles,
            body: HashMap::new(),
            summary: HashMap::new(),
            slug: crate::utils::slugify(title),
            category: "general".to_string(),
            original_url: url.to_string(),
            original_language: lang.to_string(),
            source_id: "src-1".to_string(),
            source_name: "Source One".to_string(),
            source_kind: FetchKind::Feed,
            quality_score: 60,
            enrichment_status: EnrichmentStatus::Completed,
            views: 0,
            likes: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn json_store_persists_and_lists() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = dir.path().join("sources.yaml");
        tokio::fs::write(
            &catalog,
            r#"
sources:
  - id: src-1
    name: Source One
    kind: feed
    url: https://example.com/rss
    category: general
    language: en
    region: US
  - id: src-2
    name: Source Two
    kind: api
    url: https://example.com/api
    category: general
    language: de
    region: DE
    active: false
"#,
        )
        .await
        .unwrap();

        let store = JsonArticleStore::open(dir.path().join("articles"), &catalog)
            .await
            .unwrap();

        let active = store.list_active_sources().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "src-1");
        assert!(store.find_source_by_id("src-2").await.unwrap().is_some());
        assert!(store.find_source_by_id("nope").await.unwrap().is_none());

        store
            .create_article(sample_article("a1", "en", "First story", "https://e.com/1"))
            .await
            .unwrap();
        store
            .create_article(sample_article("a2", "de", "Zweite Geschichte", "https://e.com/2"))
            .await
            .unwrap();

        let all = store.list_articles(ArticleFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let german = store
            .list_articles(ArticleFilter {
                language: Some("de".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(german.len(), 1);
        assert_eq!(german[0].id, "a2");
    }

    #[tokio::test]
    async fn json_store_skips_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = dir.path().join("sources.yaml");
        tokio::fs::write(&catalog, "sources: []").await.unwrap();
        let articles_dir = dir.path().join("articles");

        let store = JsonArticleStore::open(&articles_dir, &catalog).await.unwrap();
        store
            .create_article(sample_article("ok", "en", "Valid", "https://e.com/ok"))
            .await
            .unwrap();
        tokio::fs::write(articles_dir.join("broken.json"), "{not json")
            .await
            .unwrap();

        let all = store.list_articles(ArticleFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "ok");
    }
}
