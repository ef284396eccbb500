//! # Newsdesk
//!
//! A news collection and enrichment pipeline that crawls configured
//! sources (RSS/Atom feeds, JSON APIs, HTML pages), gates candidates
//! through duplicate detection and a heuristic quality score, polishes
//! accepted articles into the configured target languages through an
//! OpenAI-compatible LLM API, and persists the result as per-article
//! JSON files.
//!
//! ## Usage
//!
//! ```sh
//! newsdesk run --target-languages en,de --articles-per-language 10
//! newsdesk status
//! ```
//!
//! ## Architecture
//!
//! One session runs as a pipeline:
//! 1. **Selection**: pick active sources from the YAML catalog
//! 2. **Crawl**: one concurrent track per (language, region), sources
//!    sequential within a track, quota-bounded acceptance
//! 3. **Polish**: per-language enrichment of everything accepted
//! 4. **Persist**: articles written to the store, progress to disk after
//!    every source
//!
//! The `--watch` flag repeats sessions on a fixed interval.

use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod coordinator;
mod crawl;
mod dedup;
mod enrich;
mod error;
mod fetcher;
mod models;
mod progress;
mod quality;
mod scheduler;
mod store;
mod utils;

use cli::{Cli, Command};
use coordinator::{CrawlCoordinator, SessionParams};
use enrich::{HttpEnricher, RetryEnricher};
use fetcher::SourceFetcher;
use progress::ProgressStore;
use scheduler::SessionScheduler;
use store::JsonArticleStore;
use utils::ensure_writable_dir;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("newsdesk starting up");

    let args = Cli::parse();
    debug!(?args.data_dir, ?args.sources, "Parsed CLI arguments");

    let data_dir = PathBuf::from(&args.data_dir);
    ensure_writable_dir(&data_dir).await?;
    let progress = Arc::new(ProgressStore::open(data_dir.join("progress.json")).await);

    match args.command {
        Command::Status => {
            let report = progress.report().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Run {
            source_id,
            target_languages,
            articles_per_language,
            only_today,
            watch,
            interval_minutes,
        } => {
            let store =
                JsonArticleStore::open(data_dir.join("articles"), &args.sources).await?;
            let fetcher = SourceFetcher::new()?;
            let coordinator = Arc::new(CrawlCoordinator::new(
                Arc::new(store),
                progress,
                Arc::new(fetcher),
            ));
            let enricher = RetryEnricher::new(
                HttpEnricher::new(args.enricher_url.clone(), args.api_key.clone(), args.model.clone()),
                5,
                Duration::from_secs(1),
            );
            let params = SessionParams {
                source_id,
                target_languages,
                articles_per_language,
                only_today,
            };

            if watch {
                let period = Duration::from_secs(interval_minutes.max(1) * 60);
                let scheduler = SessionScheduler::new(coordinator, period);
                scheduler.run(&params, &enricher).await;
            } else {
                let summary = coordinator.run_session(&params, &enricher).await?;
                info!(
                    session_id = summary.session_id,
                    accepted = summary.accepted,
                    persisted = summary.persisted,
                    polished = summary.polished,
                    failures = summary.enrichment_failures,
                    "Session finished"
                );
            }
        }
    }

    info!(elapsed_secs = start_time.elapsed().as_secs_f64(), "newsdesk finished");
    Ok(())
}
