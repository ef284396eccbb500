//! Command-line interface definitions.
//!
//! All shared options can be provided as flags or environment variables;
//! the subcommand decides whether a session runs or the stored progress
//! is reported.

use clap::{Parser, Subcommand};

/// Command-line arguments for the newsdesk pipeline.
///
/// # Examples
///
/// ```sh
/// # One session over all active sources, enriching into English and German
/// newsdesk run --target-languages en,de
///
/// # Crawl a single source, today's articles only
/// newsdesk run --source-id handelsblatt-rss --only-today
///
/// # Keep sessions running every 30 minutes
/// newsdesk run --watch --interval-minutes 30
///
/// # Inspect the stored progress record
/// newsdesk status
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Directory holding article JSON files and the progress record
    #[arg(short, long, env = "NEWSDESK_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Path to the YAML source catalog
    #[arg(short, long, env = "NEWSDESK_SOURCES", default_value = "./sources.yaml")]
    pub sources: String,

    /// OpenAI-compatible chat completions endpoint used for enrichment
    #[arg(
        long,
        env = "NEWSDESK_ENRICHER_URL",
        default_value = "https://api.openai.com/v1/chat/completions"
    )]
    pub enricher_url: String,

    /// API key for the enrichment endpoint
    #[arg(long, env = "NEWSDESK_API_KEY")]
    pub api_key: Option<String>,

    /// Model name sent to the enrichment endpoint
    #[arg(long, env = "NEWSDESK_MODEL", default_value = "gpt-4o-mini")]
    pub model: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a crawl and enrichment session
    Run {
        /// Crawl only this configured source
        #[arg(long)]
        source_id: Option<String>,

        /// Comma-separated language codes articles should exist in
        #[arg(long, value_delimiter = ',', default_value = "en")]
        target_languages: Vec<String>,

        /// Acceptance quota per language/region track
        #[arg(long, default_value_t = 10)]
        articles_per_language: usize,

        /// Only accept articles with a same-day (UTC) publish timestamp
        #[arg(long)]
        only_today: bool,

        /// Keep running sessions on a fixed interval
        #[arg(long)]
        watch: bool,

        /// Minutes between scheduled sessions in watch mode
        #[arg(long, default_value_t = 60)]
        interval_minutes: u64,
    },
    /// Print the current progress report as JSON
    Status,
}
