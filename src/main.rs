mod cli;
mod client;
mod config;
mod crawler;
mod db;
mod dedup;
mod enrich;
mod export;
mod listing;
mod models;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

use cli::Cli;
use client::SiteClient;
use crawler::{CrawlSettings, Crawler};
use db::{BackoffPolicy, Store};
use export::Snapshot;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let config = config::load(&args.config)?;
    let db_config = config.database_section(&args.section)?;

    info!("Crawler started");

    let store = Store::connect(
        &db_config.path,
        BackoffPolicy::with_attempts(db_config.connect_attempts),
    )
    .await?;

    let output_dir = args.output_dir.unwrap_or_else(|| config.output.dir.clone());
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("creating output directory {}", output_dir.display()))?;

    let site = SiteClient::bootstrap(&config.site).await?;

    let settings = CrawlSettings {
        language: args.language.unwrap_or_else(|| config.site.language.clone()),
        not_found_delay: config.site.not_found_retry_delay(),
        trending_page_size: config.site.trending_page_size,
        batch_size: args.batch_size.unwrap_or(config.output.batch_size),
        popular_count: args.popular_count.or(config.output.popular_count),
    };

    let snapshot = Snapshot::new(&output_dir, Local::now());
    let summary = Crawler::new(&site, &store, settings)?.run(&snapshot).await?;

    info!(
        seen = summary.articles_seen,
        articles = summary.articles_inserted,
        authors = summary.authors_inserted,
        exports = summary.exports.len(),
        "Crawler finished"
    );

    Ok(())
}
