use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::client::Fetch;
use crate::db::{CategoryLink, Store};
use crate::dedup::RunState;
use crate::enrich::{self, Enricher};
use crate::export::Snapshot;
use crate::listing::{self, CursorPager, Listing, OffsetPager};
use crate::models::{self, Article, Category, SkipLog};

#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub language: String,
    pub not_found_delay: Duration,
    pub trending_page_size: u32,
    pub batch_size: usize,
    pub popular_count: Option<usize>,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub categories: usize,
    pub articles_seen: usize,
    pub articles_inserted: usize,
    pub authors_inserted: usize,
    pub links_inserted: usize,
    pub exports: Vec<PathBuf>,
    pub skips: SkipLog,
}

/// Drives one incremental crawl: every category through the three listings,
/// then authors, CSV snapshots and inserts.
pub struct Crawler<'a, F: Fetch + ?Sized> {
    site: &'a F,
    store: &'a Store,
    settings: CrawlSettings,
    cutoff: Option<DateTime<Utc>>,
    state: RunState,
    enricher: Enricher,
    skips: SkipLog,
}

impl<'a, F: Fetch + ?Sized> Crawler<'a, F> {
    pub fn new(site: &'a F, store: &'a Store, settings: CrawlSettings) -> Result<Self> {
        let cutoff = store.latest_update()?;
        let existing_articles = store.existing_article_ids()?;
        let existing_authors = store.existing_author_ids()?;
        info!(
            ?cutoff,
            articles = existing_articles.len(),
            authors = existing_authors.len(),
            "Loaded stored state"
        );

        Ok(Self {
            site,
            store,
            settings,
            cutoff,
            state: RunState::new(existing_articles, existing_authors),
            enricher: Enricher::default(),
            skips: SkipLog::default(),
        })
    }

    /// New articles of one category from the recent, popular and trending
    /// listings, each id at most once.
    #[instrument(level = "info", skip_all, fields(category = %category.name))]
    pub async fn harvest_category(&mut self, category: &Category) -> Result<Vec<Article>> {
        self.state.begin_category();
        let language = self.settings.language.as_str();

        let recent = listing::collect_offset(
            self.site,
            OffsetPager::new(Listing::Recent, language, &category.slug, self.settings.not_found_delay),
            self.cutoff.unwrap_or(DateTime::<Utc>::MIN_UTC),
            &mut self.state,
            &mut self.skips,
        )
        .await?;
        let popular = listing::collect_offset(
            self.site,
            OffsetPager::new(Listing::Popular, language, &category.slug, self.settings.not_found_delay),
            DateTime::<Utc>::MIN_UTC,
            &mut self.state,
            &mut self.skips,
        )
        .await?;
        let trending = listing::collect_cursor(
            self.site,
            CursorPager::new(language, &category.slug, self.settings.trending_page_size),
            &mut self.state,
            &mut self.skips,
        )
        .await?;

        info!(
            recent = recent.items.len(),
            recent_pages = recent.pages,
            recent_stop = ?recent.stop,
            popular = popular.items.len(),
            popular_pages = popular.pages,
            popular_stop = ?popular.stop,
            trending = trending.items.len(),
            trending_pages = trending.pages,
            trending_stop = ?trending.stop,
            "Listings collected"
        );

        let mut articles = Vec::new();
        for item in recent
            .items
            .iter()
            .chain(&popular.items)
            .chain(&trending.items)
        {
            let novel = models::article_id(item).is_ok_and(|id| self.state.is_novel_article(id));
            if !novel {
                continue;
            }
            if let Some(article) = self
                .enricher
                .article(self.site, item, &category.name, &mut self.skips)
                .await
            {
                articles.push(article);
            }
        }

        info!(new = articles.len(), "Category harvested");
        Ok(articles)
    }

    pub async fn run(mut self, snapshot: &Snapshot) -> Result<RunSummary> {
        let categories = listing::fetch_categories(self.site, &self.settings.language, &mut self.skips).await?;

        let mut harvested = Vec::new();
        for category in &categories {
            harvested.extend(self.harvest_category(category).await?);
        }

        let author_ids: Vec<u64> = harvested
            .iter()
            .map(|a| a.author_id)
            .filter(|id| self.state.claim_author(*id))
            .collect();
        let authors = enrich::fetch_authors(self.site, author_ids, &mut self.skips).await?;

        let mut unique_ids = HashSet::new();
        let articles: Vec<Article> = harvested
            .iter()
            .filter(|a| unique_ids.insert(a.pratilipi_id))
            .cloned()
            .collect();

        let ids: Vec<u64> = articles.iter().map(|a| a.pratilipi_id).collect();
        let stored_links = self.store.existing_category_links(&ids)?;
        let links: Vec<CategoryLink> = harvested
            .iter()
            .filter_map(|a| {
                a.category.as_ref().map(|category| CategoryLink {
                    pratilipi_id: a.pratilipi_id,
                    category: category.clone(),
                })
            })
            .filter(|link| !stored_links.contains(link))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let exports = [
            snapshot.export_authors(&authors)?,
            snapshot.export_recent(&harvested, self.cutoff)?,
            snapshot.export_popular(&harvested, self.settings.popular_count)?,
        ]
        .into_iter()
        .flatten()
        .collect();

        let batch_size = self.settings.batch_size;
        let summary = RunSummary {
            categories: categories.len(),
            articles_seen: harvested.len(),
            authors_inserted: self.store.insert_rows(&authors, batch_size).await?,
            articles_inserted: self.store.insert_rows(&articles, batch_size).await?,
            links_inserted: self.store.insert_rows(&links, batch_size).await?,
            exports,
            skips: self.skips,
        };

        for (reason, count) in summary.skips.iter() {
            warn!(%reason, count, "Records skipped");
        }
        info!(
            categories = summary.categories,
            articles = summary.articles_inserted,
            authors = summary.authors_inserted,
            links = summary.links_inserted,
            skipped = summary.skips.total(),
            "Crawl finished"
        );

        Ok(summary)
    }
}
