use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::client::Fetch;
use crate::models::{self, Article, Author, SkipLog, SkipReason};

pub const DETAIL_PATH: &str = "api/pratilipis";
pub const AUTHOR_PATH: &str = "api/authors/v1.0";

/// Builds articles from listing items, filling tags and reading time from the
/// detail endpoint when the listing leaves them out.
#[derive(Default)]
pub struct Enricher {
    details: HashMap<String, Option<Value>>,
}

impl Enricher {
    pub async fn article<F: Fetch + ?Sized>(
        &mut self,
        site: &F,
        item: &Value,
        category: &str,
        skips: &mut SkipLog,
    ) -> Option<Article> {
        let mut article = match Article::from_listing(item, Some(category)) {
            Ok(article) => article,
            Err(reason) => {
                skips.record(reason, "article");
                return None;
            }
        };

        let tags = models::inline_tags(item);
        let read_time = models::inline_reading_time(item);
        if tags.is_some() && read_time.is_some() {
            return Some(article);
        }

        let slug = match models::detail_slug(item) {
            Ok(slug) => slug,
            Err(reason) => {
                skips.record(reason, "article");
                return None;
            }
        };

        if let Some(detail) = self.detail(site, slug).await {
            if tags.is_none() {
                article.tags = models::inline_tags(detail).unwrap_or_default();
            }
            if read_time.is_none() {
                article.read_time = models::inline_reading_time(detail).unwrap_or(0);
            }
        }

        Some(article)
    }

    async fn detail<F: Fetch + ?Sized>(&mut self, site: &F, slug: &str) -> Option<&Value> {
        if !self.details.contains_key(slug) {
            let fetched = match site.get_json(DETAIL_PATH, &[("slug", slug.to_string())]).await {
                Ok(response) if response.is_success() => Some(response.body),
                Ok(response) => {
                    debug!(slug, status = %response.status, "Detail page unavailable");
                    None
                }
                Err(e) => {
                    warn!(slug, error = %e, "Detail page fetch failed");
                    None
                }
            };
            self.details.insert(slug.to_string(), fetched);
        }

        self.details.get(slug).and_then(Option::as_ref)
    }
}

/// Fetches author records one by one. Unavailable or invalid authors are
/// recorded in `skips` and left out.
pub async fn fetch_authors<F: Fetch + ?Sized>(
    site: &F,
    author_ids: impl IntoIterator<Item = u64>,
    skips: &mut SkipLog,
) -> Result<Vec<Author>> {
    let mut authors = Vec::new();

    for author_id in author_ids {
        let response = match site
            .get_json(AUTHOR_PATH, &[("authorId", author_id.to_string())])
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(author_id, error = %e, "Author fetch failed");
                skips.record(SkipReason::AuthorUnavailable, "author");
                continue;
            }
        };

        if !response.is_success() {
            skips.record(SkipReason::AuthorStatus(response.status.as_u16()), "author");
            continue;
        }

        match Author::from_detail(&response.body) {
            Ok(author) => authors.push(author),
            Err(reason) => skips.record(reason, "author"),
        }
    }

    info!(count = authors.len(), "Fetched new authors");
    Ok(authors)
}
