use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::db::format_time;
use crate::models::{Article, Author};

#[derive(Serialize)]
struct AuthorRow<'a> {
    #[serde(rename = "Author_Name")]
    name: &'a str,
    #[serde(rename = "Follow_Count")]
    follow_count: u64,
    #[serde(rename = "Read_Count")]
    read_count: u64,
    #[serde(rename = "Language")]
    language: &'a str,
    #[serde(rename = "Gender")]
    gender: &'a str,
    #[serde(rename = "Pratilipi_Id")]
    pratilipi_id: u64,
    #[serde(rename = "Page_Url")]
    page_url: &'a str,
    #[serde(rename = "Registration_Date")]
    registered_at: String,
}

impl<'a> From<&'a Author> for AuthorRow<'a> {
    fn from(a: &'a Author) -> Self {
        Self {
            name: &a.name,
            follow_count: a.follow_count,
            read_count: a.read_count,
            language: &a.language,
            gender: &a.gender,
            pratilipi_id: a.pratilipi_id,
            page_url: &a.page_url,
            registered_at: format_time(a.registered_at),
        }
    }
}

#[derive(Serialize)]
struct ArticleRow<'a> {
    #[serde(rename = "Title")]
    title: &'a str,
    #[serde(rename = "Read_Count")]
    read_count: u64,
    #[serde(rename = "Read_Time")]
    read_time: u64,
    #[serde(rename = "Genre")]
    category: &'a str,
    #[serde(rename = "Tags")]
    tags: String,
    #[serde(rename = "Author_Name")]
    author_name: &'a str,
    #[serde(rename = "Language")]
    language: &'a str,
    #[serde(rename = "Rating")]
    rating: f64,
    #[serde(rename = "Author_Id")]
    author_id: u64,
    #[serde(rename = "Pratilipi_Id")]
    pratilipi_id: u64,
    #[serde(rename = "Page_Url")]
    page_url: &'a str,
    #[serde(rename = "Updated_At")]
    updated_at: String,
}

impl<'a> From<&'a Article> for ArticleRow<'a> {
    fn from(a: &'a Article) -> Self {
        Self {
            title: &a.title,
            read_count: a.read_count,
            read_time: a.read_time,
            category: a.category.as_deref().unwrap_or_default(),
            tags: a.tags.join(","),
            author_name: &a.author_name,
            language: &a.language,
            rating: a.rating,
            author_id: a.author_id,
            pratilipi_id: a.pratilipi_id,
            page_url: &a.page_url,
            updated_at: format_time(a.updated_at),
        }
    }
}

/// CSV snapshot writer for one run; file names carry the local date and hour.
pub struct Snapshot {
    dir: PathBuf,
    stamp: String,
}

impl Snapshot {
    pub fn new(dir: impl Into<PathBuf>, now: DateTime<Local>) -> Self {
        Self {
            dir: dir.into(),
            stamp: now.format("%Y-%m-%d_%-H").to_string(),
        }
    }

    fn path(&self, kind: &str) -> PathBuf {
        self.dir.join(format!("{kind}_{}.csv", self.stamp))
    }

    /// Authors by follower count, highest first.
    pub fn export_authors(&self, authors: &[Author]) -> Result<Option<PathBuf>> {
        let mut sorted: Vec<&Author> = authors.iter().collect();
        sorted.sort_by(|a, b| b.follow_count.cmp(&a.follow_count));

        write_csv(&self.path("authors"), sorted.into_iter().map(AuthorRow::from))
    }

    pub fn export_recent(
        &self,
        articles: &[Article],
        latest: Option<DateTime<Utc>>,
    ) -> Result<Option<PathBuf>> {
        write_csv(
            &self.path("recent"),
            recent_articles(articles, latest).into_iter().map(ArticleRow::from),
        )
    }

    pub fn export_popular(&self, articles: &[Article], count: Option<usize>) -> Result<Option<PathBuf>> {
        write_csv(
            &self.path("popular"),
            popular_articles(articles, count).into_iter().map(ArticleRow::from),
        )
    }
}

/// Articles updated at or after `latest` (the oldest article when there is no
/// stored timestamp yet), newest first.
pub fn recent_articles(articles: &[Article], latest: Option<DateTime<Utc>>) -> Vec<&Article> {
    let Some(threshold) = latest.or_else(|| articles.iter().map(|a| a.updated_at).min()) else {
        return Vec::new();
    };

    let mut recent: Vec<&Article> = articles
        .iter()
        .filter(|a| a.updated_at >= threshold)
        .collect();
    recent.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    recent
}

/// The `count` most-read articles (all of them when `count` is `None`), most
/// read first.
pub fn popular_articles(articles: &[Article], count: Option<usize>) -> Vec<&Article> {
    let mut popular: Vec<&Article> = articles.iter().collect();
    popular.sort_by(|a, b| b.read_count.cmp(&a.read_count));
    if let Some(count) = count {
        popular.truncate(count);
    }
    popular
}

fn write_csv<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> Result<Option<PathBuf>> {
    let mut rows = rows.into_iter().peekable();
    if rows.peek().is_none() {
        info!(path = %path.display(), "Nothing to export");
        return Ok(None);
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;

    let mut written = 0;
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("writing row to {}", path.display()))?;
        written += 1;
    }
    writer.flush().with_context(|| format!("flushing {}", path.display()))?;

    info!(path = %path.display(), rows = written, "Exported CSV");
    Ok(Some(path.to_path_buf()))
}
