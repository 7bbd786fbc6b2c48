use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Why a record from the site was left out of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Error)]
pub enum SkipReason {
    #[error("missing or malformed field `{0}`")]
    MissingField(&'static str),
    #[error("author has an empty display name")]
    EmptyDisplayName,
    #[error("author lookup returned status {0}")]
    AuthorStatus(u16),
    #[error("author lookup failed in transport")]
    AuthorUnavailable,
}

pub type Extracted<T> = Result<T, SkipReason>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub name: String,
    pub slug: String,
}

impl Category {
    /// Builds a category from one entry of a navigation `linkList`.
    pub fn from_link(link: &Value) -> Extracted<Self> {
        Ok(Self {
            name: str_field(link, "categoryName")?.to_string(),
            slug: str_field(link, "url")?.trim_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub pratilipi_id: u64,
    pub title: String,
    pub read_count: u64,
    /// Seconds; 0 when neither the listing nor the detail page carries it.
    pub read_time: u64,
    pub language: String,
    pub rating: f64,
    pub author_id: u64,
    pub author_name: String,
    pub page_url: String,
    pub updated_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub category: Option<String>,
}

impl Article {
    /// Extracts an article from a listing item. Tags and reading time are
    /// taken inline when present and left empty otherwise.
    pub fn from_listing(item: &Value, category: Option<&str>) -> Extracted<Self> {
        let author = item
            .get("author")
            .filter(|a| a.is_object())
            .ok_or(SkipReason::MissingField("author"))?;

        Ok(Self {
            pratilipi_id: article_id(item)?,
            title: str_field(item, "displayTitle")?.to_string(),
            read_count: u64_field(item, "readCount")?,
            read_time: inline_reading_time(item).unwrap_or(0),
            language: str_field(item, "language")?.to_string(),
            rating: f64_field(item, "averageRating")?,
            author_id: u64_field(author, "authorId")?,
            author_name: author
                .get("displayName")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            page_url: str_field(item, "pageUrl")?.to_string(),
            updated_at: updated_at(item)?,
            tags: inline_tags(item).unwrap_or_default(),
            category: category.map(str::to_string),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Author {
    pub pratilipi_id: u64,
    pub name: String,
    pub follow_count: u64,
    pub read_count: u64,
    pub language: String,
    pub gender: String,
    pub page_url: String,
    pub registered_at: DateTime<Utc>,
}

impl Author {
    pub fn from_detail(body: &Value) -> Extracted<Self> {
        let display_name = str_field(body, "displayName")?;
        if display_name.is_empty() {
            return Err(SkipReason::EmptyDisplayName);
        }

        let name = body
            .get("fullName")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .unwrap_or(display_name);

        Ok(Self {
            pratilipi_id: u64_field(body, "authorId")?,
            name: name.to_string(),
            follow_count: u64_field(body, "followCount")?,
            read_count: u64_field(body, "totalReadCount")?,
            language: str_field(body, "language")?.to_string(),
            gender: optional_str(body, "gender"),
            page_url: str_field(body, "pageUrl")?.to_string(),
            registered_at: millis_field(body, "registrationDateMillis")?,
        })
    }
}

pub fn article_id(item: &Value) -> Extracted<u64> {
    u64_field(item, "pratilipiId")
}

pub fn updated_at(item: &Value) -> Extracted<DateTime<Utc>> {
    millis_field(item, "lastUpdatedDateMillis")
}

/// Last path segment of the article slug, as the detail endpoint expects it.
pub fn detail_slug(item: &Value) -> Extracted<&str> {
    let slug = str_field(item, "slug")?;
    slug.rsplit('/')
        .find(|s| !s.is_empty())
        .ok_or(SkipReason::MissingField("slug"))
}

pub fn inline_tags(item: &Value) -> Option<Vec<String>> {
    let tags = item.get("tags")?.as_array()?;
    Some(
        tags.iter()
            .filter_map(|t| t.get("nameEn").and_then(Value::as_str))
            .map(str::to_string)
            .collect(),
    )
}

pub fn inline_reading_time(item: &Value) -> Option<u64> {
    item.get("readingTime").and_then(as_u64)
}

fn str_field<'a>(v: &'a Value, key: &'static str) -> Extracted<&'a str> {
    v.get(key)
        .and_then(Value::as_str)
        .ok_or(SkipReason::MissingField(key))
}

fn optional_str(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

// Ids and counters arrive either as JSON numbers or numeric strings. A
// float is accepted only when it is a whole, non-negative value.
fn as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f < u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn u64_field(v: &Value, key: &'static str) -> Extracted<u64> {
    v.get(key).and_then(as_u64).ok_or(SkipReason::MissingField(key))
}

fn f64_field(v: &Value, key: &'static str) -> Extracted<f64> {
    v.get(key)
        .and_then(|f| match f {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .ok_or(SkipReason::MissingField(key))
}

fn millis_field(v: &Value, key: &'static str) -> Extracted<DateTime<Utc>> {
    v.get(key)
        .and_then(|m| m.as_i64().or_else(|| as_u64(m).map(|u| u as i64)))
        .and_then(DateTime::from_timestamp_millis)
        .ok_or(SkipReason::MissingField(key))
}

/// Counts of dropped records, by reason.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SkipLog {
    counts: BTreeMap<SkipReason, usize>,
}

impl SkipLog {
    pub fn record(&mut self, reason: SkipReason, what: &str) {
        debug!(%reason, what, "Skipping record");
        *self.counts.entry(reason).or_default() += 1;
    }

    #[cfg(test)]
    pub fn count(&self, reason: SkipReason) -> usize {
        self.counts.get(&reason).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SkipReason, usize)> + '_ {
        self.counts.iter().map(|(r, c)| (*r, *c))
    }
}
