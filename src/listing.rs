use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::client::Fetch;
use crate::dedup::RunState;
use crate::models::{self, Category, SkipLog};

pub const NAVIGATION_PATH: &str = "api/navigation/list";
pub const TRENDING_PATH: &str = "api/list/v1.1";

const OFFSET_STEP: u32 = 20;
const FROM_SEC: u32 = 300;
const TO_SEC: u32 = 1799;

/// The two offset-paginated listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing {
    Recent,
    Popular,
}

impl Listing {
    pub fn path(self) -> &'static str {
        match self {
            Listing::Recent => "api/stats/v2.0/recent_published",
            Listing::Popular => "api/stats/v2.0/high_rated",
        }
    }
}

/// Why a pagination ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    Exhausted,
    CutoffReached,
    Status(StatusCode),
    /// The server handed back no cursor, or the one just used.
    CursorStalled,
}

#[derive(Debug)]
pub enum Page {
    Items(Vec<Value>),
    Done(Stop),
}

/// Unique listing items of one category, in server order.
#[derive(Debug)]
pub struct Harvest {
    pub items: Vec<Value>,
    pub pages: usize,
    pub stop: Stop,
}

pub async fn fetch_categories<F: Fetch + ?Sized>(
    site: &F,
    language: &str,
    skips: &mut SkipLog,
) -> Result<Vec<Category>> {
    let response = site
        .get_json(NAVIGATION_PATH, &[("language", language.to_string())])
        .await?;
    if !response.is_success() {
        bail!("navigation list returned {}", response.status);
    }

    let mut categories = Vec::new();
    let groups = response
        .body
        .get("navigationList")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for group in groups {
        let links = group
            .get("linkList")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for link in links {
            match Category::from_link(link) {
                Ok(category) => categories.push(category),
                Err(reason) => skips.record(reason, "category"),
            }
        }
    }

    info!(count = categories.len(), "Fetched categories");
    Ok(categories)
}

/// Offset-driven pager over the recent or high-rated listing of a category.
pub struct OffsetPager {
    listing: Listing,
    language: String,
    category: String,
    offset: u32,
    not_found_delay: Duration,
    stopped: Option<Stop>,
}

impl OffsetPager {
    pub fn new(listing: Listing, language: &str, category: &str, not_found_delay: Duration) -> Self {
        Self {
            listing,
            language: language.to_string(),
            category: category.to_string(),
            offset: 0,
            not_found_delay,
            stopped: None,
        }
    }

    fn params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("language", self.language.clone()),
            ("category", self.category.clone()),
            ("offset", self.offset.to_string()),
            ("fromSec", FROM_SEC.to_string()),
            ("toSec", TO_SEC.to_string()),
        ]
    }

    pub async fn next_page<F: Fetch + ?Sized>(&mut self, site: &F) -> Result<Page> {
        if let Some(stop) = self.stopped {
            return Ok(Page::Done(stop));
        }

        let path = self.listing.path();
        let params = self.params();
        let mut response = site.get_json(path, &params).await?;

        // 404 mid-pagination is usually transient; give the same offset one more go.
        if response.status == StatusCode::NOT_FOUND {
            warn!(path, offset = self.offset, "404 from listing; retrying once");
            tokio::time::sleep(self.not_found_delay).await;
            response = site.get_json(path, &params).await?;
        }

        if !response.is_success() {
            return Ok(self.finish(Stop::Status(response.status)));
        }

        let items = page_items(&response.body);
        if items.is_empty() {
            return Ok(self.finish(Stop::Exhausted));
        }

        self.offset += OFFSET_STEP;
        Ok(Page::Items(items))
    }

    fn finish(&mut self, stop: Stop) -> Page {
        self.stopped = Some(stop);
        Page::Done(stop)
    }
}

/// Drains an offset pager. Items updated at or before `cutoff` end the whole
/// pagination; pass [`DateTime::<Utc>::MIN_UTC`] to disable the cutoff.
pub async fn collect_offset<F: Fetch + ?Sized>(
    site: &F,
    mut pager: OffsetPager,
    cutoff: DateTime<Utc>,
    state: &mut RunState,
    skips: &mut SkipLog,
) -> Result<Harvest> {
    let mut items = Vec::new();
    let mut pages = 0;

    let stop = 'pages: loop {
        let page = match pager.next_page(site).await? {
            Page::Items(page) => page,
            Page::Done(stop) => break stop,
        };
        pages += 1;

        for item in page {
            let (id, updated) = match models::article_id(&item)
                .and_then(|id| models::updated_at(&item).map(|u| (id, u)))
            {
                Ok(key) => key,
                Err(reason) => {
                    skips.record(reason, "listing item");
                    continue;
                }
            };

            if updated <= cutoff {
                break 'pages Stop::CutoffReached;
            }

            if state.claim_article(id) {
                items.push(item);
            }
        }
    };

    debug!(
        listing = ?pager.listing,
        category = %pager.category,
        pages,
        kept = items.len(),
        ?stop,
        "Offset listing finished"
    );

    Ok(Harvest { items, pages, stop })
}

/// Cursor-driven pager over the trending list of a category.
pub struct CursorPager {
    language: String,
    list_name: String,
    page_size: u32,
    cursor: String,
    stopped: Option<Stop>,
}

impl CursorPager {
    pub fn new(language: &str, list_name: &str, page_size: u32) -> Self {
        Self {
            language: language.to_string(),
            list_name: list_name.to_string(),
            page_size,
            cursor: String::new(),
            stopped: None,
        }
    }

    pub async fn next_page<F: Fetch + ?Sized>(&mut self, site: &F) -> Result<Page> {
        if let Some(stop) = self.stopped {
            return Ok(Page::Done(stop));
        }

        let params = [
            ("language", self.language.clone()),
            ("listName", self.list_name.clone()),
            ("pratilipiResultCount", self.page_size.to_string()),
            ("pratilipiCursor", self.cursor.clone()),
        ];
        let response = site.get_json(TRENDING_PATH, &params).await?;
        if !response.is_success() {
            return Ok(self.finish(Stop::Status(response.status)));
        }

        let Some(data) = response.body.get("pratilipi") else {
            return Ok(self.finish(Stop::Exhausted));
        };
        let items = page_items(data);
        if items.is_empty() {
            return Ok(self.finish(Stop::Exhausted));
        }

        let next = data.get("pratilipiCursor").and_then(|c| match c {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        match next {
            Some(cursor) if cursor != self.cursor => self.cursor = cursor,
            _ => self.stopped = Some(Stop::CursorStalled),
        }

        Ok(Page::Items(items))
    }

    fn finish(&mut self, stop: Stop) -> Page {
        self.stopped = Some(stop);
        Page::Done(stop)
    }
}

pub async fn collect_cursor<F: Fetch + ?Sized>(
    site: &F,
    mut pager: CursorPager,
    state: &mut RunState,
    skips: &mut SkipLog,
) -> Result<Harvest> {
    let mut items = Vec::new();
    let mut pages = 0;

    let stop = loop {
        let page = match pager.next_page(site).await? {
            Page::Items(page) => page,
            Page::Done(stop) => break stop,
        };
        pages += 1;

        for item in page {
            match models::article_id(&item) {
                Ok(id) => {
                    if state.claim_article(id) {
                        items.push(item);
                    }
                }
                Err(reason) => skips.record(reason, "trending item"),
            }
        }
    };

    debug!(list = %pager.list_name, pages, kept = items.len(), ?stop, "Trending listing finished");

    Ok(Harvest { items, pages, stop })
}

fn page_items(body: &Value) -> Vec<Value> {
    body.get("pratilipiList")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::JsonResponse;
    use crate::models::SkipReason;
    use crate::models::fixtures::listing_item;
    use crate::testing::{FakeSite, param};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const T: i64 = 1_700_000_000_000;

    fn ts(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    fn pager(listing: Listing) -> OffsetPager {
        OffsetPager::new(listing, "HINDI", "romance", Duration::ZERO)
    }

    /// Serves `pages` by offset; anything past the end is an empty list.
    fn offset_site(pages: Vec<Vec<Value>>) -> FakeSite {
        FakeSite::new(move |_, params| {
            let offset: usize = param(params, "offset").unwrap().parse().unwrap();
            let page = pages.get(offset / 20).cloned().unwrap_or_default();
            JsonResponse::ok(json!({ "pratilipiList": page }))
        })
    }

    #[tokio::test]
    async fn offset_pagination_ends_on_empty_page() {
        let site = offset_site(vec![
            vec![listing_item(1, T), listing_item(2, T)],
            vec![listing_item(3, T)],
        ]);
        let mut state = RunState::default();
        let mut skips = SkipLog::default();

        let harvest = collect_offset(&site, pager(Listing::Popular), DateTime::<Utc>::MIN_UTC, &mut state, &mut skips)
            .await
            .unwrap();

        assert_eq!(harvest.stop, Stop::Exhausted);
        assert_eq!(harvest.pages, 2);
        assert_eq!(harvest.items.len(), 3);
        assert_eq!(site.calls_to(Listing::Popular.path()), 3);
        assert!(site.calls()[2].contains("offset=40"));
    }

    #[tokio::test]
    async fn overlapping_pages_keep_each_id_once() {
        let site = offset_site(vec![
            vec![listing_item(1, T), listing_item(2, T)],
            vec![listing_item(2, T), listing_item(3, T)],
        ]);
        let mut state = RunState::default();
        let mut skips = SkipLog::default();

        let harvest = collect_offset(&site, pager(Listing::Popular), DateTime::<Utc>::MIN_UTC, &mut state, &mut skips)
            .await
            .unwrap();

        let ids: Vec<u64> = harvest
            .items
            .iter()
            .map(|i| models::article_id(i).unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn recent_mode_stops_at_cutoff() {
        let page = vec![
            listing_item(3, T + 1),
            listing_item(2, T),
            listing_item(1, T - 1),
        ];
        let site = offset_site(vec![page.clone(), vec![listing_item(9, T + 5)]]);
        let mut state = RunState::default();
        let mut skips = SkipLog::default();

        let harvest = collect_offset(&site, pager(Listing::Recent), ts(T), &mut state, &mut skips)
            .await
            .unwrap();

        assert_eq!(harvest.stop, Stop::CutoffReached);
        assert_eq!(harvest.items.len(), 1);
        assert_eq!(models::article_id(&harvest.items[0]), Ok(3));
        // The cutoff ends the pagination, not just the page.
        assert_eq!(site.calls().len(), 1);

        let site = offset_site(vec![page]);
        let mut state = RunState::default();
        let harvest = collect_offset(&site, pager(Listing::Recent), DateTime::<Utc>::MIN_UTC, &mut state, &mut skips)
            .await
            .unwrap();
        assert_eq!(harvest.items.len(), 3);
    }

    #[tokio::test]
    async fn not_found_is_retried_once_at_same_offset() {
        let hits = AtomicUsize::new(0);
        let site = FakeSite::new(move |_, params| {
            let offset = param(params, "offset").unwrap();
            match offset {
                "0" => JsonResponse::ok(json!({ "pratilipiList": [listing_item(1, T)] })),
                "20" if hits.fetch_add(1, Ordering::SeqCst) == 0 => {
                    JsonResponse::status(StatusCode::NOT_FOUND)
                }
                "20" => JsonResponse::ok(json!({ "pratilipiList": [listing_item(2, T)] })),
                _ => JsonResponse::ok(json!({ "pratilipiList": [] })),
            }
        });
        let mut state = RunState::default();
        let mut skips = SkipLog::default();

        let harvest = collect_offset(&site, pager(Listing::Popular), DateTime::<Utc>::MIN_UTC, &mut state, &mut skips)
            .await
            .unwrap();

        assert_eq!(harvest.items.len(), 2);
        assert_eq!(harvest.stop, Stop::Exhausted);
        let calls = site.calls();
        assert_eq!(calls.len(), 4);
        assert!(calls[1].contains("offset=20"));
        assert!(calls[2].contains("offset=20"));
    }

    #[tokio::test]
    async fn repeated_not_found_or_server_error_ends_pagination() {
        let site = FakeSite::new(|_, _| JsonResponse::status(StatusCode::NOT_FOUND));
        let mut state = RunState::default();
        let mut skips = SkipLog::default();
        let harvest = collect_offset(&site, pager(Listing::Recent), DateTime::<Utc>::MIN_UTC, &mut state, &mut skips)
            .await
            .unwrap();
        assert_eq!(harvest.stop, Stop::Status(StatusCode::NOT_FOUND));
        assert_eq!(site.calls().len(), 2);

        let site = FakeSite::new(|_, _| JsonResponse::status(StatusCode::INTERNAL_SERVER_ERROR));
        let harvest = collect_offset(&site, pager(Listing::Recent), DateTime::<Utc>::MIN_UTC, &mut state, &mut skips)
            .await
            .unwrap();
        assert_eq!(harvest.stop, Stop::Status(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(site.calls().len(), 1);
    }

    #[tokio::test]
    async fn malformed_items_are_counted_not_fatal() {
        let site = offset_site(vec![vec![json!({"displayTitle": "no id"}), listing_item(4, T)]]);
        let mut state = RunState::default();
        let mut skips = SkipLog::default();

        let harvest = collect_offset(&site, pager(Listing::Popular), DateTime::<Utc>::MIN_UTC, &mut state, &mut skips)
            .await
            .unwrap();

        assert_eq!(harvest.items.len(), 1);
        assert_eq!(skips.count(SkipReason::MissingField("pratilipiId")), 1);
    }

    fn trending_page(ids: &[u64], cursor: &str) -> JsonResponse {
        let items: Vec<Value> = ids.iter().map(|id| listing_item(*id, T)).collect();
        JsonResponse::ok(json!({
            "pratilipi": { "pratilipiList": items, "pratilipiCursor": cursor }
        }))
    }

    #[tokio::test]
    async fn trending_follows_cursor_until_empty() {
        let site = FakeSite::new(|_, params| match param(params, "pratilipiCursor").unwrap() {
            "" => trending_page(&[1, 2], "c1"),
            "c1" => trending_page(&[2, 3], "c2"),
            _ => trending_page(&[], "c3"),
        });
        let mut state = RunState::default();
        let mut skips = SkipLog::default();

        let harvest = collect_cursor(&site, CursorPager::new("HINDI", "romance", 100), &mut state, &mut skips)
            .await
            .unwrap();

        assert_eq!(harvest.stop, Stop::Exhausted);
        assert_eq!(harvest.pages, 2);
        assert_eq!(harvest.items.len(), 3);
        assert!(site.calls()[0].contains("pratilipiResultCount=100"));
    }

    #[tokio::test]
    async fn trending_stops_on_not_found() {
        let site = FakeSite::new(|_, params| match param(params, "pratilipiCursor").unwrap() {
            "" => trending_page(&[1], "c1"),
            _ => JsonResponse::status(StatusCode::NOT_FOUND),
        });
        let mut state = RunState::default();
        let mut skips = SkipLog::default();

        let harvest = collect_cursor(&site, CursorPager::new("HINDI", "romance", 100), &mut state, &mut skips)
            .await
            .unwrap();

        assert_eq!(harvest.stop, Stop::Status(StatusCode::NOT_FOUND));
        assert_eq!(harvest.items.len(), 1);
        assert_eq!(site.calls().len(), 2);
    }

    #[tokio::test]
    async fn trending_stops_when_cursor_repeats() {
        let site = FakeSite::new(|_, _| trending_page(&[1, 2], "same"));
        let mut state = RunState::default();
        let mut skips = SkipLog::default();

        let harvest = collect_cursor(&site, CursorPager::new("HINDI", "romance", 100), &mut state, &mut skips)
            .await
            .unwrap();

        assert_eq!(harvest.stop, Stop::CursorStalled);
        assert_eq!(harvest.items.len(), 2);
        assert_eq!(site.calls().len(), 2);
    }

    #[tokio::test]
    async fn listings_share_category_dedup() {
        let site = FakeSite::new(|path, params| {
            if path == TRENDING_PATH {
                return trending_page(&[1, 5], "");
            }
            match param(params, "offset").unwrap() {
                "0" => JsonResponse::ok(json!({ "pratilipiList": [listing_item(1, T)] })),
                _ => JsonResponse::ok(json!({ "pratilipiList": [] })),
            }
        });
        let mut state = RunState::default();
        let mut skips = SkipLog::default();

        let popular = collect_offset(&site, pager(Listing::Popular), DateTime::<Utc>::MIN_UTC, &mut state, &mut skips)
            .await
            .unwrap();
        let trending = collect_cursor(&site, CursorPager::new("HINDI", "romance", 100), &mut state, &mut skips)
            .await
            .unwrap();

        assert_eq!(popular.items.len(), 1);
        assert_eq!(trending.items.len(), 1);
        assert_eq!(models::article_id(&trending.items[0]), Ok(5));
    }

    #[tokio::test]
    async fn categories_are_flattened_from_navigation() {
        let site = FakeSite::new(|path, params| {
            assert_eq!(path, NAVIGATION_PATH);
            assert_eq!(param(params, "language"), Some("HINDI"));
            JsonResponse::ok(json!({
                "navigationList": [
                    {"linkList": [
                        {"categoryName": "Romance", "url": "/romance"},
                        {"url": "/broken"}
                    ]},
                    {"linkList": [{"categoryName": "Horror", "url": "/horror/"}]}
                ]
            }))
        });
        let mut skips = SkipLog::default();

        let categories = fetch_categories(&site, "HINDI", &mut skips).await.unwrap();

        let slugs: Vec<&str> = categories.iter().map(|c| c.slug.as_str()).collect();
        assert_eq!(slugs, vec!["romance", "horror"]);
        assert_eq!(skips.count(SkipReason::MissingField("categoryName")), 1);
    }
}
