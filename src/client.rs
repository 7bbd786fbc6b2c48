use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::seq::IndexedRandom;
use reqwest::header::{COOKIE, SET_COOKIE, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::SiteConfig;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Mobile/15E148 Safari/604.1",
];

/// Status plus decoded body of one GET. The body is `Null` for non-success
/// statuses.
#[derive(Debug, Clone)]
pub struct JsonResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl JsonResponse {
    #[cfg(test)]
    pub fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body,
        }
    }

    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            body: Value::Null,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// GET access to the site's JSON API. `path` is relative to the site root.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn get_json(&self, path: &str, params: &[(&str, String)]) -> Result<JsonResponse>;
}

pub struct SiteClient {
    client: Client,
    base_url: Url,
    cookie: String,
}

impl SiteClient {
    /// Performs the handshake GET against the site root and keeps the session
    /// cookie it hands out. A missing token leaves the cookie empty.
    pub async fn bootstrap(site: &SiteConfig) -> Result<Self> {
        let base_url = Url::parse(&site.base_url)
            .with_context(|| format!("invalid base url {}", site.base_url))?;

        let client = Client::builder()
            .timeout(site.request_timeout())
            .build()?;

        let response = client
            .get(base_url.clone())
            .header(USER_AGENT, random_user_agent())
            .send()
            .await
            .with_context(|| format!("handshake with {base_url}"))?;

        let cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok());

        let cookie = match extract_cookie_token(cookies, &site.cookie_marker) {
            Some(token) => {
                info!(marker = %site.cookie_marker, "Session token acquired");
                token
            }
            None => {
                warn!(marker = %site.cookie_marker, "No session token in handshake; continuing without");
                String::new()
            }
        };

        Ok(Self {
            client,
            base_url,
            cookie,
        })
    }

    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url> {
        let mut url = self
            .base_url
            .join(path)
            .with_context(|| format!("joining {path} onto {}", self.base_url))?;
        if !params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }
}

#[async_trait]
impl Fetch for SiteClient {
    async fn get_json(&self, path: &str, params: &[(&str, String)]) -> Result<JsonResponse> {
        let url = self.endpoint(path, params)?;
        debug!(%url, "GET");

        let mut request = self.client.get(url.clone()).header(USER_AGENT, random_user_agent());
        if !self.cookie.is_empty() {
            request = request.header(COOKIE, &self.cookie);
        }

        let response = request.send().await.with_context(|| format!("GET {url}"))?;
        let status = response.status();
        if !status.is_success() {
            debug!(%url, %status, "Non-success status");
            return Ok(JsonResponse::status(status));
        }

        let body = response
            .json::<Value>()
            .await
            .with_context(|| format!("decoding JSON from {url}"))?;

        Ok(JsonResponse { status, body })
    }
}

fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Scans whitespace-delimited cookie tokens for the first one containing
/// `marker`.
pub fn extract_cookie_token<'a>(
    set_cookie_values: impl IntoIterator<Item = &'a str>,
    marker: &str,
) -> Option<String> {
    set_cookie_values
        .into_iter()
        .flat_map(str::split_whitespace)
        .find(|token| token.contains(marker))
        .map(|token| token.trim_end_matches(';').to_string())
}
