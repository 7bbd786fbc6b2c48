use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub site: SiteConfig,
    /// Named database sections, e.g. `"database-read"`.
    pub database: HashMap<String, DatabaseConfig>,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub base_url: String,
    pub language: String,
    /// Substring identifying the session token among the handshake cookies.
    pub cookie_marker: String,
    pub request_timeout_secs: u64,
    pub not_found_retry_secs: u64,
    pub trending_page_size: u32,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://hindi.pratilipi.com/".to_string(),
            language: "HINDI".to_string(),
            cookie_marker: "access_token".to_string(),
            request_timeout_secs: 30,
            not_found_retry_secs: 3,
            trending_page_size: 100,
        }
    }
}

impl SiteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn not_found_retry_delay(&self) -> Duration {
        Duration::from_secs(self.not_found_retry_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: usize,
}

fn default_connect_attempts() -> usize {
    3
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub batch_size: usize,
    /// Rows in the popular snapshot; all rows when unset.
    pub popular_count: Option<usize>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            batch_size: 1,
            popular_count: None,
        }
    }
}

impl Config {
    pub fn database_section(&self, name: &str) -> Result<&DatabaseConfig> {
        self.database
            .get(name)
            .with_context(|| format!("database section `{name}` not found in config"))
    }
}

pub fn load(path: &str) -> Result<Config> {
    let text = fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
    parse(&text).with_context(|| format!("parsing config {path}"))
}

fn parse(text: &str) -> Result<Config> {
    let config: Config = serde_json::from_str(text)?;
    Ok(config)
}
