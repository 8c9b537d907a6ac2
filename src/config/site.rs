//! Site configuration (_config.yml)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main site configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    // Site
    pub title: String,
    pub description: String,
    pub language: String,
    pub timezone: String,

    // URL
    pub url: String,
    pub root: String,

    // Directory
    pub public_dir: String,
    pub static_dir: String,

    // Date format (date-fns tokens)
    pub date_format: String,

    // Content API
    #[serde(default)]
    pub prismic: PrismicConfig,

    // Incremental regeneration
    #[serde(default)]
    pub revalidate: RevalidateConfig,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: "Spacetraveling".to_string(),
            description: String::new(),
            language: "pt-BR".to_string(),
            timezone: String::new(),

            url: "http://localhost:4000".to_string(),
            root: "/".to_string(),

            public_dir: "public".to_string(),
            static_dir: "static".to_string(),

            date_format: "dd MMM yyyy".to_string(),

            prismic: PrismicConfig::default(),
            revalidate: RevalidateConfig::default(),
        }
    }
}

impl SiteConfig {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).with_context(|| format!("failed to read {:?}", path))?;
        let config: SiteConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse {:?}", path))?;
        Ok(config)
    }

    /// Apply `PRISMIC_API_ENDPOINT` / `PRISMIC_ACCESS_TOKEN` from the environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var("PRISMIC_API_ENDPOINT").ok(),
            std::env::var("PRISMIC_ACCESS_TOKEN").ok(),
        );
    }

    fn apply_overrides(&mut self, endpoint: Option<String>, token: Option<String>) {
        if let Some(endpoint) = endpoint.filter(|e| !e.trim().is_empty()) {
            tracing::debug!("Using Prismic endpoint from environment: {}", endpoint);
            self.prismic.endpoint = endpoint;
        }
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.prismic.access_token = Some(token);
        }
    }
}

/// Prismic repository settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrismicConfig {
    /// API v2 entry point, e.g. `https://my-repo.cdn.prismic.io/api/v2`
    pub endpoint: String,
    pub access_token: Option<String>,
    /// Custom type holding blog posts
    pub document_type: String,
    /// Posts per home page request
    pub home_page_size: u32,
    /// Posts pre-rendered as detail pages at build time
    pub paths_page_size: u32,
    /// Upper bound on the static "load more" pages
    pub max_home_pages: usize,
    /// Request timeout in seconds
    pub timeout: u64,
}

impl Default for PrismicConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            access_token: None,
            document_type: "posts".to_string(),
            home_page_size: 1,
            paths_page_size: 3,
            max_home_pages: 10,
            timeout: 30,
        }
    }
}

/// Revalidation intervals, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RevalidateConfig {
    pub home: u64,
    pub post: u64,
}

impl Default for RevalidateConfig {
    fn default() -> Self {
        Self {
            home: 60 * 30,
            post: 60 * 60,
        }
    }
}

impl RevalidateConfig {
    pub fn home_interval(&self) -> Duration {
        Duration::from_secs(self.home)
    }

    pub fn post_interval(&self) -> Duration {
        Duration::from_secs(self.post)
    }
}
