//! spacetraveling: a static blog generator backed by the Prismic CMS
//!
//! Posts are fetched from a Prismic repository, normalized into a stable
//! shape and rendered with Tera templates into a static site. Pages are
//! regenerated once their revalidation interval has passed.

pub mod cache;
pub mod commands;
pub mod config;
pub mod content;
pub mod generator;
pub mod helpers;
pub mod pagination;
pub mod prismic;
pub mod server;
pub mod templates;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::prismic::{ContentApi, PrismicClient};

/// The main application
#[derive(Debug, Clone)]
pub struct Spacetraveling {
    /// Site configuration
    pub config: config::SiteConfig,
    /// Base directory
    pub base_dir: PathBuf,
    /// Public (output) directory
    pub public_dir: PathBuf,
    /// Static assets copied verbatim to the output
    pub static_dir: PathBuf,
}

impl Spacetraveling {
    /// Create a new instance from a site directory
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        let config_path = base_dir.join("_config.yml");

        let mut config = if config_path.exists() {
            config::SiteConfig::load(&config_path)?
        } else {
            tracing::debug!("No _config.yml in {:?}, using defaults", base_dir);
            config::SiteConfig::default()
        };
        config.apply_env_overrides();

        Ok(Self::with_config(base_dir, config))
    }

    pub fn with_config(base_dir: PathBuf, config: config::SiteConfig) -> Self {
        let public_dir = base_dir.join(&config.public_dir);
        let static_dir = base_dir.join(&config.static_dir);

        Self {
            config,
            base_dir,
            public_dir,
            static_dir,
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.base_dir.join("_config.yml")
    }

    /// Build the Prismic client for this site
    pub fn content_api(&self) -> Result<Arc<dyn ContentApi>> {
        let client =
            PrismicClient::new(&self.config.prismic).context("failed to create Prismic client")?;
        Ok(Arc::new(client))
    }

    /// Generate the static site
    pub async fn generate(&self, force: bool) -> Result<()> {
        commands::generate::run(self, force).await
    }

    /// Clean the public directory and cache
    pub fn clean(&self) -> Result<()> {
        commands::clean::run(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_new_reads_config() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("_config.yml"),
            "title: My Blog\npublic_dir: out\nprismic:\n  home_page_size: 5\n",
        )
        .unwrap();

        let app = Spacetraveling::new(dir.path()).unwrap();
        assert_eq!(app.config.title, "My Blog");
        assert_eq!(app.config.prismic.home_page_size, 5);
        assert_eq!(app.public_dir, dir.path().join("out"));
        assert_eq!(app.static_dir, dir.path().join("static"));
    }

    #[test]
    fn test_new_without_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let app = Spacetraveling::new(dir.path()).unwrap();
        assert_eq!(app.config.title, "Spacetraveling");
        assert_eq!(app.public_dir, dir.path().join("public"));
    }
}
