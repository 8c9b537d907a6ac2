//! Generator module - renders CMS content into static HTML files

use anyhow::{Context as _, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tera::Context;
use walkdir::WalkDir;

use crate::cache::{route_key, unix_now, RevalidationCache};
use crate::config::SiteConfig;
use crate::content::{normalize_detail, normalize_preview, Post, PostPage};
use crate::helpers::{full_url_for, home_route, post_route, DateFormatter};
use crate::pagination::{LoadOutcome, PaginationAggregator};
use crate::prismic::{ApiResponse, ContentApi, Predicate, QueryOptions, RawDocument};
use crate::templates::{PostData, PreviewData, SiteData, TemplateRenderer, STYLESHEET};
use crate::Spacetraveling;

/// Summary of a generation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerateStats {
    pub home_pages: usize,
    pub posts: usize,
    pub skipped: usize,
}

/// Static site generator using Tera templates
pub struct Generator {
    app: Spacetraveling,
    renderer: TemplateRenderer,
    api: Arc<dyn ContentApi>,
}

impl Generator {
    /// Create a new generator
    pub fn new(app: &Spacetraveling, api: Arc<dyn ContentApi>) -> Result<Self> {
        let dates = DateFormatter::from_config(&app.config).context("invalid date settings")?;
        let renderer = TemplateRenderer::new(dates)?;

        Ok(Self {
            app: app.clone(),
            renderer,
            api,
        })
    }

    /// Generate the entire site. Fresh routes are kept unless `force` is set.
    pub async fn generate(
        &self,
        cache: &mut RevalidationCache,
        force: bool,
    ) -> Result<GenerateStats> {
        fs::create_dir_all(&self.app.public_dir)?;
        self.write_assets()?;

        let mut stats = GenerateStats::default();

        if force || self.home_is_stale(cache) {
            stats.home_pages = self.generate_home(cache).await?;
        } else {
            tracing::debug!("Home pages are fresh, skipping");
        }

        let (posts, skipped) = self.generate_paths(cache, force).await?;
        stats.posts = posts;
        stats.skipped = skipped;

        Ok(stats)
    }

    /// Whether the home page set needs regenerating
    pub fn home_is_stale(&self, cache: &RevalidationCache) -> bool {
        cache.is_stale(&route_key(""), unix_now()) || !self.output_path("").exists()
    }

    /// Absolute path of a route's `index.html`
    pub fn output_path(&self, route: &str) -> PathBuf {
        self.app.public_dir.join(route).join("index.html")
    }

    /// Write the stylesheet, the 404 page and the static directory
    fn write_assets(&self) -> Result<()> {
        let css_path = self.app.public_dir.join("css").join("style.css");
        if let Some(parent) = css_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&css_path, STYLESHEET)?;

        fs::write(
            self.app.public_dir.join("404.html"),
            self.render_not_found()?,
        )?;

        self.copy_static_assets()
    }

    /// Render the home listing: `index.html` plus a `page/N/` for every
    /// further "load more" step, each showing everything loaded so far
    pub async fn generate_home(&self, cache: &mut RevalidationCache) -> Result<usize> {
        let aggregator = home_listing(self.api.clone(), &self.app.config).await?;
        let max_pages = self.app.config.prismic.max_home_pages.max(1);
        let now = unix_now();

        let mut page = 1;
        loop {
            let shown = aggregator.posts();
            let loaded = page < max_pages && load_more(&aggregator, page).await;
            let next_link = loaded.then(|| home_route(page + 1));

            self.write_home_page(page, &shown, next_link.as_deref(), now, cache)?;
            if !loaded {
                break;
            }
            page += 1;
        }

        self.prune_home_pages(page, cache)?;
        tracing::info!("Generated {} home pages", page);
        Ok(page)
    }

    fn write_home_page(
        &self,
        page: usize,
        posts: &[Post],
        next_link: Option<&str>,
        now: u64,
        cache: &mut RevalidationCache,
    ) -> Result<()> {
        let previews: Vec<PreviewData> = posts.iter().map(PreviewData::from).collect();

        let route = home_route(page);

        let mut context = self.base_context();
        context.insert("canonical", &full_url_for(&self.app.config, &route));
        context.insert("posts", &previews);
        context.insert("next_link", &next_link);
        let html = self
            .renderer
            .render("index.html", &context)
            .with_context(|| format!("failed to render home page {}", page))?;

        self.write_page(&route, &html, self.app.config.revalidate.home_interval(), now, cache)?;
        Ok(())
    }

    /// Remove `page/N/` directories left over from a longer listing
    fn prune_home_pages(&self, last_page: usize, cache: &mut RevalidationCache) -> Result<()> {
        let page_dir = self.app.public_dir.join("page");
        if !page_dir.exists() {
            return Ok(());
        }

        for entry in fs::read_dir(&page_dir)? {
            let entry = entry?;
            let Some(n) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<usize>().ok())
            else {
                continue;
            };
            if n > last_page {
                fs::remove_dir_all(entry.path())?;
                cache.remove(&route_key(&home_route(n)));
                tracing::debug!("Removed stale home page {}", n);
            }
        }
        Ok(())
    }

    /// Pre-render the first `paths_page_size` posts
    pub async fn generate_paths(
        &self,
        cache: &mut RevalidationCache,
        force: bool,
    ) -> Result<(usize, usize)> {
        let prismic = &self.app.config.prismic;
        let options = QueryOptions::new().page_size(prismic.paths_page_size.max(1));
        let response = self
            .api
            .query(&[Predicate::document_type(&prismic.document_type)], &options)
            .await
            .context("failed to query post paths")?;

        let now = unix_now();
        let mut written = 0;
        let mut skipped = 0;

        for doc in &response.results {
            let Some(uid) = path_uid(doc) else {
                tracing::warn!("Skipping document {} without uid", doc.id);
                skipped += 1;
                continue;
            };

            let route = post_route(&uid);
            if !force
                && !cache.is_stale(&route_key(&route), now)
                && self.output_path(&route).exists()
            {
                continue;
            }

            match normalize_detail(doc, &uid) {
                Ok(post) => {
                    self.write_post(&post, now, cache)?;
                    written += 1;
                }
                Err(e) => {
                    tracing::warn!("Skipping post {}: {}", uid, e);
                    skipped += 1;
                }
            }
        }

        tracing::info!("Generated {} post pages ({} skipped)", written, skipped);
        Ok((written, skipped))
    }

    /// Fetch one post by uid and render its page
    pub async fn generate_post(&self, uid: &str, cache: &mut RevalidationCache) -> Result<PathBuf> {
        let doc = self
            .api
            .get_by_uid(&self.app.config.prismic.document_type, uid)
            .await?;
        let post = normalize_detail(&doc, uid)?;
        self.write_post(&post, unix_now(), cache)
    }

    /// Delete a post page whose document is gone
    pub fn remove_post(&self, uid: &str, cache: &mut RevalidationCache) -> Result<()> {
        let route = post_route(uid);
        let dir = self.app.public_dir.join(&route);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            tracing::info!("Removed post page: {:?}", dir);
        }
        cache.remove(&route_key(&route));
        Ok(())
    }

    fn write_post(&self, post: &Post, now: u64, cache: &mut RevalidationCache) -> Result<PathBuf> {
        let route = post_route(&post.uid);

        let mut context = self.base_context();
        context.insert("canonical", &full_url_for(&self.app.config, &route));
        context.insert("post", &PostData::new(post, &self.app.config.root));
        let html = self
            .renderer
            .render("post.html", &context)
            .with_context(|| format!("failed to render post {}", post.uid))?;

        self.write_page(&route, &html, self.app.config.revalidate.post_interval(), now, cache)
    }

    pub fn render_not_found(&self) -> Result<String> {
        self.renderer.render("404.html", &self.base_context())
    }

    fn write_page(
        &self,
        route: &str,
        html: &str,
        revalidate: Duration,
        now: u64,
        cache: &mut RevalidationCache,
    ) -> Result<PathBuf> {
        let relative = format!("{}index.html", route);
        let output_path = self.app.public_dir.join(&relative);
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&output_path, html)
            .with_context(|| format!("failed to write {:?}", output_path))?;
        tracing::debug!("Generated: {:?}", output_path);

        cache.record(&route_key(route), &relative, now, revalidate);
        Ok(output_path)
    }

    fn base_context(&self) -> Context {
        let config = &self.app.config;
        let mut context = Context::new();
        context.insert("site", &site_data(config));
        context.insert("description", &config.description);
        context.insert("generator_version", env!("CARGO_PKG_VERSION"));
        context.insert("canonical", &None::<String>);
        context
    }

    /// Copy the static directory to the public directory
    fn copy_static_assets(&self) -> Result<()> {
        let static_dir = &self.app.static_dir;
        if !static_dir.exists() {
            return Ok(());
        }

        for entry in WalkDir::new(static_dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let relative = path.strip_prefix(static_dir)?;
            let dest = self.app.public_dir.join(relative);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(path, &dest)?;
        }

        Ok(())
    }
}

fn site_data(config: &SiteConfig) -> SiteData {
    SiteData {
        title: config.title.clone(),
        description: config.description.clone(),
        language: config.language.clone(),
        root: config.root.clone(),
        url: config.url.clone(),
    }
}

/// Query the first home page and seed an aggregator with it.
/// Documents that cannot be shown are skipped.
pub async fn home_listing(
    api: Arc<dyn ContentApi>,
    config: &SiteConfig,
) -> Result<PaginationAggregator> {
    let prismic = &config.prismic;
    let doc_type = &prismic.document_type;
    let options = QueryOptions::new()
        .fetch([
            format!("{}.title", doc_type),
            format!("{}.subtitle", doc_type),
            format!("{}.author", doc_type),
        ])
        .page_size(prismic.home_page_size.max(1));

    let response = api
        .query(&[Predicate::document_type(doc_type)], &options)
        .await
        .context("failed to query home posts")?;

    Ok(PaginationAggregator::new(api, normalize_lenient(response)))
}

fn normalize_lenient(response: ApiResponse) -> PostPage {
    let results = response
        .results
        .iter()
        .filter_map(|doc| match normalize_preview(doc) {
            Ok(post) => Some(post),
            Err(e) => {
                tracing::warn!("Skipping home entry: {}", e);
                None
            }
        })
        .collect();
    PostPage::new(results, response.next_page)
}

/// Load one more page; failures end the listing where it is
async fn load_more(aggregator: &PaginationAggregator, page: usize) -> bool {
    match aggregator.load_next().await {
        Ok(LoadOutcome::Appended(_)) => true,
        Ok(LoadOutcome::Exhausted) | Ok(LoadOutcome::InFlight) => false,
        Err(e) => {
            tracing::warn!("Home listing stops at page {}: {}", page, e);
            false
        }
    }
}

/// The uid a document is published under
fn path_uid(doc: &RawDocument) -> Option<String> {
    doc.uid
        .iter()
        .chain(doc.slugs.iter())
        .find(|s| !s.is_empty())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prismic::fake::FakeApi;
    use crate::prismic::ApiError;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn site(dir: &TempDir, home_page_size: u32, paths_page_size: u32) -> Spacetraveling {
        let mut config = SiteConfig::default();
        config.prismic.home_page_size = home_page_size;
        config.prismic.paths_page_size = paths_page_size;
        Spacetraveling::with_config(dir.path().to_path_buf(), config)
    }

    fn read(app: &Spacetraveling, relative: &str) -> String {
        fs::read_to_string(app.public_dir.join(relative)).unwrap()
    }

    #[tokio::test]
    async fn test_generate_home_pages() {
        let dir = TempDir::new().unwrap();
        let app = site(&dir, 2, 3);
        let api = Arc::new(FakeApi::with_posts(&["a", "b", "c", "d", "e"]));
        let generator = Generator::new(&app, api.clone()).unwrap();
        let mut cache = RevalidationCache::new();

        let stats = generator.generate(&mut cache, false).await.unwrap();
        assert_eq!(
            stats,
            GenerateStats {
                home_pages: 3,
                posts: 3,
                skipped: 0
            }
        );

        let index = read(&app, "index.html");
        assert!(index.contains("Post a") && index.contains("Post b"));
        assert!(!index.contains("Post c"));
        assert!(index.contains(r#"href="/page/2/""#));

        let page3 = read(&app, "page/3/index.html");
        assert!(page3.contains("Post a") && page3.contains("Post e"));
        assert!(!page3.contains("Carregar mais posts"));

        let post = read(&app, "post/a/index.html");
        assert!(post.contains(r#"<link rel="canonical" href="http://localhost:4000/post/a/">"#));
        assert!(post.contains("19 Abr 2021"));
        assert!(post.contains("1 min"));
        assert!(!app.public_dir.join("post/d").exists());

        assert!(app.public_dir.join("css/style.css").exists());
        assert!(read(&app, "404.html").contains("Post não encontrado"));

        assert!(!cache.is_stale("/", unix_now()));
        assert!(!cache.is_stale("/page/3/", unix_now()));
        assert!(!cache.is_stale("/post/c/", unix_now()));
        assert_eq!(cache.get("/post/a/").unwrap().output_path, "post/a/index.html");
        assert_eq!(cache.get("/post/a/").unwrap().revalidate_after, 3600);

        let queries = api.queries.lock().unwrap();
        assert!(queries[0].1.fetch.contains(&"posts.title".to_string()));
    }

    #[tokio::test]
    async fn test_fresh_routes_are_kept() {
        let dir = TempDir::new().unwrap();
        let app = site(&dir, 2, 3);
        let api = Arc::new(FakeApi::with_posts(&["a", "b", "c"]));
        let generator = Generator::new(&app, api.clone()).unwrap();
        let mut cache = RevalidationCache::new();

        generator.generate(&mut cache, false).await.unwrap();
        let fetches = api.fetch_calls.load(Ordering::SeqCst);

        let stats = generator.generate(&mut cache, false).await.unwrap();
        assert_eq!(stats.home_pages, 0);
        assert_eq!(stats.posts, 0);
        assert_eq!(api.fetch_calls.load(Ordering::SeqCst), fetches);

        let stats = generator.generate(&mut cache, true).await.unwrap();
        assert_eq!(stats.home_pages, 2);
        assert_eq!(stats.posts, 3);
    }

    #[tokio::test]
    async fn test_bad_documents_are_skipped() {
        let dir = TempDir::new().unwrap();
        let app = site(&dir, 3, 3);
        let mut api = FakeApi::with_posts(&["a", "b", "c"]);
        api.documents[1].data.remove("author");
        let generator = Generator::new(&app, Arc::new(api)).unwrap();
        let mut cache = RevalidationCache::new();

        let stats = generator.generate(&mut cache, false).await.unwrap();
        assert_eq!(stats.posts, 2);
        assert_eq!(stats.skipped, 1);

        let index = read(&app, "index.html");
        assert!(index.contains("Post a") && index.contains("Post c"));
        assert!(!index.contains("Post b"));
        assert!(!app.public_dir.join("post/b").exists());
    }

    #[tokio::test]
    async fn test_malformed_publication_date_is_skipped() {
        let dir = TempDir::new().unwrap();
        let app = site(&dir, 3, 3);
        let mut api = FakeApi::with_posts(&["a", "b", "c"]);
        api.documents[1].first_publication_date = Some("garbage".to_string());
        let generator = Generator::new(&app, Arc::new(api)).unwrap();
        let mut cache = RevalidationCache::new();

        let stats = generator.generate(&mut cache, false).await.unwrap();
        assert_eq!(stats.skipped, 1);

        let index = read(&app, "index.html");
        assert!(index.contains("Post a") && index.contains("Post c"));
        assert!(!index.contains("Post b"));
        assert!(app.public_dir.join("post/a/index.html").exists());
        assert!(app.public_dir.join("post/c/index.html").exists());
        assert!(!app.public_dir.join("post/b").exists());
    }

    #[tokio::test]
    async fn test_failed_load_ends_listing() {
        let dir = TempDir::new().unwrap();
        let app = site(&dir, 1, 1);
        let api = Arc::new(FakeApi::with_posts(&["a", "b", "c"]));
        api.fail_next_fetch.store(true, Ordering::SeqCst);
        let generator = Generator::new(&app, api).unwrap();
        let mut cache = RevalidationCache::new();

        let pages = generator.generate_home(&mut cache).await.unwrap();
        assert_eq!(pages, 1);
        assert!(!read(&app, "index.html").contains("Carregar mais posts"));
    }

    #[tokio::test]
    async fn test_max_home_pages_and_pruning() {
        let dir = TempDir::new().unwrap();
        let mut app = site(&dir, 1, 1);
        let api = Arc::new(FakeApi::with_posts(&["a", "b", "c", "d"]));
        let mut cache = RevalidationCache::new();

        let generator = Generator::new(&app, api.clone()).unwrap();
        assert_eq!(generator.generate_home(&mut cache).await.unwrap(), 4);
        assert!(app.public_dir.join("page/4/index.html").exists());

        app.config.prismic.max_home_pages = 2;
        let generator = Generator::new(&app, api).unwrap();
        assert_eq!(generator.generate_home(&mut cache).await.unwrap(), 2);
        assert!(!app.public_dir.join("page/3").exists());
        assert!(!app.public_dir.join("page/4").exists());
        assert!(cache.get("/page/4/").is_none());
        assert!(!read(&app, "page/2/index.html").contains("Carregar mais posts"));
    }

    #[tokio::test]
    async fn test_generate_post_by_uid() {
        let dir = TempDir::new().unwrap();
        let app = site(&dir, 1, 1);
        let generator = Generator::new(&app, Arc::new(FakeApi::with_posts(&["a", "b"]))).unwrap();
        let mut cache = RevalidationCache::new();

        let path = generator.generate_post("b", &mut cache).await.unwrap();
        assert_eq!(path, app.public_dir.join("post/b/index.html"));
        assert!(cache.get("/post/b/").is_some());

        let err = generator.generate_post("zzz", &mut cache).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ApiError>(),
            Some(ApiError::NotFound { .. })
        ));

        generator.remove_post("b", &mut cache).unwrap();
        assert!(!path.exists());
        assert!(cache.get("/post/b/").is_none());
    }

    #[tokio::test]
    async fn test_static_dir_is_copied() {
        let dir = TempDir::new().unwrap();
        let app = site(&dir, 1, 1);
        fs::create_dir_all(app.static_dir.join("images")).unwrap();
        fs::write(app.static_dir.join("images/logo.svg"), "<svg/>").unwrap();

        let generator = Generator::new(&app, Arc::new(FakeApi::default())).unwrap();
        generator.generate(&mut RevalidationCache::new(), false).await.unwrap();
        assert_eq!(read(&app, "images/logo.svg"), "<svg/>");
    }

    #[test]
    fn test_path_uid() {
        let mut doc = RawDocument {
            uid: Some(String::new()),
            slugs: vec!["from-slug".to_string()],
            ..Default::default()
        };
        assert_eq!(path_uid(&doc), Some("from-slug".to_string()));
        doc.uid = Some("canonical".to_string());
        assert_eq!(path_uid(&doc), Some("canonical".to_string()));
        doc.uid = None;
        doc.slugs.clear();
        assert_eq!(path_uid(&doc), None);
    }
}
