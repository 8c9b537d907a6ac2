//! Generate static files

use anyhow::Result;
use std::sync::Arc;

use crate::cache::RevalidationCache;
use crate::generator::{GenerateStats, Generator};
use crate::prismic::ContentApi;
use crate::Spacetraveling;

/// Generate the static site, regenerating only stale routes unless `force`
pub async fn run(app: &Spacetraveling, force: bool) -> Result<()> {
    let api = app.content_api()?;
    run_with_api(app, api, force).await?;
    Ok(())
}

pub async fn run_with_api(
    app: &Spacetraveling,
    api: Arc<dyn ContentApi>,
    force: bool,
) -> Result<GenerateStats> {
    let start = std::time::Instant::now();

    let mut cache = if force {
        tracing::info!("Full generation (force)");
        RevalidationCache::new()
    } else {
        RevalidationCache::load(&app.base_dir)
    };

    let generator = Generator::new(app, api)?;
    let stats = generator.generate(&mut cache, force).await?;

    cache.save(&app.base_dir)?;

    let duration = start.elapsed();
    tracing::info!(
        "Generated {} home pages and {} posts in {:.2}s",
        stats.home_pages,
        stats.posts,
        duration.as_secs_f64()
    );

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prismic::fake::FakeApi;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_cache_persists_between_runs() {
        let dir = TempDir::new().unwrap();
        let app = Spacetraveling::new(dir.path()).unwrap();
        let api: Arc<dyn ContentApi> = Arc::new(FakeApi::with_posts(&["a", "b"]));

        let first = run_with_api(&app, api.clone(), false).await.unwrap();
        assert_eq!(first.posts, 2);
        assert!(!RevalidationCache::load(dir.path()).is_empty());

        let second = run_with_api(&app, api.clone(), false).await.unwrap();
        assert_eq!(second, GenerateStats::default());

        let forced = run_with_api(&app, api, true).await.unwrap();
        assert_eq!(forced.posts, 2);
    }
}
