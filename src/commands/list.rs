//! List site content

use anyhow::Result;

use crate::content::Post;
use crate::generator::home_listing;
use crate::helpers::DateFormatter;
use crate::Spacetraveling;

/// List the posts the home page set would show
pub async fn run(app: &Spacetraveling) -> Result<()> {
    let api = app.content_api()?;
    let aggregator = home_listing(api, &app.config).await?;

    for _ in 1..app.config.prismic.max_home_pages.max(1) {
        if aggregator.next_page().is_none() {
            break;
        }
        aggregator.load_next().await?;
    }

    let dates = DateFormatter::from_config(&app.config)?;
    let posts = aggregator.posts();
    println!("Posts ({}):", posts.len());
    for post in &posts {
        println!("  {}", format_line(&dates, post));
    }
    if aggregator.next_page().is_some() {
        println!("  ... more posts available");
    }

    Ok(())
}

fn format_line(dates: &DateFormatter, post: &Post) -> String {
    let date = match post.published_at.as_deref() {
        Some(ts) => dates.format(ts).unwrap_or_else(|_| ts.to_string()),
        None => "-".to_string(),
    };
    format!("{} - {} [{}]", date, post.title, post.uid)
}
