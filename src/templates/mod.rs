//! Built-in blog theme using the Tera template engine
//!
//! Templates are embedded in the binary. HTML templates are autoescaped;
//! rich-text bodies are rendered upstream into [`SafeHtml`] and emitted
//! with `| safe`.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use tera::{Context, Tera};

use crate::content::{reading_time, Post};
use crate::helpers::{html_escape, is_safe_url, post_route, DateFormatter, SafeHtml};

/// Stylesheet written to `css/style.css`
pub const STYLESHEET: &str = include_str!("theme/style.css");

/// Template renderer with the embedded theme
pub struct TemplateRenderer {
    tera: Tera,
}

impl TemplateRenderer {
    /// Create a renderer; `dates` backs the `date_format` filter
    pub fn new(dates: DateFormatter) -> Result<Self> {
        let mut tera = Tera::default();

        tera.add_raw_templates(vec![
            ("layout.html", include_str!("theme/layout.html")),
            ("index.html", include_str!("theme/index.html")),
            ("post.html", include_str!("theme/post.html")),
            ("404.html", include_str!("theme/404.html")),
            // Partials
            (
                "partials/header.html",
                include_str!("theme/partials/header.html"),
            ),
            (
                "partials/post_preview.html",
                include_str!("theme/partials/post_preview.html"),
            ),
        ])?;

        // Tera's default escaper also rewrites '/', which mangles URLs
        tera.set_escape_fn(html_escape);
        tera.register_filter("truncate_chars", truncate_chars_filter);
        tera.register_filter(
            "date_format",
            move |value: &tera::Value, _args: &HashMap<String, tera::Value>| {
                let s = tera::try_get_value!("date_format", "value", String, value);
                dates
                    .format(&s)
                    .map(tera::Value::String)
                    .map_err(|e| tera::Error::msg(e.to_string()))
            },
        );

        Ok(Self { tera })
    }

    /// Render a template with given context
    pub fn render(&self, template_name: &str, context: &Context) -> Result<String> {
        Ok(self.tera.render(template_name, context)?)
    }
}

/// Tera filter: truncate by character count
fn truncate_chars_filter(
    value: &tera::Value,
    args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    let s = tera::try_get_value!("truncate_chars", "value", String, value);
    let length = match args.get("length") {
        Some(val) => tera::try_get_value!("truncate_chars", "length", usize, val),
        None => 150,
    };
    let omission = match args.get("omission") {
        Some(val) => tera::try_get_value!("truncate_chars", "omission", String, val),
        None => "...".to_string(),
    };

    if s.chars().count() <= length {
        Ok(tera::Value::String(s))
    } else {
        let truncated: String = s.chars().take(length).collect();
        Ok(tera::Value::String(format!(
            "{}{}",
            truncated.trim_end(),
            omission
        )))
    }
}

/// Data structures for template context

#[derive(Debug, Clone, Serialize)]
pub struct SiteData {
    pub title: String,
    pub description: String,
    pub language: String,
    pub root: String,
    pub url: String,
}

/// A post in a listing
#[derive(Debug, Clone, Serialize)]
pub struct PreviewData {
    pub uid: String,
    pub path: String,
    pub title: String,
    pub subtitle: String,
    pub author: String,
    pub published_at: Option<String>,
}

impl From<&Post> for PreviewData {
    fn from(post: &Post) -> Self {
        Self {
            uid: post.uid.clone(),
            path: post_route(&post.uid),
            title: post.title.clone(),
            subtitle: post.subtitle.clone(),
            author: post.author.clone(),
            published_at: post.published_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockData {
    pub heading: String,
    pub anchor: String,
    pub html: SafeHtml,
}

/// A post detail page
#[derive(Debug, Clone, Serialize)]
pub struct PostData {
    pub uid: String,
    pub title: String,
    pub subtitle: String,
    pub author: String,
    pub published_at: Option<String>,
    pub banner_url: Option<String>,
    pub reading_time: usize,
    pub blocks: Vec<BlockData>,
}

impl PostData {
    /// View of `post` for a site served under `root`
    pub fn new(post: &Post, root: &str) -> Self {
        Self {
            uid: post.uid.clone(),
            title: post.title.clone(),
            subtitle: post.subtitle.clone(),
            author: post.author.clone(),
            published_at: post.published_at.clone(),
            banner_url: post
                .banner
                .as_ref()
                .map(|b| b.url.clone())
                .filter(|url| is_safe_url(url)),
            reading_time: reading_time::estimate(&post.content),
            blocks: post
                .content
                .iter()
                .map(|block| BlockData {
                    heading: block.heading.clone(),
                    anchor: slug::slugify(&block.heading),
                    html: block.body.as_html_under(root),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{Banner, ContentBlock, RichText};

    fn site() -> SiteData {
        SiteData {
            title: "Spacetraveling".to_string(),
            description: "Blog".to_string(),
            language: "pt-BR".to_string(),
            root: "/".to_string(),
            url: "http://localhost".to_string(),
        }
    }

    fn sample_post() -> Post {
        let mut post = Post::new("hooks", "Como <utilizar> Hooks", "Joseph");
        post.published_at = Some("2021-04-19T19:25:28+0000".to_string());
        post.banner = Some(Banner {
            url: "https://images.prismic.io/b.png".to_string(),
        });
        post.content = vec![ContentBlock::new(
            "Proin et varius",
            RichText::from_plain("one <b>two</b> three"),
        )];
        post
    }

    #[test]
    fn test_render_post_page() {
        let renderer = TemplateRenderer::new(DateFormatter::default()).unwrap();
        let mut context = Context::new();
        context.insert("site", &site());
        context.insert("description", "");
        context.insert("generator_version", "test");
        context.insert("post", &PostData::new(&sample_post(), "/"));

        let html = renderer.render("post.html", &context).unwrap();
        assert!(html.contains("Como &lt;utilizar&gt; Hooks"));
        assert!(html.contains("19 Abr 2021"));
        assert!(html.contains("1 min"));
        assert!(html.contains(r#"<h2 id="proin-et-varius">Proin et varius</h2>"#));
        assert!(html.contains("<p>one &lt;b&gt;two&lt;/b&gt; three</p>"));
        assert!(html.contains(r#"src="https://images.prismic.io/b.png""#));
    }

    #[test]
    fn test_render_index_page() {
        let renderer = TemplateRenderer::new(DateFormatter::default()).unwrap();
        let post = sample_post();
        let mut context = Context::new();
        context.insert("site", &site());
        context.insert("description", "Blog");
        context.insert("generator_version", "test");
        context.insert("posts", &vec![PreviewData::from(&post)]);
        context.insert("next_link", &Some("page/2/"));

        let html = renderer.render("index.html", &context).unwrap();
        assert!(html.contains(r#"href="/post/hooks/""#));
        assert!(html.contains(r#"href="/page/2/""#));
        assert!(html.contains("Carregar mais posts"));
    }

    #[test]
    fn test_invalid_date_fails_render() {
        let renderer = TemplateRenderer::new(DateFormatter::default()).unwrap();
        let mut post = sample_post();
        post.published_at = Some("yesterday".to_string());
        let mut context = Context::new();
        context.insert("site", &site());
        context.insert("description", "");
        context.insert("generator_version", "test");
        context.insert("post", &PostData::new(&post, "/"));
        assert!(renderer.render("post.html", &context).is_err());
    }

    #[test]
    fn test_unsafe_banner_dropped() {
        let mut post = sample_post();
        post.banner = Some(Banner {
            url: "javascript:alert(1)".to_string(),
        });
        assert_eq!(PostData::new(&post, "/").banner_url, None);
    }

    #[test]
    fn test_truncate_chars_filter() {
        let mut args = HashMap::new();
        args.insert("length".to_string(), tera::Value::from(5));
        let out = truncate_chars_filter(&tera::Value::from("Hello World"), &args).unwrap();
        assert_eq!(out, tera::Value::from("Hello..."));
    }
}
