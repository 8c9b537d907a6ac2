//! URL helper functions

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::config::SiteConfig;

/// Characters escaped in a single path segment (dots included, so `..` cannot escape)
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

/// Generate a URL with the root path
///
/// # Examples
/// ```ignore
/// url_for(&config, "/post/hello/") // -> "/blog/post/hello/"
/// ```
pub fn url_for(config: &SiteConfig, path: &str) -> String {
    let root = config.root.trim_end_matches('/');
    let path = path.trim_start_matches('/');

    if path.is_empty() {
        format!("{}/", root)
    } else {
        format!("{}/{}", root, path)
    }
}

/// Generate a full URL including the domain
pub fn full_url_for(config: &SiteConfig, path: &str) -> String {
    let base = config.url.trim_end_matches('/');
    format!("{}{}", base, url_for(config, path))
}

/// Encode a single URL path segment
pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

/// Route of a post detail page, e.g. `post/hello-world/`
pub fn post_route(uid: &str) -> String {
    format!("post/{}/", encode_segment(uid))
}

/// Route of the n-th (1-based) home page; page 1 is the site root
pub fn home_route(page: usize) -> String {
    if page <= 1 {
        String::new()
    } else {
        format!("page/{}/", page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SiteConfig {
        let mut config = SiteConfig::default();
        config.url = "https://example.com".to_string();
        config.root = "/blog/".to_string();
        config
    }

    #[test]
    fn test_url_for() {
        let config = test_config();
        assert_eq!(url_for(&config, "/css/style.css"), "/blog/css/style.css");
        assert_eq!(url_for(&config, ""), "/blog/");
    }

    #[test]
    fn test_full_url_for() {
        let config = test_config();
        assert_eq!(
            full_url_for(&config, "/post/a/"),
            "https://example.com/blog/post/a/"
        );
    }

    #[test]
    fn test_routes() {
        assert_eq!(post_route("como-utilizar-hooks"), "post/como-utilizar-hooks/");
        assert_eq!(post_route("a b/../c"), "post/a%20b%2F%2E%2E%2Fc/");
        assert_eq!(home_route(1), "");
        assert_eq!(home_route(3), "page/3/");
    }
}
