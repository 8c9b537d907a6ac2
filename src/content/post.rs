//! Post models

use serde::{Deserialize, Serialize};

use super::richtext::RichText;

/// Post banner image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Banner {
    pub url: String,
}

/// A titled section of a post body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub heading: String,
    pub body: RichText,
}

impl ContentBlock {
    pub fn new(heading: &str, body: RichText) -> Self {
        Self {
            heading: heading.to_string(),
            body,
        }
    }
}

/// A blog post ready for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// URL identifier
    pub uid: String,

    /// First publication timestamp, as sent by the API
    pub published_at: Option<String>,

    pub title: String,

    pub subtitle: String,

    pub author: String,

    /// Only present on detail pages
    pub banner: Option<Banner>,

    pub content: Vec<ContentBlock>,
}

impl Post {
    /// Create a new post with minimal required fields
    pub fn new(uid: &str, title: &str, author: &str) -> Self {
        Self {
            uid: uid.to_string(),
            published_at: None,
            title: title.to_string(),
            subtitle: String::new(),
            author: author.to_string(),
            banner: None,
            content: Vec::new(),
        }
    }
}

/// One fetched page of posts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostPage {
    pub results: Vec<Post>,
    /// URL of the next page; `None` once the listing is exhausted
    pub next_page: Option<String>,
}

impl PostPage {
    pub fn new(results: Vec<Post>, next_page: Option<String>) -> Self {
        Self { results, next_page }
    }

    pub fn has_next(&self) -> bool {
        self.next_page.is_some()
    }
}
