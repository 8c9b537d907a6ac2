//! Content module - posts, rich text and their normalization

pub mod normalize;
mod post;
pub mod reading_time;
pub mod richtext;

pub use normalize::{normalize_detail, normalize_preview, NormalizeError, Strategy};
pub use post::{Banner, ContentBlock, Post, PostPage};
pub use richtext::RichText;
