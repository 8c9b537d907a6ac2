//! Helper functions for templates and generation
//!
//! Date formatting, HTML escaping and URL building shared by the
//! generator, the template filters and the development server.

mod date;
mod html;
mod url;

pub use date::*;
pub use html::*;
pub use url::*;
