//! Mapping of raw CMS documents onto [`Post`]

use serde_json::{Map, Value};
use thiserror::Error;

use super::post::{Banner, ContentBlock, Post};
use super::richtext::RichText;
use crate::helpers::parse_timestamp;
use crate::prismic::RawDocument;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("document {document:?} is missing required field `{field}`")]
    MissingField {
        document: String,
        field: &'static str,
    },

    #[error("document {document:?} has a malformed `{field}` field: {reason}")]
    InvalidField {
        document: String,
        field: &'static str,
        reason: String,
    },
}

/// How a document was fetched, which decides the uid source and which
/// fields must be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// List query with a field projection: uid from the canonical `uid`,
    /// falling back to the first slug. `content` is optional.
    Preview,
    /// Single document fetch: canonical `uid`, `content` required, banner read.
    Detail,
}

/// Normalize a document from a list query
pub fn normalize_preview(doc: &RawDocument) -> Result<Post, NormalizeError> {
    normalize(doc, Strategy::Preview, None)
}

/// Normalize a document fetched by uid. `requested_uid` is used when the
/// document itself does not echo its uid.
pub fn normalize_detail(doc: &RawDocument, requested_uid: &str) -> Result<Post, NormalizeError> {
    normalize(doc, Strategy::Detail, Some(requested_uid))
}

pub fn normalize(
    doc: &RawDocument,
    strategy: Strategy,
    requested_uid: Option<&str>,
) -> Result<Post, NormalizeError> {
    let name = document_name(doc);
    let missing = |field: &'static str| NormalizeError::MissingField {
        document: name.clone(),
        field,
    };

    let canonical = doc.uid.as_deref().filter(|u| !u.is_empty());
    let uid = match strategy {
        Strategy::Preview => canonical.or_else(|| {
            doc.slugs
                .first()
                .map(String::as_str)
                .filter(|s| !s.is_empty())
        }),
        Strategy::Detail => canonical.or(requested_uid.filter(|u| !u.is_empty())),
    }
    .ok_or_else(|| missing("uid"))?
    .to_string();

    let title = text_field(&doc.data, "title", &name)?.ok_or_else(|| missing("title"))?;
    let author = text_field(&doc.data, "author", &name)?.ok_or_else(|| missing("author"))?;
    let subtitle = text_field(&doc.data, "subtitle", &name)?.unwrap_or_default();

    let content = match (content_field(&doc.data, &name)?, strategy) {
        (Some(blocks), _) => blocks,
        (None, Strategy::Preview) => Vec::new(),
        (None, Strategy::Detail) => return Err(missing("content")),
    };

    let banner = match strategy {
        Strategy::Detail => banner_field(&doc.data),
        Strategy::Preview => None,
    };

    if let Some(published_at) = doc.first_publication_date.as_deref() {
        parse_timestamp(published_at).map_err(|e| NormalizeError::InvalidField {
            document: name.clone(),
            field: "first_publication_date",
            reason: e.to_string(),
        })?;
    }

    Ok(Post {
        uid,
        published_at: doc.first_publication_date.clone(),
        title,
        subtitle,
        author,
        banner,
        content,
    })
}

fn document_name(doc: &RawDocument) -> String {
    if let Some(uid) = doc.uid.as_deref().filter(|u| !u.is_empty()) {
        uid.to_string()
    } else if !doc.id.is_empty() {
        doc.id.clone()
    } else {
        doc.slugs.first().cloned().unwrap_or_default()
    }
}

/// Read a text field stored either as key text or as a rich-text title.
/// `null` counts as absent.
fn text_field(
    data: &Map<String, Value>,
    field: &'static str,
    document: &str,
) -> Result<Option<String>, NormalizeError> {
    match data.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value_to_text(value)
            .map(Some)
            .map_err(|reason| NormalizeError::InvalidField {
                document: document.to_string(),
                field,
                reason,
            }),
    }
}

fn value_to_text(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Array(_) => serde_json::from_value::<RichText>(value.clone())
            .map(|rt| rt.as_text())
            .map_err(|e| e.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(format!("expected text, found {}", json_kind(other))),
    }
}

fn content_field(
    data: &Map<String, Value>,
    document: &str,
) -> Result<Option<Vec<ContentBlock>>, NormalizeError> {
    let invalid = |reason: String| NormalizeError::InvalidField {
        document: document.to_string(),
        field: "content",
        reason,
    };

    let items = match data.get("content") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(invalid(format!(
                "expected a group, found {}",
                json_kind(other)
            )))
        }
    };

    let mut blocks = Vec::with_capacity(items.len());
    for item in items {
        let Value::Object(group) = item else {
            return Err(invalid(format!(
                "expected a group item, found {}",
                json_kind(item)
            )));
        };
        let heading = match group.get("heading") {
            Some(value) => value_to_text(value).map_err(&invalid)?,
            None => String::new(),
        };
        let body = match group.get("body") {
            None | Some(Value::Null) => RichText::default(),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| invalid(format!("body: {}", e)))?,
        };
        blocks.push(ContentBlock { heading, body });
    }

    Ok(Some(blocks))
}

fn banner_field(data: &Map<String, Value>) -> Option<Banner> {
    data.get("banner")?
        .get("url")?
        .as_str()
        .filter(|url| !url.is_empty())
        .map(|url| Banner {
            url: url.to_string(),
        })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
