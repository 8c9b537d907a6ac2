//! Prismic structured text
//!
//! A rich-text field is an ordered list of block nodes (headings,
//! paragraphs, list items, images, embeds). Inline formatting is stored
//! as spans with start/end offsets counted in UTF-16 code units.

use serde::{Deserialize, Serialize};

use crate::helpers::{html_escape, is_safe_url, post_route, SafeHtml};

/// Block node type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Heading1,
    Heading2,
    Heading3,
    Heading4,
    Heading5,
    Heading6,
    Paragraph,
    Preformatted,
    ListItem,
    OListItem,
    Image,
    Embed,
    #[serde(other)]
    Unknown,
}

/// Inline span type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpanKind {
    Strong,
    Em,
    Hyperlink,
    Label,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanData {
    #[serde(default)]
    pub link_type: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    #[serde(rename = "type")]
    pub kind: SpanKind,
    #[serde(default)]
    pub data: Option<SpanData>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Oembed {
    #[serde(default)]
    pub embed_url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub provider_name: Option<String>,
}

/// One block of structured text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichTextNode {
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub spans: Vec<Span>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub alt: Option<String>,
    #[serde(default)]
    pub oembed: Option<Oembed>,
}

impl RichTextNode {
    pub fn new(kind: NodeKind, text: &str) -> Self {
        Self {
            kind,
            text: text.to_string(),
            spans: Vec::new(),
            url: None,
            alt: None,
            oembed: None,
        }
    }

    pub fn paragraph(text: &str) -> Self {
        Self::new(NodeKind::Paragraph, text)
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.spans.push(span);
        self
    }
}

/// A rich-text document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RichText(pub Vec<RichTextNode>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Unordered,
    Ordered,
}

impl RichText {
    /// A document holding a single paragraph
    pub fn from_plain(text: &str) -> Self {
        Self(vec![RichTextNode::paragraph(text)])
    }

    pub fn nodes(&self) -> &[RichTextNode] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Plain text of all text-bearing nodes, joined by a single space
    pub fn as_text(&self) -> String {
        self.0
            .iter()
            .filter(|node| !matches!(node.kind, NodeKind::Image | NodeKind::Embed))
            .map(|node| node.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Render the document to HTML for a site served at `/`
    pub fn as_html(&self) -> SafeHtml {
        self.as_html_under("/")
    }

    /// Render the document to HTML. All text and attribute values are escaped;
    /// links to other posts are resolved under `root`.
    pub fn as_html_under(&self, root: &str) -> SafeHtml {
        let mut out = String::new();
        let mut open_list: Option<ListKind> = None;

        for node in &self.0 {
            let list = match node.kind {
                NodeKind::ListItem => Some(ListKind::Unordered),
                NodeKind::OListItem => Some(ListKind::Ordered),
                _ => None,
            };
            if list != open_list {
                match open_list {
                    Some(ListKind::Unordered) => out.push_str("</ul>"),
                    Some(ListKind::Ordered) => out.push_str("</ol>"),
                    None => {}
                }
                match list {
                    Some(ListKind::Unordered) => out.push_str("<ul>"),
                    Some(ListKind::Ordered) => out.push_str("<ol>"),
                    None => {}
                }
                open_list = list;
            }

            render_node(node, root, &mut out);
        }

        match open_list {
            Some(ListKind::Unordered) => out.push_str("</ul>"),
            Some(ListKind::Ordered) => out.push_str("</ol>"),
            None => {}
        }

        SafeHtml::from_trusted(out)
    }
}

fn render_node(node: &RichTextNode, root: &str, out: &mut String) {
    let wrap = |tag: &str, out: &mut String| {
        out.push('<');
        out.push_str(tag);
        out.push('>');
        out.push_str(&render_inline(&node.text, &node.spans, root));
        out.push_str("</");
        out.push_str(tag);
        out.push('>');
    };

    match node.kind {
        NodeKind::Heading1 => wrap("h1", out),
        NodeKind::Heading2 => wrap("h2", out),
        NodeKind::Heading3 => wrap("h3", out),
        NodeKind::Heading4 => wrap("h4", out),
        NodeKind::Heading5 => wrap("h5", out),
        NodeKind::Heading6 => wrap("h6", out),
        NodeKind::Paragraph => wrap("p", out),
        NodeKind::Preformatted => wrap("pre", out),
        NodeKind::ListItem | NodeKind::OListItem => wrap("li", out),
        NodeKind::Image => {
            if let Some(url) = node.url.as_deref().filter(|u| is_safe_url(u)) {
                out.push_str(&format!(
                    r#"<p class="block-img"><img src="{}" alt="{}"></p>"#,
                    html_escape(url),
                    html_escape(node.alt.as_deref().unwrap_or(""))
                ));
            }
        }
        NodeKind::Embed => {
            let oembed = node.oembed.clone().unwrap_or_default();
            if let Some(url) = oembed.embed_url.as_deref().filter(|u| is_safe_url(u)) {
                let label = oembed
                    .title
                    .or(oembed.provider_name)
                    .unwrap_or_else(|| url.to_string());
                out.push_str(&format!(
                    r#"<div data-oembed="{}"><a href="{}" target="_blank" rel="noopener">{}</a></div>"#,
                    html_escape(url),
                    html_escape(url),
                    html_escape(&label)
                ));
            }
        }
        NodeKind::Unknown => out.push_str(&escape_text(&node.text)),
    }
}

/// Escape text, turning newlines into `<br />`
fn escape_text(text: &str) -> String {
    html_escape(text).replace('\n', "<br />")
}

fn span_tags(span: &Span, root: &str) -> (String, &'static str) {
    match span.kind {
        SpanKind::Strong => ("<strong>".to_string(), "</strong>"),
        SpanKind::Em => ("<em>".to_string(), "</em>"),
        SpanKind::Label => {
            let label = span
                .data
                .as_ref()
                .and_then(|d| d.label.as_deref())
                .unwrap_or("");
            (format!(r#"<span class="{}">"#, html_escape(label)), "</span>")
        }
        SpanKind::Hyperlink => match span.data.as_ref().and_then(|data| link_href(data, root)) {
            Some((href, blank)) => {
                let target = if blank {
                    r#" target="_blank" rel="noopener""#
                } else {
                    ""
                };
                (
                    format!(r#"<a href="{}"{}>"#, html_escape(&href), target),
                    "</a>",
                )
            }
            None => (String::new(), ""),
        },
        SpanKind::Unknown => (String::new(), ""),
    }
}

/// Resolve a hyperlink span to `(href, opens_in_new_tab)`
fn link_href(data: &SpanData, root: &str) -> Option<(String, bool)> {
    if data.link_type.as_deref() == Some("Document") {
        let uid = data.uid.as_deref()?;
        let root = root.trim_end_matches('/');
        return Some((format!("{}/{}", root, post_route(uid)), false));
    }
    let url = data.url.as_deref().filter(|u| is_safe_url(u))?;
    Some((url.to_string(), data.target.as_deref() == Some("_blank")))
}

/// Map a UTF-16 offset to a byte offset in `text`, rounding up inside a
/// surrogate pair and clamping to the end of the text.
fn utf16_to_byte(text: &str, offset: usize) -> usize {
    let mut units = 0;
    for (byte, c) in text.char_indices() {
        if units >= offset {
            return byte;
        }
        units += c.len_utf16();
    }
    text.len()
}

fn render_inline(text: &str, spans: &[Span], root: &str) -> String {
    if spans.is_empty() {
        return escape_text(text);
    }

    struct Resolved {
        start: usize,
        end: usize,
        open: String,
        close: &'static str,
    }

    let mut resolved: Vec<Resolved> = spans
        .iter()
        .filter_map(|span| {
            let start = utf16_to_byte(text, span.start);
            let end = utf16_to_byte(text, span.end);
            if start >= end {
                return None;
            }
            let (open, close) = span_tags(span, root);
            Some(Resolved {
                start,
                end,
                open,
                close,
            })
        })
        .collect();
    // Outer spans first when several start at the same offset
    resolved.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

    let mut boundaries: Vec<usize> = resolved
        .iter()
        .flat_map(|s| [s.start, s.end])
        .chain(std::iter::once(text.len()))
        .collect();
    boundaries.sort_unstable();
    boundaries.dedup();

    let mut out = String::with_capacity(text.len() * 2);
    let mut stack: Vec<usize> = Vec::new();
    let mut cursor = 0;

    for pos in boundaries {
        out.push_str(&escape_text(&text[cursor..pos]));
        cursor = pos;

        // Close everything ending here, reopening spans that were only
        // closed to keep the markup well nested.
        if stack.iter().any(|&i| resolved[i].end == pos) {
            let mut reopen = Vec::new();
            while stack.iter().any(|&i| resolved[i].end == pos) {
                let Some(top) = stack.pop() else { break };
                out.push_str(resolved[top].close);
                if resolved[top].end != pos {
                    reopen.push(top);
                }
            }
            for &i in reopen.iter().rev() {
                out.push_str(&resolved[i].open);
                stack.push(i);
            }
        }

        for (i, span) in resolved.iter().enumerate() {
            if span.start == pos {
                out.push_str(&span.open);
                stack.push(i);
            }
        }
    }

    while let Some(top) = stack.pop() {
        out.push_str(resolved[top].close);
    }

    out
}
