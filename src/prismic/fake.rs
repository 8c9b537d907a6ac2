//! In-memory content API for tests

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::{build_query, ApiError, ApiResponse, ContentApi, Predicate, QueryOptions, RawDocument};

const CURSOR_PREFIX: &str = "https://fake.cdn.prismic.io/api/v2/documents/search";

/// Pauses `fetch_page` until released
#[derive(Default)]
pub(crate) struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

/// Serves an ordered document list, paginated like the real API
#[derive(Default)]
pub(crate) struct FakeApi {
    pub documents: Vec<RawDocument>,
    pub fail_next_fetch: AtomicBool,
    pub fetch_calls: AtomicUsize,
    pub queries: Mutex<Vec<(String, QueryOptions)>>,
    pub gate: Option<Arc<Gate>>,
}

/// A complete post document
pub(crate) fn post_document(uid: &str, title: &str) -> RawDocument {
    serde_json::from_value(json!({
        "id": format!("id-{}", uid),
        "uid": uid,
        "type": "posts",
        "slugs": [uid],
        "first_publication_date": "2021-04-19T19:25:28+0000",
        "data": {
            "title": title,
            "subtitle": format!("About {}", title),
            "author": "Joseph Oliveira",
            "banner": {"url": format!("https://images.prismic.io/{}.png", uid)},
            "content": [{
                "heading": "Intro",
                "body": [{"type": "paragraph", "text": "one two three", "spans": []}]
            }]
        }
    }))
    .unwrap_or_default()
}

impl FakeApi {
    pub fn with_posts(uids: &[&str]) -> Self {
        Self {
            documents: uids
                .iter()
                .map(|uid| post_document(uid, &format!("Post {}", uid)))
                .collect(),
            ..Default::default()
        }
    }

    pub fn cursor(page: usize, size: usize) -> String {
        format!("{}?page={}&pageSize={}", CURSOR_PREFIX, page, size)
    }

    fn page(&self, page: usize, size: usize) -> ApiResponse {
        let size = size.max(1);
        let page = page.max(1);
        let start = (page - 1) * size;
        let results: Vec<RawDocument> = self.documents.iter().skip(start).take(size).cloned().collect();
        let total_pages = self.documents.len().div_ceil(size);
        ApiResponse {
            page: page as u32,
            results_per_page: size as u32,
            total_results_size: self.documents.len() as u32,
            total_pages: total_pages as u32,
            next_page: (page < total_pages).then(|| Self::cursor(page + 1, size)),
            prev_page: (page > 1).then(|| Self::cursor(page - 1, size)),
            results,
        }
    }
}

#[async_trait]
impl ContentApi for FakeApi {
    async fn query(
        &self,
        predicates: &[Predicate],
        options: &QueryOptions,
    ) -> Result<ApiResponse, ApiError> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push((build_query(predicates), options.clone()));
        }
        let size = options.page_size.unwrap_or(20) as usize;
        let page = options.page.unwrap_or(1).max(1) as usize;
        Ok(self.page(page, size))
    }

    async fn get_by_uid(&self, doc_type: &str, uid: &str) -> Result<RawDocument, ApiError> {
        self.documents
            .iter()
            .find(|d| d.uid.as_deref() == Some(uid))
            .cloned()
            .ok_or_else(|| ApiError::NotFound {
                doc_type: doc_type.to_string(),
                uid: uid.to_string(),
            })
    }

    async fn fetch_page(&self, cursor: &str) -> Result<ApiResponse, ApiError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.fail_next_fetch.swap(false, Ordering::SeqCst) {
            return Err(ApiError::Network("connection reset".to_string()));
        }

        let query = cursor
            .strip_prefix(CURSOR_PREFIX)
            .and_then(|q| q.strip_prefix('?'))
            .ok_or_else(|| ApiError::Decode(format!("unknown cursor {}", cursor)))?;
        let mut page = 1;
        let mut size = 20;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("page", v)) => page = v.parse().unwrap_or(1),
                Some(("pageSize", v)) => size = v.parse().unwrap_or(20),
                _ => {}
            }
        }
        Ok(self.page(page, size))
    }
}
