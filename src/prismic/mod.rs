//! Prismic content API client
//!
//! [`ContentApi`] is the seam the rest of the crate depends on;
//! [`PrismicClient`] implements it over the REST API v2. Tests substitute
//! an in-memory implementation.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::config::PrismicConfig;

#[cfg(test)]
pub(crate) mod fake;
pub mod model;

pub use model::{ApiRef, ApiResponse, ApiRoot, RawDocument};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("content API is not configured: {0}")]
    Config(String),

    #[error("failed to reach content API: {0}")]
    Network(String),

    #[error("content API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid content API response: {0}")]
    Decode(String),

    #[error("document not found: {doc_type}/{uid}")]
    NotFound { doc_type: String, uid: String },

    #[error("content API advertises no master ref")]
    NoMasterRef,

    #[error("refusing to follow page cursor to a foreign origin: {0}")]
    ForeignCursor(String),
}

/// A query predicate. Only `at(path, value)` is needed here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    path: String,
    value: String,
}

impl Predicate {
    pub fn at(path: &str, value: &str) -> Self {
        Self {
            path: path.to_string(),
            value: value.to_string(),
        }
    }

    /// `document.type == doc_type`
    pub fn document_type(doc_type: &str) -> Self {
        Self::at("document.type", doc_type)
    }

    fn render(&self) -> String {
        let value = self.value.replace('\\', "\\\\").replace('"', "\\\"");
        format!("[at({}, \"{}\")]", self.path, value)
    }
}

/// Render predicates into the `q` query parameter
pub fn build_query(predicates: &[Predicate]) -> String {
    let inner: String = predicates.iter().map(Predicate::render).collect();
    format!("[{}]", inner)
}

/// Options of a search request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Field projection, e.g. `posts.title`
    pub fetch: Vec<String>,
    pub page_size: Option<u32>,
    pub page: Option<u32>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fetch<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fetch = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }
}

/// The two call shapes the blog consumes, plus cursor following
#[async_trait]
pub trait ContentApi: Send + Sync {
    async fn query(
        &self,
        predicates: &[Predicate],
        options: &QueryOptions,
    ) -> Result<ApiResponse, ApiError>;

    async fn get_by_uid(&self, doc_type: &str, uid: &str) -> Result<RawDocument, ApiError>;

    /// Fetch the page a `next_page` cursor points to
    async fn fetch_page(&self, cursor: &str) -> Result<ApiResponse, ApiError>;
}

#[derive(Clone)]
pub struct PrismicClient {
    http: Client,
    endpoint: Url,
    access_token: Option<String>,
}

impl fmt::Debug for PrismicClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrismicClient")
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

impl PrismicClient {
    pub fn new(config: &PrismicConfig) -> Result<Self, ApiError> {
        if config.endpoint.trim().is_empty() {
            return Err(ApiError::Config(
                "prismic.endpoint is empty (set it in _config.yml or PRISMIC_API_ENDPOINT)"
                    .to_string(),
            ));
        }
        let endpoint = Url::parse(config.endpoint.trim())
            .map_err(|e| ApiError::Config(format!("invalid endpoint {:?}: {}", config.endpoint, e)))?;

        let http = Client::builder()
            .user_agent(concat!("spacetraveling/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout.max(1)))
            .build()
            .map_err(|e| ApiError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint,
            access_token: config.access_token.clone().filter(|t| !t.is_empty()),
        })
    }

    fn with_token(&self, mut url: Url) -> Url {
        if let Some(token) = &self.access_token {
            let has_token = url.query_pairs().any(|(k, _)| k == "access_token");
            if !has_token {
                url.query_pairs_mut().append_pair("access_token", token);
            }
        }
        url
    }

    /// Build the `documents/search` URL for a query
    pub fn search_url(
        &self,
        master_ref: &str,
        predicates: &[Predicate],
        options: &QueryOptions,
    ) -> Result<Url, ApiError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Config(format!("endpoint cannot be a base: {}", self.endpoint)))?
            .pop_if_empty()
            .push("documents")
            .push("search");

        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("ref", master_ref);
            pairs.append_pair("q", &build_query(predicates));
            if !options.fetch.is_empty() {
                pairs.append_pair("fetch", &options.fetch.join(","));
            }
            if let Some(size) = options.page_size {
                pairs.append_pair("pageSize", &size.to_string());
            }
            if let Some(page) = options.page {
                pairs.append_pair("page", &page.to_string());
            }
        }

        Ok(self.with_token(url))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        // The query string may carry the access token
        tracing::debug!(host = url.host_str().unwrap_or(""), path = url.path(), "GET");

        let res = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.without_url().to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            tracing::warn!("Content API error - Status: {}, Body: {}", status, body);
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = res
            .text()
            .await
            .map_err(|e| ApiError::Network(e.without_url().to_string()))?;
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Resolve the current master ref from the API root
    pub async fn master_ref(&self) -> Result<String, ApiError> {
        let root: ApiRoot = self.get_json(self.with_token(self.endpoint.clone())).await?;
        root.master_ref()
            .map(str::to_string)
            .ok_or(ApiError::NoMasterRef)
    }
}

#[async_trait]
impl ContentApi for PrismicClient {
    async fn query(
        &self,
        predicates: &[Predicate],
        options: &QueryOptions,
    ) -> Result<ApiResponse, ApiError> {
        let master_ref = self.master_ref().await?;
        let url = self.search_url(&master_ref, predicates, options)?;
        let response: ApiResponse = self.get_json(url).await?;
        tracing::debug!(
            "Query returned {} documents (page {}/{})",
            response.results.len(),
            response.page,
            response.total_pages
        );
        Ok(response)
    }

    async fn get_by_uid(&self, doc_type: &str, uid: &str) -> Result<RawDocument, ApiError> {
        let predicates = [Predicate::at(&format!("my.{}.uid", doc_type), uid)];
        let options = QueryOptions::new().page_size(1);
        let response = self.query(&predicates, &options).await?;
        response
            .results
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::NotFound {
                doc_type: doc_type.to_string(),
                uid: uid.to_string(),
            })
    }

    async fn fetch_page(&self, cursor: &str) -> Result<ApiResponse, ApiError> {
        let url = Url::parse(cursor).map_err(|e| ApiError::Decode(format!("bad cursor: {}", e)))?;
        if url.origin() != self.endpoint.origin() {
            return Err(ApiError::ForeignCursor(url.origin().ascii_serialization()));
        }
        self.get_json(self.with_token(url)).await
    }
}
