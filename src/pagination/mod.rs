//! "Load more" aggregation of paginated post listings
//!
//! A [`PaginationAggregator`] owns the posts loaded so far and the cursor
//! of the next page. It is caller-owned: each listing view creates its own.
//!
//! At most one load runs at a time; a `load_next` issued while another is
//! outstanding returns [`LoadOutcome::InFlight`] without fetching. The
//! aggregate is only updated once a whole page has been fetched and
//! normalized, so a failed or cancelled (dropped) load leaves it untouched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::content::{normalize_preview, NormalizeError, Post, PostPage};
use crate::prismic::{ApiError, ApiResponse, ContentApi};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error(transparent)]
    Network(#[from] ApiError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

/// Aggregator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// A next page exists and no load is running
    Idle,
    Loading,
    /// No further pages; terminal
    Exhausted,
}

/// Result of a [`PaginationAggregator::load_next`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A page was appended with this many posts
    Appended(usize),
    /// Nothing left to load; nothing changed
    Exhausted,
    /// Another load is outstanding; nothing changed
    InFlight,
}

#[derive(Debug)]
struct Aggregate {
    posts: Vec<Post>,
    next_page: Option<String>,
}

/// Resets the in-flight flag when a load finishes or is dropped
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PaginationAggregator {
    api: Arc<dyn ContentApi>,
    aggregate: Mutex<Aggregate>,
    in_flight: AtomicBool,
}

impl std::fmt::Debug for PaginationAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        let aggregate = self.lock();
        f.debug_struct("PaginationAggregator")
            .field("posts", &aggregate.posts.len())
            .field("next_page", &aggregate.next_page)
            .field("state", &state)
            .finish()
    }
}

impl PaginationAggregator {
    /// Start from an already normalized first page
    pub fn new(api: Arc<dyn ContentApi>, first: PostPage) -> Self {
        Self {
            api,
            aggregate: Mutex::new(Aggregate {
                posts: first.results,
                next_page: first.next_page,
            }),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Start from a raw first page, normalizing its documents
    pub fn from_response(
        api: Arc<dyn ContentApi>,
        response: ApiResponse,
    ) -> Result<Self, NormalizeError> {
        Ok(Self::new(api, normalize_page(response)?))
    }

    fn lock(&self) -> MutexGuard<'_, Aggregate> {
        self.aggregate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> LoadState {
        if self.in_flight.load(Ordering::Acquire) {
            LoadState::Loading
        } else if self.lock().next_page.is_none() {
            LoadState::Exhausted
        } else {
            LoadState::Idle
        }
    }

    /// Posts loaded so far, in listing order
    pub fn posts(&self) -> Vec<Post> {
        self.lock().posts.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn next_page(&self) -> Option<String> {
        self.lock().next_page.clone()
    }

    /// The whole aggregate as one page
    pub fn snapshot(&self) -> PostPage {
        let aggregate = self.lock();
        PostPage::new(aggregate.posts.clone(), aggregate.next_page.clone())
    }

    /// Fetch the next page and append it
    pub async fn load_next(&self) -> Result<LoadOutcome, LoadError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Ignoring load request while another is in flight");
            return Ok(LoadOutcome::InFlight);
        }
        let _in_flight = InFlight(&self.in_flight);

        let cursor = self.lock().next_page.clone();
        let Some(cursor) = cursor else {
            return Ok(LoadOutcome::Exhausted);
        };

        let response = self.api.fetch_page(&cursor).await.map_err(|e| {
            tracing::warn!("Failed to load next page: {}", e);
            e
        })?;
        let page = normalize_page(response)?;
        let count = page.results.len();

        let mut aggregate = self.lock();
        aggregate.posts.extend(page.results);
        aggregate.next_page = page.next_page;
        tracing::debug!(
            "Loaded {} posts ({} total, more: {})",
            count,
            aggregate.posts.len(),
            aggregate.next_page.is_some()
        );

        Ok(LoadOutcome::Appended(count))
    }
}

/// Normalize every document of a list response. Fails on the first bad document.
pub fn normalize_page(response: ApiResponse) -> Result<PostPage, NormalizeError> {
    let results = response
        .results
        .iter()
        .map(normalize_preview)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(PostPage::new(results, response.next_page))
}
