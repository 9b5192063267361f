//! Storage abstraction for listings.
//!
//! The [`ListingStore`] trait is the only thing the search pipeline needs
//! from persistence: exact attribute filtering, free-text relevance, and
//! pagination with a total count. The application crate provides a SQLite
//! (FTS5) backend; [`memory::InMemoryListingStore`] backs tests.
//!
//! Implementations must be `Send + Sync` to be shared across request tasks.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::filters::FilterSet;
use crate::models::{Listing, ListingRow};

/// One page request against a [`ListingStore`].
///
/// Keywords influence ranking only. A listing that satisfies every filter
/// is returned even when no keyword matches it, with a `text_rank` of 0.
#[derive(Debug, Clone)]
pub struct ListingQuery<'a> {
    /// Merged filters, with amenity and facility terms already expanded.
    pub filters: &'a FilterSet,
    pub keywords: &'a [String],
    pub limit: i64,
    pub offset: i64,
}

/// Rows for one page plus the number of listings matching the filters.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    /// Ordered by text rank (desc), listed date (desc), id (asc).
    pub rows: Vec<ListingRow>,
    pub total: i64,
}

/// Abstract listing store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_listing`](ListingStore::upsert_listing) | Insert or replace a listing and its text index entry |
/// | [`search`](ListingStore::search) | Filtered, text-ranked, paginated query |
/// | [`get_listing`](ListingStore::get_listing) | Fetch one listing by id |
#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Insert or replace a listing. Returns its id.
    async fn upsert_listing(&self, listing: &Listing) -> Result<String>;

    async fn search(&self, query: &ListingQuery<'_>) -> Result<ListingPage>;

    async fn get_listing(&self, id: &str) -> Result<Option<Listing>>;
}

/// Lower-cased, de-duplicated search terms from free-text keywords.
///
/// Terms are split on anything that is not alphanumeric, so punctuation and
/// query-syntax characters never reach a backend's text engine.
pub fn keyword_terms(keywords: &[String]) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for keyword in keywords {
        for term in keyword
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let term = term.to_lowercase();
            if !terms.contains(&term) {
                terms.push(term);
            }
        }
    }
    terms
}
