//! In-memory [`ListingStore`] implementation for tests and local demos.
//!
//! Listings live in a `HashMap` behind `std::sync::RwLock`. Text relevance
//! is the fraction of query terms found in a listing's title, description,
//! address and location, which stays in `[0, 1]` like the SQLite backend's
//! normalized bm25.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{Listing, ListingRow};

use super::{keyword_terms, ListingPage, ListingQuery, ListingStore};

/// In-memory listing store.
pub struct InMemoryListingStore {
    listings: RwLock<HashMap<String, Listing>>,
}

impl InMemoryListingStore {
    pub fn new() -> Self {
        Self {
            listings: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_listings(listings: impl IntoIterator<Item = Listing>) -> Self {
        Self {
            listings: RwLock::new(listings.into_iter().map(|l| (l.id.clone(), l)).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.listings.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryListingStore {
    fn default() -> Self {
        Self::new()
    }
}

fn searchable_text(listing: &Listing) -> String {
    [
        Some(listing.title.as_str()),
        listing.description.as_deref(),
        listing.address.as_deref(),
        listing.location.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ")
    .to_lowercase()
}

fn text_rank(listing: &Listing, terms: &[String]) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let text = searchable_text(listing);
    let hits = terms.iter().filter(|t| text.contains(t.as_str())).count();
    hits as f64 / terms.len() as f64
}

#[async_trait]
impl ListingStore for InMemoryListingStore {
    async fn upsert_listing(&self, listing: &Listing) -> Result<String> {
        let mut listings = self
            .listings
            .write()
            .map_err(|_| anyhow!("listing store lock poisoned"))?;
        listings.insert(listing.id.clone(), listing.clone());
        Ok(listing.id.clone())
    }

    async fn search(&self, query: &ListingQuery<'_>) -> Result<ListingPage> {
        let terms = keyword_terms(query.keywords);
        let listings = self
            .listings
            .read()
            .map_err(|_| anyhow!("listing store lock poisoned"))?;

        let mut rows: Vec<ListingRow> = listings
            .values()
            .filter(|l| query.filters.matches(l))
            .map(|l| ListingRow {
                listing: l.clone(),
                text_rank: text_rank(l, &terms),
            })
            .collect();

        rows.sort_by(|a, b| {
            b.text_rank
                .partial_cmp(&a.text_rank)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.listing.listed_date.cmp(&a.listing.listed_date))
                .then(a.listing.id.cmp(&b.listing.id))
        });

        let total = rows.len() as i64;
        let rows = rows
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect();

        Ok(ListingPage { rows, total })
    }

    async fn get_listing(&self, id: &str) -> Result<Option<Listing>> {
        let listings = self
            .listings
            .read()
            .map_err(|_| anyhow!("listing store lock poisoned"))?;
        Ok(listings.get(id).cloned())
    }
}
