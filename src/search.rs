//! Retrieval and ranking service.
//!
//! The application-level entry point for search. Filter merging, synonym
//! expansion and ranking live in `propsearch-core`; this wrapper binds them
//! to a [`ListingStore`], the configured weights and page sizes, and the
//! request/response shapes shared by the CLI and HTTP server.

use anyhow::bail;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

use propsearch_core::filters::FilterSet;
use propsearch_core::intent::{FallbackReason, Intent, IntentOutcome};
use propsearch_core::models::ScoredListing;
use propsearch_core::ranking::{rank, RankingWeights};
use propsearch_core::store::{ListingQuery, ListingStore};
use propsearch_core::synonyms::SynonymTable;

use crate::config::Config;
use crate::events::{ProgressEvent, SearchPipeline};
use crate::intent::IntentService;
use crate::progress::{format_price, ProgressMode};

/// Body of `POST /search` and `POST /search/stream`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub filters: FilterSet,
    #[serde(default)]
    pub options: SearchOptions,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    #[serde(default)]
    pub top_k: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
    /// Accepted for API compatibility; vector search is not performed.
    #[serde(default)]
    pub semantic: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<ScoredListing>,
    pub total: i64,
    pub intent: Intent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackReason>,
    pub took_ms: u64,
}

/// Ranked page of listings for one merged filter set.
#[derive(Debug, Clone)]
pub struct RankedPage {
    pub results: Vec<ScoredListing>,
    pub total: i64,
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("{0}")]
    BadRequest(String),
    #[error("listing store error: {0:#}")]
    Store(anyhow::Error),
    #[error("search did not complete within {}s", .0.as_secs())]
    Timeout(Duration),
}

impl SearchError {
    /// Machine-readable code used in HTTP error bodies and `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            SearchError::BadRequest(_) => "bad_request",
            SearchError::Store(_) => "store_error",
            SearchError::Timeout(_) => "timeout",
        }
    }
}

/// Bounds for a page request, resolved against configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

#[derive(Clone)]
pub struct SearchService {
    store: Arc<dyn ListingStore>,
    synonyms: SynonymTable,
    weights: RankingWeights,
    top_k: i64,
    max_top_k: i64,
}

impl SearchService {
    pub fn new(
        store: Arc<dyn ListingStore>,
        synonyms: SynonymTable,
        weights: RankingWeights,
        top_k: i64,
        max_top_k: i64,
    ) -> Self {
        Self {
            store,
            synonyms,
            weights,
            top_k,
            max_top_k,
        }
    }

    pub fn from_config(store: Arc<dyn ListingStore>, config: &Config) -> anyhow::Result<Self> {
        Ok(Self::new(
            store,
            config.search.synonym_table(),
            config.search.ranking_weights()?,
            config.search.top_k,
            config.search.max_top_k,
        ))
    }

    /// Reject requests that cannot be served and resolve paging.
    pub fn validate(&self, req: &SearchRequest) -> Result<Page, SearchError> {
        if req.query.trim().is_empty() {
            return Err(SearchError::BadRequest("query must not be empty".to_string()));
        }
        req.filters
            .validate()
            .map_err(|e| SearchError::BadRequest(format!("invalid filters: {}", e)))?;

        let limit = req.options.top_k.unwrap_or(self.top_k);
        if limit < 1 {
            return Err(SearchError::BadRequest("topK must be >= 1".to_string()));
        }
        let offset = req.options.offset.unwrap_or(0);
        if offset < 0 {
            return Err(SearchError::BadRequest("offset must be >= 0".to_string()));
        }
        if req.options.semantic {
            debug!("Semantic search requested; ignoring (keyword + filter ranking only)");
        }

        Ok(Page {
            limit: limit.min(self.max_top_k),
            offset,
        })
    }

    /// Merge `explicit` with `intent`, query the store and rank the rows.
    pub async fn retrieve(
        &self,
        explicit: &FilterSet,
        intent: &Intent,
        page: Page,
        today: NaiveDate,
    ) -> Result<RankedPage, SearchError> {
        let mut merged = explicit.merge_intent(intent);
        merged.amenities = self.synonyms.expand_all(&merged.amenities);
        merged.facilities = self.synonyms.expand_all(&merged.facilities);

        let listing_page = self
            .store
            .search(&ListingQuery {
                filters: &merged,
                keywords: &intent.keywords,
                limit: page.limit,
                offset: page.offset,
            })
            .await
            .map_err(SearchError::Store)?;

        let results = rank(listing_page.rows, &merged, &self.weights, today);
        debug!(
            total = listing_page.total,
            returned = results.len(),
            "Ranked listings"
        );
        Ok(RankedPage {
            results,
            total: listing_page.total,
        })
    }

    /// Non-streaming search: one-shot intent parse, then retrieval.
    pub async fn search(
        &self,
        intents: &IntentService,
        req: &SearchRequest,
    ) -> Result<SearchResponse, SearchError> {
        let started = Instant::now();
        let page = self.validate(req)?;

        let outcome = intents.parse(req.query.trim()).await;
        let ranked = self.retrieve(&req.filters, outcome.intent(), page, today()).await?;

        let (intent, fallback) = split_outcome(outcome);
        Ok(SearchResponse {
            results: ranked.results,
            total: ranked.total,
            intent,
            fallback,
            took_ms: started.elapsed().as_millis() as u64,
        })
    }
}

pub fn split_outcome(outcome: IntentOutcome) -> (Intent, Option<FallbackReason>) {
    match outcome {
        IntentOutcome::Extracted(intent) => (intent, None),
        IntentOutcome::Fallback { intent, reason } => (intent, Some(reason)),
    }
}

/// The reference date for recency scoring.
pub fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

/// CLI entry point for `propsearch search`.
///
/// With `stream`, progress events are rendered on stderr as they arrive.
/// Results go to stdout, as JSON when `json` is set.
pub async fn run_search(
    config: &Config,
    req: SearchRequest,
    stream: bool,
    json: bool,
) -> anyhow::Result<()> {
    let pipeline = SearchPipeline::open(config).await?;

    let resp = if stream {
        let mode = if json {
            ProgressMode::Json
        } else {
            ProgressMode::default_for_tty()
        };
        collect_stream(&pipeline, req, config, mode).await?
    } else {
        pipeline.search(&req, config.server.request_timeout()).await?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&resp)?);
    } else {
        print_results(&resp);
    }
    Ok(())
}

async fn collect_stream(
    pipeline: &SearchPipeline,
    req: SearchRequest,
    config: &Config,
    mode: ProgressMode,
) -> anyhow::Result<SearchResponse> {
    let mut renderer = mode.renderer();
    let mut events = pipeline.stream(req, config.server.request_timeout());
    let mut parsed = None;
    let mut ranked = None;

    while let Some(frame) = events.next().await {
        renderer.render(&frame);
        match frame.event {
            ProgressEvent::Intent { intent, fallback } => parsed = Some((intent, fallback)),
            ProgressEvent::Results {
                results,
                total,
                took_ms,
            } => ranked = Some((results, total, took_ms)),
            ProgressEvent::Error { code, message } => bail!("{}: {}", code, message),
            _ => {}
        }
    }

    match (parsed, ranked) {
        (Some((intent, fallback)), Some((results, total, took_ms))) => Ok(SearchResponse {
            results,
            total,
            intent,
            fallback,
            took_ms,
        }),
        _ => bail!(
            "search did not complete within {}s",
            config.server.request_timeout_secs
        ),
    }
}

fn print_results(resp: &SearchResponse) {
    if let Some(reason) = &resp.fallback {
        println!("(keyword search only: {})", reason);
    }
    if resp.results.is_empty() {
        println!("No results.");
        return;
    }

    for (i, result) in resp.results.iter().enumerate() {
        let listing = &result.listing;
        let price = listing
            .price
            .map(|p| format!("S${}", format_price(p)))
            .unwrap_or_else(|| "price n/a".to_string());

        println!("{}. [{:.2}] {} / {}", i + 1, result.score, listing.id, listing.title);
        println!(
            "    {} · {} · {}",
            price,
            listing.unit_type.as_deref().unwrap_or("unknown type"),
            listing.location.as_deref().unwrap_or("unknown location")
        );
        if let Some(date) = listing.listed_date {
            println!("    listed: {}", date);
        }
        if let Some(ref url) = listing.url {
            println!("    url: {}", url);
        }
        println!("    why: {}", result.matched_reasons.join(", "));
        println!();
    }
    println!(
        "Showing {} of {} listings ({} ms)",
        resp.results.len(),
        resp.total,
        resp.took_ms
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use propsearch_core::models::Listing;
    use propsearch_core::store::memory::InMemoryListingStore;

    fn listing(v: serde_json::Value) -> Listing {
        serde_json::from_value(v).unwrap()
    }

    fn service() -> SearchService {
        let store = InMemoryListingStore::with_listings(vec![
            listing(serde_json::json!({
                "id": "pool-condo", "title": "Condo with pool", "unitType": "Condo",
                "bedrooms": 3, "price": 1_400_000.0, "amenities": ["Swimming pool", "Gym"],
                "location": "Punggol"
            })),
            listing(serde_json::json!({
                "id": "plain-condo", "title": "Plain condo", "unitType": "Condo",
                "bedrooms": 3, "price": 1_450_000.0, "amenities": ["Gym"],
                "location": "Punggol"
            })),
            listing(serde_json::json!({
                "id": "hdb", "title": "HDB flat", "unitType": "HDB",
                "bedrooms": 3, "price": 600_000.0, "location": "Punggol"
            })),
        ]);
        SearchService::new(
            Arc::new(store),
            SynonymTable::builtin(),
            RankingWeights::default(),
            20,
            50,
        )
    }

    #[test]
    fn test_validate_rejects_empty_query() {
        let err = service().validate(&SearchRequest::new("   ")).unwrap_err();
        assert!(matches!(err, SearchError::BadRequest(_)));
    }

    #[test]
    fn test_validate_clamps_top_k() {
        let mut req = SearchRequest::new("condo");
        req.options.top_k = Some(500);
        req.options.offset = Some(5);
        assert_eq!(
            service().validate(&req).unwrap(),
            Page {
                limit: 50,
                offset: 5
            }
        );
        req.options.top_k = Some(0);
        assert!(service().validate(&req).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_filters() {
        let mut req = SearchRequest::new("condo");
        req.filters.bedrooms = Some(42);
        assert!(matches!(
            service().validate(&req),
            Err(SearchError::BadRequest(_))
        ));
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let req: SearchRequest = serde_json::from_str(
            r#"{"query": "condo", "filters": {"priceMax": 1000000}, "options": {"topK": 5, "semantic": true}}"#,
        )
        .unwrap();
        assert_eq!(req.options.top_k, Some(5));
        assert!(req.options.semantic);
        assert_eq!(req.filters.price_max, Some(1_000_000.0));
    }

    #[tokio::test]
    async fn test_amenity_synonyms_expand_before_store() {
        let svc = service();
        let intent = Intent {
            amenities: vec!["pool".to_string()],
            unit_type: Some(propsearch_core::models::UnitType::Condo),
            ..Intent::empty("condo with pool")
        };
        let page = Page {
            limit: 10,
            offset: 0,
        };
        let ranked = svc
            .retrieve(&FilterSet::default(), &intent, page, today())
            .await
            .unwrap();
        assert_eq!(ranked.total, 1);
        assert_eq!(ranked.results[0].listing.id, "pool-condo");
        assert!(ranked.results[0]
            .matched_reasons
            .contains(&"has Swimming pool".to_string()));
    }

    #[tokio::test]
    async fn test_disabled_intent_search() {
        let svc = service();
        let resp = svc
            .search(&IntentService::disabled(), &SearchRequest::new("condo"))
            .await
            .unwrap();
        assert_eq!(resp.total, 3);
        assert_eq!(resp.intent.confidence, 0.0);
        assert_eq!(resp.intent.keywords, vec!["condo"]);
        assert_eq!(resp.fallback, Some(FallbackReason::Disabled));
        // Keyword hits rank first.
        assert_ne!(resp.results[0].listing.id, "hdb");
    }
}
