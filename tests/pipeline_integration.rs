//! End-to-end search pipeline tests: scripted chat provider, SQLite store,
//! and the HTTP server on an ephemeral port.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use propsearch::config::Config;
use propsearch::events::{EventFrame, SearchPipeline};
use propsearch::import::{import_listings, parse_listings};
use propsearch::intent::IntentService;
use propsearch::llm::{ChatProvider, ChunkStream, LlmError};
use propsearch::search::{SearchRequest, SearchService};
use propsearch::search_log::{SqliteSearchLog, TracingSearchLog};
use propsearch::server::{serve, AppState};
use propsearch::sqlite_store::SqliteListingStore;
use propsearch::{db, migrate};
use propsearch_core::chunk::Chunk;
use propsearch_core::models::{Listing, UnitType};
use propsearch_core::ranking::RankingWeights;
use propsearch_core::store::{ListingPage, ListingQuery, ListingStore};
use propsearch_core::synonyms::SynonymTable;

const FIXTURE: &str = include_str!("fixtures/listings.json");

/// Replays a fixed answer, split into reasoning and answer chunks.
struct ScriptedProvider {
    reasoning: Vec<&'static str>,
    answer: Vec<&'static str>,
}

impl ScriptedProvider {
    fn example_one() -> Self {
        Self {
            reasoning: vec!["The user wants a 3 bedroom condo ", "in Punggol under 1.5M."],
            answer: vec![
                "```json\n{\"bedrooms\": 3, \"unit_type\": \"Condo\", ",
                "\"location\": \"Punggol\", \"price_max\": 1500000, ",
                "\"confidence\": 0.95,}\n```",
            ],
        }
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    async fn complete(&self, _system: &str, _user: &str, _json: bool) -> Result<String, LlmError> {
        Ok(self.answer.concat())
    }

    async fn complete_stream(&self, _system: &str, _user: &str) -> Result<ChunkStream, LlmError> {
        let mut chunks: Vec<Chunk> = self
            .reasoning
            .iter()
            .map(|t| Chunk {
                reasoning_text: t.to_string(),
                ..Default::default()
            })
            .collect();
        chunks.extend(self.answer.iter().map(|t| Chunk {
            answer_text: t.to_string(),
            ..Default::default()
        }));
        chunks.push(Chunk::final_marker());
        Ok(futures::stream::iter(chunks.into_iter().map(Ok)).boxed())
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        Ok(())
    }
}

/// Never answers.
struct StalledProvider;

#[async_trait]
impl ChatProvider for StalledProvider {
    fn name(&self) -> &str {
        "stalled"
    }

    fn model(&self) -> &str {
        "stalled-1"
    }

    async fn complete(&self, _system: &str, _user: &str, _json: bool) -> Result<String, LlmError> {
        futures::future::pending().await
    }

    async fn complete_stream(&self, _system: &str, _user: &str) -> Result<ChunkStream, LlmError> {
        Ok(futures::stream::pending().boxed())
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        Err(LlmError::Connection("connection refused".to_string()))
    }
}

/// A store whose database has gone away.
struct BrokenStore;

#[async_trait]
impl ListingStore for BrokenStore {
    async fn upsert_listing(&self, _listing: &Listing) -> anyhow::Result<String> {
        anyhow::bail!("unable to open database file")
    }

    async fn search(&self, _query: &ListingQuery<'_>) -> anyhow::Result<ListingPage> {
        anyhow::bail!("unable to open database file")
    }

    async fn get_listing(&self, _id: &str) -> anyhow::Result<Option<Listing>> {
        anyhow::bail!("unable to open database file")
    }
}

fn test_config(tmp: &TempDir) -> Config {
    toml::from_str(&format!(
        r#"
[db]
path = "{}/propsearch.sqlite"

[server]
bind = "127.0.0.1:0"
request_timeout_secs = 10
"#,
        tmp.path().display()
    ))
    .unwrap()
}

async fn pipeline(config: &Config, provider: Option<Arc<dyn ChatProvider>>) -> SearchPipeline {
    let pool = db::connect(config).await.unwrap();
    migrate::migrate_pool(&pool).await.unwrap();
    let store = Arc::new(SqliteListingStore::new(pool.clone()));
    import_listings(store.as_ref(), &parse_listings(FIXTURE).unwrap())
        .await
        .unwrap();
    let search = SearchService::from_config(store, config).unwrap();
    SearchPipeline::new(
        search,
        IntentService::new(provider),
        Arc::new(SqliteSearchLog::new(pool)),
    )
}

async fn collect(pipeline: &SearchPipeline, query: &str) -> Vec<EventFrame> {
    let mut events = pipeline.stream(SearchRequest::new(query), Duration::from_secs(10));
    let mut frames = Vec::new();
    while let Some(frame) = events.next().await {
        frames.push(frame);
    }
    frames
}

fn names(frames: &[EventFrame]) -> Vec<&'static str> {
    frames.iter().map(|f| f.name()).collect()
}

async fn search_log_rows(config: &Config) -> i64 {
    let pool = db::connect(config).await.unwrap();
    // The log write is detached; give it a moment.
    for _ in 0..50 {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM search_logs")
            .fetch_one(&pool)
            .await
            .unwrap();
        if n > 0 {
            return n;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    0
}

#[tokio::test]
async fn test_streaming_example_query_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let p = pipeline(&config, Some(Arc::new(ScriptedProvider::example_one()))).await;

    let frames = collect(&p, "3 bedroom condo in Punggol under 1.5M").await;
    assert_eq!(
        names(&frames),
        vec![
            "start", "parsing", "thinking", "thinking", "content", "content", "content", "intent",
            "searching", "results", "done"
        ]
    );

    let payload = frames[7].payload();
    let intent = &payload["intent"];
    assert_eq!(intent["bedrooms"], 3);
    assert_eq!(intent["unitType"], "Condo");
    assert_eq!(intent["location"], "Punggol");
    assert_eq!(intent["priceMax"], 1_500_000.0);
    assert!(payload.get("fallback").is_none());

    let results = frames[9].payload();
    assert_eq!(results["total"], 1);
    assert_eq!(results["results"][0]["id"], "p1");
    let reasons: Vec<String> =
        serde_json::from_value(results["results"][0]["matchedReasons"].clone()).unwrap();
    assert!(reasons.contains(&"bedrooms match".to_string()), "{:?}", reasons);
    assert!(reasons.contains(&"location match".to_string()), "{:?}", reasons);

    assert_eq!(search_log_rows(&config).await, 1);
}

#[tokio::test]
async fn test_disabled_provider_streams_keyword_search() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let p = pipeline(&config, None).await;

    let frames = collect(&p, "quiet bungalow").await;
    assert_eq!(
        names(&frames),
        vec!["start", "parsing", "intent", "searching", "results", "done"]
    );
    let intent = frames[2].payload();
    assert_eq!(intent["intent"]["confidence"], 0.0);
    assert_eq!(
        intent["intent"]["semanticKeywords"],
        serde_json::json!(["quiet bungalow"])
    );
    assert_eq!(frames[4].payload()["results"][0]["id"], "p6");
}

#[tokio::test]
async fn test_one_shot_search_merges_explicit_filters() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let p = pipeline(&config, Some(Arc::new(ScriptedProvider::example_one()))).await;

    let mut req = SearchRequest::new("3 bedroom condo in Punggol under 1.5M");
    // Explicit filter wins over the parsed 1.5M ceiling.
    req.filters.price_max = Some(1_300_000.0);
    let resp = p.search(&req, Duration::from_secs(10)).await.unwrap();
    assert_eq!(resp.intent.unit_type, Some(UnitType::Condo));
    assert_eq!(resp.total, 0);
    assert!(resp.results.is_empty());
}

// ============ HTTP ============

async fn spawn_server(config: Config, provider: Option<Arc<dyn ChatProvider>>) -> String {
    let p = pipeline(&config, provider).await;
    spawn_pipeline(config, p).await
}

async fn spawn_pipeline(config: Config, p: SearchPipeline) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, AppState::new(p, config)));
    format!("http://{}", addr)
}

fn broken_store_pipeline() -> SearchPipeline {
    let search = SearchService::new(
        Arc::new(BrokenStore),
        SynonymTable::builtin(),
        RankingWeights::default(),
        10,
        100,
    );
    SearchPipeline::new(search, IntentService::disabled(), Arc::new(TracingSearchLog))
}

#[tokio::test]
async fn test_http_health() {
    let tmp = TempDir::new().unwrap();
    let base = spawn_server(test_config(&tmp), None).await;

    let body: serde_json::Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["llm"]["enabled"], false);
    assert!(body["llm"].get("reachable").is_none());
}

#[tokio::test]
async fn test_http_health_reports_provider_reachability() {
    let tmp = TempDir::new().unwrap();
    let base = spawn_server(
        test_config(&tmp),
        Some(Arc::new(ScriptedProvider::example_one())),
    )
    .await;
    let body: serde_json::Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["llm"]["provider"], "scripted");
    assert_eq!(body["llm"]["reachable"], true);

    let tmp = TempDir::new().unwrap();
    let base = spawn_server(test_config(&tmp), Some(Arc::new(StalledProvider))).await;
    let body: serde_json::Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["llm"]["reachable"], false);
}

#[tokio::test]
async fn test_http_search_deadline_is_gateway_timeout() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.server.request_timeout_secs = 1;
    let base = spawn_server(config, Some(Arc::new(StalledProvider))).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/search", base))
        .json(&serde_json::json!({"query": "condo in Punggol"}))
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 504);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "timeout");

    let resp = client
        .post(format!("{}/intent", base))
        .json(&serde_json::json!({"query": "condo in Punggol"}))
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 504);
}

#[tokio::test]
async fn test_http_store_failure_is_store_error() {
    let tmp = TempDir::new().unwrap();
    let base = spawn_pipeline(test_config(&tmp), broken_store_pipeline()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/search", base))
        .json(&serde_json::json!({"query": "condo"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "store_error");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("unable to open database file"));

    let text = client
        .post(format!("{}/search/stream", base))
        .json(&serde_json::json!({"query": "condo"}))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let events: Vec<&str> = text
        .lines()
        .filter_map(|l| l.strip_prefix("event: "))
        .collect();
    assert_eq!(events, vec!["start", "parsing", "intent", "searching", "error"]);
    assert!(text.contains("store_error"));
}

#[tokio::test]
async fn test_http_search_and_errors() {
    let tmp = TempDir::new().unwrap();
    let base = spawn_server(
        test_config(&tmp),
        Some(Arc::new(ScriptedProvider::example_one())),
    )
    .await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/search", base))
        .json(&serde_json::json!({
            "query": "3 bedroom condo in Punggol under 1.5M",
            "options": {"topK": 5, "semantic": true}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["total"], 1);
    assert_eq!(body["results"][0]["id"], "p1");
    assert!(body["tookMs"].is_u64());
    assert_eq!(body["intent"]["location"], "Punggol");

    let resp = client
        .post(format!("{}/search", base))
        .json(&serde_json::json!({"query": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(format!("{}/search", base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_http_intent_endpoint() {
    let tmp = TempDir::new().unwrap();
    let base = spawn_server(test_config(&tmp), None).await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .post(format!("{}/intent", base))
        .json(&serde_json::json!({"query": "condo near the beach"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["fallback"]["kind"], "disabled");
    assert_eq!(
        body["intent"]["semanticKeywords"],
        serde_json::json!(["condo near the beach"])
    );
}

#[tokio::test]
async fn test_http_stream_sends_named_events() {
    let tmp = TempDir::new().unwrap();
    let base = spawn_server(test_config(&tmp), None).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/search/stream", base))
        .json(&serde_json::json!({"query": "punggol condo"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let text = resp.text().await.unwrap();
    let events: Vec<&str> = text
        .lines()
        .filter_map(|l| l.strip_prefix("event: "))
        .collect();
    assert_eq!(
        events,
        vec!["start", "parsing", "intent", "searching", "results", "done"]
    );
    let done = text
        .lines()
        .filter_map(|l| l.strip_prefix("data: "))
        .last()
        .unwrap();
    let done: serde_json::Value = serde_json::from_str(done).unwrap();
    assert!(done["tookMs"].is_u64());
    assert!(done["timestamp"].is_string());
}

#[tokio::test]
async fn test_http_stream_empty_query_is_error_event() {
    let tmp = TempDir::new().unwrap();
    let base = spawn_server(test_config(&tmp), None).await;

    let text = reqwest::Client::new()
        .post(format!("{}/search/stream", base))
        .json(&serde_json::json!({"query": ""}))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let events: Vec<&str> = text
        .lines()
        .filter_map(|l| l.strip_prefix("event: "))
        .collect();
    assert_eq!(events, vec!["start", "error"]);
    assert!(text.contains("bad_request"));
}
