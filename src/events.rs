//! Incremental event protocol for streaming search.
//!
//! One request produces, in order:
//!
//! ```text
//! start → parsing → (thinking | content)* → intent → searching → results → done
//! ```
//!
//! or stops with a terminal `error`. Every event is sent as soon as it is
//! produced. After `results`, a search-log record is written on a detached
//! task so that `done` is never delayed by it.
//!
//! Cancellation is driven by a [`CancellationToken`]: dropping the
//! [`EventStream`] or reaching the request deadline cancels it, which aborts
//! the in-flight provider or store call. No events follow a cancellation.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use propsearch_core::filters::FilterSet;
use propsearch_core::intent::{FallbackReason, Intent};
use propsearch_core::models::ScoredListing;

use crate::config::Config;
use crate::intent::{IntentObserver, IntentService};
use crate::search::{
    split_outcome, today, SearchError, SearchRequest, SearchResponse, SearchService,
};
use crate::search_log::{spawn_record, SearchLogRecord, SearchLogSink, SqliteSearchLog};
use crate::sqlite_store::SqliteListingStore;
use crate::{db, llm, migrate};

/// Events buffered between the pipeline task and the transport.
const EVENT_BUFFER: usize = 32;

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ProgressEvent {
    Start {
        #[serde(rename = "requestId")]
        request_id: String,
        query: String,
    },
    Parsing {
        provider: Option<String>,
        model: Option<String>,
    },
    Thinking {
        text: String,
    },
    Content {
        text: String,
    },
    Intent {
        intent: Intent,
        #[serde(skip_serializing_if = "Option::is_none")]
        fallback: Option<FallbackReason>,
    },
    Searching {
        filters: FilterSet,
    },
    Results {
        results: Vec<ScoredListing>,
        total: i64,
        #[serde(rename = "tookMs")]
        took_ms: u64,
    },
    Done {
        #[serde(rename = "tookMs")]
        took_ms: u64,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ProgressEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::Start { .. } => "start",
            ProgressEvent::Parsing { .. } => "parsing",
            ProgressEvent::Thinking { .. } => "thinking",
            ProgressEvent::Content { .. } => "content",
            ProgressEvent::Intent { .. } => "intent",
            ProgressEvent::Searching { .. } => "searching",
            ProgressEvent::Results { .. } => "results",
            ProgressEvent::Done { .. } => "done",
            ProgressEvent::Error { .. } => "error",
        }
    }

    fn from_error(e: &SearchError) -> Self {
        ProgressEvent::Error {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

/// A [`ProgressEvent`] stamped with its emission time.
#[derive(Debug, Clone)]
pub struct EventFrame {
    pub at: DateTime<Utc>,
    pub event: ProgressEvent,
}

impl EventFrame {
    pub fn now(event: ProgressEvent) -> Self {
        Self {
            at: Utc::now(),
            event,
        }
    }

    pub fn name(&self) -> &'static str {
        self.event.name()
    }

    /// JSON payload: the event's fields plus `timestamp` (RFC 3339, ms).
    pub fn payload(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(&self.event).unwrap_or_else(|e| {
            warn!(event = self.name(), error = %e, "Failed to serialize progress event");
            serde_json::Value::Object(Default::default())
        });
        if let serde_json::Value::Object(map) = &mut value {
            map.insert(
                "timestamp".to_string(),
                serde_json::Value::String(self.at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        value
    }
}

/// Receiving side of a streaming search. Dropping it cancels the request.
pub struct EventStream {
    rx: mpsc::Receiver<EventFrame>,
    _guard: DropGuard,
}

impl EventStream {
    pub async fn next(&mut self) -> Option<EventFrame> {
        self.rx.recv().await
    }
}

/// Intent parsing, retrieval and search logging bound together.
#[derive(Clone)]
pub struct SearchPipeline {
    pub search: SearchService,
    pub intents: IntentService,
    pub log: Arc<dyn SearchLogSink>,
}

impl SearchPipeline {
    pub fn new(search: SearchService, intents: IntentService, log: Arc<dyn SearchLogSink>) -> Self {
        Self {
            search,
            intents,
            log,
        }
    }

    /// Open the SQLite store and search log, and build the configured chat
    /// provider.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;

        let store = Arc::new(SqliteListingStore::new(pool.clone()));
        let search = SearchService::from_config(store, config)?;
        let intents = IntentService::new(llm::create_provider(&config.llm)?);
        Ok(Self::new(search, intents, Arc::new(SqliteSearchLog::new(pool))))
    }

    /// Non-streaming search. Logs the request in the background.
    ///
    /// When `deadline` elapses the in-flight provider or store call is
    /// dropped and [`SearchError::Timeout`] is returned.
    pub async fn search(
        &self,
        req: &SearchRequest,
        deadline: Duration,
    ) -> Result<SearchResponse, SearchError> {
        let searching = self.search.search(&self.intents, req);
        let resp = match tokio::time::timeout(deadline, searching).await {
            Ok(resp) => resp?,
            Err(_) => {
                warn!(deadline_ms = deadline.as_millis() as u64, "Search deadline elapsed");
                return Err(SearchError::Timeout(deadline));
            }
        };
        spawn_record(
            self.log.clone(),
            SearchLogRecord::new(
                req.query.trim(),
                &resp.intent,
                resp.fallback.as_ref(),
                resp.results.iter().map(|r| r.listing.id.clone()).collect(),
                resp.total,
                resp.took_ms,
            ),
        );
        Ok(resp)
    }

    /// Start a streaming search on its own task.
    ///
    /// The request is cancelled when the returned stream is dropped or when
    /// `deadline` elapses; either way the stream simply ends.
    pub fn stream(&self, req: SearchRequest, deadline: Duration) -> EventStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let pipeline = self.clone();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = pipeline.run_streaming(req, tx, task_cancel.clone()) => {}
                _ = tokio::time::sleep(deadline) => {
                    warn!(
                        deadline_ms = deadline.as_millis() as u64,
                        "Streaming search deadline elapsed"
                    );
                    task_cancel.cancel();
                }
            }
        });

        EventStream {
            rx,
            _guard: cancel.drop_guard(),
        }
    }

    /// Run one streaming search, sending events to `tx` until `done`,
    /// `error`, or cancellation.
    pub async fn run_streaming(
        &self,
        req: SearchRequest,
        tx: mpsc::Sender<EventFrame>,
        cancel: CancellationToken,
    ) {
        let started = Instant::now();
        let emitter = Emitter {
            tx,
            cancel: cancel.clone(),
        };
        let query = req.query.trim().to_string();
        let request_id = uuid::Uuid::new_v4().to_string();
        debug!(request_id = %request_id, "Streaming search started");

        if !emitter
            .emit(ProgressEvent::Start {
                request_id: request_id.clone(),
                query: query.clone(),
            })
            .await
        {
            return;
        }

        let page = match self.search.validate(&req) {
            Ok(page) => page,
            Err(e) => {
                info!(request_id = %request_id, error = %e, "Rejected search request");
                emitter.emit(ProgressEvent::from_error(&e)).await;
                return;
            }
        };

        let provider = self.intents.provider();
        if !emitter
            .emit(ProgressEvent::Parsing {
                provider: provider.map(|p| p.name().to_string()),
                model: provider.map(|p| p.model().to_string()),
            })
            .await
        {
            return;
        }

        let mut observer = ChannelObserver {
            emitter: emitter.clone(),
        };
        let outcome = self
            .intents
            .parse_streaming(&query, &mut observer, &cancel)
            .await;
        if cancel.is_cancelled() {
            debug!(request_id = %request_id, "Streaming search cancelled during intent parsing");
            return;
        }

        let (intent, fallback) = split_outcome(outcome);
        if !emitter
            .emit(ProgressEvent::Intent {
                intent: intent.clone(),
                fallback: fallback.clone(),
            })
            .await
        {
            return;
        }
        if !emitter
            .emit(ProgressEvent::Searching {
                filters: req.filters.merge_intent(&intent),
            })
            .await
        {
            return;
        }

        let retrieved = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(request_id = %request_id, "Streaming search cancelled during retrieval");
                return;
            }
            r = self.search.retrieve(&req.filters, &intent, page, today()) => r,
        };
        let ranked = match retrieved {
            Ok(ranked) => ranked,
            Err(e) => {
                error!(request_id = %request_id, error = %e, "Search failed");
                emitter.emit(ProgressEvent::from_error(&e)).await;
                return;
            }
        };

        let took_ms = started.elapsed().as_millis() as u64;
        let result_ids: Vec<String> = ranked
            .results
            .iter()
            .map(|r| r.listing.id.clone())
            .collect();
        let total = ranked.total;
        if !emitter
            .emit(ProgressEvent::Results {
                results: ranked.results,
                total,
                took_ms,
            })
            .await
        {
            return;
        }

        spawn_record(
            self.log.clone(),
            SearchLogRecord::new(&query, &intent, fallback.as_ref(), result_ids, total, took_ms),
        );

        emitter
            .emit(ProgressEvent::Done {
                took_ms: started.elapsed().as_millis() as u64,
            })
            .await;
        info!(request_id = %request_id, total, took_ms, "Streaming search complete");
    }
}

#[derive(Clone)]
struct Emitter {
    tx: mpsc::Sender<EventFrame>,
    cancel: CancellationToken,
}

impl Emitter {
    /// Send one event. Returns `false` once the request is cancelled or the
    /// receiver is gone; a gone receiver cancels the request.
    async fn emit(&self, event: ProgressEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let frame = EventFrame::now(event);
        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return false,
            sent = self.tx.send(frame) => sent,
        };
        if sent.is_err() {
            debug!("Event receiver dropped; cancelling request");
            self.cancel.cancel();
            return false;
        }
        true
    }
}

/// Forwards streamed intent text as `thinking` / `content` events.
struct ChannelObserver {
    emitter: Emitter,
}

#[async_trait]
impl IntentObserver for ChannelObserver {
    async fn thinking(&mut self, text: &str) -> bool {
        self.emitter
            .emit(ProgressEvent::Thinking {
                text: text.to_string(),
            })
            .await
    }

    async fn content(&mut self, text: &str) -> bool {
        self.emitter
            .emit(ProgressEvent::Content {
                text: text.to_string(),
            })
            .await
    }
}
