//! Search analytics records.
//!
//! One [`SearchLogRecord`] is written per completed search. Writing is
//! fire-and-forget ([`spawn_record`]): it runs on a detached task that
//! neither delays the response nor observes the request's cancellation.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use propsearch_core::intent::{FallbackReason, Intent};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchLogRecord {
    pub id: String,
    pub query: String,
    pub intent: Intent,
    pub fallback: Option<FallbackReason>,
    pub result_ids: Vec<String>,
    pub total: i64,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl SearchLogRecord {
    pub fn new(
        query: &str,
        intent: &Intent,
        fallback: Option<&FallbackReason>,
        result_ids: Vec<String>,
        total: i64,
        latency_ms: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            query: query.to_string(),
            intent: intent.clone(),
            fallback: fallback.cloned(),
            result_ids,
            total,
            latency_ms,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait SearchLogSink: Send + Sync {
    async fn record(&self, record: &SearchLogRecord) -> Result<()>;
}

/// Persists records to the `search_logs` table.
pub struct SqliteSearchLog {
    pool: SqlitePool,
}

impl SqliteSearchLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SearchLogSink for SqliteSearchLog {
    async fn record(&self, record: &SearchLogRecord) -> Result<()> {
        let intent_json = serde_json::to_string(&record.intent)?;
        let result_ids_json = serde_json::to_string(&record.result_ids)?;
        let fallback = record.fallback.as_ref().map(|r| r.to_string());

        sqlx::query(
            r#"
            INSERT INTO search_logs (id, query, intent_json, fallback_reason, result_ids_json,
                                     total, latency_ms, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.query)
        .bind(&intent_json)
        .bind(&fallback)
        .bind(&result_ids_json)
        .bind(record.total)
        .bind(record.latency_ms as i64)
        .bind(record.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Emits records as structured log lines only.
pub struct TracingSearchLog;

#[async_trait]
impl SearchLogSink for TracingSearchLog {
    async fn record(&self, record: &SearchLogRecord) -> Result<()> {
        info!(
            id = %record.id,
            query = %record.query,
            total = record.total,
            returned = record.result_ids.len(),
            latency_ms = record.latency_ms,
            fallback = record.fallback.is_some(),
            "search"
        );
        Ok(())
    }
}

/// Write `record` on a detached task. Failures are logged, never surfaced.
pub fn spawn_record(sink: Arc<dyn SearchLogSink>, record: SearchLogRecord) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = sink.record(&record).await {
            warn!(id = %record.id, error = %e, "Failed to write search log record");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};

    #[tokio::test]
    async fn test_sqlite_sink_writes_row() {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect_path(&dir.path().join("log.sqlite")).await.unwrap();
        migrate::migrate_pool(&pool).await.unwrap();

        let sink: Arc<dyn SearchLogSink> = Arc::new(SqliteSearchLog::new(pool.clone()));
        let record = SearchLogRecord::new(
            "condo",
            &Intent::empty("condo"),
            Some(&FallbackReason::Disabled),
            vec!["a".to_string(), "b".to_string()],
            2,
            12,
        );
        spawn_record(sink, record).await.unwrap();

        let (query, ids, fallback): (String, String, Option<String>) = sqlx::query_as(
            "SELECT query, result_ids_json, fallback_reason FROM search_logs",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(query, "condo");
        assert_eq!(ids, r#"["a","b"]"#);
        assert_eq!(fallback.as_deref(), Some("chat provider disabled"));
    }
}
