use anyhow::Result;
use sqlx::SqlitePool;
use tracing::info;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Create listings table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS listings (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            address TEXT,
            location TEXT,
            price REAL,
            bedrooms INTEGER,
            bathrooms INTEGER,
            area_sqft REAL,
            unit_type TEXT,
            mrt_station TEXT,
            mrt_distance_m INTEGER,
            build_year INTEGER,
            amenities_json TEXT NOT NULL DEFAULT '[]',
            facilities_json TEXT NOT NULL DEFAULT '[]',
            listed_date TEXT,
            url TEXT,
            is_completed INTEGER NOT NULL DEFAULT 1,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create search log table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_logs (
            id TEXT PRIMARY KEY,
            query TEXT NOT NULL,
            intent_json TEXT NOT NULL,
            fallback_reason TEXT,
            result_ids_json TEXT NOT NULL DEFAULT '[]',
            total INTEGER NOT NULL,
            latency_ms INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='listings_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE listings_fts USING fts5(
                listing_id UNINDEXED,
                title,
                description,
                address,
                location
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    for ddl in [
        "CREATE INDEX IF NOT EXISTS idx_listings_price ON listings(price)",
        "CREATE INDEX IF NOT EXISTS idx_listings_unit_bedrooms ON listings(unit_type, bedrooms)",
        "CREATE INDEX IF NOT EXISTS idx_listings_location ON listings(location)",
        "CREATE INDEX IF NOT EXISTS idx_listings_listed_date ON listings(listed_date DESC)",
        "CREATE INDEX IF NOT EXISTS idx_search_logs_created_at ON search_logs(created_at DESC)",
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }

    info!("Listing database schema is up to date");
    Ok(())
}
