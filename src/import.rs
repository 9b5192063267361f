//! Bulk listing import from a JSON file.
//!
//! The file holds a JSON array of listings in the same camelCase shape the
//! HTTP API returns. Every listing is upserted and re-indexed for full-text
//! search, so importing the same file twice is harmless.

use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::{info, warn};

use propsearch_core::models::Listing;
use propsearch_core::store::ListingStore;

use crate::config::Config;
use crate::sqlite_store::SqliteListingStore;
use crate::{db, migrate};

/// Outcome of an import run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
}

/// Parse a listing array, rejecting anything that is not an array.
pub fn parse_listings(content: &str) -> Result<Vec<Listing>> {
    let value: serde_json::Value =
        serde_json::from_str(content).context("Listing file is not valid JSON")?;
    if !value.is_array() {
        bail!("Listing file must contain a JSON array of listings");
    }
    let listings: Vec<Listing> =
        serde_json::from_value(value).context("Listing file has an invalid listing entry")?;
    Ok(listings)
}

/// Upsert every listing with a non-blank id and title.
pub async fn import_listings<S: ListingStore + ?Sized>(
    store: &S,
    listings: &[Listing],
) -> Result<ImportReport> {
    let mut report = ImportReport::default();
    for listing in listings {
        if listing.id.trim().is_empty() || listing.title.trim().is_empty() {
            warn!(id = %listing.id, "Skipping listing without id or title");
            report.skipped += 1;
            continue;
        }
        store
            .upsert_listing(listing)
            .await
            .with_context(|| format!("Failed to store listing '{}'", listing.id))?;
        report.imported += 1;
    }
    info!(
        imported = report.imported,
        skipped = report.skipped,
        "Listing import finished"
    );
    Ok(report)
}

pub async fn import_file<S: ListingStore + ?Sized>(store: &S, path: &Path) -> Result<ImportReport> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read listing file: {}", path.display()))?;
    let listings = parse_listings(&content)?;
    import_listings(store, &listings).await
}

/// CLI entry point for `propsearch import`.
pub async fn run_import(config: &Config, path: &Path) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    let store = SqliteListingStore::new(pool.clone());

    let report = import_file(&store, path).await?;
    let indexed = store.count().await?;
    println!(
        "Imported {} listings ({} skipped). {} listings indexed.",
        report.imported, report.skipped, indexed
    );
    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use propsearch_core::store::memory::InMemoryListingStore;

    #[test]
    fn test_rejects_non_array() {
        assert!(parse_listings(r#"{"id": "a"}"#).is_err());
        assert!(parse_listings("not json").is_err());
    }

    #[tokio::test]
    async fn test_skips_blank_ids() {
        let listings = parse_listings(
            r#"[{"id": "a", "title": "One"}, {"id": " ", "title": "Two"}, {"id": "c", "title": ""}]"#,
        )
        .unwrap();
        let store = InMemoryListingStore::new();
        let report = import_listings(&store, &listings).await.unwrap();
        assert_eq!(
            report,
            ImportReport {
                imported: 1,
                skipped: 2
            }
        );
        assert_eq!(store.len(), 1);
    }
}
