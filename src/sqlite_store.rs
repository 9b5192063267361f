//! SQLite-backed [`ListingStore`] implementation.
//!
//! Exact filters become a parameterized `WHERE` clause over `listings`.
//! Keywords are matched against the `listings_fts` FTS5 index and the bm25
//! rank `r` (negated so larger is better) is mapped into `[0, 1)` as
//! `r / (1 + r)`. Keywords never filter: listings without a text match are
//! returned with a rank of 0.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use propsearch_core::filters::FilterSet;
use propsearch_core::models::{Listing, ListingRow};
use propsearch_core::store::{keyword_terms, ListingPage, ListingQuery, ListingStore};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite implementation of the [`ListingStore`] trait.
pub struct SqliteListingStore {
    pool: SqlitePool,
}

impl SqliteListingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Number of listings in the store, completed or not.
    pub async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM listings")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

/// A positional bind value for a dynamically built statement.
#[derive(Debug, Clone, PartialEq)]
enum Bind {
    Real(f64),
    Int(i64),
    Text(String),
}

/// Escape `%`, `_` and `\` and wrap in wildcards for `LIKE ... ESCAPE '\'`.
fn like_contains(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Build the `WHERE` clause (always starting with the completed-only
/// predicate) and its bind values.
fn where_clause(filters: &FilterSet) -> (String, Vec<Bind>) {
    let mut clauses: Vec<String> = vec!["l.is_completed = 1".to_string()];
    let mut binds: Vec<Bind> = Vec::new();

    let mut push = |clause: &str, bind: Bind| {
        clauses.push(clause.to_string());
        binds.push(bind);
    };

    if let Some(v) = filters.price_min {
        push("l.price >= ?", Bind::Real(v));
    }
    if let Some(v) = filters.price_max {
        push("l.price <= ?", Bind::Real(v));
    }
    if let Some(v) = filters.bedrooms {
        push("l.bedrooms = ?", Bind::Int(v));
    }
    if let Some(v) = filters.bathrooms {
        push("l.bathrooms = ?", Bind::Int(v));
    }
    if let Some(v) = filters.area_min {
        push("l.area_sqft >= ?", Bind::Real(v));
    }
    if let Some(v) = filters.area_max {
        push("l.area_sqft <= ?", Bind::Real(v));
    }
    if let Some(v) = filters.unit_type {
        push("l.unit_type = ? COLLATE NOCASE", Bind::Text(v.as_str().to_string()));
    }
    if let Some(v) = filters.mrt_distance_max_m() {
        push("l.mrt_distance_m <= ?", Bind::Int(v));
    }
    if let Some(v) = filters.build_year_min {
        push("l.build_year >= ?", Bind::Int(v));
    }
    if let Some(loc) = &filters.location {
        clauses.push(
            "(l.location LIKE ? ESCAPE '\\' OR l.address LIKE ? ESCAPE '\\')".to_string(),
        );
        binds.push(Bind::Text(like_contains(loc)));
        binds.push(Bind::Text(like_contains(loc)));
    }
    for (column, terms) in [
        ("amenities_json", &filters.amenities),
        ("facilities_json", &filters.facilities),
    ] {
        for term in terms {
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM json_each(l.{column}) WHERE json_each.value LIKE ? ESCAPE '\\')"
            ));
            binds.push(Bind::Text(like_contains(term)));
        }
    }

    (clauses.join(" AND "), binds)
}

/// FTS5 match expression: every term quoted, OR-joined.
fn match_expression(keywords: &[String]) -> Option<String> {
    let terms = keyword_terms(keywords);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "")))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    binds: &[Bind],
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    for bind in binds {
        query = match bind {
            Bind::Real(v) => query.bind(*v),
            Bind::Int(v) => query.bind(*v),
            Bind::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

fn parse_string_list(raw: &str, id: &str, column: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(listing = %id, column, error = %e, "Ignoring malformed JSON list");
            Vec::new()
        }
    }
}

fn listing_from_row(row: &SqliteRow) -> Result<Listing> {
    let id: String = row.try_get("id")?;
    let listed_date: Option<String> = row.try_get("listed_date")?;
    let listed_date = listed_date.and_then(|s| match NaiveDate::parse_from_str(&s, DATE_FORMAT) {
        Ok(d) => Some(d),
        Err(_) => {
            warn!(listing = %id, value = %s, "Ignoring unparseable listed_date");
            None
        }
    });
    let amenities: String = row.try_get("amenities_json")?;
    let facilities: String = row.try_get("facilities_json")?;
    let is_completed: i64 = row.try_get("is_completed")?;

    Ok(Listing {
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        address: row.try_get("address")?,
        location: row.try_get("location")?,
        price: row.try_get("price")?,
        bedrooms: row.try_get("bedrooms")?,
        bathrooms: row.try_get("bathrooms")?,
        area_sqft: row.try_get("area_sqft")?,
        unit_type: row.try_get("unit_type")?,
        mrt_station: row.try_get("mrt_station")?,
        mrt_distance_m: row.try_get("mrt_distance_m")?,
        build_year: row.try_get("build_year")?,
        amenities: parse_string_list(&amenities, &id, "amenities_json"),
        facilities: parse_string_list(&facilities, &id, "facilities_json"),
        listed_date,
        url: row.try_get("url")?,
        is_completed: is_completed != 0,
        id,
    })
}

#[async_trait]
impl ListingStore for SqliteListingStore {
    async fn upsert_listing(&self, listing: &Listing) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let unit_type = listing
            .parsed_unit_type()
            .map(|u| u.as_str().to_string())
            .or_else(|| listing.unit_type.clone());
        let amenities = serde_json::to_string(&listing.amenities)?;
        let facilities = serde_json::to_string(&listing.facilities)?;
        let listed_date = listing
            .listed_date
            .map(|d| d.format(DATE_FORMAT).to_string());

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO listings (id, title, description, address, location, price,
                                  bedrooms, bathrooms, area_sqft, unit_type, mrt_station,
                                  mrt_distance_m, build_year, amenities_json, facilities_json,
                                  listed_date, url, is_completed, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                address = excluded.address,
                location = excluded.location,
                price = excluded.price,
                bedrooms = excluded.bedrooms,
                bathrooms = excluded.bathrooms,
                area_sqft = excluded.area_sqft,
                unit_type = excluded.unit_type,
                mrt_station = excluded.mrt_station,
                mrt_distance_m = excluded.mrt_distance_m,
                build_year = excluded.build_year,
                amenities_json = excluded.amenities_json,
                facilities_json = excluded.facilities_json,
                listed_date = excluded.listed_date,
                url = excluded.url,
                is_completed = excluded.is_completed,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&listing.id)
        .bind(&listing.title)
        .bind(&listing.description)
        .bind(&listing.address)
        .bind(&listing.location)
        .bind(listing.price)
        .bind(listing.bedrooms)
        .bind(listing.bathrooms)
        .bind(listing.area_sqft)
        .bind(&unit_type)
        .bind(&listing.mrt_station)
        .bind(listing.mrt_distance_m)
        .bind(listing.build_year)
        .bind(&amenities)
        .bind(&facilities)
        .bind(&listed_date)
        .bind(&listing.url)
        .bind(listing.is_completed as i64)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM listings_fts WHERE listing_id = ?")
            .bind(&listing.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO listings_fts (listing_id, title, description, address, location) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&listing.id)
        .bind(&listing.title)
        .bind(listing.description.as_deref().unwrap_or(""))
        .bind(listing.address.as_deref().unwrap_or(""))
        .bind(listing.location.as_deref().unwrap_or(""))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(listing.id.clone())
    }

    async fn search(&self, query: &ListingQuery<'_>) -> Result<ListingPage> {
        let (where_sql, where_binds) = where_clause(query.filters);

        let count_sql = format!("SELECT COUNT(*) FROM listings l WHERE {}", where_sql);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for bind in &where_binds {
            count_query = match bind {
                Bind::Real(v) => count_query.bind(*v),
                Bind::Int(v) => count_query.bind(*v),
                Bind::Text(v) => count_query.bind(v.clone()),
            };
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let mut binds: Vec<Bind> = Vec::new();
        let (rank_select, rank_join) = match match_expression(query.keywords) {
            Some(expr) => {
                binds.push(Bind::Text(expr));
                (
                    "COALESCE(t.raw / (1.0 + t.raw), 0.0)",
                    r#"LEFT JOIN (
                        SELECT listing_id, MAX(-bm25(listings_fts), 0.0) AS raw
                        FROM listings_fts
                        WHERE listings_fts MATCH ?
                    ) t ON t.listing_id = l.id"#,
                )
            }
            None => ("0.0", ""),
        };
        binds.extend(where_binds);
        binds.push(Bind::Int(query.limit.max(0)));
        binds.push(Bind::Int(query.offset.max(0)));

        let sql = format!(
            r#"
            SELECT l.*, {rank_select} AS text_rank
            FROM listings l
            {rank_join}
            WHERE {where_sql}
            ORDER BY text_rank DESC, l.listed_date DESC, l.id ASC
            LIMIT ? OFFSET ?
            "#
        );

        debug!(
            total,
            keywords = query.keywords.len(),
            limit = query.limit,
            offset = query.offset,
            "Running listing query"
        );

        let rows = bind_all(sqlx::query(&sql), &binds)
            .fetch_all(&self.pool)
            .await?;

        let rows = rows
            .iter()
            .map(|row| {
                Ok(ListingRow {
                    listing: listing_from_row(row)?,
                    text_rank: row.try_get::<f64, _>("text_rank")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ListingPage { rows, total })
    }

    async fn get_listing(&self, id: &str) -> Result<Option<Listing>> {
        let row = sqlx::query("SELECT * FROM listings WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(listing_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use propsearch_core::models::UnitType;

    #[test]
    fn test_like_contains_escapes_wildcards() {
        assert_eq!(like_contains("pool"), "%pool%");
        assert_eq!(like_contains("100%_a\\b"), "%100\\%\\_a\\\\b%");
    }

    #[test]
    fn test_where_clause_always_completed_only() {
        let (sql, binds) = where_clause(&FilterSet::default());
        assert_eq!(sql, "l.is_completed = 1");
        assert!(binds.is_empty());
    }

    #[test]
    fn test_where_clause_binds_in_order() {
        let filters = FilterSet {
            price_max: Some(1_500_000.0),
            bedrooms: Some(3),
            unit_type: Some(UnitType::Condo),
            mrt_distance_max: Some(10),
            location: Some("Punggol".into()),
            amenities: vec!["Swimming pool".into()],
            ..Default::default()
        };
        let (sql, binds) = where_clause(&filters);
        assert_eq!(sql.matches('?').count(), binds.len());
        assert_eq!(
            binds,
            vec![
                Bind::Real(1_500_000.0),
                Bind::Int(3),
                Bind::Text("Condo".into()),
                Bind::Int(800),
                Bind::Text("%Punggol%".into()),
                Bind::Text("%Punggol%".into()),
                Bind::Text("%Swimming pool%".into()),
            ]
        );
        assert!(sql.contains("json_each(l.amenities_json)"));
    }

    #[test]
    fn test_match_expression_quotes_terms() {
        assert_eq!(
            match_expression(&["near \"MRT\" OR".to_string()]).as_deref(),
            Some("\"near\" OR \"mrt\" OR \"or\"")
        );
        assert_eq!(match_expression(&[]), None);
    }
}
