//! Multi-factor ranking with match explanations.
//!
//! Ranking is pure: it takes the rows a store returned, the merged
//! [`FilterSet`] and a reference date, and produces ordered
//! [`ScoredListing`]s. No I/O, no clock reads.
//!
//! # Scoring
//!
//! 1. `text = clamp(text_rank, 0, 1)` from the store's relevance score.
//! 2. `price` measures how well the price sits in the requested budget
//!    (see [`price_score`]).
//! 3. `recency = exp(-0.01 × days_since_listed)` (see [`recency_score`]).
//! 4. `final = w_text·text + w_price·price + w_recency·recency`, clamped
//!    to `[0, 1]`.
//! 5. Stable sort by final score, descending. Ties keep store order.
//!
//! Match reasons are computed independently of the score and are never
//! empty.

use anyhow::{bail, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::filters::FilterSet;
use crate::models::{Listing, ListingRow, ScoreBreakdown, ScoredListing};

/// Price score for listings without a price.
pub const NEUTRAL_PRICE_SCORE: f64 = 0.5;
/// Recency score for listings without a listed date.
pub const NEUTRAL_RECENCY_SCORE: f64 = 0.5;
/// Per-day decay rate of the recency score.
pub const RECENCY_DECAY_PER_DAY: f64 = 0.01;
/// Listings at most this many days old are "newly listed".
pub const NEW_LISTING_DAYS: i64 = 7;
/// Minimum price score for "price within budget".
pub const BUDGET_REASON_THRESHOLD: f64 = 0.8;
/// Minimum text score for "keyword match".
pub const KEYWORD_REASON_THRESHOLD: f64 = 0.5;

pub const GENERAL_MATCH: &str = "general match";

/// Non-negative weights of the three score components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankingWeights {
    pub text: f64,
    pub price: f64,
    pub recency: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            text: 0.5,
            price: 0.3,
            recency: 0.2,
        }
    }
}

impl RankingWeights {
    pub fn new(text: f64, price: f64, recency: f64) -> Result<Self> {
        let weights = Self {
            text,
            price,
            recency,
        };
        weights.validate()?;
        Ok(weights)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, w) in [
            ("text", self.text),
            ("price", self.price),
            ("recency", self.recency),
        ] {
            if !w.is_finite() || w < 0.0 {
                bail!("ranking weight '{}' must be a non-negative number, got {}", name, w);
            }
        }
        Ok(())
    }
}

/// Store relevance clamped into `[0, 1]`.
pub fn text_score(text_rank: f64) -> f64 {
    if text_rank.is_nan() {
        return 0.0;
    }
    text_rank.clamp(0.0, 1.0)
}

/// How well `price` fits the filter's budget, in `[0, 1]`.
///
/// | Filter | Score |
/// |--------|-------|
/// | no price bounds | 1.0 |
/// | listing has no price | 0.5 |
/// | `min..=max` | 0 outside, `1 - |p - mid| / half` inside (1 at midpoint) |
/// | `max` only | 0 above, `p / max` otherwise |
/// | `min` only | 0 below, `min / p` otherwise |
pub fn price_score(price: Option<f64>, filters: &FilterSet) -> f64 {
    if !filters.has_price() {
        return 1.0;
    }
    let Some(p) = price else {
        return NEUTRAL_PRICE_SCORE;
    };

    let score = match (filters.price_min, filters.price_max) {
        (Some(min), Some(max)) => {
            if p < min || p > max {
                0.0
            } else {
                let half = (max - min) / 2.0;
                if half <= 0.0 {
                    // Degenerate window: only an exact price fits.
                    if p == min {
                        1.0
                    } else {
                        0.0
                    }
                } else {
                    let mid = min + half;
                    1.0 - (p - mid).abs() / half
                }
            }
        }
        (None, Some(max)) => {
            if p > max {
                0.0
            } else if max <= 0.0 {
                1.0
            } else {
                p / max
            }
        }
        (Some(min), None) => {
            if p < min {
                0.0
            } else if p <= 0.0 {
                1.0
            } else {
                min / p
            }
        }
        (None, None) => 1.0,
    };
    score.clamp(0.0, 1.0)
}

/// Days from `listed` to `today`; future dates count as zero.
pub fn days_since(listed: NaiveDate, today: NaiveDate) -> i64 {
    (today - listed).num_days().max(0)
}

/// `exp(-0.01 × days)`, or 0.5 with no listed date.
pub fn recency_score(listed: Option<NaiveDate>, today: NaiveDate) -> f64 {
    match listed {
        None => NEUTRAL_RECENCY_SCORE,
        Some(d) => {
            let days = days_since(d, today) as f64;
            (-RECENCY_DECAY_PER_DAY * days).exp().clamp(0.0, 1.0)
        }
    }
}

/// Human-readable reasons the listing matched. Never empty.
pub fn match_reasons(
    listing: &Listing,
    filters: &FilterSet,
    breakdown: &ScoreBreakdown,
    today: NaiveDate,
) -> Vec<String> {
    let mut reasons: Vec<String> = Vec::new();

    if filters.bedrooms.is_some() && filters.bedrooms == listing.bedrooms {
        reasons.push("bedrooms match".to_string());
    }
    if filters.bathrooms.is_some() && filters.bathrooms == listing.bathrooms {
        reasons.push("bathrooms match".to_string());
    }
    if let Some(wanted) = filters.unit_type {
        if listing.parsed_unit_type() == Some(wanted) {
            reasons.push("unit type match".to_string());
        }
    }
    if filters.location.is_some() && filters.location_matches(listing) {
        reasons.push("location match".to_string());
    }
    if let (Some(max_m), Some(m)) = (filters.mrt_distance_max_m(), listing.mrt_distance_m) {
        if m <= max_m {
            reasons.push("near MRT".to_string());
        }
    }
    if filters.has_price() && breakdown.price > BUDGET_REASON_THRESHOLD {
        reasons.push("price within budget".to_string());
    }
    if let Some(listed) = listing.listed_date {
        if days_since(listed, today) <= NEW_LISTING_DAYS {
            reasons.push("newly listed".to_string());
        }
    }
    if breakdown.text >= KEYWORD_REASON_THRESHOLD {
        reasons.push("keyword match".to_string());
    }
    for term in filters.amenities.iter().chain(filters.facilities.iter()) {
        let needle = term.to_lowercase();
        let present = listing
            .amenities
            .iter()
            .chain(listing.facilities.iter())
            .any(|a| a.to_lowercase().contains(&needle));
        if present {
            reasons.push(format!("has {}", term));
        }
    }

    if reasons.is_empty() {
        reasons.push(GENERAL_MATCH.to_string());
    }
    reasons
}

/// Score, explain and sort store rows.
pub fn rank(
    rows: Vec<ListingRow>,
    filters: &FilterSet,
    weights: &RankingWeights,
    today: NaiveDate,
) -> Vec<ScoredListing> {
    let mut results: Vec<ScoredListing> = rows
        .into_iter()
        .map(|row| {
            let breakdown = ScoreBreakdown {
                text: text_score(row.text_rank),
                price: price_score(row.listing.price, filters),
                recency: recency_score(row.listing.listed_date, today),
            };
            let score = (weights.text * breakdown.text
                + weights.price * breakdown.price
                + weights.recency * breakdown.recency)
                .clamp(0.0, 1.0);
            let matched_reasons = match_reasons(&row.listing, filters, &breakdown, today);
            ScoredListing {
                listing: row.listing,
                score,
                matched_reasons,
                breakdown,
            }
        })
        .collect();

    // `sort_by` is stable, so equal scores keep store order.
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results
}
