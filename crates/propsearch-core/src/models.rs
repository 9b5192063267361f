//! Core data models shared by the store, ranking, and service layers.
//!
//! These types represent the listings that flow out of the store and the
//! scored results handed back to callers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Average walking speed used to convert MRT walking minutes to meters.
///
/// Intents and filter sets express `mrt_distance_max` in minutes of walking;
/// the store keeps `mrt_distance_m` in meters.
pub const WALK_METERS_PER_MINUTE: i64 = 80;

/// Convert a walking time in minutes to a distance in meters.
pub fn walking_minutes_to_meters(minutes: i64) -> i64 {
    minutes * WALK_METERS_PER_MINUTE
}

/// Closed set of property types understood by the search pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitType {
    #[serde(rename = "HDB", alias = "hdb")]
    Hdb,
    #[serde(alias = "condo", alias = "CONDO")]
    Condo,
    #[serde(alias = "landed", alias = "LANDED")]
    Landed,
    #[serde(alias = "executive", alias = "EXECUTIVE")]
    Executive,
}

impl UnitType {
    pub const ALL: [UnitType; 4] = [
        UnitType::Hdb,
        UnitType::Condo,
        UnitType::Landed,
        UnitType::Executive,
    ];

    /// Canonical label, as stored in the `unit_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitType::Hdb => "HDB",
            UnitType::Condo => "Condo",
            UnitType::Landed => "Landed",
            UnitType::Executive => "Executive",
        }
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitType {
    type Err = String;

    /// Case-insensitive, accepting the common aliases models and listing
    /// sites use ("condominium", "EC", "terrace", ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_lowercase();
        match norm.as_str() {
            "hdb" | "hdb flat" | "flat" | "public housing" => Ok(UnitType::Hdb),
            "condo" | "condominium" | "apartment" | "private condo" => Ok(UnitType::Condo),
            "landed" | "landed house" | "terrace" | "semi-d" | "semi-detached" | "bungalow"
            | "detached" => Ok(UnitType::Landed),
            "executive" | "executive condo" | "executive condominium" | "ec" => {
                Ok(UnitType::Executive)
            }
            _ => Err(s.trim().to_string()),
        }
    }
}

/// A listing as held by the store.
///
/// Read-only from the point of view of the search pipeline. Optional
/// attributes are `None` when the crawler could not determine them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    /// Town or district name (e.g. `"Punggol"`).
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub bedrooms: Option<i64>,
    #[serde(default)]
    pub bathrooms: Option<i64>,
    #[serde(default)]
    pub area_sqft: Option<f64>,
    /// Free-form type label from the source; compared through [`UnitType`].
    #[serde(default)]
    pub unit_type: Option<String>,
    #[serde(default)]
    pub mrt_station: Option<String>,
    /// Distance to the nearest MRT station, in meters.
    #[serde(default)]
    pub mrt_distance_m: Option<i64>,
    #[serde(default)]
    pub build_year: Option<i64>,
    #[serde(default)]
    pub amenities: Vec<String>,
    #[serde(default)]
    pub facilities: Vec<String>,
    #[serde(default)]
    pub listed_date: Option<NaiveDate>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_completed")]
    pub is_completed: bool,
}

fn default_completed() -> bool {
    true
}

impl Listing {
    /// The listing's unit type, if its free-form label is recognized.
    pub fn parsed_unit_type(&self) -> Option<UnitType> {
        self.unit_type.as_deref().and_then(|s| s.parse().ok())
    }
}

/// A listing returned by a store query, with its text-relevance rank.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingRow {
    pub listing: Listing,
    /// Store-computed relevance in `[0, +inf)`, typically capped at 1.0.
    pub text_rank: f64,
}

/// Per-component scores behind a [`ScoredListing`]'s final score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub text: f64,
    pub price: f64,
    pub recency: f64,
}

/// A ranked listing with its score and human-readable match reasons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredListing {
    #[serde(flatten)]
    pub listing: Listing,
    /// Weighted score in `[0.0, 1.0]`.
    pub score: f64,
    /// Never empty; falls back to `"general match"`.
    pub matched_reasons: Vec<String>,
    pub breakdown: ScoreBreakdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_type_aliases() {
        assert_eq!("condominium".parse::<UnitType>(), Ok(UnitType::Condo));
        assert_eq!(" HDB ".parse::<UnitType>(), Ok(UnitType::Hdb));
        assert_eq!("EC".parse::<UnitType>(), Ok(UnitType::Executive));
        assert_eq!("Semi-D".parse::<UnitType>(), Ok(UnitType::Landed));
        assert_eq!(
            "castle".parse::<UnitType>(),
            Err("castle".to_string())
        );
    }

    #[test]
    fn unit_type_serializes_canonical_label() {
        assert_eq!(serde_json::to_string(&UnitType::Hdb).unwrap(), "\"HDB\"");
        assert_eq!(
            serde_json::from_str::<UnitType>("\"condo\"").unwrap(),
            UnitType::Condo
        );
    }

    #[test]
    fn listing_defaults_to_completed() {
        let listing: Listing =
            serde_json::from_str(r#"{"id": "l1", "title": "Sunny flat"}"#).unwrap();
        assert!(listing.is_completed);
        assert!(listing.amenities.is_empty());
        assert_eq!(listing.price, None);
    }

    #[test]
    fn walking_conversion() {
        assert_eq!(walking_minutes_to_meters(10), 800);
        assert_eq!(walking_minutes_to_meters(0), 0);
    }
}
