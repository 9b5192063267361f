//! Caller-supplied filters and their merge with a parsed [`Intent`].
//!
//! Explicit filters always win: the intent only fills fields the caller
//! left unset. The merged [`FilterSet`] is what the store queries with and
//! what ranking explains results against.

use serde::{Deserialize, Serialize};

use crate::intent::{Intent, IntentError};
use crate::models::{walking_minutes_to_meters, Listing, UnitType};

/// Exact attribute constraints for a listing search.
///
/// `mrt_distance_max` is in minutes of walking, as in [`Intent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bedrooms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bathrooms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_type: Option<UnitType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mrt_distance_max: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_year_min: Option<i64>,
    pub amenities: Vec<String>,
    pub facilities: Vec<String>,
    pub is_completed: bool,
}

impl Default for FilterSet {
    fn default() -> Self {
        Self {
            price_min: None,
            price_max: None,
            bedrooms: None,
            bathrooms: None,
            area_min: None,
            area_max: None,
            unit_type: None,
            location: None,
            mrt_distance_max: None,
            build_year_min: None,
            amenities: Vec::new(),
            facilities: Vec::new(),
            is_completed: true,
        }
    }
}

impl FilterSet {
    /// Fill unset fields from `intent`. Set fields are never overwritten.
    ///
    /// A parsed price or area bound that would invert an explicit bound on
    /// the other side of the same range is dropped.
    ///
    /// Only completed listings are ever searched, so the merged set always
    /// carries `is_completed = true`.
    pub fn merge_intent(&self, intent: &Intent) -> FilterSet {
        fn pick_list(explicit: &[String], parsed: &[String]) -> Vec<String> {
            if explicit.is_empty() {
                parsed.to_vec()
            } else {
                explicit.to_vec()
            }
        }

        fn pick_range(
            explicit: (Option<f64>, Option<f64>),
            parsed: (Option<f64>, Option<f64>),
        ) -> (Option<f64>, Option<f64>) {
            let min = explicit.0.or(parsed.0);
            let max = explicit.1.or(parsed.1);
            match (min, max) {
                (Some(lo), Some(hi)) if lo > hi && explicit.0.is_none() => (None, max),
                (Some(lo), Some(hi)) if lo > hi && explicit.1.is_none() => (min, None),
                _ => (min, max),
            }
        }

        let (price_min, price_max) = pick_range(
            (self.price_min, self.price_max),
            (intent.price_min, intent.price_max),
        );
        let (area_min, area_max) = pick_range(
            (self.area_min, self.area_max),
            (intent.area_min, intent.area_max),
        );

        FilterSet {
            price_min,
            price_max,
            bedrooms: self.bedrooms.or(intent.bedrooms),
            bathrooms: self.bathrooms.or(intent.bathrooms),
            area_min,
            area_max,
            unit_type: self.unit_type.or(intent.unit_type),
            location: self.location.clone().or_else(|| intent.location.clone()),
            mrt_distance_max: self.mrt_distance_max.or(intent.mrt_distance_max),
            build_year_min: self.build_year_min.or(intent.build_year_min),
            amenities: pick_list(&self.amenities, &intent.amenities),
            facilities: pick_list(&self.facilities, &intent.facilities),
            is_completed: true,
        }
    }

    pub fn has_price(&self) -> bool {
        self.price_min.is_some() || self.price_max.is_some()
    }

    /// `mrt_distance_max` converted to meters, as stored per listing.
    pub fn mrt_distance_max_m(&self) -> Option<i64> {
        self.mrt_distance_max.map(walking_minutes_to_meters)
    }

    /// Apply the same domain rules an intent must satisfy.
    pub fn validate(&self) -> Result<(), IntentError> {
        let as_intent = Intent {
            price_min: self.price_min,
            price_max: self.price_max,
            bedrooms: self.bedrooms,
            bathrooms: self.bathrooms,
            area_min: self.area_min,
            area_max: self.area_max,
            unit_type: self.unit_type,
            location: self.location.clone(),
            mrt_distance_max: self.mrt_distance_max,
            build_year_min: self.build_year_min,
            amenities: Vec::new(),
            facilities: Vec::new(),
            keywords: Vec::new(),
            confidence: 1.0,
        };
        as_intent.validate()
    }

    /// Evaluate the exact predicates against a listing in memory.
    ///
    /// A listing missing an attribute never satisfies a constraint on it.
    /// Amenity and facility terms match case-insensitively as substrings of
    /// any entry, so callers should expand synonyms first.
    pub fn matches(&self, listing: &Listing) -> bool {
        fn at_least<T: PartialOrd>(bound: Option<T>, value: Option<T>) -> bool {
            match bound {
                None => true,
                Some(b) => value.is_some_and(|v| v >= b),
            }
        }
        fn at_most<T: PartialOrd>(bound: Option<T>, value: Option<T>) -> bool {
            match bound {
                None => true,
                Some(b) => value.is_some_and(|v| v <= b),
            }
        }
        fn exactly<T: PartialEq>(want: Option<T>, value: Option<T>) -> bool {
            match want {
                None => true,
                Some(w) => value == Some(w),
            }
        }

        if self.is_completed && !listing.is_completed {
            return false;
        }

        at_least(self.price_min, listing.price)
            && at_most(self.price_max, listing.price)
            && exactly(self.bedrooms, listing.bedrooms)
            && exactly(self.bathrooms, listing.bathrooms)
            && at_least(self.area_min, listing.area_sqft)
            && at_most(self.area_max, listing.area_sqft)
            && exactly(self.unit_type, listing.parsed_unit_type())
            && at_most(self.mrt_distance_max_m(), listing.mrt_distance_m)
            && at_least(self.build_year_min, listing.build_year)
            && self.location_matches(listing)
            && all_terms_present(&self.amenities, &listing.amenities)
            && all_terms_present(&self.facilities, &listing.facilities)
    }

    /// Case-insensitive substring match of the location filter against the
    /// listing's location or address.
    pub fn location_matches(&self, listing: &Listing) -> bool {
        let Some(wanted) = &self.location else {
            return true;
        };
        let wanted = wanted.to_lowercase();
        [&listing.location, &listing.address]
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(&wanted))
    }
}

fn all_terms_present(terms: &[String], values: &[String]) -> bool {
    terms.iter().all(|term| {
        let term = term.to_lowercase();
        values.iter().any(|v| v.to_lowercase().contains(&term))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing() -> Listing {
        serde_json::from_value(serde_json::json!({
            "id": "l1",
            "title": "Waterway Terraces",
            "location": "Punggol",
            "address": "Punggol Central",
            "price": 1_200_000.0,
            "bedrooms": 3,
            "bathrooms": 2,
            "areaSqft": 1000.0,
            "unitType": "condominium",
            "mrtDistanceM": 400,
            "buildYear": 2015,
            "amenities": ["Swimming pool", "Gym"],
            "facilities": ["Playground"],
        }))
        .unwrap()
    }

    #[test]
    fn test_explicit_filters_win() {
        let explicit = FilterSet {
            bedrooms: Some(2),
            amenities: vec!["gym".into()],
            ..Default::default()
        };
        let intent = Intent {
            bedrooms: Some(3),
            location: Some("Punggol".into()),
            amenities: vec!["pool".into()],
            ..Intent::empty("q")
        };
        let merged = explicit.merge_intent(&intent);
        assert_eq!(merged.bedrooms, Some(2));
        assert_eq!(merged.location.as_deref(), Some("Punggol"));
        assert_eq!(merged.amenities, vec!["gym"]);
        assert!(merged.is_completed);
    }

    #[test]
    fn test_merge_forces_completed() {
        let explicit = FilterSet {
            is_completed: false,
            ..Default::default()
        };
        assert!(explicit.merge_intent(&Intent::empty("q")).is_completed);
    }

    #[test]
    fn test_parsed_bound_never_inverts_explicit_range() {
        let explicit = FilterSet {
            price_min: Some(2_000_000.0),
            area_max: Some(800.0),
            ..Default::default()
        };
        let intent = Intent {
            price_max: Some(1_500_000.0),
            area_min: Some(1000.0),
            ..Intent::empty("q")
        };
        let merged = explicit.merge_intent(&intent);
        assert_eq!(merged.price_min, Some(2_000_000.0));
        assert_eq!(merged.price_max, None);
        assert_eq!(merged.area_min, None);
        assert_eq!(merged.area_max, Some(800.0));
        assert!(merged.validate().is_ok());

        let intent = Intent {
            price_max: Some(2_500_000.0),
            ..Intent::empty("q")
        };
        let merged = explicit.merge_intent(&intent);
        assert_eq!(merged.price_max, Some(2_500_000.0));
    }

    #[test]
    fn test_deserialize_defaults() {
        let f: FilterSet =
            serde_json::from_str(r#"{"priceMax": 900000, "unitType": "HDB"}"#).unwrap();
        assert_eq!(f.price_max, Some(900_000.0));
        assert_eq!(f.unit_type, Some(UnitType::Hdb));
        assert!(f.is_completed);
        assert!(f.has_price());
    }

    #[test]
    fn test_matches_all_constraints() {
        let f = FilterSet {
            price_min: Some(1_000_000.0),
            price_max: Some(1_300_000.0),
            bedrooms: Some(3),
            unit_type: Some(UnitType::Condo),
            location: Some("punggol".into()),
            mrt_distance_max: Some(5),
            build_year_min: Some(2010),
            amenities: vec!["swimming pool".into()],
            facilities: vec!["play".into()],
            ..Default::default()
        };
        assert!(f.matches(&listing()));
    }

    #[test]
    fn test_rejects_each_violation() {
        let l = listing();
        let cases: Vec<fn(&mut FilterSet)> = vec![
            |f| f.price_max = Some(1_000_000.0),
            |f| f.bedrooms = Some(4),
            |f| f.unit_type = Some(UnitType::Hdb),
            |f| f.location = Some("Bishan".into()),
            |f| f.mrt_distance_max = Some(4),
            |f| f.area_min = Some(1200.0),
            |f| f.amenities = vec!["tennis".into()],
        ];
        for set in cases {
            let mut f = FilterSet::default();
            set(&mut f);
            assert!(!f.matches(&l), "{f:?} should not match");
        }
    }

    #[test]
    fn test_missing_attribute_fails_constraint() {
        let mut l = listing();
        l.price = None;
        let f = FilterSet {
            price_max: Some(2_000_000.0),
            ..Default::default()
        };
        assert!(!f.matches(&l));
        assert!(FilterSet::default().matches(&l));
    }

    #[test]
    fn test_uncompleted_listings_excluded() {
        let mut l = listing();
        l.is_completed = false;
        assert!(!FilterSet::default().matches(&l));
    }

    #[test]
    fn test_validate_rejects_inverted_price() {
        let f = FilterSet {
            price_min: Some(2.0),
            price_max: Some(1.0),
            ..Default::default()
        };
        assert!(matches!(f.validate(), Err(IntentError::PriceRange { .. })));
        assert!(FilterSet::default().validate().is_ok());
    }

    #[test]
    fn test_mrt_minutes_to_meters() {
        let f = FilterSet {
            mrt_distance_max: Some(10),
            ..Default::default()
        };
        assert_eq!(f.mrt_distance_max_m(), Some(800));
    }
}
