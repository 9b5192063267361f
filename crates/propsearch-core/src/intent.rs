//! Structured search intent and its validation.
//!
//! An [`Intent`] is what the language model understood from a free-text
//! query. Model output is read leniently (snake_case or camelCase keys,
//! `"1.5M"`-style numbers, comma-separated lists) but validated strictly:
//! an out-of-range value rejects the whole intent rather than being
//! clamped or swapped.
//!
//! [`interpret`] is the pure decision at the end of an intent call: take the
//! accumulated answer text, recover JSON, validate, and either produce an
//! [`IntentOutcome::Extracted`] or an explicit [`IntentOutcome::Fallback`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::extract::{extract, JsonShape};
use crate::models::UnitType;

/// Confidence assumed when the model omits one.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

pub const MAX_ROOMS: i64 = 10;
pub const MAX_MRT_MINUTES: i64 = 60;
pub const MIN_BUILD_YEAR: i64 = 1900;
pub const MAX_BUILD_YEAR: i64 = 2100;
pub const MIN_LOCATION_CHARS: usize = 2;
pub const MAX_LOCATION_CHARS: usize = 100;

/// Structured understanding of a free-text query.
///
/// Every field is either absent (unconstrained) or within its domain range.
/// Prices are in SGD; `mrt_distance_max` is in minutes of walking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bedrooms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bathrooms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_type: Option<UnitType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mrt_distance_max: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_year_min: Option<i64>,
    #[serde(default)]
    pub amenities: Vec<String>,
    #[serde(default)]
    pub facilities: Vec<String>,
    #[serde(default, rename = "semanticKeywords", alias = "keywords")]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum IntentError {
    #[error("intent must be a JSON object")]
    NotAnObject,
    #[error("field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("unknown unit type '{0}' (expected HDB, Condo, Landed or Executive)")]
    UnknownUnitType(String),
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("price_min ({min}) is greater than price_max ({max})")]
    PriceRange { min: f64, max: f64 },
    #[error("area_min ({min}) is greater than area_max ({max})")]
    AreaRange { min: f64, max: f64 },
    #[error("location must be 2-100 characters, got {0}")]
    LocationLength(usize),
}

impl Intent {
    /// The intent used when nothing could be understood: no constraints,
    /// the raw query as the only keyword, and zero confidence.
    pub fn empty(query: &str) -> Self {
        let query = query.trim();
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
            keywords: if query.is_empty() {
                Vec::new()
            } else {
                vec![query.to_string()]
            },
            confidence: 0.0,
        }
    }

    /// Read an intent from recovered model JSON and validate it.
    pub fn from_json(value: &Value) -> Result<Self, IntentError> {
        let obj = value.as_object().ok_or(IntentError::NotAnObject)?;
        let fields = Fields(obj);

        let intent = Self {
            price_min: fields.decimal("price_min", &["price_min", "priceMin", "min_price"])?,
            price_max: fields.decimal("price_max", &["price_max", "priceMax", "max_price"])?,
            bedrooms: fields.integer("bedrooms", &["bedrooms", "beds", "bedroom"])?,
            bathrooms: fields.integer("bathrooms", &["bathrooms", "baths", "bathroom"])?,
            area_min: fields.decimal("area_min", &["area_min", "areaMin", "min_area"])?,
            area_max: fields.decimal("area_max", &["area_max", "areaMax", "max_area"])?,
            unit_type: fields.unit_type(&["unit_type", "unitType", "property_type"])?,
            location: fields.text("location", &["location", "district", "town"])?,
            mrt_distance_max: fields.integer(
                "mrt_distance_max",
                &["mrt_distance_max", "mrtDistanceMax", "max_mrt_distance"],
            )?,
            build_year_min: fields.integer(
                "build_year_min",
                &["build_year_min", "buildYearMin", "min_build_year"],
            )?,
            amenities: fields.list("amenities", &["amenities"])?,
            facilities: fields.list("facilities", &["facilities"])?,
            keywords: fields.list(
                "keywords",
                &["semantic_keywords", "semanticKeywords", "keywords"],
            )?,
            confidence: fields
                .decimal("confidence", &["confidence"])?
                .unwrap_or(DEFAULT_CONFIDENCE),
        };

        intent.validate()?;
        Ok(intent)
    }

    /// Check every business rule. Never modifies the intent.
    pub fn validate(&self) -> Result<(), IntentError> {
        for (field, value) in [
            ("price_min", self.price_min),
            ("price_max", self.price_max),
            ("area_min", self.area_min),
            ("area_max", self.area_max),
        ] {
            if let Some(v) = value {
                if v < 0.0 {
                    return Err(IntentError::OutOfRange {
                        field,
                        value: v,
                        min: 0.0,
                        max: f64::INFINITY,
                    });
                }
            }
        }
        if let (Some(min), Some(max)) = (self.price_min, self.price_max) {
            if min > max {
                return Err(IntentError::PriceRange { min, max });
            }
        }
        if let (Some(min), Some(max)) = (self.area_min, self.area_max) {
            if min > max {
                return Err(IntentError::AreaRange { min, max });
            }
        }

        check_range("bedrooms", self.bedrooms, 0, MAX_ROOMS)?;
        check_range("bathrooms", self.bathrooms, 0, MAX_ROOMS)?;
        check_range("mrt_distance_max", self.mrt_distance_max, 0, MAX_MRT_MINUTES)?;
        check_range(
            "build_year_min",
            self.build_year_min,
            MIN_BUILD_YEAR,
            MAX_BUILD_YEAR,
        )?;

        if let Some(location) = &self.location {
            let len = location.chars().count();
            if !(MIN_LOCATION_CHARS..=MAX_LOCATION_CHARS).contains(&len) {
                return Err(IntentError::LocationLength(len));
            }
        }

        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(IntentError::OutOfRange {
                field: "confidence",
                value: self.confidence,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(())
    }

    /// Whether the intent constrains anything beyond keywords.
    pub fn has_constraints(&self) -> bool {
        self.price_min.is_some()
            || self.price_max.is_some()
            || self.bedrooms.is_some()
            || self.bathrooms.is_some()
            || self.area_min.is_some()
            || self.area_max.is_some()
            || self.unit_type.is_some()
            || self.location.is_some()
            || self.mrt_distance_max.is_some()
            || self.build_year_min.is_some()
            || !self.amenities.is_empty()
            || !self.facilities.is_empty()
    }
}

fn check_range(
    field: &'static str,
    value: Option<i64>,
    min: i64,
    max: i64,
) -> Result<(), IntentError> {
    match value {
        Some(v) if v < min || v > max => Err(IntentError::OutOfRange {
            field,
            value: v as f64,
            min: min as f64,
            max: max as f64,
        }),
        _ => Ok(()),
    }
}

/// Lenient accessors over a model-produced JSON object.
struct Fields<'a>(&'a Map<String, Value>);

impl<'a> Fields<'a> {
    /// First non-null value among `keys`.
    fn get(&self, keys: &[&str]) -> Option<&'a Value> {
        keys.iter()
            .filter_map(|k| self.0.get(*k))
            .find(|v| !v.is_null())
    }

    fn decimal(&self, field: &'static str, keys: &[&str]) -> Result<Option<f64>, IntentError> {
        let Some(value) = self.get(keys) else {
            return Ok(None);
        };
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) if s.trim().is_empty() => return Ok(None),
            Value::String(s) => parse_amount(s),
            _ => None,
        };
        match parsed {
            Some(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(IntentError::InvalidField {
                field,
                reason: format!("expected a number, got {value}"),
            }),
        }
    }

    fn integer(&self, field: &'static str, keys: &[&str]) -> Result<Option<i64>, IntentError> {
        match self.decimal(field, keys)? {
            None => Ok(None),
            Some(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Ok(Some(v as i64)),
            Some(v) => Err(IntentError::InvalidField {
                field,
                reason: format!("expected a whole number, got {v}"),
            }),
        }
    }

    fn text(&self, field: &'static str, keys: &[&str]) -> Result<Option<String>, IntentError> {
        match self.get(keys) {
            None => Ok(None),
            Some(Value::String(s)) => {
                let s = s.trim();
                Ok((!s.is_empty()).then(|| s.to_string()))
            }
            Some(other) => Err(IntentError::InvalidField {
                field,
                reason: format!("expected a string, got {other}"),
            }),
        }
    }

    fn unit_type(&self, keys: &[&str]) -> Result<Option<UnitType>, IntentError> {
        match self.text("unit_type", keys)? {
            None => Ok(None),
            Some(s) => s.parse().map(Some).map_err(IntentError::UnknownUnitType),
        }
    }

    fn list(&self, field: &'static str, keys: &[&str]) -> Result<Vec<String>, IntentError> {
        let items: Vec<String> = match self.get(keys) {
            None => Vec::new(),
            Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            Some(other) => {
                return Err(IntentError::InvalidField {
                    field,
                    reason: format!("expected a list of strings, got {other}"),
                })
            }
        };
        Ok(items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }
}

/// Parse amounts such as `"1.5M"`, `"800k"`, `"S$1,200,000"`.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches("S$")
        .trim_start_matches('$')
        .chars()
        .filter(|c| *c != ',' && *c != '_' && !c.is_whitespace())
        .collect();
    let lower = cleaned.to_ascii_lowercase();
    let (digits, multiplier) = if let Some(d) = lower.strip_suffix('k') {
        (d, 1_000.0)
    } else if let Some(d) = lower.strip_suffix('m') {
        (d, 1_000_000.0)
    } else if let Some(d) = lower.strip_suffix('b') {
        (d, 1_000_000_000.0)
    } else {
        (lower.as_str(), 1.0)
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-') {
        return None;
    }
    digits.parse::<f64>().ok().map(|v| v * multiplier)
}

/// Why an intent call degraded to the empty intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FallbackReason {
    /// No chat provider is configured.
    Disabled,
    Provider(String),
    Extraction(String),
    Validation(String),
    Cancelled,
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FallbackReason::Disabled => write!(f, "chat provider disabled"),
            FallbackReason::Provider(e) => write!(f, "provider error: {e}"),
            FallbackReason::Extraction(e) => write!(f, "extraction failed: {e}"),
            FallbackReason::Validation(e) => write!(f, "validation failed: {e}"),
            FallbackReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of an intent call. Failures are values, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum IntentOutcome {
    Extracted(Intent),
    Fallback { intent: Intent, reason: FallbackReason },
}

impl IntentOutcome {
    pub fn fallback(query: &str, reason: FallbackReason) -> Self {
        IntentOutcome::Fallback {
            intent: Intent::empty(query),
            reason,
        }
    }

    pub fn intent(&self) -> &Intent {
        match self {
            IntentOutcome::Extracted(intent) => intent,
            IntentOutcome::Fallback { intent, .. } => intent,
        }
    }

    pub fn into_intent(self) -> Intent {
        match self {
            IntentOutcome::Extracted(intent) => intent,
            IntentOutcome::Fallback { intent, .. } => intent,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, IntentOutcome::Fallback { .. })
    }

    pub fn fallback_reason(&self) -> Option<&FallbackReason> {
        match self {
            IntentOutcome::Extracted(_) => None,
            IntentOutcome::Fallback { reason, .. } => Some(reason),
        }
    }
}

/// Turn a model's accumulated answer text into an intent outcome.
pub fn interpret(answer_text: &str, query: &str) -> IntentOutcome {
    let value = match extract(answer_text, JsonShape::Object) {
        Ok(v) => v,
        Err(e) => return IntentOutcome::fallback(query, FallbackReason::Extraction(e.to_string())),
    };
    match Intent::from_json(&value) {
        Ok(mut intent) => {
            if intent.keywords.is_empty() {
                intent.keywords = Intent::empty(query).keywords;
            }
            IntentOutcome::Extracted(intent)
        }
        Err(e) => IntentOutcome::fallback(query, FallbackReason::Validation(e.to_string())),
    }
}
