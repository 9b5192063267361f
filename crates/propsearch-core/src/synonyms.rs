//! Amenity and facility synonym expansion.
//!
//! Users and models say "pool"; listings say "Swimming pool". Each filter
//! term is mapped through a [`SynonymTable`] to the label listings use,
//! and unknown terms fall back to a title-cased literal.

use std::collections::HashMap;

const BUILTIN: &[(&str, &str)] = &[
    ("pool", "Swimming pool"),
    ("swimming", "Swimming pool"),
    ("swimming pool", "Swimming pool"),
    ("gym", "Gym"),
    ("gymnasium", "Gym"),
    ("fitness", "Gym"),
    ("bbq", "BBQ pit"),
    ("barbecue", "BBQ pit"),
    ("bbq pit", "BBQ pit"),
    ("tennis", "Tennis court"),
    ("tennis court", "Tennis court"),
    ("playground", "Playground"),
    ("kids", "Playground"),
    ("security", "24-hour security"),
    ("24h security", "24-hour security"),
    ("guard", "24-hour security"),
    ("parking", "Car park"),
    ("carpark", "Car park"),
    ("car park", "Car park"),
    ("jacuzzi", "Jacuzzi"),
    ("spa", "Jacuzzi"),
    ("sauna", "Sauna"),
    ("clubhouse", "Clubhouse"),
    ("function room", "Function room"),
    ("aircon", "Air-conditioning"),
    ("air con", "Air-conditioning"),
    ("air-conditioning", "Air-conditioning"),
    ("balcony", "Balcony"),
    ("school", "Near school"),
    ("schools", "Near school"),
    ("mall", "Near mall"),
    ("shopping", "Near mall"),
];

/// Lower-cased term → canonical listing label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynonymTable {
    entries: HashMap<String, String>,
}

impl SynonymTable {
    /// The built-in table.
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Built-in table with `overrides` added on top. Override keys are
    /// case-insensitive and replace built-in entries.
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Self {
        let mut table = Self::builtin();
        for (term, label) in overrides {
            let term = term.trim().to_lowercase();
            let label = label.trim();
            if !term.is_empty() && !label.is_empty() {
                table.entries.insert(term, label.to_string());
            }
        }
        table
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical label for one term.
    pub fn expand(&self, term: &str) -> String {
        let key = term.trim().to_lowercase();
        match self.entries.get(&key) {
            Some(label) => label.clone(),
            None => title_case(term.trim()),
        }
    }

    /// Expand every term, dropping blanks and duplicates (first wins).
    pub fn expand_all(&self, terms: &[String]) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(terms.len());
        for term in terms {
            if term.trim().is_empty() {
                continue;
            }
            let label = self.expand(term);
            if !out.iter().any(|existing| existing.eq_ignore_ascii_case(&label)) {
                out.push(label);
            }
        }
        out
    }
}

impl Default for SynonymTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Upper-case the first letter of each whitespace-separated word and
/// lower-case the rest.
pub fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
