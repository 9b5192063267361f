//! Structured-output recovery from model text.
//!
//! Models asked for "JSON only" still wrap answers in prose, markdown fences,
//! or emit small syntax defects. [`extract`] recovers a single JSON value
//! without ever guessing: every candidate is fully parsed by `serde_json`
//! and checked against the requested [`JsonShape`].
//!
//! # Algorithm
//!
//! Applied in order, stopping at the first success:
//!
//! 1. Parse the whole text.
//! 2. Parse the body of each fenced code block (```` ```json ```` or ```` ``` ````).
//! 3. Parse balanced `{...}` / `[...]` spans, left to right. Brackets inside
//!    string literals are ignored. An unterminated or mismatched span ends
//!    the scan.
//! 4. [`repair`] the text (BOM, trailing commas, bare keys, single quotes,
//!    control characters) and run steps 1-3 again.
//!
//! # Example
//!
//! ```rust
//! use propsearch_core::extract::{extract, JsonShape};
//!
//! let value = extract("Sure! ```json\n{\"bedrooms\": 3,}\n```", JsonShape::Object).unwrap();
//! assert_eq!(value["bedrooms"], 3);
//! ```

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Maximum characters of input kept in an error preview.
pub const PREVIEW_CHARS: usize = 200;

/// The kind of JSON value a caller expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonShape {
    Object,
    Array,
    /// An object or an array. Bare scalars are never accepted.
    Any,
}

impl JsonShape {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            JsonShape::Object => value.is_object(),
            JsonShape::Array => value.is_array(),
            JsonShape::Any => value.is_object() || value.is_array(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            JsonShape::Object => "JSON object",
            JsonShape::Array => "JSON array",
            JsonShape::Any => "JSON object or array",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("model output is empty")]
    Empty,
    #[error("no {shape} could be recovered from model output: {preview:?}")]
    NotFound { shape: &'static str, preview: String },
    #[error("recovered JSON does not fit the target type: {0}")]
    Mismatch(String),
}

/// Recover a JSON value of the given shape from arbitrary text.
pub fn extract(text: &str, shape: JsonShape) -> Result<Value, ExtractionError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ExtractionError::Empty);
    }

    if let Some(value) = recover(trimmed, shape) {
        return Ok(value);
    }

    let repaired = repair(trimmed);
    if repaired != trimmed {
        if let Some(value) = recover(repaired.trim(), shape) {
            return Ok(value);
        }
    }

    Err(ExtractionError::NotFound {
        shape: shape.name(),
        preview: preview(text),
    })
}

/// Recover a JSON object and deserialize it into `T`.
pub fn extract_as<T: DeserializeOwned>(text: &str) -> Result<T, ExtractionError> {
    let value = extract(text, JsonShape::Object)?;
    serde_json::from_value(value).map_err(|e| ExtractionError::Mismatch(e.to_string()))
}

/// Truncate `text` to [`PREVIEW_CHARS`] characters for diagnostics.
pub fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        out.push('…');
    }
    out
}

fn recover(text: &str, shape: JsonShape) -> Option<Value> {
    parse_candidate(text, shape)
        .or_else(|| {
            fenced_blocks(text)
                .into_iter()
                .find_map(|block| parse_candidate(block, shape))
        })
        .or_else(|| {
            balanced_spans(text)
                .into_iter()
                .find_map(|span| parse_candidate(span, shape))
        })
}

fn parse_candidate(candidate: &str, shape: JsonShape) -> Option<Value> {
    let value: Value = serde_json::from_str(candidate.trim()).ok()?;
    shape.accepts(&value).then_some(value)
}

/// Bodies of closed markdown code fences, in order of appearance.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        // An info string ("json", "JSON5", ...) runs to the end of the line.
        let body_start = match after.find('\n') {
            Some(nl) if after[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => nl + 1,
            _ => 0,
        };
        let body = &after[body_start..];
        match body.find("```") {
            Some(close) => {
                blocks.push(&body[..close]);
                rest = &body[close + 3..];
            }
            None => break,
        }
    }
    blocks
}

/// Top-level balanced bracket spans, in order of appearance.
///
/// Spans are not descended into: a malformed outer object never yields its
/// inner objects as candidates. Scanning stops at the first opener that is
/// never closed or closed by the wrong bracket, since everything after it
/// belongs to that broken value.
fn balanced_spans(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' || bytes[i] == b'[' {
            match span_end(bytes, i) {
                SpanEnd::Closed(end) => {
                    spans.push(&text[i..end]);
                    i = end;
                    continue;
                }
                SpanEnd::Mismatched | SpanEnd::Unterminated => break,
            }
        }
        i += 1;
    }
    spans
}

enum SpanEnd {
    Closed(usize),
    Mismatched,
    Unterminated,
}

fn span_end(bytes: &[u8], start: usize) -> SpanEnd {
    let mut expected: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => expected.push(b'}'),
            b'[' => expected.push(b']'),
            b'}' | b']' => {
                if expected.pop() != Some(b) {
                    return SpanEnd::Mismatched;
                }
                if expected.is_empty() {
                    return SpanEnd::Closed(i + 1);
                }
            }
            _ => {}
        }
    }
    SpanEnd::Unterminated
}

/// Apply light syntax repairs outside of double-quoted strings.
///
/// - strip a leading byte-order mark
/// - drop trailing commas before `}` / `]`
/// - quote bare identifier keys: `{key: 1}` → `{"key": 1}`
/// - convert single-quoted strings in value/key position to double quotes
/// - escape raw newlines and tabs inside strings, drop other control characters
pub fn repair(text: &str) -> String {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    // Last non-whitespace character written, used to decide whether a quote
    // or identifier sits in a JSON key/value position.
    let mut prev: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' => {
                i = copy_string(&chars, i, '"', &mut out);
                prev = Some('"');
                continue;
            }
            '\'' if matches!(prev, Some('{' | '[' | ',' | ':')) => {
                i = copy_string(&chars, i, '\'', &mut out);
                prev = Some('"');
                continue;
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}' | ']')) {
                    out.push(',');
                    prev = Some(',');
                }
            }
            c if is_ident_start(c) && matches!(prev, Some('{' | ',')) => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                let next = chars[i..].iter().find(|ch| !ch.is_whitespace());
                if next == Some(&':') {
                    out.push('"');
                    out.push_str(&ident);
                    out.push('"');
                    prev = Some('"');
                } else {
                    out.push_str(&ident);
                    prev = ident.chars().last();
                }
                continue;
            }
            c if c.is_control() && !matches!(c, '\n' | '\r' | '\t') => {}
            c => {
                out.push(c);
                if !c.is_whitespace() {
                    prev = Some(c);
                }
            }
        }
        i += 1;
    }

    out
}

/// Copy a string literal opened by `quote` at `start` as a double-quoted
/// JSON string. Returns the index just past the closing quote (or the end
/// of input when unterminated).
fn copy_string(chars: &[char], start: usize, quote: char, out: &mut String) -> usize {
    out.push('"');
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' if i + 1 < chars.len() => {
                let next = chars[i + 1];
                if quote == '\'' && next == '\'' {
                    out.push('\'');
                } else {
                    out.push('\\');
                    out.push(next);
                }
                i += 2;
                continue;
            }
            c if c == quote => {
                out.push('"');
                return i + 1;
            }
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {}
            c => out.push(c),
        }
        i += 1;
    }
    i
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '-'
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(text: &str) -> Value {
        extract(text, JsonShape::Object).unwrap()
    }

    #[test]
    fn direct_json() {
        assert_eq!(object(r#"{"a": 1}"#), json!({"a": 1}));
        assert_eq!(object("  \n{\"a\": [1, 2]}\n "), json!({"a": [1, 2]}));
    }

    #[test]
    fn object_embedded_in_prose() {
        let text = r#"Here is the result: {"status": "success", "count": 5} and that's it."#;
        assert_eq!(object(text), json!({"status": "success", "count": 5}));
    }

    #[test]
    fn fenced_block_with_language_tag() {
        let text = "Sure, here you go:\n```json\n{\"bedrooms\": 3, \"unit_type\": \"Condo\"}\n```\nLet me know!";
        assert_eq!(object(text), json!({"bedrooms": 3, "unit_type": "Condo"}));
    }

    #[test]
    fn fenced_block_without_language_tag() {
        let text = "```\n{\"location\": \"Punggol\"}\n```";
        assert_eq!(object(text), json!({"location": "Punggol"}));
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let text = r#"Output: {"note": "use {curly} and ] brackets", "n": 1} done"#;
        assert_eq!(
            object(text),
            json!({"note": "use {curly} and ] brackets", "n": 1})
        );
    }

    #[test]
    fn escaped_quotes_inside_strings() {
        let text = r#"x {"q": "say \"hi\" {", "ok": true} y"#;
        assert_eq!(object(text), json!({"q": "say \"hi\" {", "ok": true}));
    }

    #[test]
    fn skips_spans_of_the_wrong_shape() {
        let text = r#"See note [1]. Answer: {"price_max": 1500000}"#;
        assert_eq!(object(text), json!({"price_max": 1500000}));
        assert_eq!(extract(text, JsonShape::Array).unwrap(), json!([1]));
    }

    #[test]
    fn trailing_commas_are_removed() {
        assert_eq!(object(r#"{"a": [1, 2,], "b": 2,}"#), json!({"a": [1, 2], "b": 2}));
    }

    #[test]
    fn bare_keys_are_quoted() {
        assert_eq!(
            object("{bedrooms: 3, unit_type: \"HDB\", near_mrt: true}"),
            json!({"bedrooms": 3, "unit_type": "HDB", "near_mrt": true})
        );
    }

    #[test]
    fn single_quotes_are_normalized() {
        assert_eq!(
            object("{'location': 'Tampines', 'amenities': ['pool', 'gym']}"),
            json!({"location": "Tampines", "amenities": ["pool", "gym"]})
        );
        assert_eq!(
            object(r#"{'note': 'he said "hi"', 'x': 'it\'s'}"#),
            json!({"note": "he said \"hi\"", "x": "it's"})
        );
    }

    #[test]
    fn apostrophes_in_prose_survive_repair() {
        let text = "Here's what I found: {location: 'Bishan',} that's all";
        assert_eq!(object(text), json!({"location": "Bishan"}));
    }

    #[test]
    fn bom_and_control_characters() {
        let text = "\u{feff}{\"a\":\u{0007} 1}";
        assert_eq!(object(text), json!({"a": 1}));
    }

    #[test]
    fn raw_newlines_inside_strings_are_escaped() {
        let text = "{\"description\": \"line one\nline two\"}";
        assert_eq!(object(text), json!({"description": "line one\nline two"}));
    }

    #[test]
    fn repairs_inside_fences() {
        let text = "```json\n{bedrooms: 2, 'unit_type': 'HDB',}\n```";
        assert_eq!(object(text), json!({"bedrooms": 2, "unit_type": "HDB"}));
    }

    #[test]
    fn matches_strict_parse_of_cleaned_equivalent() {
        let messy = "```json\n{price_min: 800000, 'tags': ['a', 'b',],}\n```";
        let clean = r#"{"price_min": 800000, "tags": ["a", "b"]}"#;
        let strict: Value = serde_json::from_str(clean).unwrap();
        assert_eq!(object(messy), strict);
    }

    #[test]
    fn plain_prose_is_an_error() {
        let err = extract("I could not understand the query.", JsonShape::Object).unwrap_err();
        assert!(matches!(err, ExtractionError::NotFound { .. }));
    }

    #[test]
    fn scalars_are_not_objects() {
        assert!(extract("42", JsonShape::Object).is_err());
        assert!(extract("\"text\"", JsonShape::Any).is_err());
        assert!(extract("true", JsonShape::Any).is_err());
    }

    #[test]
    fn truncated_json_never_yields_inner_objects() {
        let text = r#"{"location": {"name": "Punggol"}, "bedrooms": "#;
        assert!(extract(text, JsonShape::Object).is_err());
    }

    #[test]
    fn malformed_outer_object_does_not_leak_inner_object() {
        let text = r#"{"a": {"b": 1} "c" 2}"#;
        assert!(extract(text, JsonShape::Object).is_err());
    }

    #[test]
    fn mismatched_closer_does_not_leak_inner_object() {
        let text = r#"Answer: {"bedrooms": 3, "location": {"name": "Punggol"}] done"#;
        assert!(extract(text, JsonShape::Object).is_err());
        assert!(extract(r#"{"a": {"b": 1}]"#, JsonShape::Object).is_err());
    }

    #[test]
    fn empty_input() {
        assert_eq!(extract("   ", JsonShape::Object), Err(ExtractionError::Empty));
    }

    #[test]
    fn error_preview_is_truncated() {
        let long = "x".repeat(1000);
        match extract(&long, JsonShape::Object).unwrap_err() {
            ExtractionError::NotFound { preview, .. } => {
                assert_eq!(preview.chars().count(), PREVIEW_CHARS + 1);
                assert!(preview.ends_with('…'));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn extract_as_typed() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Status {
            status: String,
            count: u32,
        }
        let parsed: Status = extract_as("ok: {\"status\": \"success\", \"count\": 5}").unwrap();
        assert_eq!(
            parsed,
            Status {
                status: "success".to_string(),
                count: 5
            }
        );
        assert!(matches!(
            extract_as::<Status>("{\"status\": 1}"),
            Err(ExtractionError::Mismatch(_))
        ));
    }
}
