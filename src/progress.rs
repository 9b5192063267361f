//! Search progress reporting for the CLI.
//!
//! Renders the streaming search events (see [`crate::events`]) so users can
//! watch the model think, see what it understood, and know when results are
//! in. Progress goes to **stderr** so stdout stays parseable for scripts.

use std::io::Write;

use propsearch_core::intent::Intent;

use crate::events::{EventFrame, ProgressEvent};

/// Renders progress events. Implementations write to stderr.
pub trait ProgressRenderer: Send {
    fn render(&mut self, frame: &EventFrame);
}

/// Which inline section the human renderer is currently printing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Inline {
    None,
    Thinking,
    Content,
}

/// Human-friendly progress on stderr.
///
/// Thinking and answer text are printed inline as they stream in.
pub struct StderrProgress {
    inline: Inline,
}

impl StderrProgress {
    pub fn new() -> Self {
        Self {
            inline: Inline::None,
        }
    }

    fn enter(&mut self, out: &mut impl Write, section: Inline, label: &str) {
        if self.inline == section {
            return;
        }
        self.leave(out);
        let _ = write!(out, "{}: ", label);
        self.inline = section;
    }

    fn leave(&mut self, out: &mut impl Write) {
        if self.inline != Inline::None {
            let _ = writeln!(out);
            self.inline = Inline::None;
        }
    }
}

impl Default for StderrProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressRenderer for StderrProgress {
    fn render(&mut self, frame: &EventFrame) {
        let stderr = std::io::stderr();
        let mut out = stderr.lock();

        match &frame.event {
            ProgressEvent::Start { query, .. } => {
                let _ = writeln!(out, "search \"{}\"", query);
            }
            ProgressEvent::Parsing { provider, model } => match (provider, model) {
                (Some(p), Some(m)) => {
                    let _ = writeln!(out, "parsing  {} ({})", p, m);
                }
                _ => {
                    let _ = writeln!(out, "parsing  chat provider disabled, keyword search only");
                }
            },
            ProgressEvent::Thinking { text } => {
                self.enter(&mut out, Inline::Thinking, "thinking");
                let _ = write!(out, "{}", text);
            }
            ProgressEvent::Content { text } => {
                self.enter(&mut out, Inline::Content, "answer");
                let _ = write!(out, "{}", text);
            }
            ProgressEvent::Intent { intent, fallback } => {
                self.leave(&mut out);
                match fallback {
                    Some(reason) => {
                        let _ = writeln!(out, "intent   none ({})", reason);
                    }
                    None => {
                        let _ = writeln!(out, "intent   {}", describe_intent(intent));
                    }
                }
            }
            ProgressEvent::Searching { .. } => {
                let _ = writeln!(out, "searching...");
            }
            ProgressEvent::Results { total, took_ms, .. } => {
                let _ = writeln!(
                    out,
                    "results  {} matching listings ({} ms)",
                    format_number(*total),
                    took_ms
                );
            }
            ProgressEvent::Done { .. } => {}
            ProgressEvent::Error { code, message } => {
                self.leave(&mut out);
                let _ = writeln!(out, "error    {}: {}", code, message);
            }
        }
        let _ = out.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressRenderer for JsonProgress {
    fn render(&mut self, frame: &EventFrame) {
        let obj = serde_json::json!({
            "event": frame.name(),
            "data": frame.payload(),
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op renderer when progress is disabled.
pub struct NoProgress;

impl ProgressRenderer for NoProgress {
    fn render(&mut self, _frame: &EventFrame) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn renderer(&self) -> Box<dyn ProgressRenderer> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress::new()),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

/// One-line summary of the constraints in `intent`.
pub fn describe_intent(intent: &Intent) -> String {
    let mut parts = Vec::new();
    if let Some(t) = intent.unit_type {
        parts.push(t.to_string());
    }
    if let Some(n) = intent.bedrooms {
        parts.push(format!("{} bed", n));
    }
    if let Some(n) = intent.bathrooms {
        parts.push(format!("{} bath", n));
    }
    if let Some(loc) = &intent.location {
        parts.push(format!("in {}", loc));
    }
    match (intent.price_min, intent.price_max) {
        (Some(min), Some(max)) => {
            parts.push(format!("S${}-{}", format_price(min), format_price(max)))
        }
        (None, Some(max)) => parts.push(format!("under S${}", format_price(max))),
        (Some(min), None) => parts.push(format!("above S${}", format_price(min))),
        (None, None) => {}
    }
    match (intent.area_min, intent.area_max) {
        (Some(min), Some(max)) => parts.push(format!("{}-{} sqft", min, max)),
        (None, Some(max)) => parts.push(format!("up to {} sqft", max)),
        (Some(min), None) => parts.push(format!("from {} sqft", min)),
        (None, None) => {}
    }
    if let Some(m) = intent.mrt_distance_max {
        parts.push(format!("<= {} min to MRT", m));
    }
    if let Some(y) = intent.build_year_min {
        parts.push(format!("built {}+", y));
    }
    for a in intent.amenities.iter().chain(&intent.facilities) {
        parts.push(format!("with {}", a));
    }
    if parts.is_empty() {
        parts.push("no structured constraints".to_string());
    }
    format!("{} (confidence {:.2})", parts.join(", "), intent.confidence)
}

/// Whole-dollar price with thousands separators.
pub fn format_price(price: f64) -> String {
    format_number(price.round() as i64)
}

fn format_number(n: i64) -> String {
    let s = n.unsigned_abs().to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3 + 1);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    if n < 0 {
        result.push('-');
    }
    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use propsearch_core::models::UnitType;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
        assert_eq!(format_number(-1500), "-1,500");
    }

    #[test]
    fn format_price_rounds() {
        assert_eq!(format_price(1_499_999.6), "1,500,000");
    }

    #[test]
    fn describe_constrained_intent() {
        let intent = Intent {
            unit_type: Some(UnitType::Condo),
            bedrooms: Some(3),
            location: Some("Punggol".to_string()),
            price_max: Some(1_500_000.0),
            confidence: 0.9,
            ..Intent::empty("q")
        };
        assert_eq!(
            describe_intent(&intent),
            "Condo, 3 bed, in Punggol, under S$1,500,000 (confidence 0.90)"
        );
    }

    #[test]
    fn describe_empty_intent() {
        assert_eq!(
            describe_intent(&Intent::empty("q")),
            "no structured constraints (confidence 0.00)"
        );
    }
}
