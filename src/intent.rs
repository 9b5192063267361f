//! Intent service: free-text query → validated [`Intent`].
//!
//! Drives a one-shot or streaming chat call, forwards streamed reasoning and
//! answer text to an [`IntentObserver`], and turns the accumulated answer
//! into an [`IntentOutcome`]. Every failure (disabled provider, transport,
//! unparseable or invalid output, cancellation) degrades to the empty
//! intent and is logged, never returned as an error.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use propsearch_core::extract::preview;
use propsearch_core::intent::{interpret, FallbackReason, IntentOutcome};

use crate::config::Config;
use crate::llm::ChatProvider;

/// Instruction sent as the system message of every intent call.
pub const SYSTEM_PROMPT: &str = r#"You convert Singapore real-estate search queries into a JSON object.

Fields (omit any the user did not mention):
- price_min, price_max: number, SGD. "1.5M" = 1500000, "800k" = 800000. "under X" sets price_max, "above X" sets price_min.
- bedrooms, bathrooms: integer 0-10. HDB flat types count the living room: "3 room" = 2 bedrooms, "4 room" = 3, "5 room" = 3 plus a study.
- area_min, area_max: number, square feet.
- unit_type: one of "HDB", "Condo", "Landed", "Executive".
- location: town, estate or district name, e.g. "Punggol", "Tampines", "District 15".
- mrt_distance_max: integer 0-60, maximum WALKING MINUTES to the nearest MRT station. "near MRT" = 10.
- build_year_min: integer year, e.g. "new" or "recent" = 2015.
- amenities: list of short strings, e.g. ["pool", "gym"].
- facilities: list of short strings, e.g. ["playground", "parking"].
- semantic_keywords: list of remaining descriptive words useful for text search, e.g. ["quiet", "high floor"].
- confidence: number 0-1, how sure you are about the extraction.

Examples:
Query: 3 bedroom condo in Punggol under 1.5M
{"bedrooms": 3, "unit_type": "Condo", "location": "Punggol", "price_max": 1500000, "confidence": 0.95}

Query: cheap HDB near MRT with a gym
{"unit_type": "HDB", "mrt_distance_max": 10, "amenities": ["gym"], "semantic_keywords": ["cheap"], "confidence": 0.8}

Query: landed house built after 2010 between 3M and 4.5M
{"unit_type": "Landed", "build_year_min": 2010, "price_min": 3000000, "price_max": 4500000, "confidence": 0.9}

Answer with the JSON object only. No prose, no markdown."#;

/// Receives streamed text as it arrives.
///
/// Returning `false` means the consumer has gone away and the intent call
/// should stop.
#[async_trait]
pub trait IntentObserver: Send {
    async fn thinking(&mut self, text: &str) -> bool;
    async fn content(&mut self, text: &str) -> bool;
}

/// Observer that ignores everything.
pub struct NoopObserver;

#[async_trait]
impl IntentObserver for NoopObserver {
    async fn thinking(&mut self, _text: &str) -> bool {
        true
    }
    async fn content(&mut self, _text: &str) -> bool {
        true
    }
}

#[derive(Clone)]
pub struct IntentService {
    provider: Option<Arc<dyn ChatProvider>>,
}

impl IntentService {
    pub fn new(provider: Option<Arc<dyn ChatProvider>>) -> Self {
        Self { provider }
    }

    pub fn disabled() -> Self {
        Self { provider: None }
    }

    pub fn provider(&self) -> Option<&Arc<dyn ChatProvider>> {
        self.provider.as_ref()
    }

    /// One-shot parse using the provider's JSON mode.
    pub async fn parse(&self, query: &str) -> IntentOutcome {
        let Some(provider) = &self.provider else {
            return IntentOutcome::fallback(query, FallbackReason::Disabled);
        };

        match provider.complete(SYSTEM_PROMPT, query, true).await {
            Ok(answer) => finish(&answer, query),
            Err(e) => degrade(query, FallbackReason::Provider(e.to_string())),
        }
    }

    /// Streaming parse. Reasoning and answer increments are forwarded to
    /// `observer` as they arrive; the answer is accumulated locally and
    /// interpreted once the stream completes.
    pub async fn parse_streaming(
        &self,
        query: &str,
        observer: &mut dyn IntentObserver,
        cancel: &CancellationToken,
    ) -> IntentOutcome {
        let Some(provider) = &self.provider else {
            return IntentOutcome::fallback(query, FallbackReason::Disabled);
        };

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return cancelled(query),
            opened = provider.complete_stream(SYSTEM_PROMPT, query) => opened,
        };
        let mut stream = match opened {
            Ok(s) => s,
            Err(e) => return degrade(query, FallbackReason::Provider(e.to_string())),
        };

        let mut answer = String::new();
        let mut frames = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return cancelled(query),
                next = stream.next() => next,
            };
            let chunk = match next {
                None => break,
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return degrade(query, FallbackReason::Provider(e.to_string())),
            };
            frames += 1;

            if !chunk.reasoning_text.is_empty() {
                let alive = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => false,
                    alive = observer.thinking(&chunk.reasoning_text) => alive,
                };
                if !alive {
                    return cancelled(query);
                }
            }
            if !chunk.answer_text.is_empty() {
                answer.push_str(&chunk.answer_text);
                let alive = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => false,
                    alive = observer.content(&chunk.answer_text) => alive,
                };
                if !alive {
                    return cancelled(query);
                }
            }
            if chunk.is_final {
                break;
            }
        }

        debug!(frames, answer_len = answer.len(), "Intent stream complete");
        finish(&answer, query)
    }
}

/// CLI entry point for `propsearch intent`: print the parsed intent as JSON.
pub async fn run_intent(config: &Config, query: &str) -> anyhow::Result<()> {
    let query = query.trim();
    if query.is_empty() {
        anyhow::bail!("query must not be empty");
    }
    let service = IntentService::new(crate::llm::create_provider(&config.llm)?);
    let outcome = service.parse(query).await;
    if let Some(reason) = outcome.fallback_reason() {
        eprintln!("No structured intent ({}); falling back to keyword search.", reason);
    }
    println!("{}", serde_json::to_string_pretty(outcome.intent())?);
    Ok(())
}

fn finish(answer: &str, query: &str) -> IntentOutcome {
    let outcome = interpret(answer, query);
    match &outcome {
        IntentOutcome::Extracted(intent) => {
            info!(
                confidence = intent.confidence,
                constrained = intent.has_constraints(),
                "Parsed query intent"
            );
        }
        IntentOutcome::Fallback { reason, .. } => {
            warn!(
                reason = %reason,
                answer = %preview(answer),
                "Intent parsing degraded to keyword search"
            );
        }
    }
    outcome
}

fn degrade(query: &str, reason: FallbackReason) -> IntentOutcome {
    warn!(reason = %reason, "Intent parsing degraded to keyword search");
    IntentOutcome::fallback(query, reason)
}

fn cancelled(query: &str) -> IntentOutcome {
    debug!("Intent call cancelled");
    IntentOutcome::fallback(query, FallbackReason::Cancelled)
}
